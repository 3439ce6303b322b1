//! Entity table DDL generated from source descriptors.
//!
//! System tables (`runs`, `checkpoints`) come from `migrations/`; entity
//! tables are deployment-defined, so their DDL is generated at startup from
//! the validated descriptor. Identifiers are re-checked here before any
//! interpolation — the store trusts nothing it did not validate itself.

use sqlx::PgPool;
use tracing::info;

use cadence_core::source::{is_sql_ident, ColumnType, EntitySchema};

use crate::error::{classify, StoreError};

/// Columns owned by the store on every entity table. Descriptors may not
/// declare these names.
pub const RESERVED_COLUMNS: &[&str] = &["record_version", "loaded_at"];

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Text => "TEXT",
        ColumnType::Integer => "BIGINT",
        ColumnType::Float => "DOUBLE PRECISION",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Timestamp => "TIMESTAMPTZ",
    }
}

/// Check every identifier in the schema, including reserved-name collisions.
pub fn check_identifiers(schema: &EntitySchema) -> Result<(), StoreError> {
    if !is_sql_ident(&schema.table) {
        return Err(StoreError::InvalidIdentifier(schema.table.clone()));
    }
    for col in schema.columns.keys() {
        if !is_sql_ident(col) {
            return Err(StoreError::InvalidIdentifier(col.clone()));
        }
        if RESERVED_COLUMNS.contains(&col.as_str()) {
            return Err(StoreError::InvalidIdentifier(format!(
                "column '{}' collides with a store-owned column",
                col
            )));
        }
    }
    for key in &schema.natural_key {
        if !schema.columns.contains_key(key) {
            return Err(StoreError::InvalidIdentifier(format!(
                "natural key '{}' is not a declared column",
                key
            )));
        }
    }
    Ok(())
}

/// Generate `CREATE TABLE IF NOT EXISTS` DDL for one entity.
///
/// Natural-key columns are NOT NULL and carry a UNIQUE constraint — the
/// uniqueness of the natural key, not ordering, is what prevents cross-source
/// corruption under interleaved batches.
pub fn entity_ddl(schema: &EntitySchema) -> Result<String, StoreError> {
    check_identifiers(schema)?;

    let mut lines: Vec<String> = Vec::with_capacity(schema.columns.len() + 3);
    for (name, ty) in &schema.columns {
        let not_null = if schema.natural_key.contains(name) { " NOT NULL" } else { "" };
        lines.push(format!("    {} {}{}", name, sql_type(*ty), not_null));
    }
    lines.push("    record_version BIGINT NOT NULL".to_string());
    lines.push("    loaded_at TIMESTAMPTZ NOT NULL DEFAULT now()".to_string());
    lines.push(format!("    UNIQUE ({})", schema.natural_key.join(", ")));

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        schema.table,
        lines.join(",\n")
    ))
}

/// Ensure the entity table for one descriptor exists.
pub async fn ensure_entity_table(pool: &PgPool, schema: &EntitySchema) -> Result<(), StoreError> {
    let ddl = entity_ddl(schema)?;
    sqlx::query(&ddl).execute(pool).await.map_err(classify)?;
    info!(table = %schema.table, "entity table ensured");
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────
