use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid source '{source_id}': {reason}")]
    InvalidSource { source_id: String, reason: String },

    #[error("duplicate source id: {0}")]
    DuplicateSourceId(String),

    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    /// Shorthand for a per-source validation failure.
    pub fn invalid_source(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }
}
