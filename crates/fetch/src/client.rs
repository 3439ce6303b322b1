//! HTTP source client and the lazy payload pager.
//!
//! One [`SourceClient`] per configured source; one [`PayloadPager`] per run.
//! The pager walks a page-numbered endpoint in fetch order, throttled to the
//! source's rate limit, retrying transient failures with backoff. It never
//! touches the checkpoint — that belongs to the runner, after commit.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use tracing::warn;

use cadence_core::record::RawPayload;
use cadence_core::source::SourceDescriptor;

use crate::backoff::Backoff;
use crate::error::FetchError;

#[derive(Debug)]
pub struct SourceClient {
    http: Client,
    descriptor: SourceDescriptor,
    token: Option<String>,
    backoff: Backoff,
}

impl SourceClient {
    /// Build a client for one source, resolving credentials from the
    /// configured env var. A missing credential is a permanent failure —
    /// retrying cannot fix configuration.
    pub fn new(descriptor: SourceDescriptor) -> Result<Self, FetchError> {
        let token = match &descriptor.credentials_env {
            Some(var) => match std::env::var(var) {
                Ok(v) if !v.is_empty() => Some(v),
                _ => {
                    return Err(FetchError::permanent(
                        &descriptor.id,
                        format!("credentials env var '{}' is not set", var),
                    ));
                }
            },
            None => None,
        };

        let http = Client::builder()
            .timeout(Duration::from_secs(descriptor.timeout_secs))
            .build()
            .map_err(|e| {
                FetchError::permanent(&descriptor.id, format!("failed to build HTTP client: {}", e))
            })?;

        let backoff = Backoff::from_retry_config(&descriptor.retry);

        Ok(Self { http, descriptor, token, backoff })
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    /// Start a lazy payload sequence, optionally from a checkpoint cursor.
    pub fn pager(&self, since: Option<String>) -> PayloadPager<'_> {
        PayloadPager {
            client: self,
            since,
            page: 0,
            done: false,
            last_call: None,
        }
    }

    /// Build the URL for one page request.
    fn page_url(&self, page: u32, since: Option<&str>) -> Result<url::Url, FetchError> {
        let mut u = url::Url::parse(&self.descriptor.endpoint).map_err(|e| {
            FetchError::permanent(&self.descriptor.id, format!("invalid endpoint URL: {}", e))
        })?;
        {
            let page_cfg = &self.descriptor.page;
            let mut q = u.query_pairs_mut();
            q.append_pair(&page_cfg.page_param, &page.to_string());
            q.append_pair(&page_cfg.per_page_param, &page_cfg.per_page.to_string());
            if let (Some(param), Some(cursor)) = (page_cfg.since_param.as_deref(), since) {
                q.append_pair(param, cursor);
            }
        }
        Ok(u)
    }

    /// One HTTP call, classified but not retried.
    async fn call_once(&self, url: url::Url) -> Result<Vec<u8>, FetchError> {
        let mut req = self.http.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return Err(classify_request_error(&self.descriptor.id, &e)),
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(classify_status(&self.descriptor.id, status));
        }

        resp.bytes().await.map(|b| b.to_vec()).map_err(|e| {
            FetchError::transient(&self.descriptor.id, format!("body read failed: {}", e))
        })
    }

    /// One logical fetch: transient failures retried with backoff + jitter
    /// up to the source's attempt budget.
    async fn fetch_page(&self, page: u32, since: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let url = self.page_url(page, since)?;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.call_once(url.clone()).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() => {
                    if !self.backoff.should_retry(attempt) {
                        return Err(FetchError::RetriesExhausted {
                            source_id: self.descriptor.id.clone(),
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        source_id = %self.descriptor.id,
                        page = page,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fetch failure — retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Classification ──────────────────────────────────────────────────

/// 5xx and 429 are worth retrying; any other non-success status reflects
/// the request (auth, bad path) and will not improve on retry.
fn classify_status(source_id: &str, status: StatusCode) -> FetchError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        FetchError::transient(source_id, format!("HTTP {}", status))
    } else {
        FetchError::permanent(source_id, format!("HTTP {}", status))
    }
}

fn classify_request_error(source_id: &str, e: &reqwest::Error) -> FetchError {
    if e.is_builder() {
        FetchError::permanent(source_id, format!("request build failed: {}", e))
    } else {
        // Timeouts, connect failures, and mid-transfer resets all land here.
        FetchError::transient(source_id, e.to_string())
    }
}

// ── Pager ───────────────────────────────────────────────────────────

/// Lazy, finite sequence of raw payloads for one source.
///
/// Page numbering is 1-based. The sequence ends on a bare empty body; pages
/// that decode to zero records are ended by the runner after transform, since
/// only the shape config knows where the record array lives.
pub struct PayloadPager<'a> {
    client: &'a SourceClient,
    since: Option<String>,
    page: u32,
    done: bool,
    last_call: Option<Instant>,
}

impl PayloadPager<'_> {
    /// Next payload in fetch order; `None` once the source is exhausted.
    pub async fn next(&mut self) -> Result<Option<RawPayload>, FetchError> {
        if self.done {
            return Ok(None);
        }

        let page_cfg = &self.client.descriptor.page;
        if self.page >= page_cfg.max_pages {
            warn!(
                source_id = %self.client.descriptor.id,
                max_pages = page_cfg.max_pages,
                "page cap reached — ending fetch sequence"
            );
            self.done = true;
            return Ok(None);
        }

        self.throttle().await;

        let page_no = self.page + 1;
        let result = self
            .client
            .fetch_page(page_no, self.since.as_deref())
            .await;
        self.last_call = Some(Instant::now());

        let body = match result {
            Ok(b) => b,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        if is_empty_body(&body) {
            self.done = true;
            return Ok(None);
        }

        self.page = page_no;
        let payload = RawPayload::new(self.client.descriptor.id.clone(), page_no, body);
        Ok(Some(payload))
    }

    /// Stop the sequence early (the runner calls this when a page decodes
    /// to zero records).
    pub fn finish(&mut self) {
        self.done = true;
    }

    /// Sleep out the remainder of the source's minimum call spacing.
    async fn throttle(&self) {
        if let Some(last) = self.last_call {
            let min = Duration::from_millis(self.client.descriptor.rate_limit_ms);
            let elapsed = last.elapsed();
            if elapsed < min {
                tokio::time::sleep(min - elapsed).await;
            }
        }
    }
}

/// A body that is empty (or a bare empty collection) ends pagination.
fn is_empty_body(body: &[u8]) -> bool {
    match std::str::from_utf8(body) {
        Ok(s) => {
            let t = s.trim();
            t.is_empty() || t == "[]" || t == "null"
        }
        Err(_) => false,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::source::{
        Cadence, ColumnType, EntitySchema, IntervalCadence, JsonShape, PageConfig, PayloadShape,
        RetryConfig,
    };
    use indexmap::IndexMap;

    fn descriptor() -> SourceDescriptor {
        let mut columns = IndexMap::new();
        columns.insert("activity_id".to_string(), ColumnType::Integer);
        columns.insert("start_date".to_string(), ColumnType::Timestamp);
        SourceDescriptor {
            id: "activities".to_string(),
            name: String::new(),
            endpoint: "https://api.example.com/v3/activities".to_string(),
            credentials_env: None,
            shape: PayloadShape::Json(JsonShape {
                record_path: String::new(),
                timestamp_format: None,
            }),
            cadence: Cadence::Interval(IntervalCadence { secs: 60 }),
            rate_limit_ms: 0,
            timeout_secs: 5,
            retry: RetryConfig::default(),
            page: PageConfig {
                since_param: Some("after".to_string()),
                ..PageConfig::default()
            },
            entity: EntitySchema {
                table: "activities".to_string(),
                columns,
                natural_key: vec!["activity_id".to_string()],
                version_column: Some("start_date".to_string()),
            },
        }
    }

    #[test]
    fn test_page_url_basic() {
        let client = SourceClient::new(descriptor()).unwrap();
        let url = client.page_url(2, None).unwrap();
        assert_eq!(url.host_str(), Some("api.example.com"));
        let query = url.query().unwrap();
        assert!(query.contains("page=2"));
        assert!(query.contains("per_page=100"));
        assert!(!query.contains("after="));
    }

    #[test]
    fn test_page_url_with_since_cursor() {
        let client = SourceClient::new(descriptor()).unwrap();
        let url = client.page_url(1, Some("1704067200")).unwrap();
        assert!(url.query().unwrap().contains("after=1704067200"));
    }

    #[test]
    fn test_page_url_without_since_param_ignores_cursor() {
        let mut d = descriptor();
        d.page.since_param = None;
        let client = SourceClient::new(d).unwrap();
        let url = client.page_url(1, Some("cursor")).unwrap();
        assert!(!url.query().unwrap().contains("cursor"));
    }

    #[test]
    fn test_missing_credentials_env_is_permanent() {
        let mut d = descriptor();
        d.credentials_env = Some("CADENCE_TEST_TOKEN_DOES_NOT_EXIST".to_string());
        let err = SourceClient::new(d).unwrap_err();
        assert!(matches!(err, FetchError::Permanent { .. }));
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status("s", StatusCode::INTERNAL_SERVER_ERROR).is_transient());
        assert!(classify_status("s", StatusCode::BAD_GATEWAY).is_transient());
        assert!(classify_status("s", StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!classify_status("s", StatusCode::UNAUTHORIZED).is_transient());
        assert!(!classify_status("s", StatusCode::FORBIDDEN).is_transient());
        assert!(!classify_status("s", StatusCode::NOT_FOUND).is_transient());
    }

    #[test]
    fn test_is_empty_body() {
        assert!(is_empty_body(b""));
        assert!(is_empty_body(b"  \n"));
        assert!(is_empty_body(b"[]"));
        assert!(is_empty_body(b" [] "));
        assert!(is_empty_body(b"null"));
        assert!(!is_empty_body(b"[{}]"));
        assert!(!is_empty_body(b"{\"data\":[]}"));
        assert!(!is_empty_body(&[0xff, 0xfe]));
    }

    #[tokio::test]
    async fn test_pager_stops_at_page_cap() {
        let mut d = descriptor();
        d.page.max_pages = 0;
        let client = SourceClient::new(d).unwrap();
        let mut pager = client.pager(None);
        let next = pager.next().await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_pager_finish_is_sticky() {
        let client = SourceClient::new(descriptor()).unwrap();
        let mut pager = client.pager(None);
        pager.finish();
        assert!(pager.next().await.unwrap().is_none());
        assert!(pager.next().await.unwrap().is_none());
    }
}
