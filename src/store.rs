//! Persistence for signup records.
//!
//! The service talks to storage only through [`SignupStore`]. Production
//! deployments use the PostgREST API of a managed Postgres (Supabase);
//! development and tests use the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::error::{Result, WaitlistError};

/// Postgres SQLSTATE for a unique constraint violation
const UNIQUE_VIOLATION: &str = "23505";

/// A signup ready to be written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewSignup {
    pub email: String,
    pub phone: String,
    pub source: String,
}

/// A stored signup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupRecord {
    pub email: String,
    pub phone: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Append-only storage for signups, unique on email
#[async_trait]
pub trait SignupStore: Send + Sync {
    /// Insert a signup. Fails with [`WaitlistError::DuplicateEmail`] when the
    /// email is already stored.
    async fn insert(&self, signup: NewSignup) -> Result<SignupRecord>;

    /// Total number of stored signups
    async fn count(&self) -> Result<u64>;

    /// Health check for the store
    async fn health_check(&self) -> Result<()>;
}

/// In-memory store keyed by email
#[derive(Default)]
pub struct MemorySignupStore {
    records: RwLock<HashMap<String, SignupRecord>>,
}

impl MemorySignupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignupStore for MemorySignupStore {
    async fn insert(&self, signup: NewSignup) -> Result<SignupRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&signup.email) {
            return Err(WaitlistError::DuplicateEmail);
        }

        let record = SignupRecord {
            email: signup.email,
            phone: signup.phone,
            source: signup.source,
            created_at: Some(Utc::now()),
        };
        records.insert(record.email.clone(), record.clone());
        Ok(record)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().await.len() as u64)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Connection settings for the PostgREST store
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
    pub table: String,
    pub timeout: Duration,
}

/// Error body returned by PostgREST
#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl PostgrestError {
    fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(UNIQUE_VIOLATION)
            || self
                .message
                .as_deref()
                .map_or(false, |m| m.contains("duplicate"))
    }
}

/// Signup store backed by a Supabase table through its REST API
pub struct SupabaseSignupStore {
    client: Client,
    table_url: String,
    service_role_key: String,
}

impl SupabaseSignupStore {
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let table_url = format!(
            "{}/rest/v1/{}",
            config.url.trim_end_matches('/'),
            config.table
        );

        Ok(Self {
            client,
            table_url,
            service_role_key: config.service_role_key,
        })
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, &self.table_url)
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    async fn count_rows(&self) -> Result<u64> {
        let response = self
            .request(reqwest::Method::HEAD)
            .query(&[("select", "*")])
            .header("Prefer", "count=exact")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WaitlistError::Storage(format!(
                "count query failed with status {}",
                status
            )));
        }

        let range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| WaitlistError::Storage("count response has no Content-Range".into()))?;

        parse_content_range_total(range)
    }
}

/// Extract the total from a PostgREST `Content-Range` header such as
/// `0-24/3573` or `*/0`. An unknown total (`*`) counts as zero.
fn parse_content_range_total(range: &str) -> Result<u64> {
    let total = range
        .rsplit_once('/')
        .map(|(_, total)| total.trim())
        .ok_or_else(|| WaitlistError::Storage(format!("malformed Content-Range: {}", range)))?;

    if total == "*" {
        return Ok(0);
    }

    total
        .parse()
        .map_err(|_| WaitlistError::Storage(format!("malformed Content-Range: {}", range)))
}

#[async_trait]
impl SignupStore for SupabaseSignupStore {
    #[instrument(skip_all, fields(source = %signup.source))]
    async fn insert(&self, signup: NewSignup) -> Result<SignupRecord> {
        let response = self
            .request(reqwest::Method::POST)
            .header("Prefer", "return=representation")
            .json(&signup)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let mut rows: Vec<SignupRecord> = response.json().await?;
            debug!(rows = rows.len(), "Insert acknowledged");
            if rows.is_empty() {
                return Err(WaitlistError::Storage(
                    "insert returned no rows".to_string(),
                ));
            }
            return Ok(rows.swap_remove(0));
        }

        let body = response.text().await.unwrap_or_default();
        let error: PostgrestError = serde_json::from_str(&body).unwrap_or_default();

        if error.is_unique_violation() {
            debug!(status = %status, "Insert rejected by unique constraint");
            return Err(WaitlistError::DuplicateEmail);
        }

        // The body may echo the submitted row, so it stays below info.
        debug!(status = %status, body = %body, "Signup insert rejected");
        warn!(
            status = %status,
            error_code = error.code.as_deref().unwrap_or(""),
            error_message = error.message.as_deref().unwrap_or(""),
            "Signup insert failed"
        );
        Err(WaitlistError::Storage(format!(
            "insert failed with status {}",
            status
        )))
    }

    #[instrument(skip_all)]
    async fn count(&self) -> Result<u64> {
        self.count_rows().await
    }

    async fn health_check(&self) -> Result<()> {
        self.count_rows().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(email: &str) -> NewSignup {
        NewSignup {
            email: email.to_string(),
            phone: "(555) 123-4567".to_string(),
            source: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_insert_and_count() {
        let store = MemorySignupStore::new();
        assert_eq!(store.count().await.unwrap(), 0);

        let record = store.insert(signup("a@b.com")).await.unwrap();
        assert_eq!(record.email, "a@b.com");
        assert_eq!(record.source, "test");
        assert!(record.created_at.is_some());

        store.insert(signup("c@d.com")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_duplicate_without_overwrite() {
        let store = MemorySignupStore::new();
        store.insert(signup("a@b.com")).await.unwrap();

        let mut second = signup("a@b.com");
        second.phone = "555 000 0000".to_string();
        assert!(matches!(
            store.insert(second).await,
            Err(WaitlistError::DuplicateEmail)
        ));

        let records = store.records.read().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records["a@b.com"].phone, "(555) 123-4567");
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/3573").unwrap(), 3573);
        assert_eq!(parse_content_range_total("*/0").unwrap(), 0);
        assert_eq!(parse_content_range_total("*/*").unwrap(), 0);
        assert!(parse_content_range_total("garbage").is_err());
        assert!(parse_content_range_total("0-1/abc").is_err());
    }

    #[test]
    fn test_unique_violation_detection() {
        let by_code = PostgrestError {
            code: Some("23505".into()),
            message: None,
        };
        assert!(by_code.is_unique_violation());

        let by_message = PostgrestError {
            code: None,
            message: Some("duplicate key value violates unique constraint".into()),
        };
        assert!(by_message.is_unique_violation());

        assert!(!PostgrestError::default().is_unique_violation());
    }

    mod supabase {
        use super::*;
        use std::sync::{Arc, Mutex};
        use wiremock::matchers::{header, method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn create_store(server: &MockServer) -> SupabaseSignupStore {
            SupabaseSignupStore::new(SupabaseConfig {
                url: server.uri(),
                service_role_key: "service-key".to_string(),
                table: "waitlist_signups".to_string(),
                timeout: Duration::from_secs(5),
            })
            .unwrap()
        }

        #[tokio::test]
        async fn test_insert_returns_stored_row() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/rest/v1/waitlist_signups"))
                .and(header("apikey", "service-key"))
                .and(header("Authorization", "Bearer service-key"))
                .and(header("Prefer", "return=representation"))
                .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!([{
                    "id": 7,
                    "email": "a@b.com",
                    "phone": "(555) 123-4567",
                    "source": "test",
                    "created_at": "2026-01-02T03:04:05Z"
                }])))
                .expect(1)
                .mount(&server)
                .await;

            let record = create_store(&server).insert(signup("a@b.com")).await.unwrap();
            assert_eq!(record.email, "a@b.com");
            assert!(record.created_at.is_some());
        }

        #[tokio::test]
        async fn test_unique_violation_is_duplicate() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/rest/v1/waitlist_signups"))
                .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                    "code": "23505",
                    "message": "duplicate key value violates unique constraint \"waitlist_signups_email_key\""
                })))
                .mount(&server)
                .await;

            assert!(matches!(
                create_store(&server).insert(signup("a@b.com")).await,
                Err(WaitlistError::DuplicateEmail)
            ));
        }

        #[tokio::test]
        async fn test_other_failures_are_storage_errors() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/rest/v1/waitlist_signups"))
                .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                    "code": "XX000",
                    "message": "internal error"
                })))
                .mount(&server)
                .await;

            assert!(matches!(
                create_store(&server).insert(signup("a@b.com")).await,
                Err(WaitlistError::Storage(_))
            ));
        }

        #[derive(Clone, Default)]
        struct LogBuffer(Arc<Mutex<Vec<u8>>>);

        impl std::io::Write for LogBuffer {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        #[tokio::test]
        async fn test_rejected_row_is_not_logged_at_info_or_above() {
            let server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/rest/v1/waitlist_signups"))
                .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                    "code": "23514",
                    "message": "new row for relation \"waitlist_signups\" violates check constraint \"phone_format\"",
                    "details": "Failing row contains (7, someone@example.com, (555) 123-4567, test)."
                })))
                .mount(&server)
                .await;

            let logs = LogBuffer::default();
            let writer = logs.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .finish();
            let _guard = tracing::subscriber::set_default(subscriber);

            let result = create_store(&server)
                .insert(signup("someone@example.com"))
                .await;
            assert!(matches!(result, Err(WaitlistError::Storage(_))));

            let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
            assert!(output.contains("Signup insert failed"));
            assert!(output.contains("23514"));
            assert!(!output.contains("someone@example.com"));
            assert!(!output.contains("123-4567"));
        }

        #[tokio::test]
        async fn test_count_reads_content_range() {
            let server = MockServer::start().await;

            Mock::given(method("HEAD"))
                .and(path("/rest/v1/waitlist_signups"))
                .and(query_param("select", "*"))
                .and(header("Prefer", "count=exact"))
                .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "0-0/42"))
                .mount(&server)
                .await;

            assert_eq!(create_store(&server).count().await.unwrap(), 42);
        }

        #[tokio::test]
        async fn test_count_failure() {
            let server = MockServer::start().await;

            Mock::given(method("HEAD"))
                .and(path("/rest/v1/waitlist_signups"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;

            assert!(create_store(&server).count().await.is_err());
        }
    }
}
