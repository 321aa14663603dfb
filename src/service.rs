use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::{
    error::{Result, WaitlistError},
    metrics::Metrics,
    store::{NewSignup, SignupRecord, SignupStore},
    utils::email_domain,
    validation::{normalize_email, sanitize_input, validate_email, validate_phone},
};

/// Validates submitted contact details and records them in the store
pub struct SignupService {
    store: Arc<dyn SignupStore>,
    source: String,
    metrics: Arc<Metrics>,
}

impl SignupService {
    /// Create a new signup service writing records tagged with `source`
    pub fn new(store: Arc<dyn SignupStore>, source: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            source: source.into(),
            metrics,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Validate and persist one signup.
    ///
    /// Exactly one insert is attempted. Storage failures other than a
    /// duplicate email surface as [`WaitlistError::Storage`].
    #[instrument(skip_all)]
    pub async fn submit(&self, raw_email: &str, raw_phone: &str) -> Result<SignupRecord> {
        let email = sanitize_input(raw_email);
        let phone = sanitize_input(raw_phone);

        if !validate_email(&email) {
            self.metrics.record_signup_outcome("invalid_email");
            return Err(WaitlistError::InvalidEmail);
        }

        if !validate_phone(&phone) {
            self.metrics.record_signup_outcome("invalid_phone");
            return Err(WaitlistError::InvalidPhone);
        }

        let signup = NewSignup {
            email: normalize_email(&email),
            phone: phone.trim().to_string(),
            source: self.source.clone(),
        };
        let domain = email_domain(&signup.email).to_string();

        let result = {
            let _timer = self.metrics.start_store_timer("insert");
            self.store.insert(signup).await
        };

        match result {
            Ok(record) => {
                self.metrics.record_signup_outcome("created");
                info!(email_domain = %domain, source = %record.source, "Signup recorded");
                Ok(record)
            }
            Err(WaitlistError::DuplicateEmail) => {
                self.metrics.record_signup_outcome("duplicate_email");
                info!(email_domain = %domain, "Duplicate signup rejected");
                Err(WaitlistError::DuplicateEmail)
            }
            Err(e) => {
                self.metrics.record_signup_outcome("storage_error");
                warn!(error = %e, "Failed to store signup");
                Err(WaitlistError::Storage(e.to_string()))
            }
        }
    }

    /// Total number of stored signups
    pub async fn count(&self) -> Result<u64> {
        let result = {
            let _timer = self.metrics.start_store_timer("count");
            self.store.count().await
        };

        match result {
            Ok(count) => {
                self.metrics.record_count_request("ok");
                Ok(count)
            }
            Err(e) => {
                self.metrics.record_count_request("error");
                warn!(error = %e, "Failed to fetch signup count");
                Err(WaitlistError::CountUnavailable(e.to_string()))
            }
        }
    }

    /// Health check for the backing store
    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}
