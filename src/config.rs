use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    cache::RateLimitPolicy,
    error::{Result, WaitlistError},
};

/// Source tag stamped on every signup unless configured otherwise
pub const DEFAULT_SIGNUP_SOURCE: &str = "nextjs_waitlist_app";

/// Prefix for environment variable overrides, e.g. `WAITLIST__SERVER__HTTP_ADDR`
pub const ENV_PREFIX: &str = "WAITLIST";

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub rate_limit: RateLimitSettings,
    pub store: StoreSettings,
    pub signup: SignupSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_addr: String,
}

/// Rate limit backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    Local,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub backend: RateLimitBackend,
    pub max_requests: u32,
    pub window_secs: u64,
    /// Bucket count above which expired local buckets are pruned
    pub max_tracked_keys: usize,
    pub redis_url: String,
    pub key_prefix: String,
}

/// Signup store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Supabase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub supabase_url: Option<String>,
    pub service_role_key: Option<String>,
    pub table: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignupSettings {
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Local,
            max_requests: 5,
            window_secs: 60,
            max_tracked_keys: 10_000,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "waitlist:ratelimit".to_string(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            supabase_url: None,
            service_role_key: None,
            table: "waitlist_signups".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for SignupSettings {
    fn default() -> Self {
        Self {
            source: DEFAULT_SIGNUP_SOURCE.to_string(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "waitlist_service=info,tower_http=info".to_string(),
        }
    }
}

impl RateLimitSettings {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.max_requests,
            window: Duration::from_secs(self.window_secs),
        }
    }
}

impl StoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServiceConfig {
    /// Load configuration from defaults, an optional YAML file, and
    /// `WAITLIST__*` environment variables, in increasing precedence.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WaitlistError::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 {
            return Err(WaitlistError::Config(
                "rate_limit.max_requests must be greater than zero".to_string(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(WaitlistError::Config(
                "rate_limit.window_secs must be greater than zero".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Supabase {
            let missing = |value: &Option<String>| value.as_deref().map_or(true, str::is_empty);
            if missing(&self.store.supabase_url) || missing(&self.store.service_role_key) {
                return Err(WaitlistError::Config(
                    "supabase store requires store.supabase_url and store.service_role_key"
                        .to_string(),
                ));
            }
        }

        if self.signup.source.trim().is_empty() {
            return Err(WaitlistError::Config(
                "signup.source must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load configuration from YAML string
pub fn load_config_from_yaml(yaml: &str) -> Result<ServiceConfig> {
    let config: ServiceConfig = serde_yaml::from_str(yaml).map_err(|e| {
        WaitlistError::Config(format!("Failed to parse YAML: {}", e))
    })?;
    config.validate()?;
    Ok(config)
}
