use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, WaitlistError};

/// Redis client configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Some(Duration::from_secs(5)),
            command_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// Redis client wrapper for shared rate limit counters
#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
    config: RedisConfig,
}

impl RedisClient {
    /// Create a new Redis client and verify the connection with PING
    pub async fn new(config: RedisConfig) -> Result<Self> {
        info!(url = %config.url, "Creating Redis client");

        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            WaitlistError::Redis(e)
        })?;

        let connect_timeout = config.connection_timeout.unwrap_or(Duration::from_secs(10));
        let connection = match tokio::time::timeout(connect_timeout, client.get_connection_manager()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("Failed to create connection manager: {}", e);
                return Err(WaitlistError::Redis(e));
            }
            Err(_) => {
                warn!(
                    "Timeout while creating connection manager ({}s)",
                    connect_timeout.as_secs()
                );
                return Err(WaitlistError::Unexpected(
                    "Timeout while creating Redis connection manager".to_string(),
                ));
            }
        };

        let redis_client = Self { connection, config };
        redis_client.health_check().await?;

        info!("Redis client initialized successfully");
        Ok(redis_client)
    }

    fn command_timeout(&self) -> Duration {
        self.config.command_timeout.unwrap_or(Duration::from_secs(5))
    }

    /// Count one hit in the fixed window stored at `key`.
    ///
    /// The window is created with a millisecond expiry on the first hit and
    /// is never extended by later hits. Returns the post-increment count and
    /// the time left in the window.
    pub async fn fixed_window_hit(&self, key: &str, window: Duration) -> Result<(u64, Duration)> {
        let mut conn = self.connection.clone();
        let window_ms = window.as_millis().max(1) as u64;

        let pipeline = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(0)
            .arg("PX")
            .arg(window_ms)
            .arg("NX")
            .ignore()
            .cmd("INCR")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .to_owned();

        let (count, pttl): (u64, i64) =
            match tokio::time::timeout(self.command_timeout(), pipeline.query_async(&mut conn)).await {
                Ok(result) => result.map_err(WaitlistError::Redis)?,
                Err(_) => {
                    return Err(WaitlistError::Unexpected(format!(
                        "Redis command timed out after {}ms",
                        self.command_timeout().as_millis()
                    )))
                }
            };

        // PTTL is negative when the key has no expiry; fall back to a full window.
        let ttl = if pttl > 0 {
            Duration::from_millis(pttl as u64)
        } else {
            window
        };

        Ok((count, ttl))
    }

    /// Check if the connection is healthy
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        match tokio::time::timeout(
            self.command_timeout(),
            redis::cmd("PING").query_async::<_, ()>(&mut conn),
        )
        .await
        {
            Ok(result) => result.map_err(WaitlistError::Redis),
            Err(_) => Err(WaitlistError::Unexpected(
                "Timeout while pinging Redis".to_string(),
            )),
        }
    }
}
