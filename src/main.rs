use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waitlist_service::{
    cache::{LocalRateLimitCache, RateLimitCache, RedisRateLimitCache},
    config::{RateLimitBackend, ServiceConfig, StoreBackend},
    http::{create_router, AppState},
    limiter::RateLimiter,
    metrics::Metrics,
    redis::{RedisClient, RedisConfig},
    service::SignupService,
    store::{MemorySignupStore, SignupStore, SupabaseConfig, SupabaseSignupStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = ServiceConfig::load(config_path.as_deref())?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting waitlist service");
    if let Some(path) = &config_path {
        info!("Configuration loaded from: {}", path);
    }

    // Initialize components
    let metrics = Arc::new(Metrics::new()?);
    let store = create_store(&config)?;
    let limiter = create_limiter(&config, metrics.clone()).await?;
    let service = SignupService::new(store, config.signup.source.clone(), metrics.clone());
    let state = AppState::new(service, limiter, metrics);

    let http_addr = config
        .server
        .http_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server.http_addr: {}", config.server.http_addr))?;

    let http_server = start_http_server(state, http_addr);
    info!("HTTP server listening on {}", http_addr);

    // Wait for shutdown signal
    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                warn!("HTTP server error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    info!("Service stopped");
    Ok(())
}

fn create_store(config: &ServiceConfig) -> Result<Arc<dyn SignupStore>> {
    let store: Arc<dyn SignupStore> = match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory signup store; signups are lost on restart");
            Arc::new(MemorySignupStore::new())
        }
        StoreBackend::Supabase => {
            let url = config.store.supabase_url.clone().unwrap_or_default();
            info!(url = %url, table = %config.store.table, "Using Supabase signup store");
            Arc::new(SupabaseSignupStore::new(SupabaseConfig {
                url,
                service_role_key: config.store.service_role_key.clone().unwrap_or_default(),
                table: config.store.table.clone(),
                timeout: config.store.timeout(),
            })?)
        }
    };

    Ok(store)
}

async fn create_limiter(config: &ServiceConfig, metrics: Arc<Metrics>) -> Result<RateLimiter> {
    let settings = &config.rate_limit;
    let policy = settings.policy();

    let cache: Box<dyn RateLimitCache> = match settings.backend {
        RateLimitBackend::Local => {
            info!(
                max_requests = policy.max_requests,
                window_secs = settings.window_secs,
                "Using process-local rate limiting"
            );
            Box::new(LocalRateLimitCache::new(policy, settings.max_tracked_keys))
        }
        RateLimitBackend::Redis => {
            let client = RedisClient::new(RedisConfig {
                url: settings.redis_url.clone(),
                ..Default::default()
            })
            .await?;
            info!(
                max_requests = policy.max_requests,
                window_secs = settings.window_secs,
                "Using shared Redis rate limiting"
            );
            Box::new(RedisRateLimitCache::new(client, policy, settings.key_prefix.clone()))
        }
    };

    Ok(RateLimiter::new(cache, policy, metrics))
}

async fn start_http_server(state: AppState, addr: SocketAddr) -> Result<()> {
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
