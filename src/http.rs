//! HTTP surface: the waitlist endpoints plus health and metrics.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use prometheus::TextEncoder;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{
    error::WaitlistError,
    limiter::RateLimiter,
    metrics::Metrics,
    service::SignupService,
    store::SignupRecord,
    utils::{client_identifier, retry_after_secs},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SignupService>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(service: SignupService, limiter: RateLimiter, metrics: Arc<Metrics>) -> Self {
        Self {
            service: Arc::new(service),
            limiter: Arc::new(limiter),
            metrics,
        }
    }
}

/// Body of `POST /api/waitlist`
#[derive(Debug, Default, PartialEq, Eq)]
pub struct JoinRequest {
    pub email: String,
    pub phone: String,
}

impl JoinRequest {
    /// Decode a request body.
    ///
    /// Any JSON value is accepted. A field that is absent, or holds `null`,
    /// `false`, `0` or `""`, reads as empty and fails validation later. The
    /// body fails to decode when it is not JSON, is `null` itself, or a
    /// field holds a non-empty value that is not a string.
    pub fn from_body(body: &[u8]) -> Result<Self, WaitlistError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| WaitlistError::Unexpected(format!("malformed request body: {}", e)))?;

        if value.is_null() {
            return Err(WaitlistError::Unexpected(
                "request body is null".to_string(),
            ));
        }

        Ok(Self {
            email: text_field(&value, "email")?,
            phone: text_field(&value, "phone")?,
        })
    }
}

fn text_field(body: &Value, name: &str) -> Result<String, WaitlistError> {
    match body.get(name) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Ok(String::new()),
        Some(_) => Err(WaitlistError::Unexpected(format!(
            "field {} is not a string",
            name
        ))),
    }
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub success: bool,
    pub data: Vec<SignupRecord>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

/// Build the service router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/waitlist", get(waitlist_count).post(join_waitlist))
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn waitlist_count(
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, WaitlistError> {
    let count = state.service.count().await?;
    Ok(Json(CountResponse { count }))
}

async fn join_waitlist(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JoinResponse>), WaitlistError> {
    let client = client_identifier(&headers);
    let decision = state.limiter.check_detailed(&client).await;
    if !decision.allowed {
        return Err(WaitlistError::RateLimited {
            retry_after_secs: retry_after_secs(decision.reset_after),
        });
    }

    let request = JoinRequest::from_body(&body)?;
    let record = state.service.submit(&request.email, &request.phone).await?;

    Ok((
        StatusCode::CREATED,
        Json(JoinResponse {
            success: true,
            data: vec![record],
        }),
    ))
}

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let store = state.service.health_check().await;
    let limiter = state.limiter.health_check().await;

    match (store, limiter) {
        (Ok(()), Ok(())) => Ok(Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))),
        (store, limiter) => {
            tracing::warn!(
                store_ok = store.is_ok(),
                limiter_ok = limiter.is_ok(),
                "Health check failed"
            );
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics) => Ok(metrics),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
