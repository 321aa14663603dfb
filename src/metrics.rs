use prometheus::{Counter, CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for the waitlist service
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Intake metrics
    signup_outcomes: CounterVec,
    count_requests: CounterVec,

    // Rate limit metrics
    rate_limited_requests: Counter,
    rate_limit_backend_errors: Counter,

    // Store metrics
    store_operation_duration: HistogramVec,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let signup_outcomes = CounterVec::new(
            Opts::new(
                "waitlist_signup_outcomes_total",
                "Signup submissions by outcome",
            ),
            &["outcome"],
        )?;

        let count_requests = CounterVec::new(
            Opts::new(
                "waitlist_count_requests_total",
                "Waitlist count queries by result",
            ),
            &["result"],
        )?;

        let rate_limited_requests = Counter::new(
            "waitlist_rate_limited_total",
            "Number of signup requests rejected by the rate limiter",
        )?;

        let rate_limit_backend_errors = Counter::new(
            "waitlist_rate_limit_backend_errors_total",
            "Number of rate limit checks that failed open because the backend errored",
        )?;

        let store_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "waitlist_store_operation_duration_seconds",
                "Duration of signup store operations in seconds",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(signup_outcomes.clone()))?;
        registry.register(Box::new(count_requests.clone()))?;
        registry.register(Box::new(rate_limited_requests.clone()))?;
        registry.register(Box::new(rate_limit_backend_errors.clone()))?;
        registry.register(Box::new(store_operation_duration.clone()))?;

        Ok(Self {
            registry,
            signup_outcomes,
            count_requests,
            rate_limited_requests,
            rate_limit_backend_errors,
            store_operation_duration,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of a signup submission
    pub fn record_signup_outcome(&self, outcome: &str) {
        self.signup_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_count_request(&self, result: &str) {
        self.count_requests.with_label_values(&[result]).inc();
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_requests.inc();
    }

    pub fn record_rate_limit_backend_error(&self) {
        self.rate_limit_backend_errors.inc();
    }

    /// Create a timer for a store operation
    pub fn start_store_timer(&self, operation: &str) -> prometheus::HistogramTimer {
        self.store_operation_duration
            .with_label_values(&[operation])
            .start_timer()
    }
}
