pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod notifications;
pub mod payments;
pub mod startup;
pub mod storage;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;

use crate::api::rate_limit::RateLimiter;
use crate::notifications::Mailer;
use crate::payments::PaymentGateway;
use crate::storage::ObjectStore;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub mailer: Arc<dyn Mailer>,
    pub storage: Arc<dyn ObjectStore>,
    pub payments: Arc<dyn PaymentGateway>,
    /// Client for third-party lookups (exchange rates)
    pub http: reqwest::Client,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: DbPool,
        mailer: Arc<dyn Mailer>,
        storage: Arc<dyn ObjectStore>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let http = reqwest::Client::builder()
            .user_agent(concat!("sybertailor/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            config,
            db,
            mailer,
            storage,
            payments,
            http,
            rate_limiter,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
