use std::sync::Arc;

use common::auth::IdentityResolver;
use common::db::DbPool;
use common::service::JobService;
use metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
    pub identity: Arc<dyn IdentityResolver>,
    /// Present when the job store is Postgres; checked by `/health`
    pub db_pool: Option<DbPool>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: Arc<JobService>, identity: Arc<dyn IdentityResolver>) -> Self {
        Self {
            service,
            identity,
            db_pool: None,
            metrics: None,
        }
    }

    pub fn with_db_pool(mut self, db_pool: DbPool) -> Self {
        self.db_pool = Some(db_pool);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
