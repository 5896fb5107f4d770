use std::sync::Arc;

use crate::backend::Backend;
use crate::config::AppConfig;
use crate::services::profile_service::ProfileScreens;
use crate::services::retry_policy::RetryPolicy;
use crate::session::SessionContext;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub sessions: SessionContext,
    pub profiles: ProfileScreens,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// The session context is created here but not initialised; call
    /// `sessions.init()` once the runtime is up.
    pub fn new(backend: Arc<dyn Backend>, config: AppConfig) -> Self {
        Self {
            sessions: SessionContext::new(backend.clone()),
            backend,
            profiles: ProfileScreens::new(),
            config: Arc::new(config),
        }
    }

    pub fn fetch_policy(&self) -> RetryPolicy {
        RetryPolicy::profile_fetch(self.config.retry_unit)
    }

    pub fn refetch_policy(&self) -> RetryPolicy {
        RetryPolicy::after_create(self.config.create_refetch_delay)
    }
}
