use crate::config::ServiceConfig;
use crate::institution::InstitutionRegistry;

/// State shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub registry: InstitutionRegistry,
}

impl AppState {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            registry: InstitutionRegistry::with_builtin(),
        }
    }
}
