use std::sync::Arc;

use triage_worker::service::JudgeService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; the service holds its pool and engine handles.
#[derive(Clone)]
pub struct AppState {
    /// Judge engine facade.
    pub service: JudgeService,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
