// Application state module
// Shared by every connection for the lifetime of the process

use super::types::Config;
use crate::handler::Dispatcher;

/// Application state
#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub dispatcher: Dispatcher,
    /// Copied out of `config.logging` for the per-request check
    pub access_log: bool,
}

impl AppState {
    pub fn new(config: &Config, dispatcher: Dispatcher) -> Self {
        Self {
            config: config.clone(),
            dispatcher,
            access_log: config.logging.access_log,
        }
    }
}
