pub mod config;
pub mod error;
pub mod websocket;

use std::sync::Arc;

pub use config::{Cli, Settings};
pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;

use websocket::ConnectionRegistry;

/// Application state shared across all workers. The registry is the one
/// piece of shared mutable state in the process.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(config: Settings) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }
}
