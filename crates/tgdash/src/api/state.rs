//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::hub::BroadcastHub;

#[derive(Clone)]
pub struct AppState {
    /// Registry of open push connections.
    pub hub: Arc<BroadcastHub>,
    /// Frames buffered per push connection.
    pub connection_buffer: usize,
    /// Enables the test harness routes and permissive CORS.
    pub dev_mode: bool,
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(hub: Arc<BroadcastHub>, server: &ServerConfig) -> Self {
        Self {
            hub,
            connection_buffer: server.connection_buffer.max(1),
            dev_mode: server.dev_mode,
            allowed_origins: Arc::new(server.allowed_origins.clone()),
        }
    }
}
