//! HTTP API: webhook ingress, the push channel and dev endpoints.

mod error;
mod events;
mod health;
mod routes;
mod state;
mod test_harness;
mod webhook;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
