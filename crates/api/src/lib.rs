//! HTTP ingestion API for the clickstream engine.

pub mod quota;
pub mod response;
pub mod routes;
pub mod state;

pub use quota::{QuotaClient, QuotaConfig};
pub use routes::router;
pub use state::AppState;
