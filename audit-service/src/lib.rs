pub mod api_error;
pub mod app_state;
pub mod auth;
pub mod log_handlers;
pub mod policy_handlers;
pub mod stats_handlers;

pub use api_error::{ApiError, ApiResult};

/// Constant tag carried in every response envelope for log correlation.
pub const SERVICE_NAME: &str = "audit-service";
