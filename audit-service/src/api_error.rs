use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::SERVICE_NAME;

// ENVIRONMENT=production suppresses internal error detail in 500 bodies.
static EXPOSE_INTERNAL_ERRORS: Lazy<bool> = Lazy::new(|| {
    std::env::var("ENVIRONMENT")
        .map(|value| value != "production")
        .unwrap_or(true)
});

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub service: &'static str,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: &'static str, message: String },
    Unauthorized { code: &'static str, message: String },
    NotFound { code: &'static str },
    Conflict { code: &'static str, message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal {
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body, error_code) = match self {
            ApiError::BadRequest { code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorBody { code: code.into(), message: Some(message), service: SERVICE_NAME },
                code,
            ),
            ApiError::Unauthorized { code, message } => (
                StatusCode::UNAUTHORIZED,
                ErrorBody { code: code.into(), message: Some(message), service: SERVICE_NAME },
                code,
            ),
            ApiError::NotFound { code } => (
                StatusCode::NOT_FOUND,
                ErrorBody { code: code.into(), message: None, service: SERVICE_NAME },
                code,
            ),
            ApiError::Conflict { code, message } => (
                StatusCode::CONFLICT,
                ErrorBody { code: code.into(), message: Some(message), service: SERVICE_NAME },
                code,
            ),
            ApiError::Internal { message } => {
                tracing::error!(error = %message, "request failed with internal error");
                let exposed = if *EXPOSE_INTERNAL_ERRORS {
                    Some(message)
                } else {
                    None
                };
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody { code: "internal_error".into(), message: exposed, service: SERVICE_NAME },
                    "internal_error",
                )
            }
        };
        let mut resp = (status, Json(body)).into_response();
        if let Ok(val) = HeaderValue::from_str(error_code) {
            resp.headers_mut().insert("X-Error-Code", val);
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
