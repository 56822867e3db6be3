use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use common_auth::{AuthContext, Claims, JwtVerifier};

use crate::api_error::ApiError;

/// Wrapper around the shared [`AuthContext`] extractor so auth rejections use
/// this service's enveloped error shape.
pub struct Authenticated(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    Arc<JwtVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = AuthContext::from_request_parts(parts, state)
            .await
            .map_err(|err| ApiError::Unauthorized {
                code: err.code(),
                message: err.to_string(),
            })?;
        Ok(Self(ctx.claims))
    }
}
