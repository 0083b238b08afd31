use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderName;

use crate::http::AppError;
use crate::AppState;

/// Identity of the end user on whose behalf a request runs. Authentication
/// itself happens upstream; the gateway injects the verified id as a header.
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub uuid::Uuid);

/// Marker for service-to-service calls (event recording). Requests must carry
/// the shared secret from INTERNAL_TOKEN.
#[derive(Debug, Clone)]
pub struct InternalToken;

const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");
const INTERNAL_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-internal-token");

#[axum::async_trait]
impl FromRequestParts<AppState> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing x-user-id header"))?;

        let user_id = header
            .parse::<uuid::Uuid>()
            .map_err(|_| AppError::unauthorized("invalid x-user-id header"))?;

        Ok(UserId(user_id))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for InternalToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected = state
            .internal_token
            .as_ref()
            .ok_or_else(|| AppError::forbidden("internal token not configured"))?;

        let provided = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::forbidden("missing internal token"))?;

        if provided != expected {
            return Err(AppError::forbidden("invalid internal token"));
        }

        Ok(InternalToken)
    }
}
