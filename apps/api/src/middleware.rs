use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use mirrorline_core::AppError;
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::state::AppState;

/// Requires `Authorization: Bearer <INTERNAL_SHARED_SECRET>`.
pub async fn require_internal_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| {
            ApiError(AppError::Unauthorized(
                "missing internal bearer token".to_owned(),
            ))
        })?;

    let expected = state.internal_shared_secret.as_bytes();
    if !bool::from(presented.as_bytes().ct_eq(expected)) {
        return Err(ApiError(AppError::Unauthorized(
            "invalid internal bearer token".to_owned(),
        )));
    }

    Ok(next.run(request).await)
}
