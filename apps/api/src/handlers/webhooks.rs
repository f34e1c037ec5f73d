use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use mirrorline_application::InboundWebhook;
use mirrorline_core::AppError;
use mirrorline_domain::OpaqueId;
use tracing::{error, warn};

use crate::state::AppState;

/// Receives one vendor webhook.
///
/// Responses carry short plain-text bodies only; vendors never see internal
/// error detail.
pub async fn receive_webhook_handler(
    State(state): State<AppState>,
    Path(opaque_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(opaque_id) = OpaqueId::new(opaque_id) else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    let request = InboundWebhook {
        headers,
        body: body.to_vec(),
    };

    match state.webhook_service.handle(&opaque_id, request).await {
        Ok(ack) => {
            let status = StatusCode::from_u16(ack.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, ack.body()).into_response()
        }
        Err(app_error) => webhook_error_response(&opaque_id, app_error),
    }
}

fn webhook_error_response(opaque_id: &OpaqueId, app_error: AppError) -> Response {
    match app_error {
        AppError::NotFound(detail) => {
            warn!(opaque_id = %opaque_id, detail = %detail, "webhook target not found");
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
        AppError::DependencyMissing(detail) | AppError::CredentialsMissing(detail) => {
            warn!(opaque_id = %opaque_id, detail = %detail, "webhook target not ready");
            (StatusCode::CONFLICT, "integration not ready").into_response()
        }
        other => {
            error!(opaque_id = %opaque_id, error = %other, "webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}
