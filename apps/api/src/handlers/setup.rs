use axum::Json;
use axum::extract::{Path, State};
use mirrorline_domain::{OpaqueId, SetupStep, SetupTrack};

use crate::dto::SetupTransitionRequest;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn setup_step_handler(
    State(state): State<AppState>,
    Path((opaque_id, track)): Path<(String, SetupTrack)>,
) -> ApiResult<Json<SetupStep>> {
    let opaque_id = OpaqueId::new(opaque_id)?;
    let step = state.setup_service.step(&opaque_id, track).await?;
    Ok(Json(step))
}

pub async fn setup_transition_handler(
    State(state): State<AppState>,
    Path((opaque_id, field)): Path<(String, String)>,
    Json(payload): Json<SetupTransitionRequest>,
) -> ApiResult<Json<SetupStep>> {
    let opaque_id = OpaqueId::new(opaque_id)?;
    let step = state
        .setup_service
        .transition(&opaque_id, field.as_str(), payload.value.as_str())
        .await?;
    Ok(Json(step))
}
