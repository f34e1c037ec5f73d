use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use mirrorline_core::TenantId;
use mirrorline_domain::{IntegrationId, OpaqueId, ResourceType};
use uuid::Uuid;

use crate::dto::{
    CreateIntegrationRequest, IntegrationResponse, LinkDependencyRequest, QueuedJobResponse,
    TriggerBackfillRequest,
};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn create_integration_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(payload): Json<CreateIntegrationRequest>,
) -> ApiResult<(StatusCode, Json<IntegrationResponse>)> {
    let resource_type = ResourceType::new(payload.resource_type)?;
    let integration = state
        .integration_service
        .create(TenantId::from_uuid(tenant_id), resource_type)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IntegrationResponse::from_integration(
            &integration,
            &state.public_base_url,
        )),
    ))
}

pub async fn get_integration_handler(
    State(state): State<AppState>,
    Path((tenant_id, integration_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<IntegrationResponse>> {
    let integration = state
        .integration_service
        .find(
            TenantId::from_uuid(tenant_id),
            IntegrationId::from_uuid(integration_id),
        )
        .await?;

    Ok(Json(IntegrationResponse::from_integration(
        &integration,
        &state.public_base_url,
    )))
}

pub async fn delete_integration_handler(
    State(state): State<AppState>,
    Path((tenant_id, integration_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state
        .integration_service
        .delete(
            TenantId::from_uuid(tenant_id),
            IntegrationId::from_uuid(integration_id),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn link_dependency_handler(
    State(state): State<AppState>,
    Path((tenant_id, integration_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<LinkDependencyRequest>,
) -> ApiResult<Json<IntegrationResponse>> {
    let integration = state
        .integration_service
        .link_dependency(
            TenantId::from_uuid(tenant_id),
            IntegrationId::from_uuid(integration_id),
            payload.depends_on.map(IntegrationId::from_uuid),
        )
        .await?;

    Ok(Json(IntegrationResponse::from_integration(
        &integration,
        &state.public_base_url,
    )))
}

pub async fn reset_credentials_handler(
    State(state): State<AppState>,
    Path((tenant_id, integration_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<IntegrationResponse>> {
    let integration = state
        .integration_service
        .reset_credentials(
            TenantId::from_uuid(tenant_id),
            IntegrationId::from_uuid(integration_id),
        )
        .await?;

    Ok(Json(IntegrationResponse::from_integration(
        &integration,
        &state.public_base_url,
    )))
}

pub async fn trigger_backfill_handler(
    State(state): State<AppState>,
    Path(opaque_id): Path<String>,
    Json(payload): Json<TriggerBackfillRequest>,
) -> ApiResult<(StatusCode, Json<QueuedJobResponse>)> {
    let opaque_id = OpaqueId::new(opaque_id)?;
    let job_id = state
        .sync_job_service
        .enqueue_for_opaque_id(&opaque_id, payload.mode, payload.cascade)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(QueuedJobResponse { job_id })))
}
