use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};

use crate::state::AppState;
use crate::{handlers, middleware};

pub(super) fn build_internal_routes(app_state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/internal/tenants/{tenant_id}/integrations",
            post(handlers::integrations::create_integration_handler),
        )
        .route(
            "/api/internal/tenants/{tenant_id}/integrations/{integration_id}",
            get(handlers::integrations::get_integration_handler)
                .delete(handlers::integrations::delete_integration_handler),
        )
        .route(
            "/api/internal/tenants/{tenant_id}/integrations/{integration_id}/dependency",
            put(handlers::integrations::link_dependency_handler),
        )
        .route(
            "/api/internal/tenants/{tenant_id}/integrations/{integration_id}/credentials/reset",
            post(handlers::integrations::reset_credentials_handler),
        )
        .route(
            "/api/internal/integrations/{opaque_id}/backfill",
            post(handlers::integrations::trigger_backfill_handler),
        )
        .route_layer(from_fn_with_state(
            app_state,
            middleware::require_internal_auth,
        ))
}
