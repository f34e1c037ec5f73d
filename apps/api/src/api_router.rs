use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, middleware};

mod internal;

#[cfg(test)]
mod tests;

pub fn build_router(app_state: AppState) -> Router {
    let setup_routes = Router::new()
        .route(
            "/api/setup/{opaque_id}/{track}",
            get(handlers::setup::setup_step_handler),
        )
        .route(
            "/api/setup/{opaque_id}/transition/{field}",
            post(handlers::setup::setup_transition_handler),
        )
        .route_layer(from_fn_with_state(
            app_state.clone(),
            middleware::require_internal_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .route(
            "/webhooks/{opaque_id}",
            post(handlers::webhooks::receive_webhook_handler),
        )
        .merge(setup_routes)
        .merge(internal::build_internal_routes(app_state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
