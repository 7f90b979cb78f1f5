// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers::session, state::AppState, utils::jwt::candidate_middleware};

/// Assembles the main application router.
///
/// * Every session route requires a candidate token.
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (session registry, config).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let session_routes = Router::new()
        .route(
            "/{attempt_id}",
            post(session::start_session)
                .get(session::get_session)
                .delete(session::close_session),
        )
        .route("/{attempt_id}/signals", post(session::report_signal))
        .route("/{attempt_id}/answers", put(session::select_answer))
        .route("/{attempt_id}/submit", post(session::submit_session))
        .route("/{attempt_id}/exit", post(session::resolve_exit))
        .route("/{attempt_id}/audit", get(session::get_audit_log))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            candidate_middleware,
        ));

    Router::new()
        .nest("/api/sessions", session_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
