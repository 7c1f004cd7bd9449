use axum::{middleware, routing::get, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::routes as chat_routes;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Authenticated chat routes (Claims extractor validates the bearer token)
    let chat = Router::new()
        .route(
            "/api/projects/{id}/messages",
            get(chat_routes::project_history).post(chat_routes::send_project_message),
        )
        .route(
            "/api/messages/direct/{other_id}",
            get(chat_routes::direct_history).post(chat_routes::send_direct_message),
        );

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(chat)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
