mod health;

use axum::middleware as axum_mw;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::gateway::GATEWAY_PATH;
use crate::middleware::allow_list::allow_list_middleware;
use crate::state::AppState;

/// Build the full application router. Consumes the state so the allow-list
/// layer can be wired up with it.
pub fn router(state: AppState) -> Router {
    let gateway = Router::new()
        .route(GATEWAY_PATH, get(crate::gateway::ws_upgrade))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            allow_list_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .merge(gateway)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
