pub mod api;
pub mod error;
pub mod hub;
pub mod runtime;
pub mod sse;
pub mod state;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn app_router() -> Router {
    app_router_with_state(AppState::new())
}

pub fn app_router_with_state(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::api_routes(state).layer(cors)
}
