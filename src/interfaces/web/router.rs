use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};

use super::AppState;
use super::handlers::smoke;

async fn root() -> &'static str {
    "invox worker: ok"
}

pub fn build_api_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/", get(root))
        .route("/smoke", post(smoke::smoke_endpoint))
        .layer(cors)
        .with_state(state)
}
