//! 路由定义：/health、/info。

use crate::AppState;
use crate::handlers::system::{health, info};
use axum::{Router, routing::get};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
}
