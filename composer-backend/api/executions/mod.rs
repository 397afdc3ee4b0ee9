pub mod handlers;

use axum::Router;
use axum::routing::{get, patch, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/document-flow-executions",
            get(handlers::list_executions).post(handlers::start_execution),
        )
        .route(
            "/document-flow-executions/transfer",
            post(handlers::transfer),
        )
        .route(
            "/document-flow-executions/{id}",
            get(handlers::get_execution).put(handlers::update_execution),
        )
        .route(
            "/document-flow-executions/{id}/node-data",
            patch(handlers::update_node_data),
        )
}
