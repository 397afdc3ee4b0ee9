pub mod handlers;

use axum::Router;
use axum::routing::{get, patch, post};

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/documents-flows",
            get(handlers::list_flows).post(handlers::create_flow),
        )
        .route("/documents-flows/snapshots", get(handlers::list_snapshots))
        .route(
            "/documents-flows/{id}",
            get(handlers::get_flow)
                .put(handlers::update_flow)
                .delete(handlers::delete_flow),
        )
        .route("/documents-flows/{id}/toggle-lock", patch(handlers::toggle_lock))
        .route(
            "/documents-flows/{id}/toggle-enabled",
            patch(handlers::toggle_enabled),
        )
        .route("/documents-flows/{id}/duplicate", post(handlers::duplicate_flow))
        .route("/documents-flows/{id}/export-json", post(handlers::export_json))
        .route("/documents-flows/{id}/import-json", post(handlers::import_json))
}
