pub mod handlers;

use axum::Router;
use axum::routing::get;

use crate::api::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/documentos",
            get(handlers::list_documents).post(handlers::create_document),
        )
        .route(
            "/documentos/{id}",
            get(handlers::get_document).put(handlers::update_document),
        )
}
