use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::changes::{ChangeType, ResourceType};
use crate::documents::Document;
use crate::error::ComposerError;

type ApiError = (StatusCode, Json<Value>);

pub(crate) async fn list_documents(State(state): State<AppState>) -> Json<Vec<Document>> {
    Json(state.document_repo.list().await)
}

pub(crate) async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    let document = state
        .document_repo
        .get(&id)
        .await
        .ok_or_else(|| ComposerError::not_found("document", id))?;
    Ok(Json(document))
}

#[derive(Deserialize)]
pub(crate) struct CreateDocumentRequest {
    #[serde(default)]
    title: String,
}

pub(crate) async fn create_document(
    State(state): State<AppState>,
    Json(body): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ComposerError::Validation("required fields missing: title".into()).into());
    }

    let document = Document::new(Uuid::new_v4().to_string(), title.to_string());
    state
        .document_repo
        .save(document.clone())
        .await
        .map_err(ComposerError::persistence)?;
    state.publish(ResourceType::Document, ChangeType::Created, &document.id);

    Ok((StatusCode::CREATED, Json(document)))
}

#[derive(Deserialize)]
pub(crate) struct UpdateDocumentRequest {
    status: String,
}

pub(crate) async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateDocumentRequest>,
) -> Result<Json<Document>, ApiError> {
    let status = body.status.trim();
    if status.is_empty() {
        return Err(ComposerError::Validation("required fields missing: status".into()).into());
    }

    let mut document = state
        .document_repo
        .get(&id)
        .await
        .ok_or_else(|| ComposerError::not_found("document", id.as_str()))?;
    document.status = status.to_string();
    document.updated_at = Utc::now();

    state
        .document_repo
        .save(document.clone())
        .await
        .map_err(ComposerError::persistence)?;
    state.publish(ResourceType::Document, ChangeType::Updated, &id);
    tracing::info!(document_id = %id, status = %document.status, "document status changed");

    Ok(Json(document))
}
