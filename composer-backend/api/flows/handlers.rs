use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::changes::{ChangeType, ResourceType};
use crate::error::ComposerError;
use crate::flows::repository::{SnapshotInfo, snapshot_name};
use crate::flows::wire::{EnabledState, LockState, SaveFlowRequest, SnapshotFileRequest};
use crate::flows::{FlowDefinition, GraphSnapshot, NewFlowDefinition, code, form};

type ApiError = (StatusCode, Json<Value>);

async fn load_flow(state: &AppState, id: &str) -> Result<FlowDefinition, ComposerError> {
    state
        .flow_repo
        .get_flow(id)
        .await
        .ok_or_else(|| ComposerError::not_found("flow", id))
}

async fn store_flow(state: &AppState, flow: FlowDefinition) -> Result<(), ComposerError> {
    state
        .flow_repo
        .save_flow(flow)
        .await
        .map_err(ComposerError::persistence)
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListFlowsQuery {
    #[serde(default)]
    include_disabled: bool,
}

pub(crate) async fn list_flows(
    State(state): State<AppState>,
    Query(query): Query<ListFlowsQuery>,
) -> Json<Vec<FlowDefinition>> {
    let flows = state
        .flow_repo
        .list_flows()
        .await
        .into_iter()
        .filter(|f| query.include_disabled || f.is_enabled)
        .collect();
    Json(flows)
}

pub(crate) async fn get_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowDefinition>, ApiError> {
    Ok(Json(load_flow(&state, &id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateFlowRequest {
    #[serde(flatten)]
    flow: NewFlowDefinition,
    #[serde(default)]
    flow_data: Option<GraphSnapshot>,
}

pub(crate) async fn create_flow(
    State(state): State<AppState>,
    Json(body): Json<CreateFlowRequest>,
) -> Result<(StatusCode, Json<FlowDefinition>), ApiError> {
    let mut flow = body.flow.into_definition(Uuid::new_v4().to_string())?;
    if let Some(mut graph) = body.flow_data {
        form::normalize_graph(&mut graph);
        flow.flow_data = graph;
    }

    store_flow(&state, flow.clone()).await?;
    state.publish(ResourceType::Flow, ChangeType::Created, &flow.id);
    tracing::info!(flow_id = %flow.id, code = %flow.code, "flow created");

    Ok((StatusCode::CREATED, Json(flow)))
}

/// Full replacement of `flowData`, optionally with new metadata.
pub(crate) async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SaveFlowRequest>,
) -> Result<Json<FlowDefinition>, ApiError> {
    let mut flow = load_flow(&state, &id).await?;
    flow.ensure_unlocked()?;

    if let Some(name) = body.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(ComposerError::Validation("required fields missing: name".into()).into());
        }
        flow.name = name.to_string();
    }
    if let Some(new_code) = body.code {
        if !code::validate(&new_code) {
            return Err(
                ComposerError::Validation(format!("code {new_code:?} must match XXX-99")).into(),
            );
        }
        flow.code = new_code;
    }
    if let Some(description) = body.description {
        flow.description = description;
    }
    flow.flow_data = body.flow_data;
    form::normalize_graph(&mut flow.flow_data);
    flow.updated_at = Utc::now();

    store_flow(&state, flow.clone()).await?;
    state.publish(ResourceType::Flow, ChangeType::Updated, &id);
    tracing::info!(flow_id = %id, nodes = flow.flow_data.nodes.len(), "flow saved");

    Ok(Json(flow))
}

pub(crate) async fn delete_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let existed = state
        .flow_repo
        .delete_flow(&id)
        .await
        .map_err(ComposerError::persistence)?;
    if !existed {
        return Err(ComposerError::not_found("flow", id).into());
    }

    state.publish(ResourceType::Flow, ChangeType::Deleted, &id);
    tracing::info!(flow_id = %id, "flow deleted");
    Ok(Json(json!({ "deleted": true })))
}

pub(crate) async fn toggle_lock(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LockState>, ApiError> {
    let mut flow = load_flow(&state, &id).await?;
    flow.is_locked = !flow.is_locked;
    flow.updated_at = Utc::now();
    let is_locked = flow.is_locked;

    store_flow(&state, flow).await?;
    state.publish(ResourceType::Flow, ChangeType::Updated, &id);
    tracing::info!(flow_id = %id, is_locked, "flow lock toggled");
    Ok(Json(LockState { is_locked }))
}

pub(crate) async fn toggle_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EnabledState>, ApiError> {
    let mut flow = load_flow(&state, &id).await?;
    flow.is_enabled = !flow.is_enabled;
    flow.updated_at = Utc::now();
    let is_enabled = flow.is_enabled;

    store_flow(&state, flow).await?;
    state.publish(ResourceType::Flow, ChangeType::Updated, &id);
    tracing::info!(flow_id = %id, is_enabled, "flow enabled toggled");
    Ok(Json(EnabledState { is_enabled }))
}

pub(crate) async fn duplicate_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<FlowDefinition>), ApiError> {
    let flow = load_flow(&state, &id).await?;
    let copy = flow.duplicate(Uuid::new_v4().to_string());

    store_flow(&state, copy.clone()).await?;
    state.publish(ResourceType::Flow, ChangeType::Created, &copy.id);
    tracing::info!(flow_id = %id, copy_id = %copy.id, "flow duplicated");
    Ok((StatusCode::CREATED, Json(copy)))
}

pub(crate) async fn export_json(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SnapshotFileRequest>,
) -> Result<Json<SnapshotInfo>, ApiError> {
    let file_name = snapshot_name(&body.file_name)?;
    let flow = load_flow(&state, &id).await?;

    state
        .flow_repo
        .save_snapshot(&id, file_name, &flow.flow_data)
        .await
        .map_err(ComposerError::persistence)?;

    Ok(Json(SnapshotInfo {
        flow_id: id,
        file_name: file_name.to_string(),
    }))
}

pub(crate) async fn import_json(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SnapshotFileRequest>,
) -> Result<Json<FlowDefinition>, ApiError> {
    let file_name = snapshot_name(&body.file_name)?;
    let mut flow = load_flow(&state, &id).await?;
    flow.ensure_unlocked()?;

    let graph = state
        .flow_repo
        .load_snapshot(&id, file_name)
        .await
        .map_err(ComposerError::persistence)?
        .ok_or_else(|| ComposerError::not_found("snapshot", file_name))?;
    flow.flow_data = graph;
    flow.updated_at = Utc::now();

    store_flow(&state, flow.clone()).await?;
    state.publish(ResourceType::Flow, ChangeType::Updated, &id);
    tracing::info!(flow_id = %id, file_name, "flow imported from snapshot");
    Ok(Json(flow))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SnapshotsQuery {
    #[serde(default)]
    flow_id: Option<String>,
}

pub(crate) async fn list_snapshots(
    State(state): State<AppState>,
    Query(query): Query<SnapshotsQuery>,
) -> Result<Json<Vec<SnapshotInfo>>, ApiError> {
    let snapshots = state
        .flow_repo
        .list_snapshots(query.flow_id.as_deref())
        .await
        .map_err(ComposerError::persistence)?;
    Ok(Json(snapshots))
}
