use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::api::AppState;
use crate::api::changes::{ChangeType, ResourceType};
use crate::error::ComposerError;
use crate::flows::execution::{ExecutionStatus, FlowExecution};
use crate::flows::node::NodeData;
use crate::flows::wire::{
    ExecutionUpdate, NodeDataUpdate, StartExecutionRequest, TransferRequest, TransferResponse,
};
use crate::flows::{FlowDefinition, form};

type ApiError = (StatusCode, Json<Value>);

async fn load_execution(state: &AppState, id: &str) -> Result<FlowExecution, ComposerError> {
    state
        .flow_repo
        .get_execution(id)
        .await
        .ok_or_else(|| ComposerError::not_found("execution", id))
}

async fn store_execution(state: &AppState, execution: FlowExecution) -> Result<(), ComposerError> {
    state
        .flow_repo
        .save_execution(execution)
        .await
        .map_err(ComposerError::persistence)
}

/// An enabled definition a document can be started against.
async fn runnable_flow(state: &AppState, flow_id: &str) -> Result<FlowDefinition, ComposerError> {
    let flow = state
        .flow_repo
        .get_flow(flow_id)
        .await
        .ok_or_else(|| ComposerError::not_found("flow", flow_id))?;
    if !flow.is_enabled {
        return Err(ComposerError::Conflict(format!("flow {flow_id} is disabled")));
    }
    Ok(flow)
}

async fn active_execution(state: &AppState, document_id: &str) -> Option<FlowExecution> {
    state
        .flow_repo
        .list_executions(document_id)
        .await
        .into_iter()
        .find(|e| e.status.is_active())
}

/// Start documentation: a fresh execution of the flow for the document.
pub(crate) async fn start_execution(
    State(state): State<AppState>,
    Json(body): Json<StartExecutionRequest>,
) -> Result<(StatusCode, Json<FlowExecution>), ApiError> {
    if state.document_repo.get(&body.document_id).await.is_none() {
        return Err(ComposerError::not_found("document", body.document_id).into());
    }
    let flow = runnable_flow(&state, &body.flow_id).await?;
    if let Some(active) = active_execution(&state, &body.document_id).await {
        return Err(ComposerError::Conflict(format!(
            "document {} already has active execution {}",
            body.document_id, active.id
        ))
        .into());
    }

    let execution = FlowExecution::instantiate(&flow, &body.document_id);
    store_execution(&state, execution.clone()).await?;
    state.publish(ResourceType::Execution, ChangeType::Created, &execution.id);
    tracing::info!(
        execution_id = %execution.id,
        document_id = %execution.document_id,
        flow_id = %flow.id,
        "execution started"
    );

    Ok((StatusCode::CREATED, Json(execution)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListExecutionsQuery {
    document_id: String,
}

pub(crate) async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListExecutionsQuery>,
) -> Json<Vec<FlowExecution>> {
    Json(state.flow_repo.list_executions(&query.document_id).await)
}

pub(crate) async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowExecution>, ApiError> {
    Ok(Json(load_execution(&state, &id).await?))
}

pub(crate) async fn update_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExecutionUpdate>,
) -> Result<Json<FlowExecution>, ApiError> {
    let mut execution = load_execution(&state, &id).await?;
    let mut graph = body.flow_tasks;
    form::normalize_graph(&mut graph);

    execution.flow_tasks = graph;
    execution.status = body.status;
    execution.completed_at = body.completed_at;
    execution.updated_at = Utc::now();

    store_execution(&state, execution.clone()).await?;
    state.publish(ResourceType::Execution, ChangeType::Updated, &id);
    tracing::info!(execution_id = %id, status = ?execution.status, "execution updated");
    Ok(Json(execution))
}

/// Replace one node's data. Read-only nodes keep what they have.
pub(crate) async fn update_node_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NodeDataUpdate>,
) -> Result<Json<FlowExecution>, ApiError> {
    let mut execution = load_execution(&state, &id).await?;
    let node = execution
        .flow_tasks
        .node_mut(&body.node_id)
        .ok_or_else(|| ComposerError::not_found("node", body.node_id.as_str()))?;

    if node.runtime().is_readonly || node.runtime().is_executed.is_true() {
        return Err(ComposerError::ReadOnly(body.node_id).into());
    }
    node.data = NodeData::from_value(node.node_type(), body.node_data).map_err(|e| {
        ComposerError::Validation(format!("invalid data for node {}: {e}", body.node_id))
    })?;
    execution.updated_at = Utc::now();

    store_execution(&state, execution.clone()).await?;
    state.publish(ResourceType::Execution, ChangeType::Updated, &id);
    tracing::info!(execution_id = %id, node_id = %body.node_id, "node data updated");
    Ok(Json(execution))
}

/// Hand a document over to another flow: a new execution is created for the
/// target flow and the document's active execution becomes `transfered`.
/// The new execution is removed again if the old one cannot be updated.
pub(crate) async fn transfer(
    State(state): State<AppState>,
    Json(body): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let target = runnable_flow(&state, &body.target_flow_id).await?;
    let mut current = active_execution(&state, &body.current_document_id)
        .await
        .ok_or_else(|| {
            ComposerError::not_found("active execution", body.current_document_id.as_str())
        })?;

    let created = FlowExecution::instantiate(&target, &body.current_document_id);
    store_execution(&state, created.clone()).await?;

    let now = Utc::now();
    current.flow_tasks = body.flow_tasks;
    current.status = ExecutionStatus::Transfered;
    current.completed_at = Some(now);
    current.updated_at = now;

    if let Err(e) = store_execution(&state, current.clone()).await {
        tracing::warn!(
            execution_id = %created.id,
            error = %e,
            "removing new execution after failed transfer"
        );
        if let Err(cleanup) = state.flow_repo.delete_execution(&created.id).await {
            tracing::error!(
                execution_id = %created.id,
                error = %cleanup,
                "failed to remove orphaned execution"
            );
        }
        return Err(e.into());
    }

    state.publish(ResourceType::Execution, ChangeType::Created, &created.id);
    state.publish(ResourceType::Execution, ChangeType::Updated, &current.id);
    tracing::info!(
        document_id = %body.current_document_id,
        from_execution = %current.id,
        to_execution = %created.id,
        target_flow_id = %target.id,
        "document transferred"
    );

    Ok(Json(TransferResponse {
        target_flow_name: target.name,
        new_execution_id: created.id,
    }))
}
