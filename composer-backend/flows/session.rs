//! Operator actions against one running execution.
//!
//! Plain node execution persists the whole execution graph and only then
//! commits locally. Executing an end node runs one of two sagas:
//!
//! - conclusion: execution → `concluded`, then document → `Concluido`;
//!   if the document write fails the execution write is compensated.
//! - transfer: execution graph persisted, then a new execution is created
//!   for the target flow; if that fails the graph write is compensated.
//!
//! In both cases the local execution is only touched after every remote
//! step succeeded, and the outcome is reported as an [`ActionResult`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::execution::{ExecutionStatus, FlowExecution};
use super::node::{Approval, EndKind, Node, NodeData};
use super::wire::{ExecutionUpdate, NodeDataUpdate, TransferRequest};
use super::{GraphSnapshot, form, state};
use crate::client::FlowBackend;
use crate::documents::STATUS_CONCLUDED;
use crate::error::ComposerError;

pub const MISSING_TARGET_FLOW: &str = "Fluxo de destino não definido";
const NODE_EXECUTED: &str = "Etapa executada com sucesso";
const FLOW_CONCLUDED: &str = "Fluxo concluído com sucesso";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Discrete outcome of an operator action, shown as a banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ResultStatus,
    pub message: String,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

impl From<ComposerError> for ActionResult {
    fn from(err: ComposerError) -> Self {
        ActionResult::error(err.user_message())
    }
}

/// What executing a node amounts to, decided before any state is touched.
enum Plan {
    Step,
    Conclude,
    Transfer { target_flow_id: String },
}

pub struct ExecutionSession {
    execution: FlowExecution,
    show_approval_alert: bool,
}

impl ExecutionSession {
    pub fn new(mut execution: FlowExecution) -> Self {
        let repaired = form::normalize_graph(&mut execution.flow_tasks);
        if repaired > 0 {
            tracing::debug!(execution_id = %execution.id, repaired, "repaired legacy forms");
        }
        Self {
            execution,
            show_approval_alert: false,
        }
    }

    pub fn execution(&self) -> &FlowExecution {
        &self.execution
    }

    pub fn into_execution(self) -> FlowExecution {
        self.execution
    }

    /// Whether an approval change is waiting for [`confirm_approval`].
    ///
    /// [`confirm_approval`]: ExecutionSession::confirm_approval
    pub fn show_approval_alert(&self) -> bool {
        self.show_approval_alert
    }

    fn ensure_active(&self) -> Result<(), ComposerError> {
        if !self.execution.status.is_active() {
            return Err(ComposerError::Conflict(format!(
                "execution {} is no longer active",
                self.execution.id
            )));
        }
        Ok(())
    }

    fn node_mut(&mut self, node_id: &str) -> Result<&mut Node, ComposerError> {
        self.execution
            .flow_tasks
            .node_mut(node_id)
            .ok_or_else(|| ComposerError::not_found("node", node_id))
    }

    pub fn fill_field(
        &mut self,
        node_id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), ComposerError> {
        self.ensure_active()?;
        state::set_field(self.node_mut(node_id)?, field, value)
    }

    /// Change the approval of a gate locally. Nothing is persisted until
    /// the operator confirms.
    pub fn update_approval_status(
        &mut self,
        node_id: &str,
        approval: Approval,
    ) -> Result<(), ComposerError> {
        self.ensure_active()?;
        state::set_approval(self.node_mut(node_id)?, approval)?;
        self.show_approval_alert = true;
        Ok(())
    }

    /// Persist the node's data. The alert stays up if the write fails.
    pub async fn confirm_approval(
        &mut self,
        backend: &dyn FlowBackend,
        node_id: &str,
    ) -> Result<(), ComposerError> {
        let node = self
            .execution
            .flow_tasks
            .node(node_id)
            .ok_or_else(|| ComposerError::not_found("node", node_id))?;
        let update = NodeDataUpdate {
            node_id: node_id.to_string(),
            node_data: node.data.to_value(),
        };

        backend
            .update_node_data(&self.execution.id, &update)
            .await
            .map_err(ComposerError::persistence)?;

        self.show_approval_alert = false;
        tracing::info!(execution_id = %self.execution.id, node_id, "approval confirmed");
        Ok(())
    }

    /// Execute a node, running the conclusion or transfer protocol for end
    /// nodes. Never returns an error: failures are reported in the result.
    pub async fn execute_node(&mut self, backend: &dyn FlowBackend, node_id: &str) -> ActionResult {
        match self.try_execute_node(backend, node_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    execution_id = %self.execution.id,
                    node_id,
                    error = %e,
                    "node execution failed"
                );
                e.into()
            }
        }
    }

    async fn try_execute_node(
        &mut self,
        backend: &dyn FlowBackend,
        node_id: &str,
    ) -> Result<ActionResult, ComposerError> {
        self.ensure_active()?;
        let plan = self.plan(node_id)?;

        let mut candidate = self.execution.flow_tasks.clone();
        state::execute_node(&mut candidate, node_id)?;

        match plan {
            Plan::Step => {
                self.persist_graph(backend, &candidate).await?;
                let status = self.execution.status;
                self.commit(candidate, status);
                Ok(ActionResult::success(NODE_EXECUTED))
            }
            Plan::Conclude => self.conclude(backend, candidate).await,
            Plan::Transfer { target_flow_id } => {
                self.transfer(backend, candidate, target_flow_id).await
            }
        }
    }

    fn plan(&self, node_id: &str) -> Result<Plan, ComposerError> {
        let node = self
            .execution
            .flow_tasks
            .node(node_id)
            .ok_or_else(|| ComposerError::not_found("node", node_id))?;

        let NodeData::End(end) = &node.data else {
            return Ok(Plan::Step);
        };
        match end.from_type {
            Some(EndKind::Transfer) => match end.target_flow_id() {
                Some(id) => Ok(Plan::Transfer {
                    target_flow_id: id.to_string(),
                }),
                None => Err(ComposerError::TransferPrecondition(
                    MISSING_TARGET_FLOW.to_string(),
                )),
            },
            Some(EndKind::Conclude) | None => Ok(Plan::Conclude),
        }
    }

    async fn persist_graph(
        &self,
        backend: &dyn FlowBackend,
        graph: &GraphSnapshot,
    ) -> Result<(), ComposerError> {
        let update = ExecutionUpdate {
            flow_tasks: graph.clone(),
            status: self.execution.status,
            completed_at: None,
        };
        backend
            .update_execution(&self.execution.id, &update)
            .await
            .map_err(ComposerError::persistence)
    }

    /// Put the remote execution back to what this session last committed.
    async fn compensate(&self, backend: &dyn FlowBackend) {
        tracing::warn!(execution_id = %self.execution.id, "compensating execution write");
        if let Err(e) = self.persist_graph(backend, &self.execution.flow_tasks).await {
            tracing::error!(
                execution_id = %self.execution.id,
                error = %e,
                "compensation failed, execution may need manual repair"
            );
        }
    }

    fn commit(&mut self, graph: GraphSnapshot, status: ExecutionStatus) {
        let now = Utc::now();
        self.execution.flow_tasks = graph;
        self.execution.status = status;
        self.execution.updated_at = now;
        if status == ExecutionStatus::Concluded {
            self.execution.completed_at = Some(now);
        }
    }

    async fn conclude(
        &mut self,
        backend: &dyn FlowBackend,
        candidate: GraphSnapshot,
    ) -> Result<ActionResult, ComposerError> {
        let update = ExecutionUpdate {
            flow_tasks: candidate.clone(),
            status: ExecutionStatus::Concluded,
            completed_at: Some(Utc::now()),
        };
        backend
            .update_execution(&self.execution.id, &update)
            .await
            .map_err(ComposerError::persistence)?;

        if let Err(e) = backend
            .update_document_status(&self.execution.document_id, STATUS_CONCLUDED)
            .await
        {
            self.compensate(backend).await;
            return Err(ComposerError::persistence(e));
        }

        self.commit(candidate, ExecutionStatus::Concluded);
        tracing::info!(
            execution_id = %self.execution.id,
            document_id = %self.execution.document_id,
            "execution concluded"
        );
        Ok(ActionResult::success(FLOW_CONCLUDED))
    }

    async fn transfer(
        &mut self,
        backend: &dyn FlowBackend,
        candidate: GraphSnapshot,
        target_flow_id: String,
    ) -> Result<ActionResult, ComposerError> {
        self.persist_graph(backend, &candidate).await?;

        let request = TransferRequest {
            current_document_id: self.execution.document_id.clone(),
            target_flow_id,
            flow_tasks: candidate.clone(),
        };
        let response = match backend.transfer(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.compensate(backend).await;
                return Err(ComposerError::persistence(e));
            }
        };

        self.commit(candidate, ExecutionStatus::Transfered);
        tracing::info!(
            execution_id = %self.execution.id,
            document_id = %self.execution.document_id,
            target_flow_id = %request.target_flow_id,
            new_execution_id = %response.new_execution_id,
            "execution transferred"
        );
        Ok(ActionResult::success(format!(
            "Documento transferido para o fluxo {}",
            response.target_flow_name
        )))
    }
}
