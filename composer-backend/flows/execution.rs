use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FlowDefinition, GraphSnapshot, state};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Initiated,
    Concluded,
    Transfered,
    Completed,
}

impl ExecutionStatus {
    pub fn is_active(self) -> bool {
        self == ExecutionStatus::Initiated
    }
}

/// One run of a flow definition against a document. The graph carries the
/// runtime state of every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowExecution {
    pub id: String,
    pub document_id: String,
    pub flow_id: String,
    pub flow_code: String,
    pub flow_name: String,
    pub status: ExecutionStatus,
    #[serde(alias = "executionData")]
    pub flow_tasks: GraphSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlowExecution {
    /// Start a run of `flow` for `document_id`.
    pub fn instantiate(flow: &FlowDefinition, document_id: &str) -> Self {
        let mut graph = flow.flow_data.clone();
        state::reset_for_execution(&mut graph);
        let now = Utc::now();
        FlowExecution {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            flow_id: flow.id.clone(),
            flow_code: flow.code.clone(),
            flow_name: flow.name.clone(),
            status: ExecutionStatus::Initiated,
            flow_tasks: graph,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}
