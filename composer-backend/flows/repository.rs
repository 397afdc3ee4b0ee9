use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use super::FlowDefinition;
use super::GraphSnapshot;
use super::execution::FlowExecution;
use crate::error::ComposerError;

/// A graph exported under a name, owned by one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub flow_id: String,
    pub file_name: String,
}

#[async_trait]
pub trait FlowRepository: Send + Sync {
    async fn list_flows(&self) -> Vec<FlowDefinition>;
    async fn get_flow(&self, id: &str) -> Option<FlowDefinition>;
    async fn save_flow(&self, flow: FlowDefinition) -> Result<()>;
    async fn delete_flow(&self, id: &str) -> Result<bool>;

    /// Executions of a document, newest first.
    async fn list_executions(&self, document_id: &str) -> Vec<FlowExecution>;
    async fn get_execution(&self, id: &str) -> Option<FlowExecution>;
    async fn save_execution(&self, execution: FlowExecution) -> Result<()>;
    async fn delete_execution(&self, id: &str) -> Result<bool>;

    async fn save_snapshot(&self, flow_id: &str, file_name: &str, graph: &GraphSnapshot)
    -> Result<()>;
    async fn load_snapshot(&self, flow_id: &str, file_name: &str) -> Result<Option<GraphSnapshot>>;
    async fn list_snapshots(&self, flow_id: Option<&str>) -> Result<Vec<SnapshotInfo>>;

    /// Rewrite every record whose attached forms were repaired at load.
    /// Returns how many records were written.
    async fn migrate_legacy_forms(&self) -> Result<usize>;

    async fn load_all(&self) -> Result<()>;
}

/// Normalize a snapshot file name: an optional `.json` suffix is dropped,
/// and only letters, digits, `-`, `_` and `.` are accepted.
pub fn snapshot_name(file_name: &str) -> Result<&str, ComposerError> {
    let name = file_name.trim();
    let name = name.strip_suffix(".json").unwrap_or(name);
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(ComposerError::Validation(format!(
            "invalid snapshot file name {file_name:?}"
        )));
    }
    Ok(name)
}

/// Check that a record id can name exactly one file or directory under
/// the data dir.
pub fn path_component<'a>(kind: &'static str, id: &'a str) -> Result<&'a str, ComposerError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0']);
    if !valid {
        return Err(ComposerError::Validation(format!("invalid {kind} id {id:?}")));
    }
    Ok(id)
}
