use std::sync::Arc;

use super::FlowBackend;
use crate::error::ComposerError;
use crate::flows::editor::FlowEditorState;
use crate::flows::wire::SaveFlowRequest;
use crate::flows::{FlowDefinition, NewFlowDefinition};

/// Flow-definition operations of the editor. Validation and lock checks run
/// locally so that a refused operation never reaches the backend.
#[derive(Clone)]
pub struct FlowCatalog {
    backend: Arc<dyn FlowBackend>,
}

impl FlowCatalog {
    pub fn new(backend: Arc<dyn FlowBackend>) -> Self {
        Self { backend }
    }

    pub async fn open(&self, flow_id: &str) -> Result<FlowEditorState, ComposerError> {
        let flow = self
            .backend
            .get_flow(flow_id)
            .await
            .map_err(ComposerError::persistence)?;
        Ok(FlowEditorState::load(&flow))
    }

    pub async fn create(&self, input: NewFlowDefinition) -> Result<FlowDefinition, ComposerError> {
        input.validate()?;
        let flow = self
            .backend
            .create_flow(&input)
            .await
            .map_err(ComposerError::persistence)?;
        tracing::info!(flow_id = %flow.id, code = %flow.code, "flow created");
        Ok(flow)
    }

    /// Save the editor's graph as a full replacement of `flowData`. On
    /// failure the editor keeps its edits so the save can be retried.
    pub async fn save(&self, editor: &mut FlowEditorState) -> Result<(), ComposerError> {
        if editor.is_locked() {
            return Err(ComposerError::Locked(editor.flow_id().to_string()));
        }
        let request = SaveFlowRequest {
            flow_data: editor.snapshot(),
            ..Default::default()
        };
        self.backend
            .save_flow(editor.flow_id(), &request)
            .await
            .map_err(ComposerError::persistence)?;
        editor.mark_saved();
        tracing::info!(flow_id = %editor.flow_id(), "flow saved");
        Ok(())
    }

    /// Change name, code and description of a flow, keeping its graph.
    pub async fn update_metadata(
        &self,
        flow: &mut FlowDefinition,
        name: &str,
        code: &str,
        description: &str,
    ) -> Result<(), ComposerError> {
        flow.ensure_unlocked()?;
        NewFlowDefinition {
            code: code.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            flow_type_id: flow.flow_type_id.clone(),
            created_by: None,
        }
        .validate()?;

        let request = SaveFlowRequest {
            name: Some(name.trim().to_string()),
            code: Some(code.to_string()),
            description: Some(description.to_string()),
            flow_data: flow.flow_data.clone(),
        };
        self.backend
            .save_flow(&flow.id, &request)
            .await
            .map_err(ComposerError::persistence)?;

        flow.name = name.trim().to_string();
        flow.code = code.to_string();
        flow.description = description.to_string();
        Ok(())
    }

    pub async fn duplicate(&self, flow_id: &str) -> Result<FlowDefinition, ComposerError> {
        let copy = self
            .backend
            .duplicate_flow(flow_id)
            .await
            .map_err(ComposerError::persistence)?;
        tracing::info!(flow_id, copy_id = %copy.id, "flow duplicated");
        Ok(copy)
    }

    /// Flip the lock and apply the confirmed state to the open editor.
    pub async fn toggle_lock(&self, editor: &mut FlowEditorState) -> Result<bool, ComposerError> {
        let locked = self
            .backend
            .toggle_lock(editor.flow_id())
            .await
            .map_err(ComposerError::persistence)?;
        editor.set_locked(locked);
        tracing::info!(flow_id = %editor.flow_id(), locked, "flow lock toggled");
        Ok(locked)
    }

    pub async fn toggle_enabled(&self, flow_id: &str) -> Result<bool, ComposerError> {
        let enabled = self
            .backend
            .toggle_enabled(flow_id)
            .await
            .map_err(ComposerError::persistence)?;
        tracing::info!(flow_id, enabled, "flow enabled toggled");
        Ok(enabled)
    }

    pub async fn delete(&self, flow_id: &str) -> Result<(), ComposerError> {
        self.backend
            .delete_flow(flow_id)
            .await
            .map_err(ComposerError::persistence)?;
        tracing::info!(flow_id, "flow deleted");
        Ok(())
    }
}
