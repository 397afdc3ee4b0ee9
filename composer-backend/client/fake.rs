use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use super::FlowBackend;
use crate::flows::execution::FlowExecution;
use crate::flows::wire::{
    ExecutionUpdate, NodeDataUpdate, SaveFlowRequest, TransferRequest, TransferResponse,
};
use crate::flows::{FlowDefinition, NewFlowDefinition};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetFlow(String),
    CreateFlow(NewFlowDefinition),
    SaveFlow(String, SaveFlowRequest),
    DuplicateFlow(String),
    ToggleLock(String),
    ToggleEnabled(String),
    DeleteFlow(String),
    GetExecution(String),
    UpdateExecution(String, ExecutionUpdate),
    UpdateNodeData(String, NodeDataUpdate),
    Transfer(TransferRequest),
    UpdateDocumentStatus(String, String),
}

impl Call {
    fn name(&self) -> &'static str {
        match self {
            Call::GetFlow(_) => "get_flow",
            Call::CreateFlow(_) => "create_flow",
            Call::SaveFlow(..) => "save_flow",
            Call::DuplicateFlow(_) => "duplicate_flow",
            Call::ToggleLock(_) => "toggle_lock",
            Call::ToggleEnabled(_) => "toggle_enabled",
            Call::DeleteFlow(_) => "delete_flow",
            Call::GetExecution(_) => "get_execution",
            Call::UpdateExecution(..) => "update_execution",
            Call::UpdateNodeData(..) => "update_node_data",
            Call::Transfer(_) => "transfer",
            Call::UpdateDocumentStatus(..) => "update_document_status",
        }
    }
}

/// In-memory [`FlowBackend`] that records every call. Operations named in
/// `fail_on` return an error (after being recorded).
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<&'static str>>,
    flows: Mutex<HashMap<String, FlowDefinition>>,
    executions: Mutex<HashMap<String, FlowExecution>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(self, flow: FlowDefinition) -> Self {
        self.flows.lock().unwrap().insert(flow.id.clone(), flow);
        self
    }

    pub fn with_execution(self, execution: FlowExecution) -> Self {
        self.executions
            .lock()
            .unwrap()
            .insert(execution.id.clone(), execution);
        self
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, call: Call) -> Result<()> {
        let name = call.name();
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(name) {
            return Err(anyhow!("{name} failed"));
        }
        Ok(())
    }

    fn flow(&self, id: &str) -> Result<FlowDefinition> {
        self.flows
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("flow {id} not found"))
    }
}

#[async_trait]
impl FlowBackend for RecordingBackend {
    async fn get_flow(&self, id: &str) -> Result<FlowDefinition> {
        self.record(Call::GetFlow(id.to_string()))?;
        self.flow(id)
    }

    async fn create_flow(&self, flow: &NewFlowDefinition) -> Result<FlowDefinition> {
        self.record(Call::CreateFlow(flow.clone()))?;
        let id = format!("flow-{}", self.call_count());
        let created = flow.clone().into_definition(id)?;
        self.flows
            .lock()
            .unwrap()
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn save_flow(&self, id: &str, request: &SaveFlowRequest) -> Result<()> {
        self.record(Call::SaveFlow(id.to_string(), request.clone()))?;
        if let Some(flow) = self.flows.lock().unwrap().get_mut(id) {
            flow.flow_data = request.flow_data.clone();
        }
        Ok(())
    }

    async fn duplicate_flow(&self, id: &str) -> Result<FlowDefinition> {
        self.record(Call::DuplicateFlow(id.to_string()))?;
        let copy = self.flow(id)?.duplicate(format!("{id}-copy"));
        self.flows
            .lock()
            .unwrap()
            .insert(copy.id.clone(), copy.clone());
        Ok(copy)
    }

    async fn toggle_lock(&self, id: &str) -> Result<bool> {
        self.record(Call::ToggleLock(id.to_string()))?;
        let mut flows = self.flows.lock().unwrap();
        let flow = flows
            .get_mut(id)
            .ok_or_else(|| anyhow!("flow {id} not found"))?;
        flow.is_locked = !flow.is_locked;
        Ok(flow.is_locked)
    }

    async fn toggle_enabled(&self, id: &str) -> Result<bool> {
        self.record(Call::ToggleEnabled(id.to_string()))?;
        let mut flows = self.flows.lock().unwrap();
        let flow = flows
            .get_mut(id)
            .ok_or_else(|| anyhow!("flow {id} not found"))?;
        flow.is_enabled = !flow.is_enabled;
        Ok(flow.is_enabled)
    }

    async fn delete_flow(&self, id: &str) -> Result<()> {
        self.record(Call::DeleteFlow(id.to_string()))?;
        self.flows.lock().unwrap().remove(id);
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<FlowExecution> {
        self.record(Call::GetExecution(id.to_string()))?;
        self.executions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("execution {id} not found"))
    }

    async fn update_execution(&self, id: &str, update: &ExecutionUpdate) -> Result<()> {
        self.record(Call::UpdateExecution(id.to_string(), update.clone()))
    }

    async fn update_node_data(&self, execution_id: &str, update: &NodeDataUpdate) -> Result<()> {
        self.record(Call::UpdateNodeData(
            execution_id.to_string(),
            update.clone(),
        ))
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferResponse> {
        self.record(Call::Transfer(request.clone()))?;
        let target_flow_name = self
            .flow(&request.target_flow_id)
            .map(|f| f.name)
            .unwrap_or_else(|_| request.target_flow_id.clone());
        Ok(TransferResponse {
            target_flow_name,
            new_execution_id: "exec-new".to_string(),
        })
    }

    async fn update_document_status(&self, document_id: &str, status: &str) -> Result<()> {
        self.record(Call::UpdateDocumentStatus(
            document_id.to_string(),
            status.to_string(),
        ))
    }
}
