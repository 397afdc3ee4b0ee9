pub mod catalog;
#[cfg(test)]
pub mod fake;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;

use crate::flows::execution::FlowExecution;
use crate::flows::wire::{
    ExecutionUpdate, NodeDataUpdate, SaveFlowRequest, TransferRequest, TransferResponse,
};
use crate::flows::{FlowDefinition, NewFlowDefinition};

/// The REST collaborator the editor talks to.
#[async_trait]
pub trait FlowBackend: Send + Sync {
    // Definitions
    async fn get_flow(&self, id: &str) -> Result<FlowDefinition>;
    async fn create_flow(&self, flow: &NewFlowDefinition) -> Result<FlowDefinition>;
    async fn save_flow(&self, id: &str, request: &SaveFlowRequest) -> Result<()>;
    async fn duplicate_flow(&self, id: &str) -> Result<FlowDefinition>;
    async fn toggle_lock(&self, id: &str) -> Result<bool>;
    async fn toggle_enabled(&self, id: &str) -> Result<bool>;
    async fn delete_flow(&self, id: &str) -> Result<()>;

    // Executions
    async fn get_execution(&self, id: &str) -> Result<FlowExecution>;
    async fn update_execution(&self, id: &str, update: &ExecutionUpdate) -> Result<()>;
    async fn update_node_data(&self, execution_id: &str, update: &NodeDataUpdate) -> Result<()>;
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferResponse>;

    // Documents
    async fn update_document_status(&self, document_id: &str, status: &str) -> Result<()>;
}
