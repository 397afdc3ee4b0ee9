use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::FlowBackend;
use crate::flows::execution::FlowExecution;
use crate::flows::wire::{
    EnabledState, ExecutionUpdate, LockState, NodeDataUpdate, SaveFlowRequest, TransferRequest,
    TransferResponse,
};
use crate::flows::{FlowDefinition, NewFlowDefinition};

const USER_AGENT: &str = "composer-cli";

/// [`FlowBackend`] over the REST API. No retries; timeouts are the client's.
pub struct HttpFlowBackend {
    client: Client,
    base_url: String,
}

impl HttpFlowBackend {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let resp = request
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .with_context(|| format!("failed to {what}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("API error {status} trying to {what}: {body}");
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let resp = self.send(request, what).await?;
        resp.json()
            .await
            .with_context(|| format!("failed to parse response to {what}"))
    }
}

#[async_trait]
impl FlowBackend for HttpFlowBackend {
    async fn get_flow(&self, id: &str) -> Result<FlowDefinition> {
        let request = self.client.get(self.url(&format!("/documents-flows/{id}")));
        self.send_json(request, "fetch flow").await
    }

    async fn create_flow(&self, flow: &NewFlowDefinition) -> Result<FlowDefinition> {
        let request = self.client.post(self.url("/documents-flows")).json(flow);
        self.send_json(request, "create flow").await
    }

    async fn save_flow(&self, id: &str, body: &SaveFlowRequest) -> Result<()> {
        let request = self
            .client
            .put(self.url(&format!("/documents-flows/{id}")))
            .json(body);
        self.send(request, "save flow").await?;
        Ok(())
    }

    async fn duplicate_flow(&self, id: &str) -> Result<FlowDefinition> {
        let request = self
            .client
            .post(self.url(&format!("/documents-flows/{id}/duplicate")));
        self.send_json(request, "duplicate flow").await
    }

    async fn toggle_lock(&self, id: &str) -> Result<bool> {
        let request = self
            .client
            .patch(self.url(&format!("/documents-flows/{id}/toggle-lock")));
        let state: LockState = self.send_json(request, "toggle flow lock").await?;
        Ok(state.is_locked)
    }

    async fn toggle_enabled(&self, id: &str) -> Result<bool> {
        let request = self
            .client
            .patch(self.url(&format!("/documents-flows/{id}/toggle-enabled")));
        let state: EnabledState = self.send_json(request, "toggle flow enabled").await?;
        Ok(state.is_enabled)
    }

    async fn delete_flow(&self, id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.url(&format!("/documents-flows/{id}")));
        self.send(request, "delete flow").await?;
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<FlowExecution> {
        let request = self
            .client
            .get(self.url(&format!("/document-flow-executions/{id}")));
        self.send_json(request, "fetch execution").await
    }

    async fn update_execution(&self, id: &str, update: &ExecutionUpdate) -> Result<()> {
        let request = self
            .client
            .put(self.url(&format!("/document-flow-executions/{id}")))
            .json(update);
        self.send(request, "update execution").await?;
        Ok(())
    }

    async fn update_node_data(&self, execution_id: &str, update: &NodeDataUpdate) -> Result<()> {
        let request = self
            .client
            .patch(self.url(&format!(
                "/document-flow-executions/{execution_id}/node-data"
            )))
            .json(update);
        self.send(request, "update node data").await?;
        Ok(())
    }

    async fn transfer(&self, body: &TransferRequest) -> Result<TransferResponse> {
        let request = self
            .client
            .post(self.url("/document-flow-executions/transfer"))
            .json(body);
        self.send_json(request, "transfer document").await
    }

    async fn update_document_status(&self, document_id: &str, status: &str) -> Result<()> {
        let request = self
            .client
            .put(self.url(&format!("/documentos/{document_id}")))
            .json(&json!({ "status": status }));
        self.send(request, "update document status").await?;
        Ok(())
    }
}
