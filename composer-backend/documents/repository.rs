use anyhow::Result;
use async_trait::async_trait;

use super::Document;

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn list(&self) -> Vec<Document>;
    async fn get(&self, id: &str) -> Option<Document>;
    async fn save(&self, document: Document) -> Result<()>;
    async fn load_all(&self) -> Result<()>;
}
