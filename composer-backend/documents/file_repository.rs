use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Document;
use super::repository::DocumentRepository;
use crate::flows::repository::path_component;

pub struct FileDocumentRepository {
    base_dir: PathBuf,
    documents: RwLock<HashMap<String, Document>>,
}

impl FileDocumentRepository {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            documents: RwLock::new(HashMap::new()),
        }
    }

    fn documents_dir(&self) -> PathBuf {
        self.base_dir.join("documents")
    }
}

#[async_trait]
impl DocumentRepository for FileDocumentRepository {
    async fn list(&self) -> Vec<Document> {
        let mut documents: Vec<_> = self.documents.read().await.values().cloned().collect();
        documents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        documents
    }

    async fn get(&self, id: &str) -> Option<Document> {
        self.documents.read().await.get(id).cloned()
    }

    async fn save(&self, document: Document) -> Result<()> {
        let dir = self.documents_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create documents dir: {}", dir.display()))?;

        let id = path_component("document", &document.id)?;
        let path = dir.join(format!("{id}.json"));
        let content =
            serde_json::to_string_pretty(&document).context("failed to serialize document")?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write document file: {}", path.display()))?;

        self.documents
            .write()
            .await
            .insert(document.id.clone(), document);
        Ok(())
    }

    async fn load_all(&self) -> Result<()> {
        let dir = self.documents_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create documents dir: {}", dir.display()))?;

        let mut loaded = HashMap::new();
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read documents dir: {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read document file: {}", path.display()))?;
            match serde_json::from_str::<Document>(&content) {
                Ok(document) => {
                    loaded.insert(document.id.clone(), document);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping invalid document file");
                }
            }
        }

        if !loaded.is_empty() {
            tracing::info!(count = loaded.len(), "Loaded documents");
        }
        *self.documents.write().await = loaded;
        Ok(())
    }
}
