pub mod changes;
pub mod documents;
pub mod executions;
pub mod flows;
pub mod middleware;
mod routes;

use axum::Router;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::api::changes::{ChangeType, ResourceChangeEvent, ResourceType};
use crate::documents::repository::DocumentRepository;
use crate::flows::repository::FlowRepository;

#[derive(Clone)]
pub struct AppState {
    pub flow_repo: Arc<dyn FlowRepository>,
    pub document_repo: Arc<dyn DocumentRepository>,
    pub changes_tx: broadcast::Sender<ResourceChangeEvent>,
}

impl AppState {
    pub fn new(
        flow_repo: Arc<dyn FlowRepository>,
        document_repo: Arc<dyn DocumentRepository>,
    ) -> Self {
        let (changes_tx, _) = broadcast::channel(256);
        Self {
            flow_repo,
            document_repo,
            changes_tx,
        }
    }

    /// Tell `/changes` subscribers about a mutation. Having no subscriber
    /// is not an error.
    pub fn publish(&self, resource_type: ResourceType, change_type: ChangeType, id: &str) {
        let _ = self.changes_tx.send(ResourceChangeEvent {
            resource_type,
            change_type,
            resource_id: id.to_string(),
            timestamp: Utc::now(),
        });
    }
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::AppState;
    use crate::documents::file_repository::FileDocumentRepository;
    use crate::documents::repository::DocumentRepository;
    use crate::flows::file_repository::FileFlowRepository;
    use crate::flows::repository::FlowRepository;

    /// App state over file repositories in a fresh temp dir. Keep the
    /// returned dir alive for the duration of the test.
    pub(crate) async fn test_state() -> (AppState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let flow_repo = FileFlowRepository::new(dir.path());
        flow_repo.load_all().await.unwrap();
        let document_repo = FileDocumentRepository::new(dir.path());
        document_repo.load_all().await.unwrap();
        (
            AppState::new(Arc::new(flow_repo), Arc::new(document_repo)),
            dir,
        )
    }
}
