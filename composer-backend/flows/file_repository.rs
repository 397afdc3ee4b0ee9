use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use super::execution::FlowExecution;
use super::repository::{FlowRepository, SnapshotInfo, path_component, snapshot_name};
use super::{FlowDefinition, GraphSnapshot, form};

/// Ids of records whose attached forms were repaired in memory and still
/// differ from what is on disk.
#[derive(Default)]
struct Repaired {
    flows: HashSet<String>,
    executions: HashSet<String>,
}

pub struct FileFlowRepository {
    base_dir: PathBuf,
    flows: RwLock<HashMap<String, FlowDefinition>>,
    executions: RwLock<HashMap<String, FlowExecution>>,
    repaired: RwLock<Repaired>,
}

impl FileFlowRepository {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            flows: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            repaired: RwLock::new(Repaired::default()),
        }
    }

    fn flows_dir(&self) -> PathBuf {
        self.base_dir.join("flows")
    }

    fn executions_dir(&self) -> PathBuf {
        self.base_dir.join("executions")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.base_dir.join("snapshots")
    }

    fn flow_file(&self, id: &str) -> Result<PathBuf> {
        let id = path_component("flow", id)?;
        Ok(self.flows_dir().join(format!("{id}.json")))
    }

    fn flow_snapshots_dir(&self, flow_id: &str) -> Result<PathBuf> {
        let flow_id = path_component("flow", flow_id)?;
        Ok(self.snapshots_dir().join(flow_id))
    }

    fn execution_file(&self, execution: &FlowExecution) -> Result<PathBuf> {
        let document_id = path_component("document", &execution.document_id)?;
        let id = path_component("execution", &execution.id)?;
        Ok(self
            .executions_dir()
            .join(document_id)
            .join(format!("{id}.json")))
    }

    fn flush_flow(&self, flow: &FlowDefinition) -> Result<()> {
        write_json(&self.flow_file(&flow.id)?, flow, "flow")
    }

    fn flush_execution(&self, execution: &FlowExecution) -> Result<()> {
        write_json(&self.execution_file(execution)?, execution, "execution")
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {what} dir: {}", dir.display()))?;
    }
    let content =
        serde_json::to_string_pretty(value).with_context(|| format!("failed to serialize {what}"))?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write {what} file: {}", path.display()))?;
    Ok(())
}

/// Parse every `*.json` file in `dir`, skipping the ones that fail.
fn read_json_dir<T: DeserializeOwned>(dir: &Path, what: &str) -> Result<Vec<T>> {
    let mut loaded = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {what} dir: {}", dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {what} file: {}", path.display()))?;
        match serde_json::from_str::<T>(&content) {
            Ok(value) => loaded.push(value),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping invalid {what} file");
            }
        }
    }
    Ok(loaded)
}

#[async_trait]
impl FlowRepository for FileFlowRepository {
    async fn list_flows(&self) -> Vec<FlowDefinition> {
        let mut flows: Vec<_> = self.flows.read().await.values().cloned().collect();
        flows.sort_by(|a, b| a.code.cmp(&b.code));
        flows
    }

    async fn get_flow(&self, id: &str) -> Option<FlowDefinition> {
        self.flows.read().await.get(id).cloned()
    }

    async fn save_flow(&self, flow: FlowDefinition) -> Result<()> {
        self.flush_flow(&flow)?;
        self.repaired.write().await.flows.remove(&flow.id);
        self.flows.write().await.insert(flow.id.clone(), flow);
        Ok(())
    }

    async fn delete_flow(&self, id: &str) -> Result<bool> {
        let mut flows = self.flows.write().await;
        if !flows.contains_key(id) {
            return Ok(false);
        }
        let flow_path = self.flow_file(id)?;
        let snapshots_path = self.flow_snapshots_dir(id)?;
        flows.remove(id);
        drop(flows);
        self.repaired.write().await.flows.remove(id);

        if flow_path.exists() {
            std::fs::remove_file(&flow_path)
                .with_context(|| format!("failed to delete flow file: {}", flow_path.display()))?;
        }

        // Exported snapshots belong to the flow; executions belong to documents.
        if snapshots_path.exists() {
            std::fs::remove_dir_all(&snapshots_path).with_context(|| {
                format!("failed to delete snapshots dir: {}", snapshots_path.display())
            })?;
        }

        Ok(true)
    }

    async fn list_executions(&self, document_id: &str) -> Vec<FlowExecution> {
        let mut executions: Vec<_> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.document_id == document_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions
    }

    async fn get_execution(&self, id: &str) -> Option<FlowExecution> {
        self.executions.read().await.get(id).cloned()
    }

    async fn save_execution(&self, execution: FlowExecution) -> Result<()> {
        self.flush_execution(&execution)?;
        self.repaired.write().await.executions.remove(&execution.id);
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn delete_execution(&self, id: &str) -> Result<bool> {
        let Some(execution) = self.executions.write().await.remove(id) else {
            return Ok(false);
        };
        let path = self.execution_file(&execution)?;
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to delete execution file: {}", path.display()))?;
        }
        Ok(true)
    }

    async fn save_snapshot(
        &self,
        flow_id: &str,
        file_name: &str,
        graph: &GraphSnapshot,
    ) -> Result<()> {
        let name = snapshot_name(file_name)?;
        let path = self.flow_snapshots_dir(flow_id)?.join(format!("{name}.json"));
        write_json(&path, graph, "snapshot")?;
        tracing::info!(flow_id, file_name = name, "Exported flow snapshot");
        Ok(())
    }

    async fn load_snapshot(&self, flow_id: &str, file_name: &str) -> Result<Option<GraphSnapshot>> {
        let name = snapshot_name(file_name)?;
        let path = self.flow_snapshots_dir(flow_id)?.join(format!("{name}.json"));
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read snapshot file: {}", path.display()))?;
        let mut graph: GraphSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse snapshot file: {}", path.display()))?;
        form::normalize_graph(&mut graph);
        Ok(Some(graph))
    }

    async fn list_snapshots(&self, flow_id: Option<&str>) -> Result<Vec<SnapshotInfo>> {
        let dir = self.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        let flow_dirs = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read snapshots dir: {}", dir.display()))?;
        for flow_dir in flow_dirs {
            let flow_dir = flow_dir?;
            if !flow_dir.file_type()?.is_dir() {
                continue;
            }
            let owner = flow_dir.file_name().to_string_lossy().to_string();
            if flow_id.is_some_and(|id| id != owner) {
                continue;
            }
            for entry in std::fs::read_dir(flow_dir.path())? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    snapshots.push(SnapshotInfo {
                        flow_id: owner.clone(),
                        file_name: stem.to_string(),
                    });
                }
            }
        }
        snapshots.sort_by(|a, b| (&a.flow_id, &a.file_name).cmp(&(&b.flow_id, &b.file_name)));
        Ok(snapshots)
    }

    async fn migrate_legacy_forms(&self) -> Result<usize> {
        let mut repaired = self.repaired.write().await;
        let mut written = 0;

        // An id leaves the set only once its record is written.
        let flows = self.flows.read().await;
        for id in repaired.flows.clone() {
            if let Some(flow) = flows.get(&id) {
                self.flush_flow(flow)?;
                tracing::info!(flow_id = %id, "Rewrote legacy attached forms");
                written += 1;
            }
            repaired.flows.remove(&id);
        }

        let executions = self.executions.read().await;
        for id in repaired.executions.clone() {
            if let Some(execution) = executions.get(&id) {
                self.flush_execution(execution)?;
                tracing::info!(execution_id = %id, "Rewrote legacy attached forms");
                written += 1;
            }
            repaired.executions.remove(&id);
        }

        Ok(written)
    }

    async fn load_all(&self) -> Result<()> {
        let mut repaired = Repaired::default();

        // Flows
        let flows_dir = self.flows_dir();
        std::fs::create_dir_all(&flows_dir)
            .with_context(|| format!("failed to create flows dir: {}", flows_dir.display()))?;

        let mut loaded_flows = HashMap::new();
        for mut flow in read_json_dir::<FlowDefinition>(&flows_dir, "flow")? {
            if form::normalize_graph(&mut flow.flow_data) > 0 {
                repaired.flows.insert(flow.id.clone());
            }
            loaded_flows.insert(flow.id.clone(), flow);
        }
        let flow_count = loaded_flows.len();
        *self.flows.write().await = loaded_flows;
        tracing::info!(count = flow_count, "Loaded all flows");

        // Executions, one directory per document
        let executions_dir = self.executions_dir();
        std::fs::create_dir_all(&executions_dir).with_context(|| {
            format!("failed to create executions dir: {}", executions_dir.display())
        })?;

        let mut loaded_executions = HashMap::new();
        let document_dirs = std::fs::read_dir(&executions_dir).with_context(|| {
            format!("failed to read executions dir: {}", executions_dir.display())
        })?;
        for document_dir in document_dirs {
            let document_dir = document_dir?;
            if !document_dir.file_type()?.is_dir() {
                continue;
            }
            for mut execution in read_json_dir::<FlowExecution>(&document_dir.path(), "execution")? {
                if form::normalize_graph(&mut execution.flow_tasks) > 0 {
                    repaired.executions.insert(execution.id.clone());
                }
                loaded_executions.insert(execution.id.clone(), execution);
            }
        }
        let execution_count = loaded_executions.len();
        *self.executions.write().await = loaded_executions;
        if execution_count > 0 {
            tracing::info!(count = execution_count, "Loaded executions");
        }

        let pending = repaired.flows.len() + repaired.executions.len();
        if pending > 0 {
            tracing::warn!(
                count = pending,
                "Records with legacy attached forms repaired in memory; run `composer migrate-forms` to rewrite them"
            );
        }
        *self.repaired.write().await = repaired;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::NewFlowDefinition;
    use crate::flows::execution::ExecutionStatus;
    use crate::flows::node::{ActionData, Node, NodeData, NodeType};
    use crate::flows::Position;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    const LEGACY_FORM: &str = r#"{"Show_Condition":"TRUE","Fields":[["Motivo",["text"]]]}"#;

    fn test_flow(id: &str, code: &str) -> FlowDefinition {
        NewFlowDefinition {
            code: code.to_string(),
            name: format!("Fluxo {code}"),
            flow_type_id: "t".to_string(),
            ..Default::default()
        }
        .into_definition(id.to_string())
        .unwrap()
    }

    fn legacy_flow(id: &str) -> FlowDefinition {
        let mut flow = test_flow(id, "LEG-01");
        let mut node = Node::new("task", NodeType::ActionNode, Position::default());
        node.data = NodeData::Action(ActionData {
            attached_form: Some(LEGACY_FORM.to_string()),
            ..Default::default()
        });
        flow.flow_data.nodes.push(node);
        flow
    }

    fn attached_form(flow: &FlowDefinition) -> String {
        match &flow.flow_data.node("task").unwrap().data {
            NodeData::Action(action) => action.attached_form.clone().unwrap(),
            other => panic!("unexpected node data {other:?}"),
        }
    }

    // ── Flow CRUD ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_flow_save_and_load() {
        let dir = tempdir().unwrap();
        let repo = FileFlowRepository::new(dir.path());
        repo.load_all().await.unwrap();

        repo.save_flow(test_flow("f1", "DOC-01")).await.unwrap();

        let repo2 = FileFlowRepository::new(dir.path());
        repo2.load_all().await.unwrap();
        let loaded = repo2.get_flow("f1").await.unwrap();
        assert_eq!(loaded.code, "DOC-01");
        assert!(dir.path().join("flows").join("f1.json").exists());
    }

    #[tokio::test]
    async fn test_flow_list_sorted_by_code() {
        let dir = tempdir().unwrap();
        let repo = FileFlowRepository::new(dir.path());
        repo.load_all().await.unwrap();

        repo.save_flow(test_flow("f2", "ZZZ-01")).await.unwrap();
        repo.save_flow(test_flow("f1", "AAA-01")).await.unwrap();

        let codes: Vec<_> = repo.list_flows().await.into_iter().map(|f| f.code).collect();
        assert_eq!(codes, vec!["AAA-01", "ZZZ-01"]);
    }

    #[tokio::test]
    async fn test_flow_delete_removes_snapshots() {
        let dir = tempdir().unwrap();
        let repo = FileFlowRepository::new(dir.path());
        repo.load_all().await.unwrap();

        let flow = test_flow("f1", "DOC-01");
        repo.save_snapshot("f1", "backup", &flow.flow_data).await.unwrap();
        repo.save_flow(flow).await.unwrap();

        assert!(repo.delete_flow("f1").await.unwrap());
        assert!(repo.get_flow("f1").await.is_none());
        assert!(!dir.path().join("snapshots").join("f1").exists());
        assert!(!repo.delete_flow("f1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_unknown_or_dotted_id_touches_nothing() {
        let dir = tempdir().unwrap();
        let repo = FileFlowRepository::new(dir.path());
        repo.load_all().await.unwrap();

        let flow = test_flow("f1", "DOC-01");
        repo.save_snapshot("f1", "backup", &flow.flow_data).await.unwrap();
        repo.save_flow(flow).await.unwrap();
        let document_file = dir.path().join("documents").join("doc-1.json");
        std::fs::create_dir_all(document_file.parent().unwrap()).unwrap();
        std::fs::write(&document_file, "{}").unwrap();

        for id in ["..", ".", "missing", "../flows/f1"] {
            assert!(!repo.delete_flow(id).await.unwrap(), "{id:?}");
        }

        assert!(document_file.exists());
        assert!(dir.path().join("flows").join("f1.json").exists());
        assert!(dir.path().join("snapshots").join("f1").join("backup.json").exists());
        assert!(repo.get_flow("f1").await.is_some());
    }

    #[tokio::test]
    async fn test_ids_that_escape_the_data_dir_are_refused() {
        let dir = tempdir().unwrap();
        let repo = FileFlowRepository::new(dir.path());
        repo.load_all().await.unwrap();

        assert!(repo.save_flow(test_flow("../f1", "DOC-01")).await.is_err());
        assert!(repo.get_flow("../f1").await.is_none());
        assert!(
            repo.save_snapshot("..", "backup", &GraphSnapshot::default())
                .await
                .is_err()
        );
        assert!(repo.load_snapshot("..", "backup").await.is_err());

        let mut execution = FlowExecution::instantiate(&test_flow("f1", "DOC-01"), "..");
        execution.id = "e1".to_string();
        assert!(repo.save_execution(execution).await.is_err());
        assert!(repo.get_execution("e1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_flow_file_is_skipped() {
        let dir = tempdir().unwrap();
        let flows_dir = dir.path().join("flows");
        std::fs::create_dir_all(&flows_dir).unwrap();
        std::fs::write(flows_dir.join("broken.json"), "{ not json").unwrap();
        std::fs::write(flows_dir.join("notes.txt"), "ignored").unwrap();

        let repo = FileFlowRepository::new(dir.path());
        repo.save_flow(test_flow("f1", "DOC-01")).await.unwrap();
        repo.load_all().await.unwrap();
        assert_eq!(repo.list_flows().await.len(), 1);
    }

    // ── Executions ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_executions_listed_newest_first_per_document() {
        let dir = tempdir().unwrap();
        let repo = FileFlowRepository::new(dir.path());
        repo.load_all().await.unwrap();

        let flow = test_flow("f1", "DOC-01");
        let mut older = FlowExecution::instantiate(&flow, "doc-1");
        older.created_at = Utc::now() - Duration::minutes(5);
        older.status = ExecutionStatus::Transfered;
        let newer = FlowExecution::instantiate(&flow, "doc-1");
        let other = FlowExecution::instantiate(&flow, "doc-2");

        repo.save_execution(older.clone()).await.unwrap();
        repo.save_execution(newer.clone()).await.unwrap();
        repo.save_execution(other).await.unwrap();

        let repo2 = FileFlowRepository::new(dir.path());
        repo2.load_all().await.unwrap();
        let ids: Vec<_> = repo2
            .list_executions("doc-1")
            .await
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![newer.id.clone(), older.id.clone()]);
        assert!(
            dir.path()
                .join("executions")
                .join("doc-1")
                .join(format!("{}.json", newer.id))
                .exists()
        );

        assert!(repo2.delete_execution(&newer.id).await.unwrap());
        assert_eq!(repo2.list_executions("doc-1").await.len(), 1);
    }

    // ── Snapshots ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_snapshot_export_and_import() {
        let dir = tempdir().unwrap();
        let repo = FileFlowRepository::new(dir.path());
        repo.load_all().await.unwrap();

        let flow = legacy_flow("f1");
        repo.save_snapshot("f1", "v1.json", &flow.flow_data).await.unwrap();
        repo.save_snapshot("f2", "other", &GraphSnapshot::default()).await.unwrap();

        let listed = repo.list_snapshots(Some("f1")).await.unwrap();
        assert_eq!(
            listed,
            vec![SnapshotInfo {
                flow_id: "f1".to_string(),
                file_name: "v1".to_string(),
            }]
        );
        assert_eq!(repo.list_snapshots(None).await.unwrap().len(), 2);

        let graph = repo.load_snapshot("f1", "v1").await.unwrap().unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(repo.load_snapshot("f1", "missing").await.unwrap().is_none());
        assert!(repo.save_snapshot("f1", "../escape", &graph).await.is_err());
    }

    // ── Legacy form migration ────────────────────────────────────

    #[tokio::test]
    async fn test_legacy_forms_repaired_on_load_and_rewritten_on_migrate() {
        let dir = tempdir().unwrap();
        let flow_path = dir.path().join("flows").join("f1.json");
        write_json(&flow_path, &legacy_flow("f1"), "flow").unwrap();

        let repo = FileFlowRepository::new(dir.path());
        repo.load_all().await.unwrap();

        let loaded = repo.get_flow("f1").await.unwrap();
        let repaired = attached_form(&loaded);
        assert!(form::FormSchema::parse(&repaired).is_ok());

        // Nothing is written until migration is asked for.
        let on_disk = std::fs::read_to_string(&flow_path).unwrap();
        assert!(on_disk.contains(r#"[[\"Motivo\""#));

        assert_eq!(repo.migrate_legacy_forms().await.unwrap(), 1);
        let on_disk: FlowDefinition =
            serde_json::from_str(&std::fs::read_to_string(&flow_path).unwrap()).unwrap();
        assert_eq!(attached_form(&on_disk), repaired);

        assert_eq!(repo.migrate_legacy_forms().await.unwrap(), 0);
    }
}
