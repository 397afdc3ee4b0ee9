//! Editing state of one flow definition on the canvas.
//!
//! All mutations go through the named transitions on [`FlowEditorState`];
//! structural ones record a history entry, pure moves do not.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use super::edges::{self, EdgeAppearance};
use super::form;
use super::history::{History, HistorySnapshot};
use super::node::{Node, NodeType};
use super::{Edge, FlowDefinition, GraphSnapshot, Position, Viewport};
use crate::error::ComposerError;

const NODE_SPACING_X: f64 = 280.0;
const NODE_SPACING_Y: f64 = 120.0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    None,
    Node(String),
    Edge(String),
}

/// A key press as delivered by the canvas.
#[derive(Debug, Clone, Default)]
pub struct KeyInput {
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl KeyInput {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Undo,
    Redo,
    Delete,
}

impl Shortcut {
    pub fn from_key(input: &KeyInput) -> Option<Shortcut> {
        let modifier = input.ctrl || input.meta;
        match input.key.to_ascii_lowercase().as_str() {
            "z" if modifier && input.shift => Some(Shortcut::Redo),
            "z" if modifier => Some(Shortcut::Undo),
            "y" if modifier => Some(Shortcut::Redo),
            "delete" => Some(Shortcut::Delete),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct FlowEditorState {
    flow_id: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    viewport: Viewport,
    history: History,
    selection: Selection,
    locked: bool,
    saved: GraphSnapshot,
}

impl FlowEditorState {
    /// Open a flow. History starts with the loaded graph as its only entry.
    pub fn load(flow: &FlowDefinition) -> Self {
        let mut graph = flow.flow_data.clone();
        let repaired = form::normalize_graph(&mut graph);
        if repaired > 0 {
            tracing::info!(flow_id = %flow.id, repaired, "repaired legacy forms on load");
        }
        Self {
            flow_id: flow.id.clone(),
            history: History::new(HistorySnapshot {
                nodes: graph.nodes.clone(),
                edges: graph.edges.clone(),
            }),
            nodes: graph.nodes.clone(),
            edges: graph.edges.clone(),
            viewport: graph.viewport,
            selection: Selection::None,
            locked: flow.is_locked,
            saved: graph,
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Apply a lock state confirmed by the server. Edits are refused from
    /// this point on.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            viewport: self.viewport,
        }
    }

    /// True when the graph differs from the last saved one.
    pub fn is_dirty(&self) -> bool {
        self.saved.nodes != self.nodes || self.saved.edges != self.edges
    }

    pub fn mark_saved(&mut self) {
        self.saved = self.snapshot();
    }

    pub fn edge_appearance(&self) -> Vec<EdgeAppearance> {
        let selected = match &self.selection {
            Selection::Edge(id) => Some(id.as_str()),
            _ => None,
        };
        edges::derive(&self.nodes, &self.edges, selected)
    }

    fn ensure_unlocked(&self) -> Result<(), ComposerError> {
        if self.locked {
            return Err(ComposerError::Locked(self.flow_id.clone()));
        }
        Ok(())
    }

    fn record(&mut self) {
        self.history.push(HistorySnapshot {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        });
    }

    fn restore(&mut self, snapshot: HistorySnapshot) {
        self.nodes = snapshot.nodes;
        self.edges = snapshot.edges;
        self.selection = Selection::None;
    }

    pub fn select_node(&mut self, id: &str) {
        self.selection = Selection::Node(id.to_string());
    }

    pub fn select_edge(&mut self, id: &str) {
        self.selection = Selection::Edge(id.to_string());
    }

    pub fn clear_selection(&mut self) {
        self.selection = Selection::None;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn add_node(
        &mut self,
        node_type: NodeType,
        position: Position,
    ) -> Result<String, ComposerError> {
        self.ensure_unlocked()?;
        let id = Uuid::new_v4().to_string();
        self.nodes.push(Node::new(id.clone(), node_type, position));
        self.record();
        Ok(id)
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<(), ComposerError> {
        self.ensure_unlocked()?;
        let before = self.nodes.len();
        self.nodes.retain(|n| n.id != id);
        if self.nodes.len() == before {
            return Err(ComposerError::not_found("node", id));
        }
        self.edges.retain(|e| e.source != id && e.target != id);
        if self.selection == Selection::Node(id.to_string()) {
            self.selection = Selection::None;
        }
        self.record();
        Ok(())
    }

    pub fn connect(
        &mut self,
        source: &str,
        source_handle: Option<&str>,
        target: &str,
    ) -> Result<String, ComposerError> {
        self.ensure_unlocked()?;
        if source == target {
            return Err(ComposerError::Validation(format!(
                "node {source} cannot connect to itself"
            )));
        }
        for id in [source, target] {
            if !self.nodes.iter().any(|n| n.id == id) {
                return Err(ComposerError::not_found("node", id));
            }
        }
        let edge = Edge::new(source, source_handle, target);
        if self.edges.iter().any(|e| e.id == edge.id) {
            return Err(ComposerError::Conflict(format!("edge {} already exists", edge.id)));
        }
        let id = edge.id.clone();
        self.edges.push(edge);
        self.record();
        Ok(id)
    }

    pub fn disconnect(&mut self, edge_id: &str) -> Result<(), ComposerError> {
        self.ensure_unlocked()?;
        let before = self.edges.len();
        self.edges.retain(|e| e.id != edge_id);
        if self.edges.len() == before {
            return Err(ComposerError::not_found("edge", edge_id));
        }
        if self.selection == Selection::Edge(edge_id.to_string()) {
            self.selection = Selection::None;
        }
        self.record();
        Ok(())
    }

    /// Drag a node. Not recorded in history.
    pub fn move_node(&mut self, id: &str, position: Position) -> Result<(), ComposerError> {
        self.ensure_unlocked()?;
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| ComposerError::not_found("node", id))?;
        node.position = position;
        Ok(())
    }

    /// Replace nodes and edges with what the canvas reports. A history
    /// entry is only recorded when nodes or edges were added or removed.
    pub fn apply_changes(&mut self, nodes: Vec<Node>, edges: Vec<Edge>) -> Result<(), ComposerError> {
        self.ensure_unlocked()?;
        let significant = is_structural_change(&self.nodes, &self.edges, &nodes, &edges);
        self.nodes = nodes;
        self.edges = edges;
        if significant {
            self.record();
        }
        Ok(())
    }

    /// Lay nodes out in columns by their distance from the start nodes.
    pub fn auto_align(&mut self) -> Result<(), ComposerError> {
        self.ensure_unlocked()?;
        let depths = layer_depths(&self.nodes, &self.edges);

        let mut rows: HashMap<usize, usize> = HashMap::new();
        for node in &mut self.nodes {
            let depth = depths.get(&node.id).copied().unwrap_or(0);
            let row = rows.entry(depth).or_insert(0);
            node.position = Position {
                x: depth as f64 * NODE_SPACING_X,
                y: *row as f64 * NODE_SPACING_Y,
            };
            *row += 1;
        }
        self.record();
        Ok(())
    }

    /// Clear the canvas. Undoable like any other structural edit.
    pub fn reset(&mut self) -> Result<(), ComposerError> {
        self.ensure_unlocked()?;
        self.nodes.clear();
        self.edges.clear();
        self.selection = Selection::None;
        self.record();
        Ok(())
    }

    /// Returns false when there was nothing to undo.
    pub fn undo(&mut self) -> Result<bool, ComposerError> {
        self.ensure_unlocked()?;
        match self.history.undo().cloned() {
            Some(snapshot) => {
                self.restore(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> Result<bool, ComposerError> {
        self.ensure_unlocked()?;
        match self.history.redo().cloned() {
            Some(snapshot) => {
                self.restore(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete whatever is selected. Returns false when nothing was.
    pub fn delete_selection(&mut self) -> Result<bool, ComposerError> {
        match self.selection.clone() {
            Selection::None => Ok(false),
            Selection::Node(id) => self.remove_node(&id).map(|_| true),
            Selection::Edge(id) => self.disconnect(&id).map(|_| true),
        }
    }

    /// Dispatch a keyboard shortcut. Returns whether the key was handled.
    pub fn handle_key(&mut self, input: &KeyInput) -> Result<bool, ComposerError> {
        match Shortcut::from_key(input) {
            Some(Shortcut::Undo) => self.undo(),
            Some(Shortcut::Redo) => self.redo(),
            Some(Shortcut::Delete) => self.delete_selection(),
            None => Ok(false),
        }
    }
}

fn id_set<'a>(ids: impl Iterator<Item = &'a str>) -> HashSet<&'a str> {
    ids.collect()
}

fn is_structural_change(
    old_nodes: &[Node],
    old_edges: &[Edge],
    nodes: &[Node],
    edges: &[Edge],
) -> bool {
    id_set(old_nodes.iter().map(|n| n.id.as_str())) != id_set(nodes.iter().map(|n| n.id.as_str()))
        || id_set(old_edges.iter().map(|e| e.id.as_str()))
            != id_set(edges.iter().map(|e| e.id.as_str()))
}

/// Breadth-first distance of every node from the start nodes. Nodes not
/// reachable from a start node are placed in the first column.
fn layer_depths(nodes: &[Node], edges: &[Edge]) -> HashMap<String, usize> {
    let mut depths: HashMap<String, usize> = HashMap::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    for node in nodes.iter().filter(|n| n.node_type() == NodeType::StartNode) {
        depths.insert(node.id.clone(), 0);
        queue.push_back((node.id.clone(), 0));
    }

    while let Some((id, depth)) = queue.pop_front() {
        for edge in edges.iter().filter(|e| e.source == id) {
            if !depths.contains_key(&edge.target) {
                depths.insert(edge.target.clone(), depth + 1);
                queue.push_back((edge.target.clone(), depth + 1));
            }
        }
    }
    depths
}
