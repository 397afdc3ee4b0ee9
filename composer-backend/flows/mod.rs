pub mod code;
pub mod edges;
pub mod editor;
pub mod execution;
pub mod file_repository;
pub mod form;
pub mod history;
pub mod node;
pub mod repository;
pub mod session;
pub mod state;
pub mod wire;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ComposerError;
use node::Node;

const COPY_CODE_SUFFIX: &str = "-COPY";
const COPY_NAME_SUFFIX: &str = " (Cópia)";

/// A named graph template that documents are executed against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub flow_type_id: String,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub flow_data: GraphSnapshot,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl FlowDefinition {
    /// Refuse structural mutation of a locked flow.
    pub fn ensure_unlocked(&self) -> Result<(), ComposerError> {
        if self.is_locked {
            return Err(ComposerError::Locked(self.id.clone()));
        }
        Ok(())
    }

    /// Copy of this definition under a new id. Execution history is never
    /// part of a definition, so nothing else needs to be left behind.
    pub fn duplicate(&self, new_id: String) -> FlowDefinition {
        let now = Utc::now();
        FlowDefinition {
            id: new_id,
            code: format!("{}{COPY_CODE_SUFFIX}", self.code),
            name: format!("{}{COPY_NAME_SUFFIX}", self.name),
            description: self.description.clone(),
            flow_type_id: self.flow_type_id.clone(),
            is_locked: false,
            is_enabled: self.is_enabled,
            flow_data: self.flow_data.clone(),
            created_at: now,
            created_by: self.created_by.clone(),
            updated_at: now,
        }
    }
}

/// Input of the "create flow" action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFlowDefinition {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub flow_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl NewFlowDefinition {
    pub fn validate(&self) -> Result<(), ComposerError> {
        let mut missing = Vec::new();
        if self.code.trim().is_empty() {
            missing.push("code");
        }
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.flow_type_id.trim().is_empty() {
            missing.push("flowTypeId");
        }
        if !missing.is_empty() {
            return Err(ComposerError::Validation(format!(
                "required fields missing: {}",
                missing.join(", ")
            )));
        }
        if !code::validate(&self.code) {
            return Err(ComposerError::Validation(format!(
                "code {:?} must match XXX-99",
                self.code
            )));
        }
        Ok(())
    }

    /// Validated definition with an empty graph.
    pub fn into_definition(self, id: String) -> Result<FlowDefinition, ComposerError> {
        self.validate()?;
        let now = Utc::now();
        Ok(FlowDefinition {
            id,
            code: self.code,
            name: self.name.trim().to_string(),
            description: self.description,
            flow_type_id: self.flow_type_id,
            is_locked: false,
            is_enabled: true,
            flow_data: GraphSnapshot::default(),
            created_at: now,
            created_by: self.created_by,
            updated_at: now,
        })
    }
}

/// The persisted graph: nodes, edges and the canvas viewport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub viewport: Viewport,
}

impl GraphSnapshot {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EdgeData>,
    /// Canvas attributes (`type`, `label`, `animated`, `style`, ...) kept
    /// as received.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Edge {
    pub fn new(source: &str, source_handle: Option<&str>, target: &str) -> Self {
        let id = match source_handle {
            Some(handle) => format!("e-{source}-{handle}-{target}"),
            None => format!("e-{source}-{target}"),
        };
        Self {
            id,
            source: source.to_string(),
            target: target.to_string(),
            source_handle: source_handle.map(String::from),
            target_handle: None,
            data: None,
            extra: Map::new(),
        }
    }

    /// Whether this edge is the taken branch of an executed switch node.
    /// `None` when the branch was never evaluated.
    pub fn is_active(&self) -> Option<bool> {
        self.data.as_ref().and_then(|d| d.is_active)
    }

    pub fn set_active(&mut self, active: Option<bool>) {
        match (&mut self.data, active) {
            (Some(data), _) => data.is_active = active,
            (None, Some(_)) => {
                self.data = Some(EdgeData {
                    is_active: active,
                    ..Default::default()
                })
            }
            (None, None) => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}
