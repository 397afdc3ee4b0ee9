//! Typed node model.
//!
//! On the wire a node is `{id, type, position, data}` where the shape of
//! `data` depends on `type`. Internally the payload is a closed enum so
//! every consumer matches exhaustively on the node type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Position;

/// Action type of approval-gate nodes.
pub const APPROVAL_ACTION: &str = "Intern_Aprove";

/// `"TRUE"` / `"FALSE"` string flag used by the stored node payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flag {
    #[serde(rename = "TRUE")]
    True,
    #[default]
    #[serde(rename = "FALSE")]
    False,
}

impl Flag {
    pub fn is_true(self) -> bool {
        self == Flag::True
    }
}

impl From<bool> for Flag {
    fn from(value: bool) -> Self {
        if value { Flag::True } else { Flag::False }
    }
}

/// Approval sub-state of approval-gate action nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Approval {
    #[serde(rename = "TRUE")]
    Approved,
    #[serde(rename = "FALSE")]
    Rejected,
    #[default]
    #[serde(rename = "UNDEF")]
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    StartNode,
    EndNode,
    SwitchNode,
    ActionNode,
    DocumentNode,
    IntegrationNode,
}

/// Runtime fields shared by every node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRuntime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub is_executed: Flag,
    #[serde(default)]
    pub is_pending_connected: bool,
    #[serde(default)]
    pub is_readonly: bool,
    #[serde(default)]
    pub form_data: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicData {
    #[serde(flatten)]
    pub runtime: NodeRuntime,
    /// Keys this model does not name, kept so a save never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderField {
    #[serde(default)]
    pub label: String,
    #[serde(rename = "nodeValue", default)]
    pub node_value: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionData {
    #[serde(flatten)]
    pub runtime: NodeRuntime,
    #[serde(rename = "actionType", default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(rename = "isAproved", default)]
    pub approval: Approval,
    /// Serialized form schema (a JSON string, possibly in the legacy shape
    /// until it has gone through `form::normalize_graph`).
    #[serde(rename = "attached_Form", default, skip_serializing_if = "Option::is_none")]
    pub attached_form: Option<String>,
    #[serde(rename = "headerFields", default)]
    pub header_fields: Vec<HeaderField>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionData {
    pub fn is_approval_gate(&self) -> bool {
        self.action_type.as_deref() == Some(APPROVAL_ACTION)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchData {
    #[serde(flatten)]
    pub runtime: NodeRuntime,
    #[serde(rename = "leftSwitch", default, skip_serializing_if = "Option::is_none")]
    pub left_switch: Option<Flag>,
    #[serde(rename = "rightSwitch", default, skip_serializing_if = "Option::is_none")]
    pub right_switch: Option<Flag>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How an end node terminates its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndKind {
    /// Conclude the execution and mark the document concluded.
    #[serde(rename = "Init")]
    Conclude,
    /// Hand the document over to a new execution of another flow.
    #[serde(rename = "flow_init")]
    Transfer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndData {
    #[serde(flatten)]
    pub runtime: NodeRuntime,
    #[serde(rename = "FromType", default, skip_serializing_if = "Option::is_none")]
    pub from_type: Option<EndKind>,
    #[serde(rename = "To_Flow_id", default, skip_serializing_if = "Option::is_none")]
    pub to_flow_id: Option<String>,
    #[serde(rename = "To_Flow_code", default, skip_serializing_if = "Option::is_none")]
    pub to_flow_code: Option<String>,
    #[serde(rename = "To_Flow_name", default, skip_serializing_if = "Option::is_none")]
    pub to_flow_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EndData {
    /// Target flow id, treating blank strings as unset.
    pub fn target_flow_id(&self) -> Option<&str> {
        self.to_flow_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Start(BasicData),
    End(EndData),
    Switch(SwitchData),
    Action(ActionData),
    Document(BasicData),
    Integration(BasicData),
}

impl NodeData {
    pub fn empty(node_type: NodeType) -> Self {
        match node_type {
            NodeType::StartNode => NodeData::Start(BasicData::default()),
            NodeType::EndNode => NodeData::End(EndData::default()),
            NodeType::SwitchNode => NodeData::Switch(SwitchData::default()),
            NodeType::ActionNode => NodeData::Action(ActionData::default()),
            NodeType::DocumentNode => NodeData::Document(BasicData::default()),
            NodeType::IntegrationNode => NodeData::Integration(BasicData::default()),
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeData::Start(_) => NodeType::StartNode,
            NodeData::End(_) => NodeType::EndNode,
            NodeData::Switch(_) => NodeType::SwitchNode,
            NodeData::Action(_) => NodeType::ActionNode,
            NodeData::Document(_) => NodeType::DocumentNode,
            NodeData::Integration(_) => NodeType::IntegrationNode,
        }
    }

    pub fn runtime(&self) -> &NodeRuntime {
        match self {
            NodeData::Start(d) | NodeData::Document(d) | NodeData::Integration(d) => &d.runtime,
            NodeData::End(d) => &d.runtime,
            NodeData::Switch(d) => &d.runtime,
            NodeData::Action(d) => &d.runtime,
        }
    }

    pub fn runtime_mut(&mut self) -> &mut NodeRuntime {
        match self {
            NodeData::Start(d) | NodeData::Document(d) | NodeData::Integration(d) => {
                &mut d.runtime
            }
            NodeData::End(d) => &mut d.runtime,
            NodeData::Switch(d) => &mut d.runtime,
            NodeData::Action(d) => &mut d.runtime,
        }
    }

    /// Parse the `data` payload of a node of the given type.
    pub fn from_value(node_type: NodeType, value: Value) -> Result<Self, serde_json::Error> {
        let value = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        Ok(match node_type {
            NodeType::StartNode => NodeData::Start(serde_json::from_value(value)?),
            NodeType::EndNode => NodeData::End(serde_json::from_value(value)?),
            NodeType::SwitchNode => NodeData::Switch(serde_json::from_value(value)?),
            NodeType::ActionNode => NodeData::Action(serde_json::from_value(value)?),
            NodeType::DocumentNode => NodeData::Document(serde_json::from_value(value)?),
            NodeType::IntegrationNode => NodeData::Integration(serde_json::from_value(value)?),
        })
    }

    pub fn to_value(&self) -> Value {
        let result = match self {
            NodeData::Start(d) | NodeData::Document(d) | NodeData::Integration(d) => {
                serde_json::to_value(d)
            }
            NodeData::End(d) => serde_json::to_value(d),
            NodeData::Switch(d) => serde_json::to_value(d),
            NodeData::Action(d) => serde_json::to_value(d),
        };
        result.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: String,
    pub position: Position,
    pub data: NodeData,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType, position: Position) -> Self {
        Self {
            id: id.into(),
            position,
            data: NodeData::empty(node_type),
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.data.node_type()
    }

    pub fn runtime(&self) -> &NodeRuntime {
        self.data.runtime()
    }

    pub fn runtime_mut(&mut self) -> &mut NodeRuntime {
        self.data.runtime_mut()
    }
}

/// Wire shape of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default)]
    position: Position,
    #[serde(default)]
    data: Value,
}

impl TryFrom<RawNode> for Node {
    type Error = serde_json::Error;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        Ok(Node {
            data: NodeData::from_value(raw.node_type, raw.data)?,
            id: raw.id,
            position: raw.position,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        RawNode {
            node_type: node.node_type(),
            data: node.data.to_value(),
            id: node.id,
            position: node.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_action_node_payload() {
        let node: Node = serde_json::from_value(json!({
            "id": "n2",
            "type": "actionNode",
            "position": { "x": 10.0, "y": 20.0 },
            "data": {
                "label": "Aprovação",
                "actionType": "Intern_Aprove",
                "isAproved": "UNDEF",
                "isExecuted": "FALSE",
                "isPendingConnected": true,
                "attached_Form": "{\"Fields\":{}}",
                "headerFields": [{ "label": "Setor", "nodeValue": "RH", "required": true }],
                "formData": { "Motivo": "x" }
            }
        }))
        .unwrap();

        assert_eq!(node.node_type(), NodeType::ActionNode);
        let NodeData::Action(action) = &node.data else {
            panic!("expected action data");
        };
        assert!(action.is_approval_gate());
        assert_eq!(action.approval, Approval::Undefined);
        assert_eq!(action.header_fields[0].node_value, "RH");
        assert!(action.runtime.is_pending_connected);
        assert_eq!(action.runtime.form_data["Motivo"], "x");
        assert_eq!(action.runtime.label.as_deref(), Some("Aprovação"));
    }

    #[test]
    fn missing_runtime_fields_default_to_pending() {
        let node: Node = serde_json::from_value(json!({
            "id": "s",
            "type": "startNode",
            "position": { "x": 0.0, "y": 0.0 }
        }))
        .unwrap();
        assert_eq!(node.runtime().is_executed, Flag::False);
        assert!(!node.runtime().is_pending_connected);
        assert!(!node.runtime().is_readonly);
    }

    #[test]
    fn end_node_transfer_fields() {
        let node: Node = serde_json::from_value(json!({
            "id": "end",
            "type": "endNode",
            "position": { "x": 0.0, "y": 0.0 },
            "data": { "FromType": "flow_init", "To_Flow_id": "  ", "To_Flow_name": "Outro" }
        }))
        .unwrap();
        let NodeData::End(end) = &node.data else {
            panic!("expected end data");
        };
        assert_eq!(end.from_type, Some(EndKind::Transfer));
        assert_eq!(end.target_flow_id(), None);
    }

    #[test]
    fn serializes_back_to_wire_shape() {
        let mut node = Node::new("sw", NodeType::SwitchNode, Position { x: 1.0, y: 2.0 });
        if let NodeData::Switch(switch) = &mut node.data {
            switch.left_switch = Some(Flag::True);
        }
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "switchNode");
        assert_eq!(value["data"]["leftSwitch"], "TRUE");
        assert_eq!(value["data"]["isExecuted"], "FALSE");
        assert!(value["data"].get("rightSwitch").is_none());
        assert_eq!(value["position"]["x"], 1.0);
    }

    #[test]
    fn unnamed_data_keys_survive_a_round_trip() {
        let node: Node = serde_json::from_value(json!({
            "id": "erp",
            "type": "integrationNode",
            "position": { "x": 0.0, "y": 0.0 },
            "data": {
                "label": "ERP",
                "service": "sap",
                "config": { "endpoint": "/orders", "retries": 2 },
                "isExecuted": "FALSE"
            }
        }))
        .unwrap();

        let NodeData::Integration(data) = &node.data else {
            panic!("expected integration data");
        };
        assert_eq!(data.runtime.label.as_deref(), Some("ERP"));
        assert!(!data.extra.contains_key("label"));
        assert!(!data.extra.contains_key("isExecuted"));

        let out = serde_json::to_value(&node).unwrap();
        assert_eq!(out["data"]["service"], "sap");
        assert_eq!(out["data"]["config"]["endpoint"], "/orders");
        assert_eq!(out["data"]["label"], "ERP");

        let action: Node = serde_json::from_value(json!({
            "id": "task",
            "type": "actionNode",
            "position": { "x": 0.0, "y": 0.0 },
            "data": { "actionType": "Review", "deadlineDays": 3 }
        }))
        .unwrap();
        let out = serde_json::to_value(&action).unwrap();
        assert_eq!(out["data"]["deadlineDays"], 3);
        assert_eq!(out["data"]["actionType"], "Review");
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let result = serde_json::from_value::<Node>(json!({
            "id": "x",
            "type": "mysteryNode",
            "position": { "x": 0.0, "y": 0.0 }
        }));
        assert!(result.is_err());
    }
}
