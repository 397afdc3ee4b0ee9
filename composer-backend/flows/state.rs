//! Per-node execution state machine.
//!
//! ```text
//! Pending ──(upstream executed)──▶ PendingConnected ──(execute)──▶ Executed
//! ```
//!
//! Approval gates additionally carry an [`Approval`] sub-state that may be
//! changed while the node is not yet executed. Executed nodes are read-only
//! for good.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;

use super::form::{self, FormSchema};
use super::node::{Approval, Flag, Node, NodeData, NodeRuntime, NodeType};
use super::{Edge, GraphSnapshot};
use crate::error::ComposerError;

/// Source handle of the "right" (true) branch of a switch node.
pub const RIGHT_HANDLE: &str = "a";
/// Source handle of the "left" branch of a switch node.
pub const LEFT_HANDLE: &str = "c";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    PendingConnected,
    Executed,
}

pub fn node_state(runtime: &NodeRuntime) -> NodeState {
    if runtime.is_executed.is_true() {
        NodeState::Executed
    } else if runtime.is_pending_connected {
        NodeState::PendingConnected
    } else {
        NodeState::Pending
    }
}

/// Whether every visible field of the node's attached form has a value.
///
/// Only action nodes awaiting action are checked. A schema that cannot be
/// parsed does not block the operator.
pub fn are_all_fields_filled(node: &Node) -> bool {
    let NodeData::Action(action) = &node.data else {
        return true;
    };
    if node_state(&action.runtime) != NodeState::PendingConnected {
        return true;
    }
    let Some(raw) = action.attached_form.as_deref() else {
        return true;
    };

    let schema = match FormSchema::parse(raw) {
        Ok(schema) => schema,
        Err(e) => {
            tracing::warn!(node_id = %node.id, error = %e, "ignoring unreadable attached form");
            return true;
        }
    };

    schema
        .visible_fields(action.approval)
        .all(|field| form::is_filled(action.runtime.form_data.get(field)))
}

fn ensure_writable(node: &Node) -> Result<(), ComposerError> {
    if node.runtime().is_readonly || node.runtime().is_executed.is_true() {
        return Err(ComposerError::ReadOnly(node.id.clone()));
    }
    Ok(())
}

fn mark_executed(runtime: &mut NodeRuntime) {
    runtime.is_executed = Flag::True;
    runtime.is_pending_connected = false;
    runtime.is_readonly = true;
}

/// Execute a single node: PendingConnected → Executed.
///
/// The node's current `formData` stays on it and becomes read-only.
pub fn execute(node: &mut Node) -> Result<(), ComposerError> {
    ensure_writable(node)?;
    if node_state(node.runtime()) != NodeState::PendingConnected {
        return Err(ComposerError::NotActionable(node.id.clone()));
    }
    if !are_all_fields_filled(node) {
        return Err(ComposerError::IncompleteForm(node.id.clone()));
    }
    mark_executed(node.runtime_mut());
    Ok(())
}

/// Fill one form field of a node that is still editable.
pub fn set_field(node: &mut Node, field: &str, value: Value) -> Result<(), ComposerError> {
    ensure_writable(node)?;
    node.runtime_mut().form_data.insert(field.to_string(), value);
    Ok(())
}

/// Change the approval sub-state of an approval gate. Does not execute it.
pub fn set_approval(node: &mut Node, approval: Approval) -> Result<(), ComposerError> {
    ensure_writable(node)?;
    match &mut node.data {
        NodeData::Action(action) if action.is_approval_gate() => {
            action.approval = approval;
            Ok(())
        }
        _ => Err(ComposerError::Conflict(format!(
            "node {} is not an approval step",
            node.id
        ))),
    }
}

/// Execute `node_id` inside `graph` and re-evaluate what became actionable.
pub fn execute_node(graph: &mut GraphSnapshot, node_id: &str) -> Result<(), ComposerError> {
    let node = graph
        .node_mut(node_id)
        .ok_or_else(|| ComposerError::not_found("node", node_id))?;
    execute(node)?;

    let branches = match &node.data {
        NodeData::Switch(switch) => Some((switch.left_switch, switch.right_switch)),
        _ => None,
    };
    if let Some((left, right)) = branches {
        let decision = upstream_decision(graph, node_id);
        activate_switch_branches(&mut graph.edges, node_id, left, right, decision);
    }

    propagate_pending(graph);
    Ok(())
}

/// The approval recorded by the closest executed approval gate upstream of
/// `node_id`, searched breadth-first over executed nodes only. `None` when
/// no such gate exists or it was executed without a decision.
pub fn upstream_decision(graph: &GraphSnapshot, node_id: &str) -> Option<Flag> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([node_id]);

    while let Some(current) = queue.pop_front() {
        for edge in graph.edges.iter().filter(|e| e.target == current) {
            if !seen.insert(edge.source.as_str()) {
                continue;
            }
            let Some(source) = graph.node(&edge.source) else {
                continue;
            };
            if node_state(source.runtime()) != NodeState::Executed {
                continue;
            }
            if let NodeData::Action(action) = &source.data {
                if action.is_approval_gate() {
                    match action.approval {
                        Approval::Approved => return Some(Flag::True),
                        Approval::Rejected => return Some(Flag::False),
                        Approval::Undefined => {}
                    }
                }
            }
            queue.push_back(edge.source.as_str());
        }
    }
    None
}

/// Flag each outgoing edge of an executed switch node as the taken branch
/// or not. The taken branch is the one whose flag matches `decision`; with
/// no decision the branch flagged `TRUE` is taken. Edges leaving through
/// other handles are left unmarked.
pub fn activate_switch_branches(
    edges: &mut [Edge],
    switch_id: &str,
    left: Option<Flag>,
    right: Option<Flag>,
    decision: Option<Flag>,
) {
    let taken = decision.unwrap_or(Flag::True);
    for edge in edges.iter_mut().filter(|e| e.source == switch_id) {
        let branch = match edge.source_handle.as_deref() {
            Some(RIGHT_HANDLE) => right,
            Some(LEFT_HANDLE) => left,
            _ => continue,
        };
        edge.set_active(Some(branch == Some(taken)));
    }
}

/// Mark as PendingConnected every node reachable over one edge from an
/// executed node. Switch nodes only propagate over their active branches.
/// Returns the ids of the nodes that changed.
pub fn propagate_pending(graph: &mut GraphSnapshot) -> Vec<String> {
    let mut targets = Vec::new();
    for edge in &graph.edges {
        let Some(source) = graph.node(&edge.source) else {
            continue;
        };
        if node_state(source.runtime()) != NodeState::Executed {
            continue;
        }
        if source.node_type() == NodeType::SwitchNode && edge.is_active() == Some(false) {
            continue;
        }
        targets.push(edge.target.clone());
    }

    let mut changed = Vec::new();
    for target in targets {
        let Some(node) = graph.node_mut(&target) else {
            continue;
        };
        if node_state(node.runtime()) == NodeState::Pending {
            node.runtime_mut().is_pending_connected = true;
            changed.push(target);
        }
    }
    changed
}

/// Clear runtime state and start a fresh run: start nodes are executed and
/// their successors become actionable.
pub fn reset_for_execution(graph: &mut GraphSnapshot) {
    for node in &mut graph.nodes {
        let runtime = node.runtime_mut();
        runtime.is_executed = Flag::False;
        runtime.is_pending_connected = false;
        runtime.is_readonly = false;
        runtime.form_data.clear();
        if let NodeData::Action(action) = &mut node.data {
            action.approval = Approval::Undefined;
        }
    }
    for edge in &mut graph.edges {
        edge.set_active(None);
    }
    for node in &mut graph.nodes {
        if node.node_type() == NodeType::StartNode {
            mark_executed(node.runtime_mut());
        }
    }
    propagate_pending(graph);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Position;
    use crate::flows::node::{ActionData, APPROVAL_ACTION, SwitchData};
    use serde_json::json;

    const MOTIVO_FORM: &str = r#"{"Show_Condition":"TRUE","Fields":{"Motivo":["text"]}}"#;

    fn node(id: &str, node_type: NodeType) -> Node {
        Node::new(id, node_type, Position::default())
    }

    fn approval_node(approval: Approval, form_data: Value) -> Node {
        let mut n = node("approve", NodeType::ActionNode);
        n.data = NodeData::Action(ActionData {
            action_type: Some(APPROVAL_ACTION.to_string()),
            approval,
            attached_form: Some(MOTIVO_FORM.to_string()),
            ..Default::default()
        });
        n.runtime_mut().is_pending_connected = true;
        if let Value::Object(map) = form_data {
            n.runtime_mut().form_data = map;
        }
        n
    }

    fn linear_graph() -> GraphSnapshot {
        GraphSnapshot {
            nodes: vec![
                node("start", NodeType::StartNode),
                node("task", NodeType::ActionNode),
                node("end", NodeType::EndNode),
            ],
            edges: vec![Edge::new("start", None, "task"), Edge::new("task", None, "end")],
            ..Default::default()
        }
    }

    #[test]
    fn hidden_field_does_not_block_when_rejected() {
        let n = approval_node(Approval::Rejected, json!({}));
        assert!(are_all_fields_filled(&n));
    }

    #[test]
    fn visible_field_blocks_until_filled() {
        let empty = approval_node(Approval::Approved, json!({}));
        assert!(!are_all_fields_filled(&empty));

        let filled = approval_node(Approval::Approved, json!({ "Motivo": "x" }));
        assert!(are_all_fields_filled(&filled));
    }

    #[test]
    fn placeholder_counts_as_empty() {
        let n = approval_node(Approval::Approved, json!({ "Motivo": form::PLACEHOLDER }));
        assert!(!are_all_fields_filled(&n));
    }

    #[test]
    fn malformed_schema_passes() {
        let mut n = approval_node(Approval::Approved, json!({}));
        if let NodeData::Action(action) = &mut n.data {
            action.attached_form = Some("{broken".to_string());
        }
        assert!(are_all_fields_filled(&n));
    }

    #[test]
    fn nodes_not_awaiting_action_always_pass() {
        let mut n = approval_node(Approval::Approved, json!({}));
        n.runtime_mut().is_pending_connected = false;
        assert!(are_all_fields_filled(&n));
        assert!(are_all_fields_filled(&node("doc", NodeType::DocumentNode)));
    }

    #[test]
    fn execute_requires_pending_connected() {
        let mut n = node("task", NodeType::ActionNode);
        assert_eq!(
            execute(&mut n),
            Err(ComposerError::NotActionable("task".to_string()))
        );

        n.runtime_mut().is_pending_connected = true;
        execute(&mut n).unwrap();
        assert_eq!(node_state(n.runtime()), NodeState::Executed);
        assert!(n.runtime().is_readonly);
        assert!(!n.runtime().is_pending_connected);
    }

    #[test]
    fn execute_refuses_incomplete_form() {
        let mut n = approval_node(Approval::Approved, json!({}));
        assert_eq!(
            execute(&mut n),
            Err(ComposerError::IncompleteForm("approve".to_string()))
        );
        assert_eq!(node_state(n.runtime()), NodeState::PendingConnected);
    }

    #[test]
    fn executed_node_is_frozen() {
        let mut n = approval_node(Approval::Approved, json!({ "Motivo": "ok" }));
        execute(&mut n).unwrap();

        assert_eq!(
            set_field(&mut n, "Motivo", json!("changed")),
            Err(ComposerError::ReadOnly("approve".to_string()))
        );
        assert_eq!(
            set_approval(&mut n, Approval::Rejected),
            Err(ComposerError::ReadOnly("approve".to_string()))
        );
        assert!(execute(&mut n).is_err());
        assert_eq!(n.runtime().form_data["Motivo"], "ok");
    }

    #[test]
    fn approval_only_applies_to_approval_gates() {
        let mut plain = node("task", NodeType::ActionNode);
        assert!(matches!(
            set_approval(&mut plain, Approval::Approved),
            Err(ComposerError::Conflict(_))
        ));

        let mut gate = approval_node(Approval::Undefined, json!({}));
        set_approval(&mut gate, Approval::Approved).unwrap();
        assert_eq!(node_state(gate.runtime()), NodeState::PendingConnected);
    }

    #[test]
    fn reset_starts_run_at_start_nodes() {
        let mut graph = linear_graph();
        reset_for_execution(&mut graph);

        assert_eq!(node_state(graph.node("start").unwrap().runtime()), NodeState::Executed);
        assert_eq!(
            node_state(graph.node("task").unwrap().runtime()),
            NodeState::PendingConnected
        );
        assert_eq!(node_state(graph.node("end").unwrap().runtime()), NodeState::Pending);
    }

    #[test]
    fn executing_moves_pending_downstream() {
        let mut graph = linear_graph();
        reset_for_execution(&mut graph);

        execute_node(&mut graph, "task").unwrap();
        assert_eq!(
            node_state(graph.node("end").unwrap().runtime()),
            NodeState::PendingConnected
        );
        assert!(matches!(
            execute_node(&mut graph, "missing"),
            Err(ComposerError::NotFound { .. })
        ));
    }

    #[test]
    fn switch_only_propagates_over_taken_branch() {
        let mut sw = node("sw", NodeType::SwitchNode);
        sw.data = NodeData::Switch(SwitchData {
            right_switch: Some(Flag::True),
            left_switch: Some(Flag::False),
            ..Default::default()
        });
        let mut graph = GraphSnapshot {
            nodes: vec![
                node("start", NodeType::StartNode),
                sw,
                node("yes", NodeType::ActionNode),
                node("no", NodeType::ActionNode),
            ],
            edges: vec![
                Edge::new("start", None, "sw"),
                Edge::new("sw", Some(RIGHT_HANDLE), "yes"),
                Edge::new("sw", Some(LEFT_HANDLE), "no"),
            ],
            ..Default::default()
        };
        reset_for_execution(&mut graph);
        execute_node(&mut graph, "sw").unwrap();

        assert_eq!(graph.edges[1].is_active(), Some(true));
        assert_eq!(graph.edges[2].is_active(), Some(false));
        assert_eq!(
            node_state(graph.node("yes").unwrap().runtime()),
            NodeState::PendingConnected
        );
        assert_eq!(node_state(graph.node("no").unwrap().runtime()), NodeState::Pending);
    }

    fn gated_switch_graph() -> GraphSnapshot {
        let mut gate = node("approve", NodeType::ActionNode);
        gate.data = NodeData::Action(ActionData {
            action_type: Some(APPROVAL_ACTION.to_string()),
            ..Default::default()
        });
        let mut sw = node("sw", NodeType::SwitchNode);
        sw.data = NodeData::Switch(SwitchData {
            right_switch: Some(Flag::True),
            left_switch: Some(Flag::False),
            ..Default::default()
        });
        let mut graph = GraphSnapshot {
            nodes: vec![
                node("start", NodeType::StartNode),
                gate,
                sw,
                node("yes", NodeType::ActionNode),
                node("no", NodeType::ActionNode),
            ],
            edges: vec![
                Edge::new("start", None, "approve"),
                Edge::new("approve", None, "sw"),
                Edge::new("sw", Some(RIGHT_HANDLE), "yes"),
                Edge::new("sw", Some(LEFT_HANDLE), "no"),
            ],
            ..Default::default()
        };
        reset_for_execution(&mut graph);
        graph
    }

    fn run_gate_then_switch(approval: Approval) -> GraphSnapshot {
        let mut graph = gated_switch_graph();
        set_approval(graph.node_mut("approve").unwrap(), approval).unwrap();
        execute_node(&mut graph, "approve").unwrap();
        execute_node(&mut graph, "sw").unwrap();
        graph
    }

    #[test]
    fn rejected_approval_takes_false_branch() {
        let graph = run_gate_then_switch(Approval::Rejected);

        assert_eq!(upstream_decision(&graph, "sw"), Some(Flag::False));
        assert_eq!(graph.edges[2].is_active(), Some(false));
        assert_eq!(graph.edges[3].is_active(), Some(true));
        assert_eq!(
            node_state(graph.node("no").unwrap().runtime()),
            NodeState::PendingConnected
        );
        assert_eq!(node_state(graph.node("yes").unwrap().runtime()), NodeState::Pending);
    }

    #[test]
    fn approved_approval_takes_true_branch() {
        let graph = run_gate_then_switch(Approval::Approved);

        assert_eq!(
            node_state(graph.node("yes").unwrap().runtime()),
            NodeState::PendingConnected
        );
        assert_eq!(node_state(graph.node("no").unwrap().runtime()), NodeState::Pending);
    }

    #[test]
    fn decision_ignores_gates_not_yet_executed() {
        let mut graph = gated_switch_graph();
        set_approval(graph.node_mut("approve").unwrap(), Approval::Rejected).unwrap();
        assert_eq!(upstream_decision(&graph, "sw"), None);
    }
}
