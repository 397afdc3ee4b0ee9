//! Display attributes of edges, derived from node state on every render.
//! Nothing here is stored back into the graph.

use serde::Serialize;

use super::node::{Flag, Node, NodeData};
use super::state::{LEFT_HANDLE, NodeState, RIGHT_HANDLE, node_state};
use super::Edge;

pub const COLOR_DEFAULT: &str = "#b1b1b7";
pub const COLOR_EXECUTED: &str = "#22c55e";
pub const COLOR_PENDING: &str = "#f59e0b";
pub const COLOR_REJECTED: &str = "#ef4444";
pub const COLOR_INACTIVE: &str = "#e5e7eb";
pub const COLOR_SELECTED: &str = "#f97316";

pub const STROKE_WIDTH: f32 = 2.0;
pub const SELECTED_STROKE_WIDTH: f32 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeAppearance {
    pub edge_id: String,
    pub stroke: &'static str,
    pub stroke_width: f32,
    pub animated: bool,
}

/// Compute the appearance of every edge. A selected edge is always drawn
/// in the selection color, whatever its source state.
pub fn derive(nodes: &[Node], edges: &[Edge], selected_edge: Option<&str>) -> Vec<EdgeAppearance> {
    edges
        .iter()
        .map(|edge| {
            let source = nodes.iter().find(|n| n.id == edge.source);
            let (stroke, animated) = state_color(edge, source);
            if selected_edge == Some(edge.id.as_str()) {
                EdgeAppearance {
                    edge_id: edge.id.clone(),
                    stroke: COLOR_SELECTED,
                    stroke_width: SELECTED_STROKE_WIDTH,
                    animated,
                }
            } else {
                EdgeAppearance {
                    edge_id: edge.id.clone(),
                    stroke,
                    stroke_width: STROKE_WIDTH,
                    animated,
                }
            }
        })
        .collect()
}

fn state_color(edge: &Edge, source: Option<&Node>) -> (&'static str, bool) {
    let Some(source) = source else {
        return (COLOR_DEFAULT, false);
    };
    let state = node_state(source.runtime());

    if let NodeData::Switch(switch) = &source.data {
        match (state, edge.is_active()) {
            (NodeState::Executed, Some(true)) => return (COLOR_EXECUTED, true),
            (NodeState::Executed, Some(false)) => return (COLOR_INACTIVE, false),
            (NodeState::Executed, None) => {}
            (_, _) => {
                let branch = match edge.source_handle.as_deref() {
                    Some(RIGHT_HANDLE) => Some(switch.right_switch),
                    Some(LEFT_HANDLE) => Some(switch.left_switch),
                    _ => None,
                };
                if let Some(flag) = branch {
                    let animated = state == NodeState::PendingConnected;
                    return match flag {
                        Some(Flag::True) => (COLOR_EXECUTED, animated),
                        Some(Flag::False) => (COLOR_REJECTED, animated),
                        None => (COLOR_DEFAULT, animated),
                    };
                }
            }
        }
    }

    match state {
        NodeState::Executed => (COLOR_EXECUTED, true),
        NodeState::PendingConnected => (COLOR_PENDING, true),
        NodeState::Pending => (COLOR_DEFAULT, false),
    }
}
