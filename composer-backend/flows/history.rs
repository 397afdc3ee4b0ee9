use std::collections::VecDeque;

use super::node::Node;
use super::Edge;

pub const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Undo/redo stack over graph snapshots. `index` points at the snapshot
/// that matches what is currently on the canvas.
#[derive(Debug, Default)]
pub struct History {
    entries: VecDeque<HistorySnapshot>,
    index: usize,
}

impl History {
    pub fn new(initial: HistorySnapshot) -> Self {
        Self {
            entries: VecDeque::from([initial]),
            index: 0,
        }
    }

    /// Drop everything and start over from `initial`.
    pub fn reset(&mut self, initial: HistorySnapshot) {
        *self = Self::new(initial);
    }

    /// Record a new snapshot. Any redo entries past the current position
    /// are discarded and the oldest entries are evicted beyond
    /// [`MAX_HISTORY`].
    pub fn push(&mut self, snapshot: HistorySnapshot) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.index + 1);
        }
        self.entries.push_back(snapshot);
        while self.entries.len() > MAX_HISTORY {
            self.entries.pop_front();
        }
        self.index = self.entries.len() - 1;
    }

    pub fn undo(&mut self) -> Option<&HistorySnapshot> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        self.entries.get(self.index)
    }

    pub fn redo(&mut self) -> Option<&HistorySnapshot> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        self.entries.get(self.index)
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    pub fn current(&self) -> Option<&HistorySnapshot> {
        self.entries.get(self.index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }
}
