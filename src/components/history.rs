use std::collections::VecDeque;

use crate::canvas::ImageBuffer;

/// Default number of snapshots kept in the undo log.
pub const DEFAULT_MAX_HISTORY: usize = 20;

// ============================================================================
// HISTORY ENTRY
// ============================================================================

/// One full-resolution snapshot plus the action that produced it.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub description: String,
    pub snapshot: ImageBuffer,
}

impl HistoryEntry {
    fn memory_size(&self) -> usize {
        self.snapshot.memory_size()
    }
}

// ============================================================================
// HISTORY STACK - bounded undo/redo log of buffer snapshots
// ============================================================================

/// Bounded undo/redo log of [`ImageBuffer`] snapshots.
///
/// The top of the undo log is always the state the session is showing; the
/// bottom entry is the baseline.  Each snapshot is a full bitmap, so the log
/// is capped and the oldest entries are evicted first.  Deep history is
/// traded for bounded memory: after `max_history_size` edits the baseline
/// itself is gone and undo stops at the oldest surviving entry.
#[derive(Debug)]
pub struct HistoryStack {
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl HistoryStack {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_history_size: max_history_size.max(1),
            max_memory_bytes: None,
            total_memory: 0,
        }
    }

    pub fn with_memory_limit(mut self, max_bytes: Option<usize>) -> Self {
        self.max_memory_bytes = max_bytes;
        self.prune();
        self
    }

    pub fn capacity(&self) -> usize {
        self.max_history_size
    }

    /// Empty both logs and seed the undo log with `baseline`.
    pub fn reset(&mut self, baseline: ImageBuffer) {
        self.clear();
        self.total_memory = baseline.memory_size();
        self.undo_stack.push_back(HistoryEntry {
            description: "Open".to_string(),
            snapshot: baseline,
        });
    }

    /// Record a new state.  Evicts the oldest entry past capacity and
    /// always clears the redo log.
    pub fn save(&mut self, description: impl Into<String>, snapshot: ImageBuffer) {
        for entry in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(entry.memory_size());
        }
        self.push_undo(HistoryEntry {
            description: description.into(),
            snapshot,
        });
    }

    /// Step back one entry.  Returns the state to restore, or `None` when
    /// only the baseline remains.
    pub fn undo(&mut self) -> Option<ImageBuffer> {
        if self.undo_stack.len() <= 1 {
            return None;
        }
        let popped = self.undo_stack.pop_back()?;
        self.redo_stack.push(popped);
        self.undo_stack.back().map(|e| e.snapshot.clone())
    }

    /// Re-apply the most recently undone entry.  The state shown before the
    /// redo stays directly beneath it in the undo log.
    pub fn redo(&mut self) -> Option<ImageBuffer> {
        let entry = self.redo_stack.pop()?;
        let snapshot = entry.snapshot.clone();
        // Already counted in total_memory while it sat in the redo log.
        self.total_memory = self.total_memory.saturating_sub(entry.memory_size());
        self.push_undo(entry);
        Some(snapshot)
    }

    /// Snapshot at the top of the undo log.
    pub fn top(&self) -> Option<&ImageBuffer> {
        self.undo_stack.back().map(|e| &e.snapshot)
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.len() > 1
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        if self.can_undo() {
            self.undo_stack.back().map(|e| e.description.as_str())
        } else {
            None
        }
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().map(|e| e.description.as_str())
    }

    /// All undo descriptions (most recent first).
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|e| e.description.clone()).collect()
    }

    /// Bytes held by both logs (O(1) via cached total).
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    fn push_undo(&mut self, entry: HistoryEntry) {
        self.total_memory += entry.memory_size();
        self.undo_stack.push_back(entry);
        self.prune();
    }

    /// Drop oldest entries to stay within limits, never below one.
    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }
}
