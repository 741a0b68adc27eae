//! Execution stack.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rill_core::{Trace, TraceFrame};

use crate::context::FlowPosition;

/// One active op invocation.
///
/// Entries are immutable once created and link to the entry that was active
/// when they were pushed, forming a single root-to-leaf chain.
#[derive(Debug)]
pub struct StackEntry {
    title: String,
    position: FlowPosition,
    parent: Option<Arc<StackEntry>>,
    started_at: Instant,
}

impl StackEntry {
    pub fn new(title: String, position: FlowPosition, parent: Option<Arc<StackEntry>>) -> Self {
        Self {
            title,
            position,
            parent,
            started_at: Instant::now(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn position(&self) -> &FlowPosition {
        &self.position
    }

    pub fn parent(&self) -> Option<&Arc<StackEntry>> {
        self.parent.as_ref()
    }

    /// Number of ancestors of this entry.
    pub fn depth(&self) -> usize {
        std::iter::successors(self.parent(), |entry| entry.parent()).count()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Elapsed time in whole milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        saturating_millis(self.elapsed())
    }

    pub fn frame(&self) -> TraceFrame {
        self.position.frame(self.title.clone())
    }

    /// Renders the chain ending at this entry, root first.
    ///
    /// Used by preview modes, which report where they are without failing.
    pub fn trace(self: &Arc<Self>) -> Trace {
        let mut frames: Vec<TraceFrame> = std::iter::successors(Some(self), |entry| entry.parent())
            .map(|entry| entry.frame())
            .collect();
        frames.reverse();
        Trace::new(frames)
    }
}

/// The job's live stack; top is the op currently executing.
#[derive(Debug, Default)]
pub struct ExecutionStack {
    entries: Mutex<Vec<Arc<StackEntry>>>,
}

impl ExecutionStack {
    pub fn push(&self, entry: Arc<StackEntry>) {
        self.lock().push(entry);
    }

    pub fn pop(&self) -> Option<Arc<StackEntry>> {
        self.lock().pop()
    }

    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    pub fn top(&self) -> Option<Arc<StackEntry>> {
        self.lock().last().cloned()
    }

    /// Renders every entry on the stack, root first.
    pub fn trace(&self) -> Trace {
        Trace::new(self.lock().iter().map(|entry| entry.frame()).collect())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<StackEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
