//! Mutation Batch Collector
//!
//! Accumulates inserted page nodes and releases them as one batch after a
//! quiet period. Chat pages insert many small fragments per rendered
//! message; batching turns each burst into a single extraction pass.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::capture::debounce::QuietPeriodTimer;
use crate::capture::node::{NodeHandle, PageNode};

pub struct BatchCollector {
    /// Set once on first attach, never cleared
    attached: bool,
    pending: Vec<PageNode>,
    /// Handle → index into `pending`
    pending_handles: HashMap<NodeHandle, usize>,
    timer: QuietPeriodTimer,
}

impl BatchCollector {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            attached: false,
            pending: Vec::new(),
            pending_handles: HashMap::new(),
            timer: QuietPeriodTimer::new(quiet_period),
        }
    }

    /// Start observing. Returns false when already attached, in which case
    /// nothing changes.
    pub fn attach(&mut self) -> bool {
        if self.attached {
            debug!("Collector already attached, skipping");
            return false;
        }
        self.attached = true;
        debug!(quiet_period_ms = self.timer.period().as_millis() as u64, "Collector attached");
        true
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Record one mutation callback's inserted nodes and restart the quiet
    /// period. A node already pending is replaced by the newer snapshot in
    /// its original position. Ignored until attached.
    pub fn observe<I>(&mut self, nodes: I, now: Instant)
    where
        I: IntoIterator<Item = PageNode>,
    {
        if !self.attached {
            return;
        }
        for node in nodes {
            let existing = self.pending_handles.get(&node.handle).copied();
            match existing {
                Some(index) => self.pending[index] = node,
                None => {
                    self.pending_handles.insert(node.handle, self.pending.len());
                    self.pending.push(node);
                }
            }
        }
        self.timer.arm(now);
        trace!(pending = self.pending.len(), "Insertion observed");
    }

    /// Release the pending batch if the quiet period has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<Vec<PageNode>> {
        if !self.timer.fire(now) {
            return None;
        }
        Some(self.drain())
    }

    /// Release whatever is pending without waiting out the quiet period.
    /// `None` when nothing is pending.
    pub fn take(&mut self) -> Option<Vec<PageNode>> {
        if !self.timer.is_pending() {
            return None;
        }
        self.timer.reset();
        Some(self.drain())
    }

    fn drain(&mut self) -> Vec<PageNode> {
        self.pending_handles.clear();
        let batch = std::mem::take(&mut self.pending);
        debug!(nodes = batch.len(), "Flushing batch");
        batch
    }
}
