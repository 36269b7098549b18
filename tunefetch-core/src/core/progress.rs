use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::core::events::{ActiveItem, ProgressRenderer, ProgressSnapshot};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    Started,
    /// Fraction of the current step, 0.0 to 1.0.
    Running(f64),
    Succeeded,
    Failed,
}

struct Entry {
    message: String,
    fraction: Option<f64>,
}

struct ProgressState {
    total: usize,
    completed: usize,
    failed: usize,
    in_progress: usize,
    active: BTreeMap<usize, Entry>,
    finished: HashSet<usize>,
}

impl ProgressState {
    fn pending(&self) -> usize {
        self.total - self.completed - self.failed - self.in_progress
    }

    fn apply(&mut self, index: usize, phase: Phase, message: String) -> bool {
        if index >= self.total {
            tracing::warn!("progress update for index {} outside batch of {}", index, self.total);
            return false;
        }
        if self.finished.contains(&index) {
            tracing::debug!("ignoring {:?} for finished item {}", phase, index);
            return false;
        }

        match phase {
            Phase::Started | Phase::Running(_) => {
                let fraction = match phase {
                    Phase::Running(f) => Some(f.clamp(0.0, 1.0)),
                    _ => None,
                };
                if !self.active.contains_key(&index) {
                    self.in_progress += 1;
                }
                self.active.insert(index, Entry { message, fraction });
            }
            Phase::Succeeded | Phase::Failed => {
                if self.active.remove(&index).is_some() {
                    self.in_progress -= 1;
                }
                self.finished.insert(index);
                if phase == Phase::Succeeded {
                    self.completed += 1;
                } else {
                    self.failed += 1;
                }
            }
        }
        true
    }

    fn snapshot(&self, label: &str) -> ProgressSnapshot {
        ProgressSnapshot {
            label: label.to_string(),
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            in_progress: self.in_progress,
            pending: self.pending(),
            active: self
                .active
                .iter()
                .map(|(index, e)| ActiveItem {
                    index: *index,
                    message: e.message.clone(),
                    fraction: e.fraction,
                })
                .collect(),
        }
    }
}

/// Thread-safe progress counters for one batch.
///
/// Every mutation goes through [`ProgressAggregator::update`]; the invariant
/// `completed + failed + in_progress + pending == total` holds in every
/// snapshot. Terminal updates are final: later updates for the same index are
/// ignored.
pub struct ProgressAggregator {
    label: String,
    state: Mutex<ProgressState>,
    renderer: Option<Arc<dyn ProgressRenderer>>,
}

impl ProgressAggregator {
    pub fn new(
        label: impl Into<String>,
        total: usize,
        renderer: Option<Arc<dyn ProgressRenderer>>,
    ) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(ProgressState {
                total,
                completed: 0,
                failed: 0,
                in_progress: 0,
                active: BTreeMap::new(),
                finished: HashSet::new(),
            }),
            renderer,
        }
    }

    pub fn update(&self, index: usize, phase: Phase, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.apply(index, phase, message.into()) {
            return;
        }
        if let Some(renderer) = &self.renderer {
            // rendering under the lock keeps terminal writes in update order
            renderer.render(&state.snapshot(&self.label));
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.snapshot(&self.label)
    }

    /// Hands the final snapshot to the renderer.
    pub fn finish(&self) -> ProgressSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = state.snapshot(&self.label);
        if let Some(renderer) = &self.renderer {
            renderer.finish(&snapshot);
        }
        snapshot
    }

    pub fn item(self: &Arc<Self>, index: usize) -> ItemProgress {
        ItemProgress {
            aggregator: Arc::clone(self),
            index,
        }
    }
}

/// Progress handle bound to one item of a batch.
#[derive(Clone)]
pub struct ItemProgress {
    aggregator: Arc<ProgressAggregator>,
    index: usize,
}

impl ItemProgress {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn report(&self, phase: Phase, message: impl Into<String>) {
        self.aggregator.update(self.index, phase, message);
    }
}

pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_emit: None,
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}
