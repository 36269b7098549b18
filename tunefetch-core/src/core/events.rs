use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActiveItem {
    pub index: usize,
    pub message: String,
    /// Last reported download fraction, 0.0 to 1.0.
    pub fraction: Option<f64>,
}

/// Immutable view of a batch's progress handed to renderers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressSnapshot {
    pub label: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub pending: usize,
    /// In-flight items ordered by batch index.
    pub active: Vec<ActiveItem>,
}

impl ProgressSnapshot {
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// Receives snapshots after every progress update. Calls for one batch are
/// serialized, so an implementation may write to the terminal directly.
pub trait ProgressRenderer: Send + Sync {
    fn render(&self, snapshot: &ProgressSnapshot);

    fn finish(&self, _snapshot: &ProgressSnapshot) {}
}
