use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::error::ErrorKind;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Skipped {
        reason: String,
        path: Option<PathBuf>,
    },
    Succeeded {
        path: PathBuf,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl ItemOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ItemOutcome::Failed { .. })
    }
}

/// Terminal record of one item. Produced exactly once per item per run.
#[derive(Debug, Clone, Serialize)]
pub struct ItemRecord {
    pub index: usize,
    pub identifier: String,
    pub outcome: ItemOutcome,
    /// Attempts consumed; 0 when the item never reached the pipeline.
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

impl ItemRecord {
    pub fn new(
        index: usize,
        identifier: impl Into<String>,
        outcome: ItemOutcome,
        attempts: u32,
    ) -> Self {
        Self {
            index,
            identifier: identifier.into(),
            outcome,
            attempts,
            finished_at: Utc::now(),
        }
    }
}

/// A collection identifier that could not be turned into a batch at all.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionError {
    pub identifier: String,
    pub message: String,
}

/// Records in completion order, never submission order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub records: Vec<ItemRecord>,
    pub collection_errors: Vec<CollectionError>,
}

impl BatchResult {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.collection_errors.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.collection_errors.is_empty() || self.records.iter().any(|r| r.outcome.is_failure())
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            success_count: 0,
            skipped_count: 0,
            failure_count: 0,
            failures: Vec::new(),
            collection_errors: self.collection_errors.clone(),
        };
        for record in &self.records {
            match &record.outcome {
                ItemOutcome::Succeeded { .. } => summary.success_count += 1,
                ItemOutcome::Skipped { .. } => summary.skipped_count += 1,
                ItemOutcome::Failed { message, .. } => {
                    summary.failure_count += 1;
                    summary.failures.push(FailureEntry {
                        identifier: record.identifier.clone(),
                        message: message.clone(),
                        attempts: record.attempts,
                    });
                }
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureEntry {
    pub identifier: String,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub success_count: usize,
    pub skipped_count: usize,
    pub failure_count: usize,
    /// In the order the failures completed.
    pub failures: Vec<FailureEntry>,
    pub collection_errors: Vec<CollectionError>,
}

/// Append-only accumulator that becomes a [`BatchResult`] once drained.
#[derive(Debug, Default)]
pub struct ResultCollector {
    result: BatchResult,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: ItemRecord) {
        self.result.records.push(record);
    }

    pub fn collection_failed(
        &mut self,
        identifier: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.result.collection_errors.push(CollectionError {
            identifier: identifier.into(),
            message: message.into(),
        });
    }

    /// Folds a finished group's result into this one, keeping its order.
    pub fn absorb(&mut self, other: BatchResult) {
        self.result.records.extend(other.records);
        self.result.collection_errors.extend(other.collection_errors);
    }

    pub fn finish(self) -> BatchResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(msg: &str) -> ItemOutcome {
        ItemOutcome::Failed {
            kind: ErrorKind::Transient,
            message: msg.to_string(),
        }
    }

    fn succeeded(path: &str) -> ItemOutcome {
        ItemOutcome::Succeeded { path: path.into() }
    }

    #[test]
    fn summary_counts_and_lists_failures_in_completion_order() {
        let mut collector = ResultCollector::new();
        collector.record(ItemRecord::new(2, "c", failed("timed out"), 10));
        collector.record(ItemRecord::new(0, "a", succeeded("a.mp3"), 1));
        collector.record(ItemRecord::new(
            1,
            "b",
            ItemOutcome::Skipped {
                reason: "already exists".into(),
                path: Some("b.mp3".into()),
            },
            0,
        ));
        collector.record(ItemRecord::new(3, "d", failed("private"), 1));

        let result = collector.finish();
        let summary = result.summary();
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.skipped_count, 1);
        assert_eq!(summary.failure_count, 2);
        assert_eq!(
            summary.failures,
            vec![
                FailureEntry {
                    identifier: "c".into(),
                    message: "timed out".into(),
                    attempts: 10
                },
                FailureEntry {
                    identifier: "d".into(),
                    message: "private".into(),
                    attempts: 1
                },
            ]
        );
        assert!(result.has_failures());
    }

    #[test]
    fn collection_errors_stay_separate_from_items() {
        let mut collector = ResultCollector::new();
        collector.collection_failed("list=broken", "playlist does not exist");
        let result = collector.finish();
        let summary = result.summary();
        assert_eq!(summary.failure_count, 0);
        assert_eq!(summary.collection_errors.len(), 1);
        assert!(result.has_failures());
        assert!(!result.is_empty());
    }

    #[test]
    fn absorb_appends_groups_in_order() {
        let mut first = ResultCollector::new();
        first.record(ItemRecord::new(0, "g1", succeeded("1"), 1));
        let mut second = ResultCollector::new();
        second.record(ItemRecord::new(0, "g2", succeeded("2"), 1));
        second.collection_failed("g3", "gone");

        let mut all = ResultCollector::new();
        all.absorb(first.finish());
        all.absorb(second.finish());
        let result = all.finish();
        let ids: Vec<_> = result.records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, ["g1", "g2"]);
        assert_eq!(result.collection_errors[0].identifier, "g3");
    }

    #[test]
    fn empty_result_has_no_failures() {
        let result = ResultCollector::new().finish();
        assert!(result.is_empty());
        assert!(!result.has_failures());
        assert_eq!(result.summary().success_count, 0);
    }
}
