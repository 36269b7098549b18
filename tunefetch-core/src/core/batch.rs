use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::error::{DownloadError, ErrorKind};
use crate::core::events::ProgressRenderer;
use crate::core::filename::sanitize;
use crate::core::paths::DirectoryLocks;
use crate::core::pipeline::{validate_identifier, FetchTranscodePipeline, PipelineOutcome};
use crate::core::progress::{Phase, ProgressAggregator};
use crate::core::results::{BatchResult, ItemOutcome, ItemRecord, ResultCollector};
use crate::core::retry::{RetryFailure, RetryPolicy};
use crate::models::media::{Item, OutputKind};
use crate::models::settings::AppSettings;
use crate::platforms::traits::{StreamProvider, Transcoder};

const CANCELLED_REASON: &str = "cancelled before start";

/// State shared by the workers of one batch.
struct BatchContext {
    pipeline: Arc<FetchTranscodePipeline>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    aggregator: Arc<ProgressAggregator>,
    queue: Mutex<VecDeque<Item>>,
}

impl BatchContext {
    fn next_item(&self) -> Option<Item> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn drain_queue(&self) -> Vec<Item> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    async fn process(&self, item: &Item) -> ItemRecord {
        let progress = self.aggregator.item(item.index);

        if let Err(e) = validate_identifier(&item.identifier) {
            tracing::error!("[{}] rejected '{}': {}", item.index, item.identifier, e);
            progress.report(Phase::Failed, format!("Failed: {}", e));
            return failed_record(item, &e, 0);
        }

        progress.report(Phase::Started, format!("Resolving: {}", item.identifier));

        let max_attempts = self.policy.max_attempts;
        let result = self
            .policy
            .run(
                &self.cancel,
                |attempt| {
                    tracing::debug!("[{}] attempt {} for {}", item.index, attempt, item.identifier);
                    self.pipeline.run(item, &progress)
                },
                |attempt, e| {
                    progress.report(
                        Phase::Running(0.0),
                        format!("Retrying ({}/{}): {}", attempt + 1, max_attempts, e),
                    );
                },
            )
            .await;

        match result {
            Ok((PipelineOutcome::Downloaded(path), attempts)) => {
                tracing::info!("[{}] saved {}", item.index, path.display());
                progress.report(Phase::Succeeded, format!("Downloaded: {}", path.display()));
                let outcome = ItemOutcome::Succeeded { path };
                ItemRecord::new(item.index, &item.identifier, outcome, attempts)
            }
            Ok((PipelineOutcome::Skipped(path), attempts)) => {
                tracing::info!("[{}] skipped, {} already exists", item.index, path.display());
                progress.report(Phase::Succeeded, format!("Skipped: {}", path.display()));
                ItemRecord::new(
                    item.index,
                    &item.identifier,
                    ItemOutcome::Skipped {
                        reason: "already exists".to_string(),
                        path: Some(path),
                    },
                    attempts,
                )
            }
            Err(RetryFailure { error, attempts }) => {
                tracing::error!(
                    "[{}] {} failed after {} attempt(s): {}",
                    item.index,
                    item.identifier,
                    attempts,
                    error
                );
                progress.report(Phase::Failed, format!("Failed: {}", error));
                failed_record(item, &error, attempts)
            }
        }
    }
}

fn failed_record(item: &Item, error: &DownloadError, attempts: u32) -> ItemRecord {
    ItemRecord::new(
        item.index,
        &item.identifier,
        ItemOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        },
        attempts,
    )
}

async fn worker_loop(
    ctx: Arc<BatchContext>,
    worker: usize,
    results: mpsc::UnboundedSender<ItemRecord>,
) {
    while let Some(item) = ctx.next_item() {
        let record = ctx.process(&item).await;
        if results.send(record).is_err() {
            break;
        }
    }
    tracing::debug!("worker {} finished", worker);
}

/// Runs batches of items over a bounded pool of workers.
///
/// Each batch gets its own [`ProgressAggregator`]; collections are processed
/// one after another, each as an independent batch.
pub struct BatchRunner {
    provider: Arc<dyn StreamProvider>,
    pipeline: Arc<FetchTranscodePipeline>,
    settings: Arc<AppSettings>,
    renderer: Option<Arc<dyn ProgressRenderer>>,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(
        provider: Arc<dyn StreamProvider>,
        transcoder: Arc<dyn Transcoder>,
        settings: Arc<AppSettings>,
    ) -> Self {
        let pipeline = FetchTranscodePipeline::new(
            provider.clone(),
            transcoder,
            DirectoryLocks::new(),
            settings.clone(),
        );
        Self {
            provider,
            pipeline: Arc::new(pipeline),
            settings,
            renderer: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ProgressRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Cancelling stops dispatch; items already running finish normally.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.settings.advanced.max_retry_attempts,
            self.settings.retry_delay(),
        )
    }

    fn output_kind(&self) -> OutputKind {
        OutputKind::from_audio_only(self.settings.download.audio_only)
    }

    /// Processes `items` with at most `concurrency_limit` workers.
    ///
    /// Records arrive in completion order. Items still queued when the
    /// cancellation token fires are recorded as skipped.
    pub async fn run_batch(
        &self,
        label: &str,
        items: Vec<Item>,
        concurrency_limit: usize,
    ) -> BatchResult {
        let total = items.len();
        if total == 0 {
            tracing::info!("{}: nothing to download", label);
            return BatchResult::default();
        }

        let workers = concurrency_limit.clamp(1, total);
        tracing::info!(
            "{}: {} item(s) on {} worker(s) via {}",
            label,
            total,
            workers,
            self.provider.name()
        );

        let submitted: Vec<(usize, String)> = items
            .iter()
            .map(|i| (i.index, i.identifier.clone()))
            .collect();
        let aggregator = Arc::new(ProgressAggregator::new(label, total, self.renderer.clone()));
        let ctx = Arc::new(BatchContext {
            pipeline: self.pipeline.clone(),
            policy: self.retry_policy(),
            cancel: self.cancel.clone(),
            aggregator: aggregator.clone(),
            queue: Mutex::new(items.into()),
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<ItemRecord>();
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            pool.spawn(worker_loop(ctx.clone(), worker, tx.clone()));
        }
        drop(tx);

        let mut collector = ResultCollector::new();
        let mut recorded = HashSet::new();
        while let Some(record) = rx.recv().await {
            recorded.insert(record.index);
            collector.record(record);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!("{}: worker task failed: {}", label, e);
            }
        }

        let cancelled = ctx.drain_queue();
        if !cancelled.is_empty() {
            tracing::warn!("{}: {} item(s) cancelled before start", label, cancelled.len());
        }
        for item in cancelled {
            recorded.insert(item.index);
            collector.record(ItemRecord::new(
                item.index,
                item.identifier,
                ItemOutcome::Skipped {
                    reason: CANCELLED_REASON.to_string(),
                    path: None,
                },
                0,
            ));
        }

        // a panicked worker loses its in-flight item; every item still gets a record
        for (index, identifier) in submitted {
            if !recorded.contains(&index) {
                aggregator.update(index, Phase::Failed, "Failed: worker stopped");
                collector.record(ItemRecord::new(
                    index,
                    identifier,
                    ItemOutcome::Failed {
                        kind: ErrorKind::Fatal,
                        message: "worker stopped before reporting an outcome".to_string(),
                    },
                    0,
                ));
            }
        }

        let snapshot = aggregator.finish();
        tracing::info!(
            "{}: {} completed, {} failed",
            label,
            snapshot.completed,
            snapshot.failed
        );
        collector.finish()
    }

    /// Downloads individually listed identifiers into the download directory.
    pub async fn run_items(&self, identifiers: &[String]) -> BatchResult {
        let output = self.output_kind();
        let dir = &self.settings.download.download_dir;
        let items = identifiers
            .iter()
            .enumerate()
            .map(|(index, id)| Item::new(id.trim(), index, output, dir))
            .collect();
        self.run_batch("Downloads", items, self.settings.advanced.parallelism)
            .await
    }

    /// Expands one collection and downloads its entries into a folder named
    /// after the collection. Failure to expand is a collection-level error.
    pub async fn run_collection(&self, identifier: &str) -> BatchResult {
        let mut collector = ResultCollector::new();
        let identifier = identifier.trim();

        if let Err(e) = validate_identifier(identifier) {
            tracing::error!("collection '{}' rejected: {}", identifier, e);
            collector.collection_failed(identifier, e.to_string());
            return collector.finish();
        }

        let retry_unavailable = self.settings.advanced.retry_unavailable;
        let expanded = self
            .retry_policy()
            .run(
                &self.cancel,
                |_| async move {
                    self.provider
                        .expand_collection(identifier)
                        .await
                        .map_err(|e| DownloadError::provider(e, retry_unavailable))
                },
                |_, _| {},
            )
            .await;

        let collection = match expanded {
            Ok((collection, _)) => collection,
            Err(RetryFailure { error, attempts }) => {
                tracing::error!(
                    "collection '{}' could not be resolved after {} attempt(s): {}",
                    identifier,
                    attempts,
                    error
                );
                collector.collection_failed(identifier, error.to_string());
                return collector.finish();
            }
        };

        if collection.entries.is_empty() {
            tracing::info!("collection '{}' has no entries", collection.title);
            return collector.finish();
        }

        let download = &self.settings.download;
        let folder = sanitize(
            &collection.title,
            download.max_filename_length,
            &download.truncation_marker,
        );
        let dir = download.download_dir.join(&folder);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            let error = DownloadError::filesystem(&dir, e);
            tracing::error!("collection '{}': {}", identifier, error);
            collector.collection_failed(identifier, error.to_string());
            return collector.finish();
        }

        let output = self.output_kind();
        let items = collection
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| Item::new(entry.trim(), index, output, &dir))
            .collect();
        let result = self
            .run_batch(&collection.title, items, self.settings.advanced.parallelism)
            .await;
        collector.absorb(result);
        collector.finish()
    }

    /// Runs each collection as its own batch, strictly one after another.
    pub async fn run_collections(&self, identifiers: &[String]) -> BatchResult {
        let mut collector = ResultCollector::new();
        for (n, identifier) in identifiers.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(
                    "cancelled, {} collection(s) not started",
                    identifiers.len() - n
                );
                break;
            }
            let result = self.run_collection(identifier).await;
            collector.absorb(result);
        }
        collector.finish()
    }

    /// Runs whatever the settings ask for: collections in collection mode,
    /// individual items otherwise.
    pub async fn run(&self) -> BatchResult {
        let sources = &self.settings.sources;
        if self.settings.download.collection_mode {
            self.run_collections(&sources.collections).await
        } else {
            self.run_items(&sources.items).await
        }
    }
}
