use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use tunefetch_core::core::events::{ProgressRenderer, ProgressSnapshot};

#[derive(Default)]
struct RenderState {
    overall: Option<ProgressBar>,
    items: HashMap<usize, ProgressBar>,
}

/// Terminal renderer: one bar for the batch and a spinner per running item.
/// All drawing goes through a single [`MultiProgress`].
pub struct ConsoleRenderer {
    multi: MultiProgress,
    state: Mutex<RenderState>,
}

fn overall_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} {prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn item_style() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn counters(snapshot: &ProgressSnapshot) -> String {
    format!(
        "{} done, {} failed, {} running, {} pending",
        snapshot.completed, snapshot.failed, snapshot.in_progress, snapshot.pending
    )
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(RenderState::default()),
        }
    }

    /// Hides the bars while `f` writes to the terminal.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }

    fn overall(&self, state: &mut RenderState, snapshot: &ProgressSnapshot) -> ProgressBar {
        state
            .overall
            .get_or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(snapshot.total as u64));
                bar.set_style(overall_style());
                bar.set_prefix(snapshot.label.clone());
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            })
            .clone()
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRenderer for ConsoleRenderer {
    fn render(&self, snapshot: &ProgressSnapshot) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let overall = self.overall(&mut state, snapshot);
        overall.set_position(snapshot.finished() as u64);
        overall.set_message(counters(snapshot));

        for item in &snapshot.active {
            let bar = state.items.entry(item.index).or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(item_style());
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            });
            bar.set_message(format!("[{}/{}] {}", item.index + 1, snapshot.total, item.message));
        }

        let gone: Vec<usize> = state
            .items
            .keys()
            .filter(|index| !snapshot.active.iter().any(|a| a.index == **index))
            .copied()
            .collect();
        for index in gone {
            if let Some(bar) = state.items.remove(&index) {
                bar.finish_and_clear();
                self.multi.remove(&bar);
            }
        }
    }

    fn finish(&self, snapshot: &ProgressSnapshot) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, bar) in state.items.drain() {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
        if let Some(overall) = state.overall.take() {
            overall.set_position(snapshot.finished() as u64);
            overall.finish_with_message(counters(snapshot));
        }
    }
}
