//! Workflow stage tracking from values snapshots.

use serde::Serialize;
use serde_json::Value;

use crate::types::payload::first_str;

/// Fields that may carry the stage label, in priority order.
pub const STAGE_FIELDS: &[&str] = &["stage", "stageName", "current_stage"];
/// Fields that may carry the stage progress, in priority order.
pub const PROGRESS_FIELDS: &[&str] = &["stageProgress", "stage_progress", "progress"];

/// Stage state after observing a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageView {
    /// Label reported by the latest snapshot, if any.
    pub stage: Option<String>,
    pub history: Vec<String>,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
}

/// Append-only history of distinct stage labels.
#[derive(Debug, Clone, Default)]
pub struct StageTracker {
    history: Vec<String>,
    stage: Option<String>,
    progress: Option<f64>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a snapshot into the history and report the current view.
    pub fn observe(&mut self, snapshot: &Value) -> StageView {
        let stage = first_str(snapshot, STAGE_FIELDS).map(str::to_string);
        if let Some(label) = stage.as_deref() {
            self.record(label);
        }
        self.stage = stage;
        self.progress = explicit_progress(snapshot);
        self.view()
    }

    pub fn view(&self) -> StageView {
        StageView {
            stage: self.stage.clone(),
            history: self.history.clone(),
            progress: self.progress.unwrap_or_else(|| self.fallback_progress()),
        }
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Drop history and progress, e.g. when the thread changes.
    pub fn reset(&mut self) {
        self.history.clear();
        self.stage = None;
        self.progress = None;
    }

    // A label is never re-added once it has appeared, even after other stages.
    fn record(&mut self, label: &str) {
        if label.is_empty() || self.history.last().is_some_and(|last| last == label) {
            return;
        }
        if self.history.iter().any(|seen| seen == label) {
            return;
        }
        self.history.push(label.to_string());
    }

    fn fallback_progress(&self) -> f64 {
        let len = self.history.len();
        if len == 0 {
            return 0.0;
        }
        (((len - 1) as f64 / len as f64) * 100.0).round()
    }
}

/// Explicit progress from the snapshot, clamped to `[0, 100]`.
pub fn explicit_progress(snapshot: &Value) -> Option<f64> {
    PROGRESS_FIELDS
        .iter()
        .find_map(|key| snapshot.get(*key).and_then(Value::as_f64))
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 100.0))
}
