//! Instrumentation hooks called at the edges of each retrieval.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::{debug, warn};

use hydro_common::DatasetOrientation;

use crate::error::RetrievalError;

/// Identifies the retrieval an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalLabel {
    pub orientation: DatasetOrientation,
    pub variable_name: String,
    pub variant: &'static str,
}

impl RetrievalLabel {
    pub fn new(
        orientation: DatasetOrientation,
        variable_name: impl Into<String>,
        variant: &'static str,
    ) -> Self {
        Self {
            orientation,
            variable_name: variable_name.into(),
            variant,
        }
    }
}

/// Totals for one stream, reported when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub rows: u64,
    pub series: u64,
}

/// Callbacks invoked by streams. Every method defaults to doing nothing.
pub trait RetrievalObserver: Send + Sync {
    fn retrieval_started(&self, _label: &RetrievalLabel) {}

    fn cursor_opened(&self, _label: &RetrievalLabel, _elapsed: Duration) {}

    fn series_emitted(&self, _label: &RetrievalLabel, _events: usize) {}

    fn retrieval_finished(&self, _label: &RetrievalLabel, _summary: StreamSummary) {}

    fn retrieval_failed(&self, _label: &RetrievalLabel, _error: &RetrievalError) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RetrievalObserver for NoopObserver {}

/// Records events through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl RetrievalObserver for MetricsObserver {
    fn retrieval_started(&self, label: &RetrievalLabel) {
        counter!(
            "retrieval_streams_total",
            "orientation" => label.orientation.as_str(),
            "variant" => label.variant
        )
        .increment(1);
    }

    fn cursor_opened(&self, label: &RetrievalLabel, elapsed: Duration) {
        histogram!("retrieval_open_seconds", "orientation" => label.orientation.as_str())
            .record(elapsed.as_secs_f64());
    }

    fn series_emitted(&self, label: &RetrievalLabel, _events: usize) {
        counter!("retrieval_series_total", "orientation" => label.orientation.as_str())
            .increment(1);
    }

    fn retrieval_finished(&self, label: &RetrievalLabel, summary: StreamSummary) {
        counter!("retrieval_rows_total", "orientation" => label.orientation.as_str())
            .increment(summary.rows);
        debug!(
            orientation = %label.orientation,
            variable = %label.variable_name,
            rows = summary.rows,
            series = summary.series,
            "Retrieval finished"
        );
    }

    fn retrieval_failed(&self, label: &RetrievalLabel, error: &RetrievalError) {
        counter!(
            "retrieval_failures_total",
            "orientation" => label.orientation.as_str(),
            "variant" => label.variant
        )
        .increment(1);
        warn!(
            orientation = %label.orientation,
            variable = %label.variable_name,
            error = %error,
            "Retrieval failed"
        );
    }
}
