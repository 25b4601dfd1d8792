//! In-memory stand-ins for the database and gridded readers.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hydro_common::TimeSeries;
use retrieval::{
    BackendError, BackendResult, BoxError, GriddedReadRequest, GriddedReader, QueryBackend,
    RetrievalError, RetrievalLabel, RetrievalObserver, RowCursor, RowValue, SeriesQuery,
    SeriesRow, StreamSummary,
};

/// Cursor lifecycle counts shared between a backend and its cursors.
#[derive(Debug, Default)]
pub struct CursorCounters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    /// Cursors dropped without `close`.
    leaked: AtomicUsize,
}

impl CursorCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn leaked(&self) -> usize {
        self.leaked.load(Ordering::SeqCst)
    }

    /// Every opened cursor was closed exactly once.
    pub fn balanced(&self) -> bool {
        self.opened() == self.closed() && self.leaked() == 0
    }
}

/// A backend over a fixed list of rows, filtered like the database would.
///
/// Rows must be supplied in scan order.
#[derive(Default)]
pub struct MockBackend {
    rows: Vec<SeriesRow>,
    paths: Vec<String>,
    counters: Arc<CursorCounters>,
    fail_on_open: Option<String>,
    fail_after_rows: Option<usize>,
    queries: Mutex<Vec<SeriesQuery>>,
}

impl MockBackend {
    pub fn new(rows: Vec<SeriesRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }

    /// Fail every `open_cursor` call.
    pub fn failing_on_open(mut self, message: impl Into<String>) -> Self {
        self.fail_on_open = Some(message.into());
        self
    }

    /// Fail the read after yielding this many rows.
    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after_rows = Some(rows);
        self
    }

    pub fn counters(&self) -> Arc<CursorCounters> {
        self.counters.clone()
    }

    /// Every query this backend was asked to run, in order.
    pub fn queries(&self) -> Vec<SeriesQuery> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }

    fn record(&self, query: &SeriesQuery) {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.clone());
        }
    }

    /// The rows a real scan would yield for the query.
    pub fn matching(&self, query: &SeriesQuery) -> Vec<SeriesRow> {
        self.rows
            .iter()
            .filter(|r| query.feature_ids.contains(&r.feature_id))
            .filter(|r| {
                query
                    .series_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&r.series_id))
            })
            .filter(|r| {
                query
                    .constraints
                    .admits(r.valid_time, r.reference_time, r.lead_duration)
            })
            .filter_map(|r| {
                let mut row = r.clone();
                if let RowValue::Ensemble(members) = &mut row.value {
                    members.retain(|(id, _)| query.members.admits(*id));
                    if members.is_empty() {
                        return None;
                    }
                }
                Some(row)
            })
            .collect()
    }
}

#[async_trait]
impl QueryBackend for MockBackend {
    async fn open_cursor(&self, query: &SeriesQuery) -> BackendResult<Box<dyn RowCursor>> {
        self.record(query);
        if let Some(message) = &self.fail_on_open {
            return Err(BackendError::Other(message.clone()));
        }

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockCursor {
            rows: self.matching(query).into(),
            counters: self.counters.clone(),
            remaining_before_failure: self.fail_after_rows,
            closed: false,
        }))
    }

    async fn series_ids(&self, query: &SeriesQuery) -> BackendResult<Vec<i64>> {
        self.record(query);
        let ids: BTreeSet<i64> = self.matching(query).iter().map(|r| r.series_id).collect();
        Ok(ids.into_iter().collect())
    }

    async fn source_paths(&self, query: &SeriesQuery) -> BackendResult<Vec<String>> {
        self.record(query);
        Ok(self.paths.clone())
    }
}

pub struct MockCursor {
    rows: VecDeque<SeriesRow>,
    counters: Arc<CursorCounters>,
    remaining_before_failure: Option<usize>,
    closed: bool,
}

#[async_trait]
impl RowCursor for MockCursor {
    async fn next_row(&mut self) -> BackendResult<Option<SeriesRow>> {
        if let Some(remaining) = self.remaining_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(BackendError::Other("connection reset by peer".to_string()));
            }
            *remaining -= 1;
        }
        Ok(self.rows.pop_front())
    }

    fn close(mut self: Box<Self>) {
        self.closed = true;
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockCursor {
    fn drop(&mut self) {
        if !self.closed {
            self.counters.leaked.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A gridded reader that serves canned series per variable name.
#[derive(Default)]
pub struct MockGriddedReader {
    series: HashMap<String, Vec<TimeSeries<f64>>>,
    requests: Mutex<Vec<GriddedReadRequest>>,
    fail: bool,
}

impl MockGriddedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, variable_name: &str, series: Vec<TimeSeries<f64>>) -> Self {
        self.series.insert(variable_name.to_string(), series);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn requests(&self) -> Vec<GriddedReadRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GriddedReader for MockGriddedReader {
    async fn read(&self, request: &GriddedReadRequest) -> Result<Vec<TimeSeries<f64>>, BoxError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if self.fail {
            return Err("gridded source is unreadable".into());
        }
        Ok(self
            .series
            .get(&request.variable_name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records observer callbacks as short strings.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl RetrievalObserver for RecordingObserver {
    fn retrieval_started(&self, label: &RetrievalLabel) {
        self.push(format!("started {}", label.variant));
    }

    fn series_emitted(&self, _label: &RetrievalLabel, events: usize) {
        self.push(format!("series {}", events));
    }

    fn retrieval_finished(&self, _label: &RetrievalLabel, summary: StreamSummary) {
        self.push(format!("finished rows={} series={}", summary.rows, summary.series));
    }

    fn retrieval_failed(&self, _label: &RetrievalLabel, error: &RetrievalError) {
        self.push(format!("failed {}", error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::forecast_rows;
    use crate::fixtures::ids;
    use hydro_common::DatasetOrientation;
    use retrieval::RowShape;

    fn query() -> SeriesQuery {
        SeriesQuery::new(
            ids::PROJECT,
            DatasetOrientation::Right,
            "streamflow",
            vec![ids::DRRC2],
            RowShape::SingleValued,
        )
    }

    #[tokio::test]
    async fn test_cursor_close_is_counted() {
        let backend = MockBackend::new(forecast_rows(1, 0, &[1, 2]));
        let mut cursor = backend.open_cursor(&query()).await.unwrap();
        assert!(cursor.next_row().await.unwrap().is_some());
        cursor.close();

        let counters = backend.counters();
        assert_eq!(counters.opened(), 1);
        assert_eq!(counters.closed(), 1);
        assert!(counters.balanced());
    }

    #[tokio::test]
    async fn test_dropped_cursor_is_a_leak() {
        let backend = MockBackend::new(forecast_rows(1, 0, &[1]));
        drop(backend.open_cursor(&query()).await.unwrap());
        assert_eq!(backend.counters().leaked(), 1);
        assert!(!backend.counters().balanced());
    }

    #[tokio::test]
    async fn test_series_id_filter() {
        let mut rows = forecast_rows(1, 0, &[1]);
        rows.extend(forecast_rows(2, 0, &[1]));
        let backend = MockBackend::new(rows);
        let ids = backend.series_ids(&query().with_series_ids(vec![2])).await.unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_injected_read_failure() {
        let backend = MockBackend::new(forecast_rows(1, 0, &[1, 2])).failing_after(1);
        let mut cursor = backend.open_cursor(&query()).await.unwrap();
        assert!(cursor.next_row().await.is_ok());
        assert!(cursor.next_row().await.is_err());
        cursor.close();
    }
}
