//! Pull-based streams of completed time-series.
//!
//! A row-backed stream opens its cursor on the first pull and owns it until
//! the scan is exhausted, the stream is closed or dropped, or a pull fails.
//! The cursor is moved out of the stream to be closed, so it is closed once.

use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use hydro_common::TimeSeries;

use crate::assembler::SeriesAssembler;
use crate::backend::{QueryBackend, RowCursor, SeriesQuery};
use crate::error::{RetrievalError, RetrievalResult};
use crate::observer::{RetrievalLabel, RetrievalObserver, StreamSummary};

enum StreamState {
    /// Not yet pulled.
    Pending,
    Open(Box<dyn RowCursor>),
    Exhausted,
    Closed,
    Failed,
}

impl StreamState {
    fn name(&self) -> &'static str {
        match self {
            StreamState::Pending => "pending",
            StreamState::Open(_) => "open",
            StreamState::Exhausted => "exhausted",
            StreamState::Closed => "closed",
            StreamState::Failed => "failed",
        }
    }
}

/// A lazily opened, single-consumer stream over one ordered scan.
pub struct TimeSeriesStream<V> {
    backend: Arc<dyn QueryBackend>,
    query: SeriesQuery,
    assembler: SeriesAssembler<V>,
    pending: VecDeque<Arc<TimeSeries<V>>>,
    state: StreamState,
    observer: Arc<dyn RetrievalObserver>,
    label: RetrievalLabel,
    summary: StreamSummary,
    reported: bool,
}

impl<V> TimeSeriesStream<V> {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        query: SeriesQuery,
        assembler: SeriesAssembler<V>,
        observer: Arc<dyn RetrievalObserver>,
        label: RetrievalLabel,
    ) -> Self {
        Self {
            backend,
            query,
            assembler,
            pending: VecDeque::new(),
            state: StreamState::Pending,
            observer,
            label,
            summary: StreamSummary::default(),
            reported: false,
        }
    }

    pub fn query(&self) -> &SeriesQuery {
        &self.query
    }

    pub fn summary(&self) -> StreamSummary {
        self.summary
    }

    /// Whether the stream currently holds an open cursor.
    pub fn is_open(&self) -> bool {
        matches!(self.state, StreamState::Open(_))
    }

    /// The next completed series, or `None` once the stream has ended.
    ///
    /// Queued replicates are returned before another row is read. After an
    /// error the stream is ended and the cursor released.
    pub async fn next(&mut self) -> RetrievalResult<Option<Arc<TimeSeries<V>>>> {
        loop {
            if let Some(series) = self.pending.pop_front() {
                self.summary.series += 1;
                self.observer.series_emitted(&self.label, series.len());
                return Ok(Some(series));
            }

            if matches!(self.state, StreamState::Exhausted) {
                self.report_finished();
                return Ok(None);
            }

            let step = match &mut self.state {
                StreamState::Exhausted | StreamState::Closed | StreamState::Failed => {
                    return Ok(None)
                }
                StreamState::Pending => None,
                StreamState::Open(cursor) => Some(cursor.next_row().await),
            };

            match step {
                None => self.open().await?,
                Some(Ok(Some(row))) => {
                    self.summary.rows += 1;
                    match self.assembler.accept(row) {
                        Ok(completed) => self.pending.extend(completed),
                        Err(e) => return Err(self.fail(e)),
                    }
                }
                Some(Ok(None)) => {
                    trace!(rows = self.summary.rows, "Scan exhausted");
                    self.release(StreamState::Exhausted);
                    match self.assembler.finish() {
                        Ok(completed) => self.pending.extend(completed),
                        Err(e) => return Err(self.fail(e)),
                    }
                }
                Some(Err(e)) => {
                    let error = e.into_retrieval(self.query.orientation);
                    return Err(self.fail(error));
                }
            }
        }
    }

    /// End the stream early, releasing the cursor if it is open.
    pub fn close(&mut self) {
        match self.state {
            StreamState::Pending | StreamState::Open(_) | StreamState::Exhausted => {
                self.release(StreamState::Closed);
                self.pending.clear();
                self.report_finished();
            }
            StreamState::Closed | StreamState::Failed => {}
        }
    }

    /// Drain the stream into a vector.
    pub async fn collect_all(mut self) -> RetrievalResult<Vec<Arc<TimeSeries<V>>>> {
        let mut all = Vec::new();
        while let Some(series) = self.next().await? {
            all.push(series);
        }
        Ok(all)
    }

    /// Adapt into a `futures::Stream`. A failed pull is the last item.
    pub fn into_stream(self) -> impl Stream<Item = RetrievalResult<Arc<TimeSeries<V>>>> {
        stream::unfold(self, |mut s| async move {
            match s.next().await {
                Ok(Some(series)) => Some((Ok(series), s)),
                Ok(None) => None,
                Err(e) => Some((Err(e), s)),
            }
        })
    }

    async fn open(&mut self) -> RetrievalResult<()> {
        self.observer.retrieval_started(&self.label);
        let started = Instant::now();
        match self.backend.open_cursor(&self.query).await {
            Ok(cursor) => {
                self.observer.cursor_opened(&self.label, started.elapsed());
                debug!(
                    orientation = %self.query.orientation,
                    variable = %self.query.variable_name,
                    features = self.query.feature_ids.len(),
                    "Opened time-series stream"
                );
                self.state = StreamState::Open(cursor);
                Ok(())
            }
            Err(e) => {
                let error = e.into_retrieval(self.query.orientation);
                Err(self.fail(error))
            }
        }
    }

    /// Enter a terminal state, closing the cursor if it was open.
    fn release(&mut self, next: StreamState) {
        let previous = std::mem::replace(&mut self.state, next);
        if let StreamState::Open(cursor) = previous {
            trace!(state = self.state.name(), "Releasing cursor");
            cursor.close();
        }
    }

    fn fail(&mut self, error: RetrievalError) -> RetrievalError {
        self.release(StreamState::Failed);
        self.pending.clear();
        self.reported = true;
        self.observer.retrieval_failed(&self.label, &error);
        error
    }

    fn report_finished(&mut self) {
        if !self.reported {
            self.reported = true;
            self.observer.retrieval_finished(&self.label, self.summary);
        }
    }
}

impl<V> Drop for TimeSeriesStream<V> {
    fn drop(&mut self) {
        if self.is_open() {
            debug!(
                orientation = %self.query.orientation,
                "Time-series stream dropped before it ended"
            );
        }
        if matches!(self.state, StreamState::Exhausted) {
            self.report_finished();
        }
        self.release(StreamState::Closed);
    }
}

/// Either a row-backed stream or series already composed in memory.
pub enum SeriesStream<V> {
    Rows(TimeSeriesStream<V>),
    Buffered(VecDeque<Arc<TimeSeries<V>>>),
}

impl<V> SeriesStream<V> {
    pub fn buffered(series: Vec<Arc<TimeSeries<V>>>) -> Self {
        SeriesStream::Buffered(series.into())
    }

    pub fn empty() -> Self {
        SeriesStream::Buffered(VecDeque::new())
    }

    pub async fn next(&mut self) -> RetrievalResult<Option<Arc<TimeSeries<V>>>> {
        match self {
            SeriesStream::Rows(rows) => rows.next().await,
            SeriesStream::Buffered(buffer) => Ok(buffer.pop_front()),
        }
    }

    pub fn close(&mut self) {
        match self {
            SeriesStream::Rows(rows) => rows.close(),
            SeriesStream::Buffered(buffer) => buffer.clear(),
        }
    }

    pub async fn collect_all(self) -> RetrievalResult<Vec<Arc<TimeSeries<V>>>> {
        match self {
            SeriesStream::Rows(rows) => rows.collect_all().await,
            SeriesStream::Buffered(buffer) => Ok(buffer.into()),
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = RetrievalResult<Arc<TimeSeries<V>>>> {
        stream::unfold(self, |mut s| async move {
            match s.next().await {
                Ok(Some(series)) => Some((Ok(series), s)),
                Ok(None) => None,
                Err(e) => Some((Err(e), s)),
            }
        })
    }
}

impl<V> From<TimeSeriesStream<V>> for SeriesStream<V> {
    fn from(rows: TimeSeriesStream<V>) -> Self {
        SeriesStream::Rows(rows)
    }
}
