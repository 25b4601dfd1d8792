//! Contract between the retrieval engine and the store that holds rows.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use hydro_common::DatasetOrientation;

use crate::constraints::ResolvedConstraints;
use crate::error::BackendResult;

/// Value columns a scan should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    SingleValued,
    Ensemble,
}

/// A constrained, ordered scan over the backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    pub project_id: i64,
    pub orientation: DatasetOrientation,
    pub variable_name: String,
    pub feature_ids: Vec<i64>,
    pub constraints: ResolvedConstraints,
    pub shape: RowShape,
    /// Restrict the scan to these series, when set.
    pub series_ids: Option<Vec<i64>>,
    pub members: MemberFilter,
}

/// Ensemble members to include or exclude. Empty lists do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberFilter {
    pub include: Vec<i64>,
    pub exclude: Vec<i64>,
}

impl MemberFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn admits(&self, member_id: i64) -> bool {
        (self.include.is_empty() || self.include.contains(&member_id))
            && !self.exclude.contains(&member_id)
    }
}

impl SeriesQuery {
    pub fn new(
        project_id: i64,
        orientation: DatasetOrientation,
        variable_name: impl Into<String>,
        feature_ids: Vec<i64>,
        shape: RowShape,
    ) -> Self {
        Self {
            project_id,
            orientation,
            variable_name: variable_name.into(),
            feature_ids,
            constraints: ResolvedConstraints::none(),
            shape,
            series_ids: None,
            members: MemberFilter::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: ResolvedConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_series_ids(mut self, ids: Vec<i64>) -> Self {
        self.series_ids = Some(ids);
        self
    }

    pub fn with_members(mut self, members: MemberFilter) -> Self {
        self.members = members;
        self
    }
}

/// Value columns of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Single(Option<f64>),
    /// (member id, value) pairs.
    Ensemble(Vec<(i64, Option<f64>)>),
}

/// One row of an ordered scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub series_id: i64,
    pub valid_time: DateTime<Utc>,
    pub reference_time: Option<DateTime<Utc>>,
    pub reference_time_type: Option<String>,
    pub lead_duration: Option<Duration>,
    pub scale_period: Option<Duration>,
    pub scale_function: Option<String>,
    pub feature_id: i64,
    pub measurement_unit_id: i64,
    /// Number of identical registrations of this series.
    pub occurrences: i32,
    pub value: RowValue,
}

/// Executes scans. Implementations must yield rows ordered by ascending
/// series id, then ascending valid time.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Open a dedicated connection and start the scan.
    async fn open_cursor(&self, query: &SeriesQuery) -> BackendResult<Box<dyn RowCursor>>;

    /// Identifiers of the series matching the query, ascending.
    async fn series_ids(&self, query: &SeriesQuery) -> BackendResult<Vec<i64>>;

    /// Paths of the source files matching the query, for gridded data.
    async fn source_paths(&self, query: &SeriesQuery) -> BackendResult<Vec<String>>;
}

/// An open scan bound to one connection.
#[async_trait]
pub trait RowCursor: Send {
    /// The next row, or `None` when the scan is exhausted.
    async fn next_row(&mut self) -> BackendResult<Option<SeriesRow>>;

    /// Release the connection. Consumes the cursor so it runs once.
    fn close(self: Box<Self>);
}
