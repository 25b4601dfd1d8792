//! Forecasts, observations and simulations with one value per event.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use hydro_common::{ReferenceTimeType, TimeWindowFilter, MISSING_DOUBLE};

use crate::assembler::{EventMapper, SeriesAssembler};
use crate::backend::{RowShape, RowValue, SeriesQuery, SeriesRow};
use crate::error::{RetrievalError, RetrievalResult};
use crate::retriever::{RetrievalPlan, RetrievalRequest, RetrievalServices, Retriever};
use crate::stream::{SeriesStream, TimeSeriesStream};

/// Maps a scalar value column, treating NULL and the sentinel as missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarMapper {
    sentinel: Option<f64>,
}

impl ScalarMapper {
    pub fn new(sentinel: Option<f64>) -> Self {
        Self { sentinel }
    }
}

impl EventMapper<f64> for ScalarMapper {
    fn map(&self, row: &SeriesRow) -> RetrievalResult<f64> {
        match &row.value {
            RowValue::Single(Some(v)) if self.sentinel == Some(*v) => Ok(MISSING_DOUBLE),
            RowValue::Single(Some(v)) => Ok(*v),
            RowValue::Single(None) => Ok(MISSING_DOUBLE),
            RowValue::Ensemble(_) => Err(RetrievalError::InvalidRow {
                series_id: row.series_id,
                message: "expected a single value, found ensemble members".to_string(),
            }),
        }
    }
}

/// Which single-valued dataset is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleValuedKind {
    Forecast,
    Observation,
    Simulation,
}

impl SingleValuedKind {
    /// Forecast rows carry reference times and lead durations.
    pub fn is_forecast_shaped(&self) -> bool {
        matches!(self, SingleValuedKind::Forecast)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SingleValuedKind::Forecast => "single valued forecast",
            SingleValuedKind::Observation => "observation",
            SingleValuedKind::Simulation => "simulation",
        }
    }
}

/// Row-backed retriever of scalar series.
pub struct SingleValuedRetriever {
    plan: RetrievalPlan,
    services: RetrievalServices,
    kind: SingleValuedKind,
    reference_time_type: Option<ReferenceTimeType>,
    mapper: Arc<ScalarMapper>,
}

impl SingleValuedRetriever {
    pub fn new(
        request: &RetrievalRequest,
        services: RetrievalServices,
        kind: SingleValuedKind,
    ) -> RetrievalResult<Self> {
        let plan = RetrievalPlan::new(request, services.features.as_ref())?;
        let mapper = Arc::new(ScalarMapper::new(services.settings.missing_value_sentinel));
        debug!(
            kind = kind.name(),
            orientation = %plan.orientation,
            "Built single-valued retriever"
        );
        Ok(Self {
            plan,
            services,
            kind,
            reference_time_type: None,
            mapper,
        })
    }

    pub fn kind(&self) -> SingleValuedKind {
        self.kind
    }

    /// Tag every reference time with this type instead of the stored one.
    pub fn with_reference_time_type(mut self, kind: ReferenceTimeType) -> Self {
        self.reference_time_type = Some(kind);
        self
    }

    /// Replace the requested time window.
    pub fn with_time_window(mut self, window: Option<TimeWindowFilter>) -> Self {
        self.plan.time_window = window;
        self
    }

    /// Drop any season constraint.
    pub(crate) fn without_season(mut self) -> Self {
        self.plan.season = None;
        self
    }

    pub fn query(&self) -> SeriesQuery {
        self.plan.query(RowShape::SingleValued, self.kind.is_forecast_shaped())
    }

    pub(crate) fn stream(&self, query: SeriesQuery) -> TimeSeriesStream<f64> {
        let assembler = SeriesAssembler::new(
            self.plan.assembler_context(&self.services, self.reference_time_type),
            self.mapper.clone(),
        );
        TimeSeriesStream::new(
            self.services.backend.clone(),
            query,
            assembler,
            self.services.observer.clone(),
            self.plan.label(self.kind.name()),
        )
    }
}

#[async_trait]
impl Retriever<f64> for SingleValuedRetriever {
    async fn get(&self) -> RetrievalResult<SeriesStream<f64>> {
        Ok(self.stream(self.query()).into())
    }

    async fn get_by_ids(&self, ids: &[i64]) -> RetrievalResult<SeriesStream<f64>> {
        let query = self
            .plan
            .base_query(RowShape::SingleValued)
            .with_series_ids(ids.to_vec());
        Ok(self.stream(query).into())
    }

    async fn list_ids(&self) -> RetrievalResult<Vec<i64>> {
        self.services
            .backend
            .series_ids(&self.query())
            .await
            .map_err(|e| e.into_retrieval(self.plan.orientation))
    }

    fn supports_identifiers(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!(
            "{} retriever for {} {} at {} features",
            self.kind.name(),
            self.plan.orientation,
            self.plan.variable_name,
            self.plan.feature_ids.len()
        )
    }
}
