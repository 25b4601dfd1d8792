//! Retrieval requests, shared services and the retriever interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use hydro_common::{
    DatasetOrientation, Feature, MonthDay, ReferenceTimeType, Season, TimeScale, TimeWindowFilter,
};

use crate::assembler::AssemblerContext;
use crate::backend::{QueryBackend, RowShape, SeriesQuery};
use crate::cache::{EnsembleLookup, FeatureLookup, IdentifierCache, UnitLookup};
use crate::config::RetrievalSettings;
use crate::constraints::{resolve, ConstraintInputs};
use crate::error::{RetrievalError, RetrievalResult};
use crate::observer::{MetricsObserver, RetrievalLabel, RetrievalObserver};
use crate::postgres::PgQueryBackend;
use crate::stream::SeriesStream;
use crate::variants::gridded::GriddedReader;

/// What to retrieve. Checked once, when a retriever is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalRequest {
    pub project_id: i64,
    pub orientation: Option<DatasetOrientation>,
    pub variable_name: Option<String>,
    pub features: Vec<Feature>,
    pub time_window: Option<TimeWindowFilter>,
    /// Scale the evaluation wants, used to widen the retrieval window.
    pub desired_time_scale: Option<TimeScale>,
    /// Scale declared for the source data, used to fill gaps in rows.
    pub declared_time_scale: Option<TimeScale>,
    pub season_start: Option<MonthDay>,
    pub season_end: Option<MonthDay>,
}

impl RetrievalRequest {
    pub fn new(
        project_id: i64,
        orientation: DatasetOrientation,
        variable_name: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            orientation: Some(orientation),
            variable_name: Some(variable_name.into()),
            ..Self::default()
        }
    }

    pub fn with_features(mut self, features: Vec<Feature>) -> Self {
        self.features = features;
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn with_time_window(mut self, window: TimeWindowFilter) -> Self {
        self.time_window = Some(window);
        self
    }

    pub fn with_desired_time_scale(mut self, scale: TimeScale) -> Self {
        self.desired_time_scale = Some(scale);
        self
    }

    pub fn with_declared_time_scale(mut self, scale: TimeScale) -> Self {
        self.declared_time_scale = Some(scale);
        self
    }

    pub fn with_season(mut self, start: MonthDay, end: MonthDay) -> Self {
        self.season_start = Some(start);
        self.season_end = Some(end);
        self
    }

    /// The season, when both ends are declared.
    pub fn season(&self) -> Option<Season> {
        match (self.season_start, self.season_end) {
            (Some(start), Some(end)) => Some(Season::new(start, end)),
            _ => None,
        }
    }

    /// Check the preconditions for building a retriever.
    pub fn validate(&self) -> RetrievalResult<()> {
        if self.project_id <= 0 {
            return Err(RetrievalError::configuration(format!(
                "a positive project identifier is required, got {}",
                self.project_id
            )));
        }

        if self.orientation.is_none() {
            return Err(RetrievalError::configuration(
                "a dataset orientation is required",
            ));
        }

        if self
            .variable_name
            .as_deref()
            .map_or(true, |v| v.trim().is_empty())
        {
            return Err(RetrievalError::configuration("a variable name is required"));
        }

        if self.features.is_empty() {
            return Err(RetrievalError::configuration(
                "at least one feature is required",
            ));
        }

        if self.season_start.is_some() != self.season_end.is_some() {
            return Err(RetrievalError::configuration(format!(
                "a season requires both a start and an end, got start {:?} and end {:?}",
                self.season_start, self.season_end
            )));
        }

        if let Some(window) = &self.time_window {
            window
                .validate()
                .map_err(|e| RetrievalError::configuration(e.to_string()))?;
        }

        for scale in [&self.desired_time_scale, &self.declared_time_scale]
            .into_iter()
            .flatten()
        {
            scale
                .validate()
                .map_err(|e| RetrievalError::configuration(e.to_string()))?;
        }

        Ok(())
    }
}

/// Collaborators shared by every retriever.
#[derive(Clone)]
pub struct RetrievalServices {
    pub backend: Arc<dyn QueryBackend>,
    pub features: Arc<dyn FeatureLookup>,
    pub units: Arc<dyn UnitLookup>,
    pub ensembles: Arc<dyn EnsembleLookup>,
    pub observer: Arc<dyn RetrievalObserver>,
    pub settings: RetrievalSettings,
    pub gridded_reader: Option<Arc<dyn GriddedReader>>,
}

impl RetrievalServices {
    /// Services over one backend and one identifier cache, observed through metrics.
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        cache: Arc<IdentifierCache>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            backend,
            features: cache.clone(),
            units: cache.clone(),
            ensembles: cache,
            observer: Arc::new(MetricsObserver),
            settings,
            gridded_reader: None,
        }
    }

    /// Connect to PostgreSQL and load the identifier cache.
    pub async fn connect(settings: RetrievalSettings) -> anyhow::Result<Self> {
        settings.validate().map_err(anyhow::Error::msg)?;
        let backend = PgQueryBackend::connect(&settings).await?;
        let cache = IdentifierCache::load(backend.pool()).await?;
        Ok(Self::new(Arc::new(backend), Arc::new(cache), settings))
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetrievalObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_gridded_reader(mut self, reader: Arc<dyn GriddedReader>) -> Self {
        self.gridded_reader = Some(reader);
        self
    }
}

/// Retrieves the series of one dataset.
#[async_trait]
pub trait Retriever<V>: Send + Sync {
    /// Every series that matches the request.
    async fn get(&self) -> RetrievalResult<SeriesStream<V>>;

    /// The series with the given identifiers.
    async fn get_by_ids(&self, ids: &[i64]) -> RetrievalResult<SeriesStream<V>>;

    /// Identifiers of every series that matches the request.
    async fn list_ids(&self) -> RetrievalResult<Vec<i64>>;

    /// Whether identifier-based operations are available.
    fn supports_identifiers(&self) -> bool;

    fn describe(&self) -> String;
}

/// A validated request with its features resolved to identifiers.
#[derive(Debug, Clone)]
pub(crate) struct RetrievalPlan {
    pub project_id: i64,
    pub orientation: DatasetOrientation,
    pub variable_name: String,
    pub features: Vec<Feature>,
    pub feature_ids: Vec<i64>,
    pub time_window: Option<TimeWindowFilter>,
    pub desired_time_scale: Option<TimeScale>,
    pub declared_time_scale: Option<TimeScale>,
    pub season: Option<Season>,
}

impl RetrievalPlan {
    pub fn new(request: &RetrievalRequest, features: &dyn FeatureLookup) -> RetrievalResult<Self> {
        request.validate()?;
        // Present after validate
        let orientation = request
            .orientation
            .ok_or_else(|| RetrievalError::configuration("a dataset orientation is required"))?;
        let variable_name = request.variable_name.clone().unwrap_or_default();

        let feature_ids = request
            .features
            .iter()
            .map(|f| {
                features.feature_id(f).map_err(|e| {
                    RetrievalError::access_with(
                        orientation,
                        format!("failed to resolve the identifier of feature {}", f),
                        e,
                    )
                })
            })
            .collect::<RetrievalResult<Vec<i64>>>()?;

        debug!(
            project_id = request.project_id,
            orientation = %orientation,
            variable = %variable_name,
            features = feature_ids.len(),
            "Planned retrieval"
        );

        Ok(Self {
            project_id: request.project_id,
            orientation,
            variable_name,
            features: request.features.clone(),
            feature_ids,
            time_window: request.time_window,
            desired_time_scale: request.desired_time_scale,
            declared_time_scale: request.declared_time_scale,
            season: request.season(),
        })
    }

    pub fn constraint_inputs(&self, forecast_shaped: bool) -> ConstraintInputs {
        ConstraintInputs::new(forecast_shaped)
            .with_window(self.time_window)
            .with_desired_time_scale(self.desired_time_scale)
            .with_season(self.season)
    }

    /// An unconstrained query over the planned dataset.
    pub fn base_query(&self, shape: RowShape) -> SeriesQuery {
        SeriesQuery::new(
            self.project_id,
            self.orientation,
            self.variable_name.clone(),
            self.feature_ids.clone(),
            shape,
        )
    }

    /// A query constrained by the resolved time window and season.
    pub fn query(&self, shape: RowShape, forecast_shaped: bool) -> SeriesQuery {
        self.base_query(shape)
            .with_constraints(resolve(&self.constraint_inputs(forecast_shaped)))
    }

    pub fn assembler_context(
        &self,
        services: &RetrievalServices,
        reference_time_type: Option<ReferenceTimeType>,
    ) -> AssemblerContext {
        AssemblerContext {
            orientation: self.orientation,
            variable_name: self.variable_name.clone(),
            declared_time_scale: self.declared_time_scale,
            reference_time_type,
            features: services.features.clone(),
            units: services.units.clone(),
        }
    }

    pub fn label(&self, variant: &'static str) -> RetrievalLabel {
        RetrievalLabel::new(self.orientation, self.variable_name.clone(), variant)
    }
}
