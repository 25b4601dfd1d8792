//! Gridded sources, read by path through a [`GriddedReader`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use hydro_common::{Feature, TimeScale, TimeSeries, TimeWindowFilter};

use crate::backend::RowShape;
use crate::error::{BoxError, RetrievalError, RetrievalResult};
use crate::retriever::{RetrievalPlan, RetrievalRequest, RetrievalServices, Retriever};
use crate::stream::SeriesStream;

/// One read against a set of gridded files.
#[derive(Debug, Clone, PartialEq)]
pub struct GriddedReadRequest {
    pub paths: Vec<String>,
    pub features: Vec<Feature>,
    pub variable_name: String,
    pub time_window: Option<TimeWindowFilter>,
    pub is_forecast: bool,
    pub declared_time_scale: Option<TimeScale>,
}

/// Reads point series out of gridded files.
#[async_trait]
pub trait GriddedReader: Send + Sync {
    async fn read(&self, request: &GriddedReadRequest) -> Result<Vec<TimeSeries<f64>>, BoxError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GriddedOptions {
    /// Other names the variable is stored under.
    pub aliases: Vec<String>,
    pub is_forecast: bool,
}

pub struct GriddedRetriever {
    plan: RetrievalPlan,
    services: RetrievalServices,
    options: GriddedOptions,
    reader: Arc<dyn GriddedReader>,
}

impl GriddedRetriever {
    pub fn new(
        request: &RetrievalRequest,
        services: RetrievalServices,
        options: GriddedOptions,
    ) -> RetrievalResult<Self> {
        let reader = services.gridded_reader.clone().ok_or_else(|| {
            RetrievalError::configuration("gridded retrieval requires a gridded reader")
        })?;
        let plan = RetrievalPlan::new(request, services.features.as_ref())?;
        debug!(
            orientation = %plan.orientation,
            aliases = options.aliases.len(),
            "Built gridded retriever"
        );
        Ok(Self {
            plan,
            services,
            options,
            reader,
        })
    }

    /// The variable name followed by its aliases.
    pub fn variable_names(&self) -> Vec<String> {
        std::iter::once(self.plan.variable_name.clone())
            .chain(self.options.aliases.iter().cloned())
            .collect()
    }

    fn read_request(&self, paths: Vec<String>, variable_name: String) -> GriddedReadRequest {
        GriddedReadRequest {
            paths,
            features: self.plan.features.clone(),
            variable_name,
            time_window: self.plan.time_window,
            is_forecast: self.options.is_forecast,
            declared_time_scale: self.plan.declared_time_scale,
        }
    }
}

#[async_trait]
impl Retriever<f64> for GriddedRetriever {
    async fn get(&self) -> RetrievalResult<SeriesStream<f64>> {
        let orientation = self.plan.orientation;
        let query = self
            .plan
            .query(RowShape::SingleValued, self.options.is_forecast);
        let paths = self
            .services
            .backend
            .source_paths(&query)
            .await
            .map_err(|e| e.into_retrieval(orientation))?;

        if paths.is_empty() {
            info!(
                orientation = %orientation,
                variable = %self.plan.variable_name,
                "No gridded sources matched the request"
            );
            return Ok(SeriesStream::empty());
        }

        let mut series = Vec::new();
        for name in self.variable_names() {
            let request = self.read_request(paths.clone(), name.clone());
            let read = self.reader.read(&request).await.map_err(|e| RetrievalError::Access {
                orientation,
                message: format!(
                    "failed to read variable '{}' from {} gridded sources",
                    name,
                    paths.len()
                ),
                source: Some(e),
            })?;
            debug!(variable = %name, series = read.len(), "Read gridded series");
            series.extend(read.into_iter().map(Arc::new));
        }

        Ok(SeriesStream::buffered(series))
    }

    async fn get_by_ids(&self, _ids: &[i64]) -> RetrievalResult<SeriesStream<f64>> {
        Err(RetrievalError::unsupported(
            "retrieval by identifier",
            "gridded sources have no stored series identifiers",
        ))
    }

    async fn list_ids(&self) -> RetrievalResult<Vec<i64>> {
        Err(RetrievalError::unsupported(
            "listing identifiers",
            "gridded sources have no stored series identifiers",
        ))
    }

    fn supports_identifiers(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!(
            "gridded retriever for {} {} with {} aliases",
            self.plan.orientation,
            self.plan.variable_name,
            self.options.aliases.len()
        )
    }
}
