//! Ensemble forecasts: one vector of member values per event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use hydro_common::{DatasetOrientation, Ensemble, MISSING_DOUBLE};

use crate::assembler::{EventMapper, SeriesAssembler};
use crate::backend::{MemberFilter, RowShape, RowValue, SeriesQuery, SeriesRow};
use crate::cache::EnsembleLookup;
use crate::error::{RetrievalError, RetrievalResult};
use crate::retriever::{RetrievalPlan, RetrievalRequest, RetrievalServices, Retriever};
use crate::stream::{SeriesStream, TimeSeriesStream};

const VARIANT: &str = "ensemble forecast";

/// Members to include or exclude, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleOptions {
    pub include_members: Vec<String>,
    pub exclude_members: Vec<String>,
}

/// Maps member columns to an ensemble ordered by member label.
pub struct EnsembleMapper {
    ensembles: Arc<dyn EnsembleLookup>,
    sentinel: Option<f64>,
    orientation: DatasetOrientation,
}

impl EnsembleMapper {
    pub fn new(
        ensembles: Arc<dyn EnsembleLookup>,
        sentinel: Option<f64>,
        orientation: DatasetOrientation,
    ) -> Self {
        Self {
            ensembles,
            sentinel,
            orientation,
        }
    }
}

impl EventMapper<Ensemble> for EnsembleMapper {
    fn map(&self, row: &SeriesRow) -> RetrievalResult<Ensemble> {
        let members = match &row.value {
            RowValue::Ensemble(members) => members,
            RowValue::Single(_) => {
                return Err(RetrievalError::InvalidRow {
                    series_id: row.series_id,
                    message: "expected ensemble members, found a single value".to_string(),
                })
            }
        };

        let mut labelled = Vec::with_capacity(members.len());
        for (id, value) in members {
            let label = self.ensembles.member_name(*id).map_err(|e| {
                RetrievalError::access_with(
                    self.orientation,
                    format!(
                        "while reading series {}, failed to look up ensemble member {}",
                        row.series_id, id
                    ),
                    e,
                )
            })?;
            let value = match value {
                Some(v) if self.sentinel != Some(*v) => *v,
                _ => MISSING_DOUBLE,
            };
            labelled.push((label, value));
        }

        Ensemble::from_labelled(labelled).map_err(|e| RetrievalError::InvalidRow {
            series_id: row.series_id,
            message: e.to_string(),
        })
    }
}

/// Row-backed retriever of ensemble forecasts.
pub struct EnsembleRetriever {
    plan: RetrievalPlan,
    services: RetrievalServices,
    members: MemberFilter,
    mapper: Arc<EnsembleMapper>,
}

impl EnsembleRetriever {
    pub fn new(
        request: &RetrievalRequest,
        services: RetrievalServices,
        options: &EnsembleOptions,
    ) -> RetrievalResult<Self> {
        let plan = RetrievalPlan::new(request, services.features.as_ref())?;
        let orientation = plan.orientation;

        let resolve = |names: &[String]| -> RetrievalResult<Vec<i64>> {
            names
                .iter()
                .map(|name| {
                    services.ensembles.member_id(name).map_err(|e| {
                        RetrievalError::access_with(
                            orientation,
                            format!("failed to resolve ensemble member '{}'", name),
                            e,
                        )
                    })
                })
                .collect()
        };
        let members = MemberFilter {
            include: resolve(&options.include_members)?,
            exclude: resolve(&options.exclude_members)?,
        };

        let mapper = Arc::new(EnsembleMapper::new(
            services.ensembles.clone(),
            services.settings.missing_value_sentinel,
            orientation,
        ));

        debug!(
            orientation = %orientation,
            include = members.include.len(),
            exclude = members.exclude.len(),
            "Built ensemble retriever"
        );

        Ok(Self {
            plan,
            services,
            members,
            mapper,
        })
    }

    pub fn query(&self) -> SeriesQuery {
        self.plan
            .query(RowShape::Ensemble, true)
            .with_members(self.members.clone())
    }

    fn stream(&self, query: SeriesQuery) -> TimeSeriesStream<Ensemble> {
        let assembler = SeriesAssembler::new(
            self.plan.assembler_context(&self.services, None),
            self.mapper.clone(),
        );
        TimeSeriesStream::new(
            self.services.backend.clone(),
            query,
            assembler,
            self.services.observer.clone(),
            self.plan.label(VARIANT),
        )
    }
}

#[async_trait]
impl Retriever<Ensemble> for EnsembleRetriever {
    async fn get(&self) -> RetrievalResult<SeriesStream<Ensemble>> {
        Ok(self.stream(self.query()).into())
    }

    async fn get_by_ids(&self, _ids: &[i64]) -> RetrievalResult<SeriesStream<Ensemble>> {
        Err(RetrievalError::unsupported(
            "retrieval by identifier",
            "ensemble forecasts",
        ))
    }

    async fn list_ids(&self) -> RetrievalResult<Vec<i64>> {
        Err(RetrievalError::unsupported(
            "listing identifiers",
            "ensemble forecasts",
        ))
    }

    fn supports_identifiers(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!(
            "{} retriever for {} {} at {} features",
            VARIANT,
            self.plan.orientation,
            self.plan.variable_name,
            self.plan.feature_ids.len()
        )
    }
}
