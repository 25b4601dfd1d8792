//! Choose a retriever once, from the data type and source options.

use serde::{Deserialize, Serialize};
use tracing::info;

use hydro_common::{DataType, Ensemble};

use crate::error::{RetrievalError, RetrievalResult};
use crate::retriever::{RetrievalRequest, RetrievalServices, Retriever};
use crate::variants::{
    AnalysisOptions, AnalysisRetriever, EnsembleOptions, EnsembleRetriever, GriddedOptions,
    GriddedRetriever, SingleValuedKind, SingleValuedRetriever,
};

/// A retriever variant with its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Variant {
    SingleValuedForecast,
    Observation,
    Simulation,
    Ensemble(EnsembleOptions),
    Analysis(AnalysisOptions),
    Gridded(GriddedOptions),
}

impl Variant {
    /// The row-backed variant for a data type, with default options.
    pub fn for_data_type(data_type: DataType) -> Self {
        match data_type {
            DataType::SingleValuedForecasts => Variant::SingleValuedForecast,
            DataType::EnsembleForecasts => Variant::Ensemble(EnsembleOptions::default()),
            DataType::Observations => Variant::Observation,
            DataType::Simulations => Variant::Simulation,
            DataType::Analyses => Variant::Analysis(AnalysisOptions::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Variant::SingleValuedForecast => "single valued forecast",
            Variant::Observation => "observation",
            Variant::Simulation => "simulation",
            Variant::Ensemble(_) => "ensemble forecast",
            Variant::Analysis(_) => "analysis",
            Variant::Gridded(_) => "gridded",
        }
    }
}

/// Either a scalar or an ensemble retriever.
pub enum AnyRetriever {
    Scalar(Box<dyn Retriever<f64>>),
    Ensemble(Box<dyn Retriever<Ensemble>>),
}

impl AnyRetriever {
    pub fn describe(&self) -> String {
        match self {
            AnyRetriever::Scalar(r) => r.describe(),
            AnyRetriever::Ensemble(r) => r.describe(),
        }
    }
}

/// Builds retrievers over one set of services.
#[derive(Clone)]
pub struct RetrieverFactory {
    services: RetrievalServices,
}

impl RetrieverFactory {
    pub fn new(services: RetrievalServices) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &RetrievalServices {
        &self.services
    }

    /// A retriever of scalar series. Ensemble variants are rejected.
    pub fn scalar(
        &self,
        request: &RetrievalRequest,
        variant: &Variant,
    ) -> RetrievalResult<Box<dyn Retriever<f64>>> {
        let services = self.services.clone();
        let retriever: Box<dyn Retriever<f64>> = match variant {
            Variant::SingleValuedForecast => Box::new(SingleValuedRetriever::new(
                request,
                services,
                SingleValuedKind::Forecast,
            )?),
            Variant::Observation => Box::new(SingleValuedRetriever::new(
                request,
                services,
                SingleValuedKind::Observation,
            )?),
            Variant::Simulation => Box::new(SingleValuedRetriever::new(
                request,
                services,
                SingleValuedKind::Simulation,
            )?),
            Variant::Analysis(options) => {
                Box::new(AnalysisRetriever::new(request, services, *options)?)
            }
            Variant::Gridded(options) => {
                Box::new(GriddedRetriever::new(request, services, options.clone())?)
            }
            Variant::Ensemble(_) => {
                return Err(RetrievalError::configuration(
                    "ensemble forecasts do not produce scalar series",
                ))
            }
        };

        info!(variant = variant.name(), "{}", retriever.describe());
        Ok(retriever)
    }

    pub fn ensemble(
        &self,
        request: &RetrievalRequest,
        options: &EnsembleOptions,
    ) -> RetrievalResult<Box<dyn Retriever<Ensemble>>> {
        let retriever = EnsembleRetriever::new(request, self.services.clone(), options)?;
        info!(variant = "ensemble forecast", "{}", retriever.describe());
        Ok(Box::new(retriever))
    }

    /// Select and build the retriever for a variant.
    pub fn build(
        &self,
        request: &RetrievalRequest,
        variant: &Variant,
    ) -> RetrievalResult<AnyRetriever> {
        match variant {
            Variant::Ensemble(options) => {
                self.ensemble(request, options).map(AnyRetriever::Ensemble)
            }
            other => self.scalar(request, other).map(AnyRetriever::Scalar),
        }
    }

    pub fn for_data_type(
        &self,
        request: &RetrievalRequest,
        data_type: DataType,
    ) -> RetrievalResult<AnyRetriever> {
        self.build(request, &Variant::for_data_type(data_type))
    }
}
