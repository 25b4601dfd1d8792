//! Dataset tags carried through retrieval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DataModelError;

/// Domain marker for a missing scalar value.
pub const MISSING_DOUBLE: f64 = f64::NAN;

/// Which side of an evaluation a dataset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetOrientation {
    Left,
    Right,
    Baseline,
}

impl DatasetOrientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetOrientation::Left => "left",
            DatasetOrientation::Right => "right",
            DatasetOrientation::Baseline => "baseline",
        }
    }
}

impl fmt::Display for DatasetOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetOrientation {
    type Err = DataModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(DatasetOrientation::Left),
            "right" => Ok(DatasetOrientation::Right),
            "baseline" => Ok(DatasetOrientation::Baseline),
            _ => Err(DataModelError::unrecognized("dataset orientation", s)),
        }
    }
}

/// Declared type of the data in a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    SingleValuedForecasts,
    EnsembleForecasts,
    Observations,
    Simulations,
    Analyses,
}

impl DataType {
    /// Whether rows carry a reference time and lead duration.
    pub fn is_forecast(&self) -> bool {
        matches!(
            self,
            DataType::SingleValuedForecasts | DataType::EnsembleForecasts | DataType::Analyses
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::SingleValuedForecasts => "single valued forecasts",
            DataType::EnsembleForecasts => "ensemble forecasts",
            DataType::Observations => "observations",
            DataType::Simulations => "simulations",
            DataType::Analyses => "analyses",
        };
        f.write_str(name)
    }
}
