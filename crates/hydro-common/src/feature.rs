//! Geographic features and ensemble values.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DataModelError, DataModelResult};

/// A named location at which time-series are recorded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Well-known-text geometry, when known.
    #[serde(default)]
    pub wkt: Option<String>,
}

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            wkt: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_wkt(mut self, wkt: impl Into<String>) -> Self {
        self.wkt = Some(wkt.into());
        self
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One value per ensemble member, ordered by member label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    members: Vec<f64>,
    labels: Vec<String>,
}

impl Ensemble {
    pub fn new(members: Vec<f64>, labels: Vec<String>) -> DataModelResult<Self> {
        if members.len() != labels.len() {
            return Err(DataModelError::InvalidEnsemble(format!(
                "{} members but {} labels",
                members.len(),
                labels.len()
            )));
        }
        Self::from_labelled(labels.into_iter().zip(members).collect())
    }

    /// Build from (label, value) pairs in any order. Labels must be unique.
    pub fn from_labelled(mut pairs: Vec<(String, f64)>) -> DataModelResult<Self> {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(window) = pairs.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(DataModelError::InvalidEnsemble(format!(
                "duplicate member label '{}'",
                window[0].0
            )));
        }
        let (labels, members) = pairs.into_iter().unzip();
        Ok(Self { members, labels })
    }

    pub fn members(&self) -> &[f64] {
        &self.members
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, label: &str) -> Option<f64> {
        self.labels
            .binary_search_by(|l| l.as_str().cmp(label))
            .ok()
            .map(|i| self.members[i])
    }
}
