//! Reference-time types, time-window filters and duration serialization.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DataModelError, DataModelResult};

/// Kind of reference time attached to a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceTimeType {
    #[default]
    Unknown,
    /// Forecast initialization time.
    T0,
    AnalysisStartTime,
    IssuedTime,
    ReleaseTime,
    LatestObservation,
}

impl ReferenceTimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceTimeType::Unknown => "UNKNOWN",
            ReferenceTimeType::T0 => "T0",
            ReferenceTimeType::AnalysisStartTime => "ANALYSIS_START_TIME",
            ReferenceTimeType::IssuedTime => "ISSUED_TIME",
            ReferenceTimeType::ReleaseTime => "RELEASE_TIME",
            ReferenceTimeType::LatestObservation => "LATEST_OBSERVATION",
        }
    }
}

impl fmt::Display for ReferenceTimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceTimeType {
    type Err = DataModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "UNKNOWN" => Ok(ReferenceTimeType::Unknown),
            "T0" => Ok(ReferenceTimeType::T0),
            "ANALYSIS_START_TIME" => Ok(ReferenceTimeType::AnalysisStartTime),
            "ISSUED_TIME" => Ok(ReferenceTimeType::IssuedTime),
            "RELEASE_TIME" => Ok(ReferenceTimeType::ReleaseTime),
            "LATEST_OBSERVATION" => Ok(ReferenceTimeType::LatestObservation),
            _ => Err(DataModelError::unrecognized("reference time type", s)),
        }
    }
}

/// Bounds on reference times, valid times and lead durations.
///
/// Every bound is optional; an absent bound is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeWindowFilter {
    #[serde(default)]
    pub earliest_reference_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest_reference_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub earliest_valid_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest_valid_time: Option<DateTime<Utc>>,
    #[serde(default, with = "option_duration_seconds")]
    pub earliest_lead_duration: Option<Duration>,
    #[serde(default, with = "option_duration_seconds")]
    pub latest_lead_duration: Option<Duration>,
}

impl TimeWindowFilter {
    /// A filter with no bounds at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_reference_times(
        mut self,
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Self {
        self.earliest_reference_time = earliest;
        self.latest_reference_time = latest;
        self
    }

    pub fn with_valid_times(
        mut self,
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> Self {
        self.earliest_valid_time = earliest;
        self.latest_valid_time = latest;
        self
    }

    pub fn with_lead_durations(
        mut self,
        earliest: Option<Duration>,
        latest: Option<Duration>,
    ) -> Self {
        self.earliest_lead_duration = earliest;
        self.latest_lead_duration = latest;
        self
    }

    pub fn has_valid_time_bounds(&self) -> bool {
        self.earliest_valid_time.is_some() || self.latest_valid_time.is_some()
    }

    pub fn has_reference_time_bounds(&self) -> bool {
        self.earliest_reference_time.is_some() || self.latest_reference_time.is_some()
    }

    pub fn has_lead_duration_bounds(&self) -> bool {
        self.earliest_lead_duration.is_some() || self.latest_lead_duration.is_some()
    }

    /// Reject windows whose earliest bound is after the latest bound.
    pub fn validate(&self) -> DataModelResult<()> {
        check_order(
            "reference time",
            self.earliest_reference_time,
            self.latest_reference_time,
        )?;
        check_order("valid time", self.earliest_valid_time, self.latest_valid_time)?;
        check_order(
            "lead duration",
            self.earliest_lead_duration,
            self.latest_lead_duration,
        )
    }
}

fn check_order<T: PartialOrd + fmt::Display>(
    name: &str,
    earliest: Option<T>,
    latest: Option<T>,
) -> DataModelResult<()> {
    if let (Some(earliest), Some(latest)) = (earliest, latest) {
        if earliest > latest {
            return Err(DataModelError::InvalidTimeWindow(format!(
                "earliest {} {} is after latest {} {}",
                name, earliest, name, latest
            )));
        }
    }
    Ok(())
}

/// Serialize a `chrono::Duration` as whole seconds.
pub mod duration_seconds {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        from_seconds(seconds).map_err(D::Error::custom)
    }

    pub(super) fn from_seconds(seconds: i64) -> Result<Duration, String> {
        Duration::try_seconds(seconds)
            .ok_or_else(|| format!("duration of {} seconds is out of range", seconds))
    }
}

/// Serialize an optional `chrono::Duration` as whole seconds.
pub mod option_duration_seconds {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.num_seconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<i64>::deserialize(deserializer)?
            .map(super::duration_seconds::from_seconds)
            .transpose()
            .map_err(D::Error::custom)
    }
}
