//! Timescales: an aggregation period plus function, or a seasonal window.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DataModelError, DataModelResult};
use crate::season::{MonthDay, Season};
use crate::time::option_duration_seconds;

/// Periods at or below this many seconds are treated as instantaneous.
pub const INSTANTANEOUS_SECONDS: i64 = 60;

/// The instantaneous threshold as a duration.
pub fn instantaneous_duration() -> Duration {
    Duration::seconds(INSTANTANEOUS_SECONDS)
}

/// Aggregation function applied over a timescale period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeScaleFunction {
    #[default]
    Unknown,
    Mean,
    Minimum,
    Maximum,
    Total,
}

impl TimeScaleFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeScaleFunction::Unknown => "UNKNOWN",
            TimeScaleFunction::Mean => "MEAN",
            TimeScaleFunction::Minimum => "MINIMUM",
            TimeScaleFunction::Maximum => "MAXIMUM",
            TimeScaleFunction::Total => "TOTAL",
        }
    }
}

impl fmt::Display for TimeScaleFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeScaleFunction {
    type Err = DataModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNKNOWN" => Ok(TimeScaleFunction::Unknown),
            "MEAN" => Ok(TimeScaleFunction::Mean),
            "MINIMUM" => Ok(TimeScaleFunction::Minimum),
            "MAXIMUM" => Ok(TimeScaleFunction::Maximum),
            "TOTAL" => Ok(TimeScaleFunction::Total),
            _ => Err(DataModelError::unrecognized("time scale function", s)),
        }
    }
}

/// The scale at which values are measured or desired.
///
/// Either `period` is set, or both `start_day` and `end_day` are set, or
/// both. A scale with month-days and no period has a period inferred from
/// the number of days in the season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeScale {
    #[serde(default, with = "option_duration_seconds")]
    pub period: Option<Duration>,
    #[serde(default)]
    pub function: TimeScaleFunction,
    #[serde(default)]
    pub start_day: Option<MonthDay>,
    #[serde(default)]
    pub end_day: Option<MonthDay>,
}

impl TimeScale {
    /// A scale with an explicit, positive period.
    pub fn new(period: Duration, function: TimeScaleFunction) -> DataModelResult<Self> {
        if period <= Duration::zero() {
            return Err(DataModelError::InvalidTimeScale(format!(
                "period must be positive, got {}",
                period
            )));
        }
        Ok(Self {
            period: Some(period),
            function,
            start_day: None,
            end_day: None,
        })
    }

    pub fn instantaneous() -> Self {
        Self {
            period: Some(instantaneous_duration()),
            function: TimeScaleFunction::Unknown,
            start_day: None,
            end_day: None,
        }
    }

    /// A scale spanning a seasonal window, with or without a period.
    pub fn seasonal(
        start_day: MonthDay,
        end_day: MonthDay,
        function: TimeScaleFunction,
    ) -> Self {
        Self {
            period: None,
            function,
            start_day: Some(start_day),
            end_day: Some(end_day),
        }
    }

    pub fn with_function(mut self, function: TimeScaleFunction) -> Self {
        self.function = function;
        self
    }

    pub fn season(&self) -> Option<Season> {
        match (self.start_day, self.end_day) {
            (Some(start), Some(end)) => Some(Season::new(start, end)),
            _ => None,
        }
    }

    pub fn has_unknown_function(&self) -> bool {
        self.function == TimeScaleFunction::Unknown
    }

    pub fn is_instantaneous(&self) -> bool {
        match self.period {
            Some(period) => period <= instantaneous_duration(),
            None => self.season().map(|s| s.is_single_day()).unwrap_or(false),
        }
    }

    /// The explicit period, else the period inferred from the season.
    pub fn period_or_inferred(&self) -> Option<Duration> {
        if let Some(period) = self.period {
            return Some(period);
        }
        if self.is_instantaneous() {
            return Some(instantaneous_duration());
        }
        self.season().map(|s| Duration::days(s.inclusive_days()))
    }

    /// True when both scales are equal or both are instantaneous.
    pub fn equals_or_instantaneous(&self, other: &TimeScale) -> bool {
        self == other || (self.is_instantaneous() && other.is_instantaneous())
    }

    pub fn validate(&self) -> DataModelResult<()> {
        if let Some(period) = self.period {
            if period <= Duration::zero() {
                return Err(DataModelError::InvalidTimeScale(format!(
                    "period must be positive, got {}",
                    period
                )));
            }
        }
        match (self.start_day, self.end_day, self.period) {
            (Some(_), None, _) | (None, Some(_), _) => Err(DataModelError::InvalidTimeScale(
                "start and end month-days must be declared together".to_string(),
            )),
            (None, None, None) => Err(DataModelError::InvalidTimeScale(
                "a period or a seasonal window is required".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_instantaneous() && self.period.is_some() {
            return f.write_str("[INSTANTANEOUS]");
        }
        match (self.period, self.season()) {
            (Some(period), Some(season)) => {
                write!(f, "[{},{},{}]", period, self.function, season)
            }
            (Some(period), None) => write!(f, "[{},{}]", period, self.function),
            (None, Some(season)) => write!(f, "[{},{}]", season, self.function),
            (None, None) => write!(f, "[{}]", self.function),
        }
    }
}
