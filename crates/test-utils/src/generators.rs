//! Row generators for building ordered scans.
//!
//! Rows come out in the order a backend must yield them: ascending series id,
//! then ascending valid time. Values are predictable so tests can check that
//! the right row landed in the right event: a forecast row holds
//! `series_id * 1000 + lead_hours`.

use chrono::{DateTime, Duration, Utc};

use retrieval::{RowValue, SeriesRow};

use crate::fixtures::{at, ids};

/// Fluent builder for one row.
#[derive(Debug, Clone)]
pub struct RowBuilder {
    row: SeriesRow,
}

impl RowBuilder {
    /// An observation-shaped row at `valid_hour` hours after the origin.
    pub fn new(series_id: i64, valid_hour: i64) -> Self {
        Self {
            row: SeriesRow {
                series_id,
                valid_time: at(valid_hour),
                reference_time: None,
                reference_time_type: None,
                lead_duration: None,
                scale_period: None,
                scale_function: None,
                feature_id: ids::DRRC2,
                measurement_unit_id: ids::CMS,
                occurrences: 1,
                value: RowValue::Single(Some(valid_hour as f64)),
            },
        }
    }

    /// A forecast-shaped row issued at `issued_hour`, valid `lead_hours` later.
    pub fn forecast(series_id: i64, issued_hour: i64, lead_hours: i64) -> Self {
        let mut builder = Self::new(series_id, issued_hour + lead_hours);
        builder.row.reference_time = Some(at(issued_hour));
        builder.row.reference_time_type = Some("T0".to_string());
        builder.row.lead_duration = Some(Duration::hours(lead_hours));
        builder.row.value = RowValue::Single(Some((series_id * 1000 + lead_hours) as f64));
        builder
    }

    pub fn value(mut self, value: Option<f64>) -> Self {
        self.row.value = RowValue::Single(value);
        self
    }

    pub fn members(mut self, members: Vec<(i64, Option<f64>)>) -> Self {
        self.row.value = RowValue::Ensemble(members);
        self
    }

    pub fn occurrences(mut self, occurrences: i32) -> Self {
        self.row.occurrences = occurrences;
        self
    }

    pub fn feature(mut self, feature_id: i64) -> Self {
        self.row.feature_id = feature_id;
        self
    }

    pub fn reference_time_type(mut self, kind: &str) -> Self {
        self.row.reference_time_type = Some(kind.to_string());
        self
    }

    pub fn reference_time(mut self, time: DateTime<Utc>) -> Self {
        self.row.reference_time = Some(time);
        self
    }

    /// Attach a stored time scale, `function` as written in the database.
    pub fn scale(mut self, period: Duration, function: &str) -> Self {
        self.row.scale_period = Some(period);
        self.row.scale_function = Some(function.to_string());
        self
    }

    pub fn build(self) -> SeriesRow {
        self.row
    }
}

/// One forecast issuance: a row per lead hour.
pub fn forecast_rows(series_id: i64, issued_hour: i64, lead_hours: &[i64]) -> Vec<SeriesRow> {
    lead_hours
        .iter()
        .map(|lead| RowBuilder::forecast(series_id, issued_hour, *lead).build())
        .collect()
}

/// An observation series with one row per hour in `hours`.
pub fn observation_rows(series_id: i64, hours: std::ops::Range<i64>) -> Vec<SeriesRow> {
    hours.map(|h| RowBuilder::new(series_id, h).build()).collect()
}

/// One ensemble issuance over the three fixture members.
///
/// Member values are `member_id * 10 + lead_hours`.
pub fn ensemble_rows(series_id: i64, issued_hour: i64, lead_hours: &[i64]) -> Vec<SeriesRow> {
    lead_hours
        .iter()
        .map(|lead| {
            let members = [ids::MEMBER_1985, ids::MEMBER_1986, ids::MEMBER_1987]
                .iter()
                .map(|m| (*m, Some((m * 10 + lead) as f64)))
                .collect();
            RowBuilder::forecast(series_id, issued_hour, *lead)
                .members(members)
                .build()
        })
        .collect()
}

/// Analysis issuances: each starts at an hour and covers `steps` hourly leads.
pub fn analysis_rows(first_series_id: i64, start_hours: &[i64], steps: i64) -> Vec<SeriesRow> {
    start_hours
        .iter()
        .enumerate()
        .flat_map(|(i, start)| {
            let leads: Vec<i64> = (0..steps).collect();
            forecast_rows(first_series_id + i as i64, *start, &leads)
        })
        .collect()
}
