//! Analysis series composed from many forecast issuances.
//!
//! Each issuance is read as a single-valued forecast tagged with its analysis
//! start time. When analysis durations are bounded, every event within the
//! bounds becomes its own single-event series. Otherwise the issuances are
//! returned whole, with duplicate valid times resolved by a [`DuplicatePolicy`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use hydro_common::{ReferenceTimeType, TimeSeries, TimeWindowFilter};

use crate::error::{RetrievalError, RetrievalResult};
use crate::retriever::{RetrievalRequest, RetrievalServices, Retriever};
use crate::stream::SeriesStream;
use crate::variants::single_valued::{SingleValuedKind, SingleValuedRetriever};

/// How events that share a valid time across issuances are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    KeepAll,
    KeepLatestReferenceTime,
    KeepEarliestReferenceTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    #[serde(with = "hydro_common::time::option_duration_seconds")]
    pub earliest_analysis_duration: Option<Duration>,
    #[serde(with = "hydro_common::time::option_duration_seconds")]
    pub latest_analysis_duration: Option<Duration>,
    pub duplicate_policy: DuplicatePolicy,
}

impl AnalysisOptions {
    /// Whether one single-event series is built per analysis duration.
    pub fn per_duration(&self) -> bool {
        self.earliest_analysis_duration.is_some() || self.latest_analysis_duration.is_some()
    }
}

pub struct AnalysisRetriever {
    inner: SingleValuedRetriever,
    options: AnalysisOptions,
    /// The requested window, whose reference times bound the kept issuances.
    window: Option<TimeWindowFilter>,
}

impl AnalysisRetriever {
    pub fn new(
        request: &RetrievalRequest,
        services: RetrievalServices,
        options: AnalysisOptions,
    ) -> RetrievalResult<Self> {
        if let (Some(earliest), Some(latest)) =
            (options.earliest_analysis_duration, options.latest_analysis_duration)
        {
            if earliest > latest {
                return Err(RetrievalError::configuration(format!(
                    "the earliest analysis duration {}s is after the latest analysis duration {}s",
                    earliest.num_seconds(),
                    latest.num_seconds()
                )));
            }
        }

        let window = request.time_window;
        let analysis_window = analysis_window(window.as_ref(), &options);

        let inner = SingleValuedRetriever::new(request, services, SingleValuedKind::Forecast)?
            .with_reference_time_type(ReferenceTimeType::AnalysisStartTime)
            .with_time_window(Some(analysis_window))
            .without_season();

        debug!(
            per_duration = options.per_duration(),
            policy = ?options.duplicate_policy,
            "Built analysis retriever"
        );

        Ok(Self {
            inner,
            options,
            window,
        })
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// The forecast-shaped retriever that reads individual issuances.
    pub fn inner(&self) -> &SingleValuedRetriever {
        &self.inner
    }
}

/// The window used to read issuances: any reference time, the requested
/// valid times and the analysis durations as lead durations.
pub fn analysis_window(
    window: Option<&TimeWindowFilter>,
    options: &AnalysisOptions,
) -> TimeWindowFilter {
    let (earliest_valid, latest_valid) = window
        .map(|w| (w.earliest_valid_time, w.latest_valid_time))
        .unwrap_or((None, None));

    TimeWindowFilter::unbounded()
        .with_valid_times(earliest_valid, latest_valid)
        .with_lead_durations(
            options.earliest_analysis_duration,
            options.latest_analysis_duration,
        )
}

/// One single-event series for each event whose analysis duration lies
/// within the inclusive bounds.
pub fn per_duration_series(
    series: &[Arc<TimeSeries<f64>>],
    earliest: Option<Duration>,
    latest: Option<Duration>,
) -> RetrievalResult<Vec<Arc<TimeSeries<f64>>>> {
    let mut composed = Vec::new();
    for next in series {
        let Some(by_duration) = next.events_by_duration(ReferenceTimeType::AnalysisStartTime) else {
            continue;
        };

        for (duration, event) in by_duration {
            if earliest.map_or(true, |e| duration >= e) && latest.map_or(true, |l| duration <= l) {
                let single = TimeSeries::of(next.metadata().clone(), vec![event.clone()])?;
                composed.push(Arc::new(single));
            }
        }
    }

    if composed.is_empty() {
        warn!(
            earliest = ?earliest.map(|d| d.num_seconds()),
            latest = ?latest.map(|d| d.num_seconds()),
            "No analysis events found between the analysis durations"
        );
    }

    Ok(composed)
}

/// Resolve valid times shared across issuances according to the policy.
///
/// Issuances are ordered by analysis start time, missing times first, and
/// reversed for [`DuplicatePolicy::KeepLatestReferenceTime`]. Each issuance
/// keeps only the valid times not already claimed by an earlier kept one.
pub fn apply_duplicate_policy(
    series: Vec<Arc<TimeSeries<f64>>>,
    policy: DuplicatePolicy,
    window: Option<&TimeWindowFilter>,
) -> Vec<Arc<TimeSeries<f64>>> {
    if policy == DuplicatePolicy::KeepAll {
        return series;
    }

    let mut ordered = series;
    ordered.sort_by_key(|s| s.reference_time(ReferenceTimeType::AnalysisStartTime));
    if policy == DuplicatePolicy::KeepLatestReferenceTime {
        ordered.reverse();
    }

    let after = window.and_then(|w| w.earliest_reference_time);
    let up_to = window.and_then(|w| w.latest_reference_time);

    let mut consumed: HashSet<DateTime<Utc>> = HashSet::new();
    let mut kept = Vec::with_capacity(ordered.len());

    for next in ordered {
        let filtered = next.filter_events(|e| !consumed.contains(&e.time));
        if filtered.is_empty() {
            continue;
        }

        let reference = next.reference_time(ReferenceTimeType::AnalysisStartTime);
        if !within_reference_bounds(reference, after, up_to) {
            continue;
        }

        if filtered.len() != next.len() {
            trace!(
                removed = next.len() - filtered.len(),
                policy = ?policy,
                "Removed duplicate analysis events"
            );
        }

        consumed.extend(next.events().iter().map(|e| e.time));
        kept.push(Arc::new(filtered));
    }

    kept
}

/// Left-open, right-closed. Absent bounds do not constrain.
fn within_reference_bounds(
    reference: Option<DateTime<Utc>>,
    after: Option<DateTime<Utc>>,
    up_to: Option<DateTime<Utc>>,
) -> bool {
    match reference {
        Some(t) => after.map_or(true, |a| t > a) && up_to.map_or(true, |u| t <= u),
        None => after.is_none() && up_to.is_none(),
    }
}

#[async_trait]
impl Retriever<f64> for AnalysisRetriever {
    async fn get(&self) -> RetrievalResult<SeriesStream<f64>> {
        let issuances = self.inner.stream(self.inner.query()).collect_all().await?;
        debug!(issuances = issuances.len(), "Read analysis issuances");

        let composed = if self.options.per_duration() {
            per_duration_series(
                &issuances,
                self.options.earliest_analysis_duration,
                self.options.latest_analysis_duration,
            )?
        } else {
            apply_duplicate_policy(issuances, self.options.duplicate_policy, self.window.as_ref())
        };

        Ok(SeriesStream::buffered(composed))
    }

    async fn get_by_ids(&self, _ids: &[i64]) -> RetrievalResult<SeriesStream<f64>> {
        Err(RetrievalError::unsupported(
            "retrieval by identifier",
            "analysis series are composed on demand and have no stored identifier",
        ))
    }

    async fn list_ids(&self) -> RetrievalResult<Vec<i64>> {
        Err(RetrievalError::unsupported(
            "listing identifiers",
            "there are no identifiers stored for analysis series",
        ))
    }

    fn supports_identifiers(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("analysis retriever over a {}", self.inner.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hydro_common::{Event, Feature, TimeSeriesMetadata};

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    /// An issuance at `start` with one event per listed hour.
    fn issuance(start: i64, hours: &[i64]) -> Arc<TimeSeries<f64>> {
        let metadata = TimeSeriesMetadata::new("streamflow", Feature::new("DRRC2"), "CMS")
            .with_reference_time(ReferenceTimeType::AnalysisStartTime, at(start));
        let events = hours
            .iter()
            .map(|h| Event::new(at(*h), (start * 100 + h) as f64))
            .collect();
        Arc::new(TimeSeries::of(metadata, events).unwrap())
    }

    fn times(series: &TimeSeries<f64>) -> Vec<DateTime<Utc>> {
        series.events().iter().map(|e| e.time).collect()
    }

    #[test]
    fn test_analysis_window_drops_reference_bounds() {
        let requested = TimeWindowFilter::unbounded()
            .with_reference_times(Some(at(0)), Some(at(10)))
            .with_valid_times(Some(at(1)), Some(at(5)));
        let options = AnalysisOptions {
            earliest_analysis_duration: Some(Duration::zero()),
            latest_analysis_duration: Some(Duration::hours(1)),
            ..AnalysisOptions::default()
        };

        let window = analysis_window(Some(&requested), &options);
        assert!(!window.has_reference_time_bounds());
        assert_eq!(window.earliest_valid_time, Some(at(1)));
        assert_eq!(window.latest_lead_duration, Some(Duration::hours(1)));
    }

    #[test]
    fn test_keep_all_returns_input() {
        let input = vec![issuance(0, &[1, 2]), issuance(1, &[2, 3])];
        let kept = apply_duplicate_policy(input.clone(), DuplicatePolicy::KeepAll, None);
        assert_eq!(kept.len(), 2);
        assert!(Arc::ptr_eq(&kept[0], &input[0]));
    }

    #[test]
    fn test_keep_latest_reference_time() {
        let input = vec![issuance(0, &[1, 2]), issuance(1, &[2, 3])];
        let kept = apply_duplicate_policy(input, DuplicatePolicy::KeepLatestReferenceTime, None);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].reference_time(ReferenceTimeType::AnalysisStartTime), Some(at(1)));
        assert_eq!(times(&kept[0]), vec![at(2), at(3)]);
        assert_eq!(times(&kept[1]), vec![at(1)]);
        // The latest issuance wins the shared valid time
        assert_eq!(kept[0].events()[0].value, 102.0);
    }

    #[test]
    fn test_keep_earliest_reference_time() {
        let input = vec![issuance(1, &[2, 3]), issuance(0, &[1, 2])];
        let kept = apply_duplicate_policy(input, DuplicatePolicy::KeepEarliestReferenceTime, None);

        assert_eq!(times(&kept[0]), vec![at(1), at(2)]);
        assert_eq!(times(&kept[1]), vec![at(3)]);
    }

    #[test]
    fn test_fully_duplicated_issuance_is_dropped() {
        let input = vec![issuance(0, &[1, 2]), issuance(1, &[1, 2])];
        let kept = apply_duplicate_policy(input, DuplicatePolicy::KeepEarliestReferenceTime, None);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_reference_bounds_are_left_open() {
        let window = TimeWindowFilter::unbounded().with_reference_times(Some(at(0)), Some(at(2)));
        let input = vec![issuance(0, &[1]), issuance(1, &[2]), issuance(2, &[3])];
        let kept =
            apply_duplicate_policy(input, DuplicatePolicy::KeepLatestReferenceTime, Some(&window));

        let starts: Vec<_> = kept
            .iter()
            .map(|s| s.reference_time(ReferenceTimeType::AnalysisStartTime))
            .collect();
        assert_eq!(starts, vec![Some(at(2)), Some(at(1))]);
    }

    #[test]
    fn test_per_duration_single_event_series() {
        let input = vec![issuance(0, &[0, 1, 2]), issuance(1, &[1, 2, 3])];
        let (earliest, latest) = (Some(Duration::hours(1)), Some(Duration::hours(2)));
        let composed = per_duration_series(&input, earliest, latest).unwrap();

        assert_eq!(composed.len(), 4);
        assert!(composed.iter().all(|s| s.len() == 1));
        assert_eq!(times(&composed[0]), vec![at(1)]);
        assert_eq!(times(&composed[3]), vec![at(3)]);
    }

    #[test]
    fn test_per_duration_open_upper_bound() {
        let input = vec![issuance(0, &[0, 1, 2])];
        let composed = per_duration_series(&input, Some(Duration::hours(1)), None).unwrap();
        assert_eq!(composed.len(), 2);
    }

    #[test]
    fn test_options_deserialize() {
        let yaml = "earliest_analysis_duration: 0\n\
                    latest_analysis_duration: 3600\n\
                    duplicate_policy: keep_latest_reference_time\n";
        let options: AnalysisOptions = serde_yaml::from_str(yaml).unwrap();
        assert!(options.per_duration());
        assert_eq!(options.duplicate_policy, DuplicatePolicy::KeepLatestReferenceTime);
    }
}
