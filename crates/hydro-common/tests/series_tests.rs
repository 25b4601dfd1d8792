//! Integration tests for the time-series data model.

use chrono::{Duration, TimeZone, Utc};

use hydro_common::{
    DataModelError, Event, Feature, ReferenceTimeType, TimeScale, TimeScaleFunction, TimeSeries,
    TimeSeriesBuilder, TimeSeriesMetadata,
};

fn metadata() -> TimeSeriesMetadata {
    TimeSeriesMetadata::new("streamflow", Feature::new("DRRC2"), "CMS")
        .with_reference_time(
            ReferenceTimeType::T0,
            Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap(),
        )
        .with_time_scale(Some(
            TimeScale::new(Duration::hours(6), TimeScaleFunction::Mean).unwrap(),
        ))
}

// ============================================================================
// Builder tests
// ============================================================================

#[test]
fn test_builder_accepts_ascending_events() {
    let t0 = Utc.with_ymd_and_hms(2023, 3, 1, 6, 0, 0).unwrap();
    let mut builder = TimeSeriesBuilder::new().with_metadata(metadata());
    builder.add_event(Event::new(t0, 1.0)).unwrap();
    builder.add_event(Event::new(t0 + Duration::hours(6), 2.0)).unwrap();

    let series = builder.build().unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series.metadata().unit, "CMS");
    assert!(!builder.has_events());
}

#[test]
fn test_builder_rejects_duplicate_and_earlier_events() {
    let t0 = Utc.with_ymd_and_hms(2023, 3, 1, 6, 0, 0).unwrap();
    let mut builder = TimeSeriesBuilder::new().with_metadata(metadata());
    builder.add_event(Event::new(t0, 1.0)).unwrap();

    let dup = builder.add_event(Event::new(t0, 1.5)).unwrap_err();
    assert_eq!(dup, DataModelError::DuplicateEvent(t0));

    let earlier = builder
        .add_event(Event::new(t0 - Duration::hours(1), 0.5))
        .unwrap_err();
    assert!(matches!(earlier, DataModelError::EventOutOfOrder { .. }));
}

#[test]
fn test_builder_requires_metadata() {
    let mut builder: TimeSeriesBuilder<f64> = TimeSeriesBuilder::new();
    assert!(matches!(
        builder.build(),
        Err(DataModelError::MissingMetadata(_))
    ));
}

// ============================================================================
// Series helpers
// ============================================================================

#[test]
fn test_events_by_duration_from_reference_time() {
    let t0 = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
    let series = TimeSeries::of(
        metadata(),
        vec![
            Event::new(t0 + Duration::hours(6), 1.0),
            Event::new(t0 + Duration::hours(12), 2.0),
        ],
    )
    .unwrap();

    let durations: Vec<Duration> = series
        .events_by_duration(ReferenceTimeType::T0)
        .unwrap()
        .into_iter()
        .map(|(d, _)| d)
        .collect();
    assert_eq!(durations, vec![Duration::hours(6), Duration::hours(12)]);
    assert!(series
        .events_by_duration(ReferenceTimeType::IssuedTime)
        .is_none());
}

#[test]
fn test_filter_events_keeps_metadata() {
    let t0 = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
    let series = TimeSeries::of(
        metadata(),
        (1..=4)
            .map(|h| Event::new(t0 + Duration::hours(h), h as f64))
            .collect(),
    )
    .unwrap();

    let even = series.filter_events(|e| e.value % 2.0 == 0.0);
    assert_eq!(even.len(), 2);
    assert_eq!(even.metadata(), series.metadata());
}
