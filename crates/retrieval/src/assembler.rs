//! Turns an ordered row stream into completed, replicate-expanded series.
//!
//! Rows arrive sorted by series id, then valid time. A change of series id
//! completes the series being built; the end of the scan completes the last
//! one. Each completed series is emitted once per registration of its
//! source, as clones of one shared `Arc`.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, trace};

use hydro_common::{
    DatasetOrientation, Event, ReferenceTimeType, TimeScale, TimeScaleFunction, TimeSeries,
    TimeSeriesBuilder, TimeSeriesMetadata,
};

use crate::backend::SeriesRow;
use crate::cache::{FeatureLookup, UnitLookup};
use crate::error::{RetrievalError, RetrievalResult};

/// Maps the value columns of a row to an event value.
pub trait EventMapper<V>: Send + Sync {
    fn map(&self, row: &SeriesRow) -> RetrievalResult<V>;
}

/// Retrieval-wide facts the assembler attaches to every series.
#[derive(Clone)]
pub struct AssemblerContext {
    pub orientation: DatasetOrientation,
    pub variable_name: String,
    /// Time scale declared for the source data, used to fill gaps in rows.
    pub declared_time_scale: Option<TimeScale>,
    /// Tag applied to every reference time, overriding the row's own.
    pub reference_time_type: Option<ReferenceTimeType>,
    pub features: Arc<dyn FeatureLookup>,
    pub units: Arc<dyn UnitLookup>,
}

/// Reconcile a row's time scale with the declared existing time scale.
///
/// The row's period and function win. A missing period falls back to the
/// declared period, and a missing or unknown function to the declared
/// function. The result must agree with the declaration, when there is one.
pub fn reconcile_time_scale(
    row: &SeriesRow,
    declared: Option<&TimeScale>,
    orientation: DatasetOrientation,
) -> RetrievalResult<Option<TimeScale>> {
    let function = match row.scale_function.as_deref() {
        Some(name) => Some(name.parse::<TimeScaleFunction>().map_err(|e| {
            RetrievalError::InvalidRow {
                series_id: row.series_id,
                message: e.to_string(),
            }
        })?),
        None => None,
    };

    let mut period = row.scale_period;
    let mut function = function;

    if let Some(declared) = declared {
        if period.is_none() {
            period = declared.period;
        }
        if function.map_or(true, |f| f == TimeScaleFunction::Unknown) {
            function = Some(declared.function);
        }
    }

    let found = match period {
        Some(p) => Some(scale_of(row, p, function.unwrap_or_default())?),
        None => None,
    };

    if let Some(declared) = declared {
        let consistent = found
            .as_ref()
            .map_or(false, |f| declared.equals_or_instantaneous(f));
        if !consistent {
            return Err(RetrievalError::DeclaredTimeScaleMismatch {
                orientation,
                valid_time: row.valid_time,
                declared: *declared,
                found,
            });
        }
    }

    Ok(found)
}

fn scale_of(
    row: &SeriesRow,
    period: Duration,
    function: TimeScaleFunction,
) -> RetrievalResult<TimeScale> {
    TimeScale::new(period, function).map_err(|e| RetrievalError::InvalidRow {
        series_id: row.series_id,
        message: e.to_string(),
    })
}

/// Series boundary detection over an ordered row stream.
pub struct SeriesAssembler<V> {
    context: AssemblerContext,
    mapper: Arc<dyn EventMapper<V>>,
    current_series_id: Option<i64>,
    builder: TimeSeriesBuilder<V>,
    current_time_scale: Option<TimeScale>,
    pending_occurrences: usize,
    finished: bool,
    rows_accepted: u64,
}

impl<V> SeriesAssembler<V> {
    pub fn new(context: AssemblerContext, mapper: Arc<dyn EventMapper<V>>) -> Self {
        Self {
            context,
            mapper,
            current_series_id: None,
            builder: TimeSeriesBuilder::new(),
            current_time_scale: None,
            pending_occurrences: 0,
            finished: false,
            rows_accepted: 0,
        }
    }

    pub fn context(&self) -> &AssemblerContext {
        &self.context
    }

    pub fn rows_accepted(&self) -> u64 {
        self.rows_accepted
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume one row, returning any series its arrival completed.
    ///
    /// On error the series under construction is discarded and the
    /// assembler accepts nothing further.
    pub fn accept(&mut self, row: SeriesRow) -> RetrievalResult<Vec<Arc<TimeSeries<V>>>> {
        let result = self.accept_row(row);
        if result.is_err() {
            self.abandon();
        }
        result
    }

    /// Complete the last series, once. Later calls return nothing.
    pub fn finish(&mut self) -> RetrievalResult<Vec<Arc<TimeSeries<V>>>> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;

        if self.current_series_id.is_none() {
            return Ok(Vec::new());
        }

        let result = self.complete_current();
        if result.is_err() {
            self.abandon();
        }
        result
    }

    fn accept_row(&mut self, row: SeriesRow) -> RetrievalResult<Vec<Arc<TimeSeries<V>>>> {
        if self.finished {
            return Err(RetrievalError::InvalidRow {
                series_id: row.series_id,
                message: "row received after the scan was finished".to_string(),
            });
        }
        if row.occurrences < 1 {
            return Err(RetrievalError::InvalidRow {
                series_id: row.series_id,
                message: format!(
                    "cannot replicate a time-series fewer than 1 times: {}",
                    row.occurrences
                ),
            });
        }
        self.rows_accepted += 1;

        match self.current_series_id {
            None => {
                self.start_series(&row)?;
                self.append_event(row)?;
                Ok(Vec::new())
            }
            Some(current) if current == row.series_id => {
                self.continue_series(&row)?;
                self.append_event(row)?;
                Ok(Vec::new())
            }
            Some(current) if row.series_id < current => Err(RetrievalError::OutOfOrder {
                orientation: self.context.orientation,
                previous: current,
                next: row.series_id,
            }),
            Some(_) => {
                let completed = self.complete_current()?;
                self.start_series(&row)?;
                self.append_event(row)?;
                Ok(completed)
            }
        }
    }

    fn start_series(&mut self, row: &SeriesRow) -> RetrievalResult<()> {
        trace!(series_id = row.series_id, "Starting time-series");

        let time_scale = reconcile_time_scale(
            row,
            self.context.declared_time_scale.as_ref(),
            self.context.orientation,
        )?;

        let orientation = self.context.orientation;
        let feature = self.context.features.feature(row.feature_id).map_err(|e| {
            RetrievalError::access_with(
                orientation,
                format!(
                    "while reading series {}, failed to look up feature {}",
                    row.series_id, row.feature_id
                ),
                e,
            )
        })?;
        let unit = self.context.units.unit_name(row.measurement_unit_id).map_err(|e| {
            RetrievalError::access_with(
                orientation,
                format!(
                    "while reading series {}, failed to look up measurement unit {}",
                    row.series_id, row.measurement_unit_id
                ),
                e,
            )
        })?;

        let mut metadata =
            TimeSeriesMetadata::new(self.context.variable_name.clone(), feature, unit)
                .with_time_scale(time_scale);
        if let Some(reference_time) = row.reference_time {
            metadata = metadata.with_reference_time(self.reference_time_type(row)?, reference_time);
        }

        self.builder.clear();
        self.builder.set_metadata(metadata);
        self.current_series_id = Some(row.series_id);
        self.current_time_scale = time_scale;
        // Validated positive in accept_row
        self.pending_occurrences = row.occurrences as usize;
        Ok(())
    }

    fn continue_series(&mut self, row: &SeriesRow) -> RetrievalResult<()> {
        let found = reconcile_time_scale(
            row,
            self.context.declared_time_scale.as_ref(),
            self.context.orientation,
        )?;

        match self.current_time_scale {
            Some(expected) if found != Some(expected) => Err(RetrievalError::TimeScaleMismatch {
                orientation: self.context.orientation,
                series_id: row.series_id,
                valid_time: row.valid_time,
                expected,
                found,
            }),
            Some(_) => Ok(()),
            None => {
                if found.is_some() {
                    self.current_time_scale = found;
                    if let Some(metadata) = self.builder.metadata_mut() {
                        metadata.time_scale = found;
                    }
                }
                Ok(())
            }
        }
    }

    fn append_event(&mut self, row: SeriesRow) -> RetrievalResult<()> {
        let value = self.mapper.map(&row)?;
        let valid_time: DateTime<Utc> = row.valid_time;
        self.builder
            .add_event(Event::new(valid_time, value))
            .map_err(|e| RetrievalError::InvalidRow {
                series_id: row.series_id,
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn reference_time_type(&self, row: &SeriesRow) -> RetrievalResult<ReferenceTimeType> {
        if let Some(kind) = self.context.reference_time_type {
            return Ok(kind);
        }
        match row.reference_time_type.as_deref() {
            Some(name) => name.parse::<ReferenceTimeType>().map_err(|e| {
                RetrievalError::InvalidRow {
                    series_id: row.series_id,
                    message: e.to_string(),
                }
            }),
            None => Ok(ReferenceTimeType::Unknown),
        }
    }

    /// Build the current series and expand it into its replicates.
    fn complete_current(&mut self) -> RetrievalResult<Vec<Arc<TimeSeries<V>>>> {
        let series_id = self.current_series_id.take();
        let series = Arc::new(self.builder.build()?);
        let copies = self.pending_occurrences.max(1);
        self.current_time_scale = None;
        self.pending_occurrences = 0;

        debug!(
            series_id,
            events = series.len(),
            replicates = copies,
            orientation = %self.context.orientation,
            "Completed time-series"
        );

        Ok(vec![series; copies])
    }

    fn abandon(&mut self) {
        self.builder.clear();
        self.current_series_id = None;
        self.current_time_scale = None;
        self.pending_occurrences = 0;
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RowValue;
    use crate::cache::IdentifierCache;
    use chrono::TimeZone;
    use hydro_common::Feature;

    struct Scalar;

    impl EventMapper<f64> for Scalar {
        fn map(&self, row: &SeriesRow) -> RetrievalResult<f64> {
            match row.value {
                RowValue::Single(v) => Ok(v.unwrap_or(f64::NAN)),
                RowValue::Ensemble(_) => Err(RetrievalError::configuration("not scalar")),
            }
        }
    }

    fn context(declared: Option<TimeScale>) -> AssemblerContext {
        let cache = Arc::new(IdentifierCache::new());
        cache.insert_feature(10, Feature::new("DRRC2")).unwrap();
        cache.insert_unit(20, "CMS").unwrap();
        AssemblerContext {
            orientation: DatasetOrientation::Right,
            variable_name: "streamflow".to_string(),
            declared_time_scale: declared,
            reference_time_type: None,
            features: cache.clone(),
            units: cache,
        }
    }

    fn row(series_id: i64, hour: i64, occurrences: i32) -> SeriesRow {
        let t0 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        SeriesRow {
            series_id,
            valid_time: t0 + Duration::hours(hour),
            reference_time: Some(t0),
            reference_time_type: Some("T0".to_string()),
            lead_duration: Some(Duration::hours(hour)),
            scale_period: None,
            scale_function: None,
            feature_id: 10,
            measurement_unit_id: 20,
            occurrences,
            value: RowValue::Single(Some(hour as f64)),
        }
    }

    fn scaled(mut row: SeriesRow, hours: i64, function: &str) -> SeriesRow {
        row.scale_period = Some(Duration::hours(hours));
        row.scale_function = Some(function.to_string());
        row
    }

    #[test]
    fn test_reconcile_row_scale_wins_over_missing_declaration() {
        let r = scaled(row(1, 1, 1), 6, "mean");
        let found = reconcile_time_scale(&r, None, DatasetOrientation::Left)
            .unwrap()
            .unwrap();
        assert_eq!(found.period, Some(Duration::hours(6)));
        assert_eq!(found.function, TimeScaleFunction::Mean);
    }

    #[test]
    fn test_reconcile_declared_fills_period_and_unknown_function() {
        let declared = TimeScale::new(Duration::hours(6), TimeScaleFunction::Total).unwrap();
        let mut r = row(1, 1, 1);
        r.scale_function = Some("UNKNOWN".to_string());

        let found = reconcile_time_scale(&r, Some(&declared), DatasetOrientation::Left).unwrap();
        assert_eq!(found, Some(declared));
    }

    #[test]
    fn test_reconcile_concrete_function_is_not_overridden() {
        let declared = TimeScale::new(Duration::hours(6), TimeScaleFunction::Total).unwrap();
        let r = scaled(row(1, 1, 1), 6, "MEAN");
        let err = reconcile_time_scale(&r, Some(&declared), DatasetOrientation::Baseline)
            .unwrap_err();
        match err {
            RetrievalError::DeclaredTimeScaleMismatch { orientation, found, .. } => {
                assert_eq!(orientation, DatasetOrientation::Baseline);
                assert_eq!(found.unwrap().function, TimeScaleFunction::Mean);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_reconcile_instantaneous_scales_are_compatible() {
        let declared = TimeScale::instantaneous();
        let mut r = scaled(row(1, 1, 1), 1, "MEAN");
        r.scale_period = Some(Duration::seconds(1));
        assert!(reconcile_time_scale(&r, Some(&declared), DatasetOrientation::Left).is_ok());
    }

    #[test]
    fn test_reconcile_rejects_unknown_function_name() {
        let r = scaled(row(3, 1, 1), 6, "median");
        let err = reconcile_time_scale(&r, None, DatasetOrientation::Left).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidRow { series_id: 3, .. }));
    }

    #[test]
    fn test_boundaries_and_replicates() {
        let mut assembler = SeriesAssembler::new(context(None), Arc::new(Scalar));
        assert!(assembler.accept(row(1, 1, 2)).unwrap().is_empty());
        assert!(assembler.accept(row(1, 2, 2)).unwrap().is_empty());

        let completed = assembler.accept(row(2, 1, 1)).unwrap();
        assert_eq!(completed.len(), 2);
        assert!(Arc::ptr_eq(&completed[0], &completed[1]));
        assert_eq!(completed[0].len(), 2);

        let last = assembler.finish().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].len(), 1);
        assert!(assembler.finish().unwrap().is_empty());
    }

    #[test]
    fn test_metadata_recorded_from_first_row() {
        let mut assembler = SeriesAssembler::new(context(None), Arc::new(Scalar));
        assembler.accept(row(1, 1, 1)).unwrap();
        let series = assembler.finish().unwrap().remove(0);

        let metadata = series.metadata();
        assert_eq!(metadata.feature.name, "DRRC2");
        assert_eq!(metadata.unit, "CMS");
        assert_eq!(metadata.variable_name, "streamflow");
        assert_eq!(
            series.reference_time(ReferenceTimeType::T0),
            Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_reference_time_type_override() {
        let mut ctx = context(None);
        ctx.reference_time_type = Some(ReferenceTimeType::AnalysisStartTime);
        let mut assembler = SeriesAssembler::new(ctx, Arc::new(Scalar));
        assembler.accept(row(1, 1, 1)).unwrap();
        let series = assembler.finish().unwrap().remove(0);
        assert!(series.reference_time(ReferenceTimeType::AnalysisStartTime).is_some());
        assert!(series.reference_time(ReferenceTimeType::T0).is_none());
    }

    #[test]
    fn test_scale_change_within_series_is_fatal() {
        let mut assembler = SeriesAssembler::new(context(None), Arc::new(Scalar));
        assembler.accept(scaled(row(1, 1, 1), 6, "MEAN")).unwrap();
        let err = assembler.accept(scaled(row(1, 2, 1), 24, "MEAN")).unwrap_err();
        assert!(err.is_time_scale_error());
        assert!(err.to_string().contains("series 1"));
        // The partial series is discarded
        assert!(assembler.finish().unwrap().is_empty());
    }

    #[test]
    fn test_scale_may_differ_between_series() {
        let mut assembler = SeriesAssembler::new(context(None), Arc::new(Scalar));
        assembler.accept(scaled(row(1, 1, 1), 6, "MEAN")).unwrap();
        let completed = assembler.accept(scaled(row(2, 1, 1), 24, "TOTAL")).unwrap();
        assert_eq!(completed.len(), 1);
    }

    #[test]
    fn test_decreasing_series_id_is_detected() {
        let mut assembler = SeriesAssembler::new(context(None), Arc::new(Scalar));
        assembler.accept(row(5, 1, 1)).unwrap();
        let err = assembler.accept(row(4, 1, 1)).unwrap_err();
        assert!(matches!(err, RetrievalError::OutOfOrder { previous: 5, next: 4, .. }));
    }

    #[test]
    fn test_zero_occurrences_rejected() {
        let mut assembler = SeriesAssembler::new(context(None), Arc::new(Scalar));
        assert!(assembler.accept(row(1, 1, 0)).is_err());
    }

    #[test]
    fn test_unknown_feature_is_an_access_error() {
        let mut assembler = SeriesAssembler::new(context(None), Arc::new(Scalar));
        let mut r = row(1, 1, 1);
        r.feature_id = 99;
        assert!(assembler.accept(r).unwrap_err().is_access());
    }

    #[test]
    fn test_duplicate_valid_time_rejected() {
        let mut assembler = SeriesAssembler::new(context(None), Arc::new(Scalar));
        assembler.accept(row(1, 1, 1)).unwrap();
        let err = assembler.accept(row(1, 1, 1)).unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidRow { series_id: 1, .. }));
    }
}
