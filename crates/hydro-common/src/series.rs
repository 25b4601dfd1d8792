//! Immutable time-series and the builder that produces them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{DataModelError, DataModelResult};
use crate::feature::Feature;
use crate::scale::TimeScale;
use crate::time::ReferenceTimeType;

/// A value at an instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<V> {
    pub time: DateTime<Utc>,
    pub value: V,
}

impl<V> Event<V> {
    pub fn new(time: DateTime<Utc>, value: V) -> Self {
        Self { time, value }
    }
}

/// Metadata shared by every event of one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesMetadata {
    pub reference_times: BTreeMap<ReferenceTimeType, DateTime<Utc>>,
    pub time_scale: Option<TimeScale>,
    pub variable_name: String,
    pub feature: Feature,
    pub unit: String,
}

impl TimeSeriesMetadata {
    pub fn new(
        variable_name: impl Into<String>,
        feature: Feature,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            reference_times: BTreeMap::new(),
            time_scale: None,
            variable_name: variable_name.into(),
            feature,
            unit: unit.into(),
        }
    }

    pub fn with_reference_time(mut self, kind: ReferenceTimeType, time: DateTime<Utc>) -> Self {
        self.reference_times.insert(kind, time);
        self
    }

    pub fn with_time_scale(mut self, time_scale: Option<TimeScale>) -> Self {
        self.time_scale = time_scale;
        self
    }

    /// The single reference time, if there is exactly one.
    pub fn sole_reference_time(&self) -> Option<(ReferenceTimeType, DateTime<Utc>)> {
        if self.reference_times.len() == 1 {
            self.reference_times.iter().next().map(|(k, v)| (*k, *v))
        } else {
            None
        }
    }
}

/// Events in strictly ascending time order plus their metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries<V> {
    metadata: TimeSeriesMetadata,
    events: Vec<Event<V>>,
}

impl<V> TimeSeries<V> {
    /// Build a series from events, checking their order.
    pub fn of(metadata: TimeSeriesMetadata, events: Vec<Event<V>>) -> DataModelResult<Self> {
        let mut builder = TimeSeriesBuilder::new().with_metadata(metadata);
        for event in events {
            builder.add_event(event)?;
        }
        builder.build()
    }

    pub fn metadata(&self) -> &TimeSeriesMetadata {
        &self.metadata
    }

    pub fn events(&self) -> &[Event<V>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn reference_time(&self, kind: ReferenceTimeType) -> Option<DateTime<Utc>> {
        self.metadata.reference_times.get(&kind).copied()
    }

    /// Duration from the given reference time to each event.
    pub fn events_by_duration(
        &self,
        kind: ReferenceTimeType,
    ) -> Option<Vec<(Duration, &Event<V>)>> {
        let reference = self.reference_time(kind)?;
        Some(
            self.events
                .iter()
                .map(|e| (e.time - reference, e))
                .collect(),
        )
    }

    pub fn into_parts(self) -> (TimeSeriesMetadata, Vec<Event<V>>) {
        (self.metadata, self.events)
    }
}

impl<V: Clone> TimeSeries<V> {
    /// A copy containing only the events that match.
    pub fn filter_events<F>(&self, mut keep: F) -> TimeSeries<V>
    where
        F: FnMut(&Event<V>) -> bool,
    {
        TimeSeries {
            metadata: self.metadata.clone(),
            events: self.events.iter().filter(|e| keep(e)).cloned().collect(),
        }
    }
}

/// Accumulates events for one series. Reusable after `build`.
#[derive(Debug)]
pub struct TimeSeriesBuilder<V> {
    metadata: Option<TimeSeriesMetadata>,
    events: Vec<Event<V>>,
}

impl<V> Default for TimeSeriesBuilder<V> {
    fn default() -> Self {
        Self {
            metadata: None,
            events: Vec::new(),
        }
    }
}

impl<V> TimeSeriesBuilder<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: TimeSeriesMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn set_metadata(&mut self, metadata: TimeSeriesMetadata) -> &mut Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn metadata(&self) -> Option<&TimeSeriesMetadata> {
        self.metadata.as_ref()
    }

    pub fn metadata_mut(&mut self) -> Option<&mut TimeSeriesMetadata> {
        self.metadata.as_mut()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn add_event(&mut self, event: Event<V>) -> DataModelResult<&mut Self> {
        if let Some(last) = self.events.last() {
            if event.time == last.time {
                return Err(DataModelError::DuplicateEvent(event.time));
            }
            if event.time < last.time {
                return Err(DataModelError::EventOutOfOrder {
                    previous: last.time,
                    next: event.time,
                });
            }
        }
        self.events.push(event);
        Ok(self)
    }

    /// Build the series and reset the builder.
    pub fn build(&mut self) -> DataModelResult<TimeSeries<V>> {
        let metadata = self
            .metadata
            .take()
            .ok_or_else(|| DataModelError::MissingMetadata("no metadata was set".to_string()))?;
        let events = std::mem::take(&mut self.events);
        Ok(TimeSeries { metadata, events })
    }

    pub fn clear(&mut self) {
        self.metadata = None;
        self.events.clear();
    }
}
