//! Data model shared across the hydrologic retrieval crates.

pub mod dataset;
pub mod error;
pub mod feature;
pub mod scale;
pub mod season;
pub mod series;
pub mod time;

pub use dataset::{DataType, DatasetOrientation, MISSING_DOUBLE};
pub use error::{DataModelError, DataModelResult};
pub use feature::{Ensemble, Feature};
pub use scale::{instantaneous_duration, TimeScale, TimeScaleFunction, INSTANTANEOUS_SECONDS};
pub use season::{MonthDay, Season};
pub use series::{Event, TimeSeries, TimeSeriesBuilder, TimeSeriesMetadata};
pub use time::{ReferenceTimeType, TimeWindowFilter};
