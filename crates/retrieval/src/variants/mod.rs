//! Retrievers for each shape of data.

pub mod analysis;
pub mod ensemble;
pub mod gridded;
pub mod single_valued;

pub use analysis::{AnalysisOptions, AnalysisRetriever, DuplicatePolicy};
pub use ensemble::{EnsembleMapper, EnsembleOptions, EnsembleRetriever};
pub use gridded::{GriddedOptions, GriddedReadRequest, GriddedReader, GriddedRetriever};
pub use single_valued::{ScalarMapper, SingleValuedKind, SingleValuedRetriever};
