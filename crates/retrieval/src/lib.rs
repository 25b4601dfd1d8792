//! Streaming retrieval of hydrologic time-series from a relational store.
//!
//! A [`Retriever`] resolves a request into typed constraints, opens an
//! ordered scan through a [`QueryBackend`] and assembles the rows into
//! [`TimeSeries`](hydro_common::TimeSeries) values, one series at a time.

pub mod assembler;
pub mod backend;
pub mod cache;
pub mod config;
pub mod constraints;
pub mod error;
pub mod factory;
pub mod observer;
pub mod postgres;
pub mod retriever;
pub mod stream;
pub mod variants;

pub use assembler::{reconcile_time_scale, AssemblerContext, EventMapper, SeriesAssembler};
pub use backend::{
    MemberFilter, QueryBackend, RowCursor, RowShape, RowValue, SeriesQuery, SeriesRow,
};
pub use cache::{
    CacheStats, EnsembleLookup, FeatureLookup, IdentifierCache, LookupError, UnitLookup,
};
pub use config::RetrievalSettings;
pub use constraints::{resolve, ConstraintInputs, Predicate, ResolvedConstraints, TimePredicate};
pub use error::{BackendError, BackendResult, BoxError, RetrievalError, RetrievalResult};
pub use factory::{AnyRetriever, RetrieverFactory, Variant};
pub use observer::{MetricsObserver, NoopObserver, RetrievalLabel, RetrievalObserver, StreamSummary};
pub use postgres::PgQueryBackend;
pub use retriever::{RetrievalRequest, RetrievalServices, Retriever};
pub use stream::{SeriesStream, TimeSeriesStream};
pub use variants::{
    AnalysisOptions, AnalysisRetriever, DuplicatePolicy, EnsembleOptions, EnsembleRetriever,
    GriddedOptions, GriddedReadRequest, GriddedReader, GriddedRetriever, SingleValuedKind,
    SingleValuedRetriever,
};
