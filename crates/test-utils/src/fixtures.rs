//! Common test fixtures for retrieval tests.
//!
//! This module provides pre-defined identifiers and a populated identifier
//! cache that match the rows built by [`crate::generators`].

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::io::Write;
use std::sync::Arc;

use hydro_common::{DatasetOrientation, Feature};
use retrieval::{
    IdentifierCache, NoopObserver, QueryBackend, RetrievalRequest, RetrievalServices,
    RetrievalSettings,
};

/// Identifiers stored in the fixture cache.
pub mod ids {
    pub const PROJECT: i64 = 1;

    /// Feature "DRRC2"
    pub const DRRC2: i64 = 10;

    /// Feature "DOLC2"
    pub const DOLC2: i64 = 11;

    /// Unit "CMS"
    pub const CMS: i64 = 20;

    /// Ensemble members, labelled by their historical year.
    pub const MEMBER_1985: i64 = 31;
    pub const MEMBER_1986: i64 = 32;
    pub const MEMBER_1987: i64 = 33;
}

pub const VARIABLE: &str = "streamflow";

/// Midnight on 1 January 2023, the origin of every fixture time.
pub fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

/// The origin plus some hours.
pub fn at(hours: i64) -> DateTime<Utc> {
    origin() + Duration::hours(hours)
}

pub fn drrc2() -> Feature {
    Feature::new("DRRC2").with_description("Dolores River at Rico")
}

pub fn dolc2() -> Feature {
    Feature::new("DOLC2")
}

/// A cache holding the fixture features, unit and members.
pub fn fixture_cache() -> Arc<IdentifierCache> {
    let cache = IdentifierCache::new();
    cache
        .insert_feature(ids::DRRC2, drrc2())
        .and_then(|_| cache.insert_feature(ids::DOLC2, dolc2()))
        .and_then(|_| cache.insert_unit(ids::CMS, "CMS"))
        .and_then(|_| cache.insert_member(ids::MEMBER_1985, "1985"))
        .and_then(|_| cache.insert_member(ids::MEMBER_1986, "1986"))
        .and_then(|_| cache.insert_member(ids::MEMBER_1987, "1987"))
        .expect("fixture cache should accept fresh entries");
    Arc::new(cache)
}

/// Services over a backend, the fixture cache and a silent observer.
pub fn fixture_services(backend: Arc<dyn QueryBackend>) -> RetrievalServices {
    RetrievalServices::new(backend, fixture_cache(), RetrievalSettings::default())
        .with_observer(Arc::new(NoopObserver))
}

/// A request for streamflow at DRRC2.
pub fn fixture_request(orientation: DatasetOrientation) -> RetrievalRequest {
    RetrievalRequest::new(ids::PROJECT, orientation, VARIABLE).with_feature(drrc2())
}

/// Write a YAML settings file into a fresh temporary directory.
///
/// The directory is removed when the returned handle is dropped.
pub fn settings_file(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("retrieval.yaml");
    let mut file = std::fs::File::create(&path).expect("Failed to create settings file");
    file.write_all(contents.as_bytes())
        .expect("Failed to write settings file");
    (dir, path)
}
