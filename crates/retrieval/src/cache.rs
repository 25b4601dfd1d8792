//! Identifier lookups for features, measurement units and ensemble members.
//!
//! Lookups are read concurrently by every open stream. Entries are only ever
//! added, never changed or removed, during a retrieval session.

use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info};

use hydro_common::Feature;

/// A failed identifier lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("No {kind} found for '{key}'")]
    NotFound { kind: &'static str, key: String },

    #[error("Conflicting {kind} for '{key}'")]
    Conflict { kind: &'static str, key: String },

    #[error("The {0} cache is unavailable after a writer panicked")]
    Poisoned(&'static str),
}

impl LookupError {
    fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }
}

pub trait FeatureLookup: Send + Sync {
    fn feature(&self, id: i64) -> Result<Feature, LookupError>;

    fn feature_id(&self, feature: &Feature) -> Result<i64, LookupError>;
}

pub trait UnitLookup: Send + Sync {
    fn unit_name(&self, id: i64) -> Result<String, LookupError>;
}

pub trait EnsembleLookup: Send + Sync {
    fn member_name(&self, id: i64) -> Result<String, LookupError>;

    fn member_id(&self, name: &str) -> Result<i64, LookupError>;
}

/// Hit and miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheStats {
    /// Hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// In-memory implementation of every lookup.
#[derive(Debug, Default)]
pub struct IdentifierCache {
    features: RwLock<HashMap<i64, Feature>>,
    feature_ids: RwLock<HashMap<String, i64>>,
    units: RwLock<HashMap<i64, String>>,
    members: RwLock<HashMap<i64, String>>,
    member_ids: RwLock<HashMap<String, i64>>,
    stats: CacheStats,
}

#[derive(FromRow)]
struct FeatureRow {
    feature_id: i64,
    name: String,
    description: Option<String>,
    wkt: Option<String>,
}

#[derive(FromRow)]
struct NamedRow {
    id: i64,
    name: String,
}

fn read<K, V, Q>(
    map: &RwLock<HashMap<K, V>>,
    key: &Q,
    kind: &'static str,
    stats: &CacheStats,
) -> Result<V, LookupError>
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + std::fmt::Display + ?Sized,
    V: Clone,
{
    let guard = map.read().map_err(|_| LookupError::Poisoned(kind))?;
    match guard.get(key) {
        Some(v) => {
            stats.hits.fetch_add(1, Ordering::Relaxed);
            Ok(v.clone())
        }
        None => {
            stats.misses.fetch_add(1, Ordering::Relaxed);
            Err(LookupError::not_found(kind, key.to_string()))
        }
    }
}

/// Fails when the key already maps to a different value.
fn check<K, V>(
    map: &RwLock<HashMap<K, V>>,
    key: &K,
    value: &V,
    kind: &'static str,
) -> Result<(), LookupError>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
    V: PartialEq,
{
    let guard = map.read().map_err(|_| LookupError::Poisoned(kind))?;
    match guard.get(key) {
        Some(existing) if existing != value => Err(LookupError::Conflict {
            kind,
            key: key.to_string(),
        }),
        _ => Ok(()),
    }
}

fn append<K, V>(
    map: &RwLock<HashMap<K, V>>,
    key: K,
    value: V,
    kind: &'static str,
) -> Result<(), LookupError>
where
    K: std::hash::Hash + Eq,
{
    let mut guard = map.write().map_err(|_| LookupError::Poisoned(kind))?;
    guard.entry(key).or_insert(value);
    Ok(())
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate a cache from the database in one pass.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let cache = Self::new();

        let features: Vec<FeatureRow> =
            sqlx::query_as("SELECT feature_id, name, description, wkt FROM feature")
                .fetch_all(pool)
                .await?;
        let units: Vec<NamedRow> = sqlx::query_as(
            "SELECT measurementunit_id AS id, unit_name AS name FROM measurement_unit",
        )
        .fetch_all(pool)
        .await?;
        let members: Vec<NamedRow> =
            sqlx::query_as("SELECT ensemble_id AS id, ensemble_name AS name FROM ensemble")
                .fetch_all(pool)
                .await?;

        info!(
            features = features.len(),
            units = units.len(),
            members = members.len(),
            "Loaded identifier cache"
        );

        let protocol = |e: LookupError| sqlx::Error::Protocol(e.to_string());
        for row in features {
            let feature = Feature {
                name: row.name,
                description: row.description,
                wkt: row.wkt,
            };
            cache
                .insert_feature(row.feature_id, feature)
                .map_err(protocol)?;
        }
        for row in units {
            cache.insert_unit(row.id, row.name).map_err(protocol)?;
        }
        for row in members {
            cache.insert_member(row.id, row.name).map_err(protocol)?;
        }

        Ok(cache)
    }

    /// Add a feature. Repeating an identical entry is a no-op; mapping a
    /// known id or name to something else is a conflict.
    pub fn insert_feature(&self, id: i64, feature: Feature) -> Result<(), LookupError> {
        check(&self.features, &id, &feature, "feature")?;
        check(&self.feature_ids, &feature.name, &id, "feature id")?;
        append(&self.feature_ids, feature.name.clone(), id, "feature id")?;
        append(&self.features, id, feature, "feature")
    }

    pub fn insert_unit(&self, id: i64, name: impl Into<String>) -> Result<(), LookupError> {
        let name = name.into();
        check(&self.units, &id, &name, "measurement unit")?;
        append(&self.units, id, name, "measurement unit")
    }

    pub fn insert_member(&self, id: i64, name: impl Into<String>) -> Result<(), LookupError> {
        let name = name.into();
        check(&self.members, &id, &name, "ensemble member")?;
        check(&self.member_ids, &name, &id, "ensemble member id")?;
        append(&self.member_ids, name.clone(), id, "ensemble member id")?;
        append(&self.members, id, name, "ensemble member")
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl FeatureLookup for IdentifierCache {
    fn feature(&self, id: i64) -> Result<Feature, LookupError> {
        read(&self.features, &id, "feature", &self.stats)
    }

    fn feature_id(&self, feature: &Feature) -> Result<i64, LookupError> {
        let id = read(&self.feature_ids, feature.name.as_str(), "feature id", &self.stats)?;
        debug!(feature = %feature, id, "Resolved feature id");
        Ok(id)
    }
}

impl UnitLookup for IdentifierCache {
    fn unit_name(&self, id: i64) -> Result<String, LookupError> {
        read(&self.units, &id, "measurement unit", &self.stats)
    }
}

impl EnsembleLookup for IdentifierCache {
    fn member_name(&self, id: i64) -> Result<String, LookupError> {
        read(&self.members, &id, "ensemble member", &self.stats)
    }

    fn member_id(&self, name: &str) -> Result<i64, LookupError> {
        read(&self.member_ids, name, "ensemble member id", &self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lookup_hits_and_misses() {
        let cache = IdentifierCache::new();
        cache.insert_feature(1, Feature::new("DRRC2")).unwrap();
        cache.insert_unit(5, "CMS").unwrap();

        assert_eq!(cache.feature(1).unwrap().name, "DRRC2");
        assert_eq!(cache.feature_id(&Feature::new("DRRC2")).unwrap(), 1);
        assert_eq!(cache.unit_name(5).unwrap(), "CMS");
        assert_eq!(
            cache.unit_name(6),
            Err(LookupError::NotFound {
                kind: "measurement unit",
                key: "6".to_string()
            })
        );
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 3);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().hit_rate(), 75.0);
    }

    #[test]
    fn test_inserts_are_append_only() {
        let cache = IdentifierCache::new();
        cache.insert_member(1, "1985").unwrap();
        cache.insert_member(1, "1985").unwrap();
        assert_eq!(
            cache.insert_member(1, "1986"),
            Err(LookupError::Conflict {
                kind: "ensemble member",
                key: "1".to_string()
            })
        );
        assert_eq!(
            cache.insert_member(2, "1985"),
            Err(LookupError::Conflict {
                kind: "ensemble member id",
                key: "1985".to_string()
            })
        );
        assert_eq!(cache.member_name(1).unwrap(), "1985");
        assert_eq!(cache.member_id("1985").unwrap(), 1);
        assert!(cache.member_id("1986").is_err());
        assert!(cache.member_name(2).is_err());
    }

    #[test]
    fn test_conflicting_feature_and_unit_inserts_fail() {
        let cache = IdentifierCache::new();
        cache.insert_feature(1, Feature::new("DRRC2")).unwrap();
        cache.insert_unit(5, "CMS").unwrap();

        assert!(matches!(
            cache.insert_feature(1, Feature::new("DOLC2")),
            Err(LookupError::Conflict { kind: "feature", .. })
        ));
        assert!(matches!(
            cache.insert_feature(2, Feature::new("DRRC2")),
            Err(LookupError::Conflict { kind: "feature id", .. })
        ));
        assert!(matches!(
            cache.insert_unit(5, "CFS"),
            Err(LookupError::Conflict { kind: "measurement unit", .. })
        ));
        assert_eq!(cache.feature(1).unwrap().name, "DRRC2");
        assert_eq!(cache.unit_name(5).unwrap(), "CMS");
    }

    #[test]
    fn test_concurrent_reads() {
        let cache = Arc::new(IdentifierCache::new());
        for id in 0..100 {
            cache.insert_unit(id, format!("U{}", id)).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    (0..100).all(|id| {
                        cache
                            .unit_name(id)
                            .map(|n| n == format!("U{}", id))
                            .unwrap_or(false)
                    })
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
