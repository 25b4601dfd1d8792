//! PostgreSQL implementation of the query backend.
//!
//! Each cursor runs its scan on a spawned task that owns one pooled
//! connection and forwards decoded rows through a bounded channel.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::backend::{QueryBackend, RowCursor, RowShape, RowValue, SeriesQuery, SeriesRow};
use crate::config::RetrievalSettings;
use crate::constraints::{ResolvedConstraints, SeasonColumn, SeasonPredicate, TimePredicate};
use crate::error::{BackendError, BackendResult};

const VALID_TIME: &str = "TS.initialization_date + INTERVAL '1 MINUTE' * TSV.lead";
const REFERENCE_TIME: &str = "TS.initialization_date";
const LEAD: &str = "TSV.lead";

/// Column expressions that predicates are applied to.
struct Columns {
    reference_time: &'static str,
    lead_minutes: &'static str,
    valid_time: &'static str,
}

const SERIES_COLUMNS: Columns = Columns {
    reference_time: REFERENCE_TIME,
    lead_minutes: LEAD,
    valid_time: VALID_TIME,
};

const SOURCE_COLUMNS: Columns = Columns {
    reference_time: "S.reference_time",
    lead_minutes: "S.lead",
    valid_time: "S.valid_time",
};

/// Query backend over the retrieval schema.
#[derive(Clone)]
pub struct PgQueryBackend {
    pool: PgPool,
    row_buffer: usize,
}

impl PgQueryBackend {
    /// Connect a pool sized from the settings.
    pub async fn connect(settings: &RetrievalSettings) -> BackendResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await?;

        Ok(Self::from_pool(pool, settings.row_buffer))
    }

    pub fn from_pool(pool: PgPool, row_buffer: usize) -> Self {
        Self {
            pool,
            row_buffer: row_buffer.max(1),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the retrieval tables if they do not exist.
    pub async fn migrate(&self) -> BackendResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl QueryBackend for PgQueryBackend {
    #[instrument(skip(self, query), fields(orientation = %query.orientation, shape = ?query.shape))]
    async fn open_cursor(&self, query: &SeriesQuery) -> BackendResult<Box<dyn RowCursor>> {
        let mut builder = scan_sql(query);
        let shape = query.shape;
        let mut conn = self.pool.acquire().await?;
        let (tx, rx) = mpsc::channel(self.row_buffer);

        debug!(sql = builder.sql(), "Opening retrieval cursor");

        let task = tokio::spawn(async move {
            let mut rows = builder.build().fetch(&mut *conn);
            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => {
                        let decoded = decode_row(&row, shape);
                        let failed = decoded.is_err();
                        if tx.send(decoded).await.is_err() || failed {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(BackendError::from(e))).await;
                        break;
                    }
                }
            }
        });

        Ok(Box::new(PgRowCursor {
            rx,
            task,
            joined: false,
        }))
    }

    #[instrument(skip(self, query), fields(orientation = %query.orientation))]
    async fn series_ids(&self, query: &SeriesQuery) -> BackendResult<Vec<i64>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT DISTINCT TS.timeseries_id");
        push_series_from(&mut builder, query);
        builder.push(" ORDER BY TS.timeseries_id");

        let ids = builder
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await?;

        debug!(count = ids.len(), "Listed series identifiers");
        Ok(ids)
    }

    #[instrument(skip(self, query), fields(orientation = %query.orientation))]
    async fn source_paths(&self, query: &SeriesQuery) -> BackendResult<Vec<String>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT DISTINCT S.path ");
        push_project_sources(&mut builder, query);
        builder.push(" INNER JOIN source S ON S.source_id = PS.source_id");
        builder.push(" WHERE S.is_point_data = FALSE");
        builder.push(" AND S.variable_name = ");
        builder.push_bind(query.variable_name.clone());
        push_constraints(&mut builder, &query.constraints, &SOURCE_COLUMNS);
        builder.push(" ORDER BY S.path");

        let paths = builder
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;

        debug!(count = paths.len(), "Listed gridded source paths");
        Ok(paths)
    }
}

/// A cursor whose rows come from a spawned scan task.
struct PgRowCursor {
    rx: mpsc::Receiver<BackendResult<SeriesRow>>,
    task: JoinHandle<()>,
    joined: bool,
}

#[async_trait]
impl RowCursor for PgRowCursor {
    async fn next_row(&mut self) -> BackendResult<Option<SeriesRow>> {
        match self.rx.recv().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(e),
            None if self.joined => Ok(None),
            None => {
                // The sender is gone; a panicked or cancelled task is not an exhausted scan
                self.joined = true;
                match (&mut self.task).await {
                    Ok(()) => Ok(None),
                    Err(e) => Err(BackendError::Cancelled(e.to_string())),
                }
            }
        }
    }

    fn close(self: Box<Self>) {
        debug!(joined = self.joined, "Closing retrieval cursor");
    }
}

impl Drop for PgRowCursor {
    fn drop(&mut self) {
        self.rx.close();
        // Dropping the task's connection returns it to the pool
        self.task.abort();
    }
}

/// The full ordered scan for one query.
fn scan_sql(query: &SeriesQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new("SELECT TS.timeseries_id AS series_id, ");
    builder.push(VALID_TIME);
    builder.push(
        " AS valid_time, \
         CASE WHEN TS.reference_time_type IS NULL THEN NULL \
         ELSE TS.initialization_date END AS reference_time, \
         TS.reference_time_type, \
         CASE WHEN TS.reference_time_type IS NULL THEN NULL \
         ELSE TSV.lead::BIGINT END AS lead_minutes, \
         TS.scale_period::BIGINT AS scale_period_minutes, \
         TS.scale_function, \
         TS.feature_id, \
         TS.measurementunit_id, \
         PS.occurrences::INTEGER AS occurrences, ",
    );

    match query.shape {
        RowShape::SingleValued => {
            builder.push("TSV.series_value");
        }
        RowShape::Ensemble => {
            builder.push(
                "ARRAY_AGG(TSV.ensemble_id ORDER BY TSV.ensemble_id) AS member_ids, \
                 ARRAY_AGG(TSV.series_value ORDER BY TSV.ensemble_id) AS member_values",
            );
        }
    }

    push_series_from(&mut builder, query);

    match query.shape {
        RowShape::SingleValued => {
            builder.push(" AND TSV.ensemble_id IS NULL");
        }
        RowShape::Ensemble => {
            builder.push(" AND TSV.ensemble_id IS NOT NULL");
            if !query.members.include.is_empty() {
                builder.push(" AND TSV.ensemble_id = ANY(");
                builder.push_bind(query.members.include.clone());
                builder.push(")");
            }
            if !query.members.exclude.is_empty() {
                builder.push(" AND NOT (TSV.ensemble_id = ANY(");
                builder.push_bind(query.members.exclude.clone());
                builder.push("))");
            }
            builder.push(
                " GROUP BY TS.timeseries_id, TSV.lead, TS.initialization_date, \
                 TS.reference_time_type, TS.scale_period, TS.scale_function, \
                 TS.feature_id, TS.measurementunit_id, PS.occurrences",
            );
        }
    }

    builder.push(" ORDER BY series_id, valid_time");
    builder
}

/// Registrations of each source in the project, counted per source.
fn push_project_sources(builder: &mut QueryBuilder<'static, Postgres>, query: &SeriesQuery) {
    builder.push(
        " FROM (SELECT source_id, COUNT(*) AS occurrences FROM project_source \
         WHERE project_id = ",
    );
    builder.push_bind(query.project_id);
    builder.push(" AND member = ");
    builder.push_bind(query.orientation.as_str());
    builder.push(" GROUP BY source_id) AS PS");
}

fn push_series_from(builder: &mut QueryBuilder<'static, Postgres>, query: &SeriesQuery) {
    push_project_sources(builder, query);
    builder.push(
        " INNER JOIN time_series TS ON TS.source_id = PS.source_id \
         INNER JOIN time_series_value TSV ON TSV.timeseries_id = TS.timeseries_id \
         WHERE TS.variable_name = ",
    );
    builder.push_bind(query.variable_name.clone());
    builder.push(" AND TS.feature_id = ANY(");
    builder.push_bind(query.feature_ids.clone());
    builder.push(")");

    if let Some(ids) = &query.series_ids {
        builder.push(" AND TS.timeseries_id = ANY(");
        builder.push_bind(ids.clone());
        builder.push(")");
    }

    push_constraints(builder, &query.constraints, &SERIES_COLUMNS);
}

fn push_constraints(
    builder: &mut QueryBuilder<'static, Postgres>,
    constraints: &ResolvedConstraints,
    columns: &Columns,
) {
    if let Some(reference) = constraints.reference_time {
        push_bounds(builder, columns.reference_time, reference);
    }

    if let Some(lead) = constraints.lead_duration {
        let minutes = match lead {
            TimePredicate::Equal(d) => TimePredicate::Equal(d.num_minutes()),
            TimePredicate::Range { after, up_to } => TimePredicate::Range {
                after: after.map(|d| d.num_minutes()),
                up_to: up_to.map(|d| d.num_minutes()),
            },
        };
        push_bounds(builder, columns.lead_minutes, minutes);
    }

    if let Some(valid) = constraints.valid_time {
        push_bounds(builder, columns.valid_time, valid.bounds);
    }

    if let Some(season) = constraints.season {
        let column = match season.column {
            SeasonColumn::ReferenceTime => columns.reference_time,
            SeasonColumn::ValidTime => columns.valid_time,
        };
        push_season(builder, column, &season);
    }
}

fn push_bounds<T>(
    builder: &mut QueryBuilder<'static, Postgres>,
    column: &str,
    bounds: TimePredicate<T>,
) where
    T: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
{
    match bounds {
        TimePredicate::Equal(t) => {
            builder.push(format!(" AND {} = ", column));
            builder.push_bind(t);
        }
        TimePredicate::Range { after, up_to } => {
            if let Some(a) = after {
                builder.push(format!(" AND {} > ", column));
                builder.push_bind(a);
            }
            if let Some(u) = up_to {
                builder.push(format!(" AND {} <= ", column));
                builder.push_bind(u);
            }
        }
    }
}

fn push_season(
    builder: &mut QueryBuilder<'static, Postgres>,
    column: &str,
    season: &SeasonPredicate,
) {
    let month = format!("EXTRACT(MONTH FROM {})", column);
    let day = format!("EXTRACT(DAY FROM {})", column);
    let (earliest, latest, wraps) = season.ordered_days();
    let (em, ed) = (earliest.month() as i32, earliest.day() as i32);
    let (lm, ld) = (latest.month() as i32, latest.day() as i32);

    if wraps {
        // On or before the earliest day, or on or after the latest day
        builder.push(format!(" AND (({m} < ", m = month));
        builder.push_bind(em);
        builder.push(format!(" OR ({m} = ", m = month));
        builder.push_bind(em);
        builder.push(format!(" AND {d} <= ", d = day));
        builder.push_bind(ed);
        builder.push(format!(")) OR ({m} > ", m = month));
        builder.push_bind(lm);
        builder.push(format!(" OR ({m} = ", m = month));
        builder.push_bind(lm);
        builder.push(format!(" AND {d} >= ", d = day));
        builder.push_bind(ld);
        builder.push(")))");
    } else {
        builder.push(format!(" AND ({m} > ", m = month));
        builder.push_bind(em);
        builder.push(format!(" OR ({m} = ", m = month));
        builder.push_bind(em);
        builder.push(format!(" AND {d} >= ", d = day));
        builder.push_bind(ed);
        builder.push(format!(")) AND ({m} < ", m = month));
        builder.push_bind(lm);
        builder.push(format!(" OR ({m} = ", m = month));
        builder.push_bind(lm);
        builder.push(format!(" AND {d} <= ", d = day));
        builder.push_bind(ld);
        builder.push("))");
    }
}

fn decode_row(row: &PgRow, shape: RowShape) -> BackendResult<SeriesRow> {
    let value = match shape {
        RowShape::SingleValued => RowValue::Single(row.try_get::<Option<f64>, _>("series_value")?),
        RowShape::Ensemble => {
            let ids: Vec<i64> = row.try_get("member_ids")?;
            let values: Vec<Option<f64>> = row.try_get("member_values")?;
            if ids.len() != values.len() {
                return Err(BackendError::Other(format!(
                    "{} ensemble members but {} values",
                    ids.len(),
                    values.len()
                )));
            }
            RowValue::Ensemble(ids.into_iter().zip(values).collect())
        }
    };

    let lead: Option<i64> = row.try_get("lead_minutes")?;
    let period: Option<i64> = row.try_get("scale_period_minutes")?;
    let valid_time: DateTime<Utc> = row.try_get("valid_time")?;
    let series_id: i64 = row.try_get("series_id")?;

    if lead.is_none() && period.is_none() && matches!(value, RowValue::Single(None)) {
        warn!(series_id, %valid_time, "Row has neither a value nor a time scale");
    }

    Ok(SeriesRow {
        series_id,
        valid_time,
        reference_time: row.try_get("reference_time")?,
        reference_time_type: row.try_get("reference_time_type")?,
        lead_duration: lead.map(Duration::minutes),
        scale_period: period.map(Duration::minutes),
        scale_function: row.try_get("scale_function")?,
        feature_id: row.try_get("feature_id")?,
        measurement_unit_id: row.try_get("measurementunit_id")?,
        occurrences: row.try_get("occurrences")?,
        value,
    })
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS measurement_unit (
    measurementunit_id BIGSERIAL PRIMARY KEY,
    unit_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS feature (
    feature_id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    wkt TEXT
);

CREATE TABLE IF NOT EXISTS ensemble (
    ensemble_id BIGSERIAL PRIMARY KEY,
    ensemble_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS source (
    source_id BIGSERIAL PRIMARY KEY,
    path TEXT NOT NULL,
    variable_name TEXT,
    is_point_data BOOLEAN NOT NULL DEFAULT TRUE,
    reference_time TIMESTAMPTZ,
    lead INTEGER,
    valid_time TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS project_source (
    project_id BIGINT NOT NULL,
    source_id BIGINT NOT NULL REFERENCES source(source_id) ON DELETE CASCADE,
    member TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_project_source_member ON project_source(project_id, member);

CREATE TABLE IF NOT EXISTS time_series (
    timeseries_id BIGSERIAL PRIMARY KEY,
    source_id BIGINT NOT NULL REFERENCES source(source_id) ON DELETE CASCADE,
    feature_id BIGINT NOT NULL REFERENCES feature(feature_id),
    measurementunit_id BIGINT NOT NULL REFERENCES measurement_unit(measurementunit_id),
    variable_name TEXT NOT NULL,
    initialization_date TIMESTAMPTZ NOT NULL,
    reference_time_type TEXT,
    scale_period INTEGER,
    scale_function TEXT
);

CREATE INDEX IF NOT EXISTS idx_time_series_lookup
    ON time_series(source_id, variable_name, feature_id);

CREATE TABLE IF NOT EXISTS time_series_value (
    timeseries_id BIGINT NOT NULL REFERENCES time_series(timeseries_id) ON DELETE CASCADE,
    lead INTEGER NOT NULL,
    ensemble_id BIGINT REFERENCES ensemble(ensemble_id),
    series_value DOUBLE PRECISION
);

CREATE INDEX IF NOT EXISTS idx_time_series_value_series ON time_series_value(timeseries_id, lead)
"#;
