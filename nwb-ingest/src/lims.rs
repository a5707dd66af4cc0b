//! LIMS (Postgres) session record source
//!
//! Query results are decoded column by column into `Table`s using the
//! statement's column metadata, so empty results still carry their columns
//! and unit metrics are passed through without a fixed schema. A column of
//! a Postgres type with no frame counterpart fails the query with a schema
//! error naming the column.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use nwb_core::config::DatabaseConfig;
use nwb_core::table::{datetime_series, Table};
use nwb_core::{NwbError, Result, SessionRecord};
use polars::prelude::{DataType, IntoSeries, ListChunked, NamedFrom, Series};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column as _, Decode, Executor, PgPool, Postgres, Row, Statement, Type, TypeInfo};

use crate::source::SessionRecordSource;

const SESSION_RECORD_QUERY: &str = r#"
    SELECT es.id::bigint AS id,
           es.name,
           es.date_of_acquisition::timestamptz AS date_of_acquisition,
           es.created_at::timestamptz AS created_at
    FROM ecephys_sessions es
    WHERE es.id = $1
"#;

const SESSION_QUERY: &str = r#"
    SELECT es.id, es.name, es.date_of_acquisition, es.created_at
    FROM ecephys_sessions es
    WHERE es.id = ANY($1)
    ORDER BY es.id
"#;

const PROBE_QUERY: &str = r#"
    SELECT ep.id, ep.name, ep.ecephys_session_id
    FROM ecephys_probes ep
    WHERE ep.ecephys_session_id = ANY($1)
    ORDER BY ep.id
"#;

const CHANNEL_QUERY: &str = r#"
    SELECT ec.id,
           ec.ecephys_probe_id AS probe_id,
           ec.local_index,
           ec.probe_vertical_position,
           ec.probe_horizontal_position,
           ec.valid_data
    FROM ecephys_channels ec
    JOIN ecephys_probes ep ON ep.id = ec.ecephys_probe_id
    WHERE ep.ecephys_session_id = $1
    ORDER BY ec.id
"#;

const UNIT_QUERY: &str = r#"
    SELECT eu.*
    FROM ecephys_units eu
    JOIN ecephys_channels ec ON ec.id = eu.ecephys_channel_id
    JOIN ecephys_probes ep ON ep.id = ec.ecephys_probe_id
    WHERE ep.ecephys_session_id = $1
    ORDER BY eu.id
"#;

pub struct LimsSessionSource {
    pool: PgPool,
}

impl LimsSessionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn health_check(&self) -> Result<String> {
        let row: (String,) = sqlx::query_as("SELECT version()")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn fetch_table<T>(&self, sql: &str, param: T) -> Result<Table>
    where
        T: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
    {
        let statement = (&self.pool).prepare(sql).await?;
        let columns: Vec<(String, String)> = statement
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.type_info().name().to_string()))
            .collect();
        let rows = statement.query().bind(param).fetch_all(&self.pool).await?;
        rows_to_table(&columns, &rows)
    }
}

#[async_trait]
impl SessionRecordSource for LimsSessionSource {
    async fn get_session(&self, session_id: i64) -> Result<SessionRecord> {
        sqlx::query_as::<_, SessionRecord>(SESSION_RECORD_QUERY)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| NwbError::NotFound(format!("ecephys session {}", session_id)))
    }

    async fn get_session_table(&self, session_ids: &[i64]) -> Result<Table> {
        self.fetch_table(SESSION_QUERY, session_ids.to_vec()).await
    }

    async fn get_probe_table(&self, session_ids: &[i64]) -> Result<Table> {
        self.fetch_table(PROBE_QUERY, session_ids.to_vec()).await
    }

    async fn get_channel_table(&self, session_id: i64) -> Result<Table> {
        self.fetch_table(CHANNEL_QUERY, session_id).await
    }

    async fn get_unit_table(&self, session_id: i64) -> Result<Table> {
        self.fetch_table(UNIT_QUERY, session_id).await
    }

    fn name(&self) -> &str {
        "lims"
    }
}

fn cells<'r, T>(rows: &'r [PgRow], index: usize) -> Result<Vec<Option<T>>>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    Ok(rows
        .iter()
        .map(|row| row.try_get::<Option<T>, _>(index))
        .collect::<std::result::Result<Vec<_>, _>>()?)
}

fn widen<T: Into<i64>>(values: Vec<Option<T>>) -> Vec<Option<i64>> {
    values.into_iter().map(|v| v.map(Into::into)).collect()
}

fn list_series<T>(name: &str, inner: DataType, values: Vec<Option<Vec<T>>>) -> Result<Series>
where
    Series: NamedFrom<Vec<T>, [T]>,
{
    let dtype = DataType::List(Box::new(inner));
    if values.is_empty() {
        return Ok(Series::new_empty(name.into(), &dtype));
    }
    let lists: ListChunked = values
        .into_iter()
        .map(|v| v.map(|v| Series::new("".into(), v)))
        .collect();
    Ok(lists
        .with_name(name.into())
        .into_series()
        .cast(&dtype)?)
}

/// Decode one result column into a series named `name`.
pub fn decode_column(rows: &[PgRow], index: usize, name: &str, type_name: &str) -> Result<Series> {
    let series = match type_name {
        "INT2" => Series::new(name.into(), widen(cells::<i16>(rows, index)?)),
        "INT4" => Series::new(name.into(), widen(cells::<i32>(rows, index)?)),
        "INT8" => Series::new(name.into(), cells::<i64>(rows, index)?),
        "FLOAT4" => Series::new(name.into(), cells::<f32>(rows, index)?)
            .cast(&DataType::Float64)?,
        "FLOAT8" => Series::new(name.into(), cells::<f64>(rows, index)?),
        "BOOL" => Series::new(name.into(), cells::<bool>(rows, index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            Series::new(name.into(), cells::<String>(rows, index)?)
        }
        "TIMESTAMPTZ" => datetime_series(name, cells::<DateTime<Utc>>(rows, index)?)?,
        "TIMESTAMP" => datetime_series(
            name,
            cells::<NaiveDateTime>(rows, index)?
                .into_iter()
                .map(|t| t.map(|t| t.and_utc()))
                .collect(),
        )?,
        "INT4[]" => {
            let values = cells::<Vec<i32>>(rows, index)?
                .into_iter()
                .map(|v| v.map(|v| v.into_iter().map(i64::from).collect::<Vec<_>>()))
                .collect();
            list_series(name, DataType::Int64, values)?
        }
        "INT8[]" => list_series(name, DataType::Int64, cells::<Vec<i64>>(rows, index)?)?,
        "FLOAT4[]" => list_series(name, DataType::Float64, cells::<Vec<f32>>(rows, index)?)?,
        "FLOAT8[]" => list_series(name, DataType::Float64, cells::<Vec<f64>>(rows, index)?)?,
        "TEXT[]" | "VARCHAR[]" => {
            list_series(name, DataType::String, cells::<Vec<String>>(rows, index)?)?
        }
        other => {
            return Err(NwbError::schema(format!(
                "column '{}' has unsupported Postgres type {}",
                name, other
            )))
        }
    };
    Ok(series)
}

fn rows_to_table(columns: &[(String, String)], rows: &[PgRow]) -> Result<Table> {
    let series = columns
        .iter()
        .enumerate()
        .map(|(index, (name, type_name))| decode_column(rows, index, name, type_name))
        .collect::<Result<Vec<_>>>()?;
    Table::new(series)
}
