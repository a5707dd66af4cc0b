use chrono::{DateTime, Utc};
use polars::prelude::{NamedFrom, Series};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::table::{datetime_series, Table};

/// One row of `ecephys_sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct SessionRecord {
    pub id: i64,
    pub name: Option<String>,
    pub date_of_acquisition: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn table(sessions: &[SessionRecord]) -> Result<Table> {
        Table::new(vec![
            Series::new("id".into(), sessions.iter().map(|s| s.id).collect::<Vec<_>>()),
            Series::new(
                "name".into(),
                sessions.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            ),
            datetime_series(
                "date_of_acquisition",
                sessions.iter().map(|s| s.date_of_acquisition).collect(),
            )?,
            datetime_series(
                "created_at",
                sessions.iter().map(|s| Some(s.created_at)).collect(),
            )?,
        ])
    }
}
