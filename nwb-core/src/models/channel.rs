use polars::prelude::{NamedFrom, Series};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::table::Table;

/// One row of `ecephys_channels`, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelRecord {
    pub id: i64,
    pub probe_id: i64,
    pub local_index: i64,
    pub valid_data: bool,
}

impl ChannelRecord {
    pub fn table(channels: &[ChannelRecord]) -> Result<Table> {
        Table::new(vec![
            Series::new("id".into(), channels.iter().map(|c| c.id).collect::<Vec<_>>()),
            Series::new("probe_id".into(), channels.iter().map(|c| c.probe_id).collect::<Vec<_>>()),
            Series::new(
                "local_index".into(),
                channels.iter().map(|c| c.local_index).collect::<Vec<_>>(),
            ),
            Series::new(
                "valid_data".into(),
                channels.iter().map(|c| c.valid_data).collect::<Vec<_>>(),
            ),
        ])
    }
}
