//! Channel table normalization
//!
//! Turns a raw `ecephys_channels` query result into the shape the electrode
//! table needs: keyed by electrode id, with empty group columns for the
//! assembler to fill and constant placeholder columns for measurements LIMS
//! does not hold yet.

use nwb_core::config::{ChannelIdScheme, PlaceholderConfig};
use nwb_core::table::Table;
use nwb_core::Result;
use polars::prelude::{NamedFrom, Series};

pub const CHANNEL_KEY: &str = "id";
pub const GROUP_COLUMN: &str = "group";
pub const GROUP_NAME_COLUMN: &str = "group_name";

/// Maps a LIMS channel id (and its row position) to the electrode id written to the document.
///
/// LIMS channel ids are not tracked as globally valid electrode ids, so the
/// mapping is injectable until they are.
pub trait IdMapper {
    fn map_id(&self, key: i64, row: usize) -> i64;
}

impl<F> IdMapper for F
where
    F: Fn(i64, usize) -> i64,
{
    fn map_id(&self, key: i64, row: usize) -> i64 {
        self(key, row)
    }
}

/// Electrode id = LIMS channel id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryKeyIds;

impl IdMapper for PrimaryKeyIds {
    fn map_id(&self, key: i64, _row: usize) -> i64 {
        key
    }
}

/// Electrode id = row position.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowIndexIds;

impl IdMapper for RowIndexIds {
    fn map_id(&self, _key: i64, row: usize) -> i64 {
        row as i64
    }
}

pub fn id_mapper_for(scheme: ChannelIdScheme) -> Box<dyn IdMapper + Send + Sync> {
    match scheme {
        ChannelIdScheme::PrimaryKey => Box::new(PrimaryKeyIds),
        ChannelIdScheme::RowIndex => Box::new(RowIndexIds),
    }
}

/// Build the normalized channel table. `channels` is left untouched.
pub fn normalize_channel_table(
    channels: &Table,
    placeholders: &PlaceholderConfig,
    ids: &dyn IdMapper,
) -> Result<Table> {
    let mut table = channels.set_index_with(CHANNEL_KEY, |key, row| ids.map_id(key, row))?;
    let rows = table.num_rows();

    table = table
        .with_link_column(Series::new(GROUP_COLUMN.into(), vec![None::<&str>; rows]))?
        .with_column(Series::new(GROUP_NAME_COLUMN.into(), vec![""; rows]))?;

    for column in placeholders.columns(rows) {
        table = table.with_column(column)?;
    }

    tracing::debug!(
        "Normalized channel table: {} channels, columns {:?}",
        rows,
        table.column_names()
    );
    Ok(table)
}
