//! Session conversion: source records → normalized tables → document → file

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use nwb_core::io::{write_document, WriteMode};
use nwb_core::{LimsNwbConfig, NwbDocument, Result};

use crate::assemble::{add_units_to_document, build_session_document};
use crate::normalize::{id_mapper_for, normalize_channel_table};
use crate::source::SessionRecordSource;

/// Summary of one conversion
#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub session_id: i64,
    pub path: PathBuf,
    pub probes: usize,
    pub electrodes: usize,
    pub units: usize,
    pub elapsed_ms: u64,
}

/// `<session_id>.nwb` in the working directory.
pub fn default_nwb_path(session_id: i64) -> PathBuf {
    PathBuf::from(format!("{}.nwb", session_id))
}

/// Query one session and assemble its document. Nothing is written.
pub async fn build_document(
    source: &dyn SessionRecordSource,
    session_id: i64,
    config: &LimsNwbConfig,
) -> Result<NwbDocument> {
    let session = source.get_session(session_id).await?;
    let probes = source.get_probe_table(&[session_id]).await?;
    let raw_channels = source.get_channel_table(session_id).await?;
    let units = source.get_unit_table(session_id).await?;
    tracing::info!(
        "Fetched session {} from {}: {} probes, {} channels, {} units",
        session_id,
        source.name(),
        probes.num_rows(),
        raw_channels.num_rows(),
        units.num_rows()
    );

    let ids = id_mapper_for(config.channels.id_scheme);
    let channels = normalize_channel_table(&raw_channels, &config.placeholders, ids.as_ref())?;
    let units = units.set_index("id")?;

    let doc = build_session_document(&session, &config.document, Utc::now());
    add_units_to_document(doc, &probes, &channels, &units, &config.document.source)
}

/// Build the document for `session_id` and write it to `path`.
pub async fn convert_session(
    source: &dyn SessionRecordSource,
    session_id: i64,
    path: &Path,
    mode: WriteMode,
    config: &LimsNwbConfig,
) -> Result<ConversionReport> {
    let start = Instant::now();
    let doc = build_document(source, session_id, config).await?;
    write_document(&doc, path, mode)?;
    Ok(report_for(&doc, session_id, path, start))
}

pub fn report_for(doc: &NwbDocument, session_id: i64, path: &Path, start: Instant) -> ConversionReport {
    ConversionReport {
        session_id,
        path: path.to_path_buf(),
        probes: doc.electrode_groups().len(),
        electrodes: doc.electrodes.as_ref().map(|t| t.table.num_rows()).unwrap_or(0),
        units: doc.units.as_ref().map(|t| t.table.num_rows()).unwrap_or(0),
        elapsed_ms: start.elapsed().as_millis() as u64,
    }
}
