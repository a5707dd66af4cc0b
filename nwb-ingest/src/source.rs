//! Session record sources
//!
//! The ingest pipeline reads one session's probes, channels and units through
//! `SessionRecordSource`. `LimsSessionSource` (see `lims.rs`) queries
//! Postgres; `MemorySessionSource` serves records held in memory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use nwb_core::table::Table;
use nwb_core::{ChannelRecord, NwbError, ProbeRecord, Result, SessionRecord};
use polars::prelude::{NamedFrom, Series};

#[async_trait]
pub trait SessionRecordSource: Send + Sync {
    /// One session as a typed record; `NotFound` when it does not exist.
    async fn get_session(&self, session_id: i64) -> Result<SessionRecord>;

    /// One row per session, columns `id`, `name`, `date_of_acquisition`, `created_at`.
    async fn get_session_table(&self, session_ids: &[i64]) -> Result<Table>;

    /// Probes of the given sessions, columns `id`, `name`, `ecephys_session_id`.
    async fn get_probe_table(&self, session_ids: &[i64]) -> Result<Table>;

    /// Raw channels of one session, columns at least `id`, `probe_id`.
    async fn get_channel_table(&self, session_id: i64) -> Result<Table>;

    /// Units of one session, column `id` plus whatever metrics are recorded.
    async fn get_unit_table(&self, session_id: i64) -> Result<Table>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Records held in memory, keyed by session.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionSource {
    sessions: Vec<SessionRecord>,
    probes: BTreeMap<i64, Vec<ProbeRecord>>,
    channels: BTreeMap<i64, Vec<ChannelRecord>>,
    units: BTreeMap<i64, Table>,
}

impl MemorySessionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: SessionRecord) -> Self {
        self.sessions.push(session);
        self
    }

    pub fn with_probe(mut self, session_id: i64, probe: ProbeRecord) -> Self {
        self.probes.entry(session_id).or_default().push(probe);
        self
    }

    pub fn with_channel(mut self, session_id: i64, channel: ChannelRecord) -> Self {
        self.channels.entry(session_id).or_default().push(channel);
        self
    }

    pub fn with_units(mut self, session_id: i64, units: Table) -> Self {
        self.units.insert(session_id, units);
        self
    }
}

#[async_trait]
impl SessionRecordSource for MemorySessionSource {
    async fn get_session(&self, session_id: i64) -> Result<SessionRecord> {
        self.sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or_else(|| NwbError::NotFound(format!("ecephys session {}", session_id)))
    }

    async fn get_session_table(&self, session_ids: &[i64]) -> Result<Table> {
        let sessions: Vec<SessionRecord> = self
            .sessions
            .iter()
            .filter(|s| session_ids.contains(&s.id))
            .cloned()
            .collect();
        SessionRecord::table(&sessions)
    }

    async fn get_probe_table(&self, session_ids: &[i64]) -> Result<Table> {
        let mut probes = Vec::new();
        let mut owners = Vec::new();
        for session_id in session_ids {
            for probe in self.probes.get(session_id).into_iter().flatten() {
                probes.push(probe.clone());
                owners.push(*session_id);
            }
        }
        ProbeRecord::table(&probes)?
            .with_column(Series::new("ecephys_session_id".into(), owners))
    }

    async fn get_channel_table(&self, session_id: i64) -> Result<Table> {
        let channels = self.channels.get(&session_id).cloned().unwrap_or_default();
        ChannelRecord::table(&channels)
    }

    async fn get_unit_table(&self, session_id: i64) -> Result<Table> {
        match self.units.get(&session_id) {
            Some(units) => Ok(units.clone()),
            None => Table::new(vec![Series::new("id".into(), Vec::<i64>::new())]),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
