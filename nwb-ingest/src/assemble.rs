//! Session document assembly
//!
//! One probe becomes one `Device` and one `ElectrodeGroup`, both named by the
//! probe id (probe names encode targeting, ids are the real key). Channels are
//! linked to their probe's group, then the channel and unit tables are
//! attached as `electrodes` and `units`. `group_name` stays empty; the group
//! link carries the probe.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use nwb_core::config::DocumentConfig;
use nwb_core::document::{Device, DynamicTable, ElectrodeGroup, NwbDocument};
use nwb_core::table::{to_i64_options, to_string_options, Table};
use nwb_core::{NwbError, Result, SessionRecord};
use polars::prelude::{NamedFrom, Series};

use crate::normalize::GROUP_COLUMN;

pub const ELECTRODES_TABLE: &str = "electrodes";
pub const UNITS_TABLE: &str = "units";

/// Empty session document for `session`.
///
/// LIMS has no reliable session start time; unless `use_acquisition_date` is
/// set (and the date is present) the start time is `now`.
pub fn build_session_document(
    session: &SessionRecord,
    config: &DocumentConfig,
    now: DateTime<Utc>,
) -> NwbDocument {
    let start_time = match (config.use_acquisition_date, session.date_of_acquisition) {
        (true, Some(acquired)) => acquired,
        _ => {
            tracing::warn!(
                session_id = session.id,
                "Using conversion time as session start time placeholder"
            );
            now
        }
    };
    NwbDocument::new(
        session.id.to_string(),
        config.session_description.clone(),
        start_time,
        now,
        config.source.clone(),
    )
}

struct Probe {
    id: i64,
    name: String,
}

fn read_probes(probes: &Table) -> Result<Vec<Probe>> {
    let ids = to_i64_options(probes.require_column("id")?)?;
    let names = to_string_options(probes.require_column("name")?)?;
    let mut seen = HashSet::new();
    ids.into_iter()
        .zip(names)
        .enumerate()
        .map(|(row, (id, name))| {
            let id = id.ok_or_else(|| NwbError::schema(format!("probe row {} has no id", row)))?;
            if !seen.insert(id) {
                return Err(NwbError::schema(format!("duplicate probe id {}", id)));
            }
            Ok(Probe {
                id,
                name: name.unwrap_or_default(),
            })
        })
        .collect()
}

/// Attach probes, electrodes and units to `doc` and return it.
///
/// Every channel's `probe_id` must match a probe in `probes`; otherwise the
/// whole assembly fails and nothing is returned.
pub fn add_units_to_document(
    mut doc: NwbDocument,
    probes: &Table,
    channels: &Table,
    units: &Table,
    source: &str,
) -> Result<NwbDocument> {
    if doc.electrodes.is_some() || doc.units.is_some() {
        return Err(NwbError::assembly(format!(
            "document '{}' already has electrode or unit tables",
            doc.identifier
        )));
    }

    let probes = read_probes(probes)?;
    let channel_probe_ids = to_i64_options(channels.require_column("probe_id")?)?;
    let rows = channels.num_rows();
    let mut groups: Vec<Option<String>> = vec![None; rows];

    for probe in &probes {
        let name = probe.id.to_string();

        doc.add_device(Device {
            name: name.clone(),
            source: source.to_string(),
        })?;
        doc.add_electrode_group(ElectrodeGroup {
            name: name.clone(),
            source: source.to_string(),
            description: probe.name.clone(),
            location: String::new(),
            device: name.clone(),
        })?;

        let mut claimed = 0;
        for (row, probe_id) in channel_probe_ids.iter().enumerate() {
            if *probe_id == Some(probe.id) {
                groups[row] = Some(name.clone());
                claimed += 1;
            }
        }
        tracing::debug!("Probe {} ({}) claims {} channels", probe.id, probe.name, claimed);
    }

    if let Some(row) = groups.iter().position(Option::is_none) {
        let channel_id = channels.index().get(row).map(|v| v.to_string()).unwrap_or_default();
        let probe_id = channel_probe_ids[row]
            .map(|id| id.to_string())
            .unwrap_or_else(|| "null".to_string());
        return Err(NwbError::assembly(format!(
            "channel {} references probe {}, which is not part of session {}",
            channel_id, probe_id, doc.identifier
        )));
    }

    let electrodes = channels
        .clone()
        .with_link_column(Series::new(GROUP_COLUMN.into(), groups))?;

    let mut electrodes = DynamicTable::new(ELECTRODES_TABLE, source, electrodes);
    electrodes.description = "metadata about extracellular electrodes".to_string();
    let mut units_table = DynamicTable::new(UNITS_TABLE, source, units.clone());
    units_table.description = "sorted units".to_string();

    doc.electrodes = Some(electrodes);
    doc.units = Some(units_table);

    tracing::info!(
        "Assembled document {}: {} probes, {} electrodes, {} units",
        doc.identifier,
        probes.len(),
        rows,
        units.num_rows()
    );
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nwb_core::config::PlaceholderConfig;
    use nwb_core::{ChannelRecord, ProbeRecord};

    use crate::normalize::{normalize_channel_table, PrimaryKeyIds};

    fn session() -> SessionRecord {
        SessionRecord {
            id: 754312389,
            name: Some("20180926_mouse_403407".to_string()),
            date_of_acquisition: Some(Utc.with_ymd_and_hms(2018, 9, 26, 13, 0, 0).unwrap()),
            created_at: Utc.with_ymd_and_hms(2018, 9, 27, 8, 0, 0).unwrap(),
        }
    }

    fn base_document() -> NwbDocument {
        build_session_document(&session(), &DocumentConfig::default(), Utc::now())
    }

    fn probes() -> Table {
        ProbeRecord::table(&[
            ProbeRecord { id: 10, name: "probeA".to_string() },
            ProbeRecord { id: 20, name: "probeB".to_string() },
        ])
        .unwrap()
    }

    fn channels(probe_ids: &[i64]) -> Table {
        let records: Vec<ChannelRecord> = probe_ids
            .iter()
            .enumerate()
            .map(|(i, &probe_id)| ChannelRecord {
                id: i as i64 + 1,
                probe_id,
                local_index: i as i64,
                valid_data: true,
            })
            .collect();
        let raw = ChannelRecord::table(&records).unwrap();
        normalize_channel_table(&raw, &PlaceholderConfig::default(), &PrimaryKeyIds).unwrap()
    }

    fn units() -> Table {
        Table::new(vec![
            Series::new("id".into(), &[100i64, 101]),
            Series::new("snr".into(), &[2.5f64, 3.1]),
        ])
        .unwrap()
        .set_index("id")
        .unwrap()
    }

    // ========================================================================
    // TEST 1: channels 1,2 → probe 10's group, channel 3 → probe 20's group
    // ========================================================================
    #[test]
    fn test_channels_linked_to_probe_groups() {
        let doc =
            add_units_to_document(base_document(), &probes(), &channels(&[10, 10, 20]), &units(), "test")
                .unwrap();

        let electrodes = &doc.electrodes.as_ref().unwrap().table;
        assert!(electrodes.is_link("group"));
        let groups = to_string_options(electrodes.column("group").unwrap()).unwrap();
        assert_eq!(
            groups,
            vec![Some("10".to_string()), Some("10".to_string()), Some("20".to_string())]
        );
        let group_names = to_string_options(electrodes.column("group_name").unwrap()).unwrap();
        assert!(group_names.iter().all(|v| v.as_deref() == Some("")));

        for link in groups.iter().flatten() {
            let group = doc.electrode_group(link).unwrap();
            assert!(doc.device(&group.device).is_some());
        }
    }

    // ========================================================================
    // TEST 2: one device and one group per probe, described by probe name
    // ========================================================================
    #[test]
    fn test_devices_and_groups_per_probe() {
        let doc =
            add_units_to_document(base_document(), &probes(), &channels(&[10, 20]), &units(), "test")
                .unwrap();

        let names: Vec<&str> = doc.devices().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["10", "20"]);

        let group = doc.electrode_group("20").unwrap();
        assert_eq!(group.description, "probeB");
        assert_eq!(group.location, "");
        assert_eq!(group.device, "20");
        assert_eq!(group.source, "test");
    }

    // ========================================================================
    // TEST 3: dangling probe_id fails the assembly
    // ========================================================================
    #[test]
    fn test_dangling_probe_id_is_assembly_error() {
        let result =
            add_units_to_document(base_document(), &probes(), &channels(&[10, 30]), &units(), "test");
        match result {
            Err(NwbError::Assembly(msg)) => {
                assert!(msg.contains("channel 2 references probe 30"), "got: {}", msg)
            }
            other => panic!("expected assembly error, got {:?}", other.map(|d| d.identifier)),
        }
    }

    // ========================================================================
    // TEST 4: tables tagged with the source label, units attached verbatim
    // ========================================================================
    #[test]
    fn test_tables_attached_with_source() {
        let doc = add_units_to_document(
            base_document(),
            &probes(),
            &channels(&[10]),
            &units(),
            "Allen Institute for Brain Science",
        )
        .unwrap();

        let electrodes = doc.electrodes.as_ref().unwrap();
        assert_eq!(electrodes.name, ELECTRODES_TABLE);
        assert_eq!(electrodes.source, "Allen Institute for Brain Science");

        let unit_table = doc.units.as_ref().unwrap();
        assert_eq!(unit_table.name, UNITS_TABLE);
        assert_eq!(unit_table.table, units());
    }

    // ========================================================================
    // TEST 5: malformed probe tables are schema errors
    // ========================================================================
    #[test]
    fn test_probe_table_schema_errors() {
        let no_name = probes().without_column("name");
        assert!(matches!(
            add_units_to_document(base_document(), &no_name, &channels(&[10]), &units(), "test"),
            Err(NwbError::Schema(_))
        ));

        let duplicated = ProbeRecord::table(&[
            ProbeRecord { id: 10, name: "probeA".to_string() },
            ProbeRecord { id: 10, name: "probeA".to_string() },
        ])
        .unwrap();
        assert!(matches!(
            add_units_to_document(base_document(), &duplicated, &channels(&[10]), &units(), "test"),
            Err(NwbError::Schema(_))
        ));
    }

    // ========================================================================
    // TEST 6: start time placeholder unless the acquisition date is requested
    // ========================================================================
    #[test]
    fn test_session_document_start_time() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let doc = build_session_document(&session(), &DocumentConfig::default(), now);
        assert_eq!(doc.identifier, "754312389");
        assert_eq!(doc.session_description, "EcephysSession");
        assert_eq!(doc.session_start_time, now);
        assert_eq!(doc.file_create_date, vec![now]);

        let config = DocumentConfig {
            use_acquisition_date: true,
            ..DocumentConfig::default()
        };
        let doc = build_session_document(&session(), &config, now);
        assert_eq!(doc.session_start_time, session().date_of_acquisition.unwrap());
    }

    // ========================================================================
    // TEST 7: inputs are not modified
    // ========================================================================
    #[test]
    fn test_inputs_untouched() {
        let channels = channels(&[10, 20]);
        let before = channels.clone();
        add_units_to_document(base_document(), &probes(), &channels, &units(), "test").unwrap();
        assert_eq!(channels, before);
        assert_eq!(channels.column("group").unwrap().null_count(), 2);
    }
}
