//! Behavior / optical-physiology session fields
//!
//! Each field has a writer that threads a document through by value and a
//! reader that extracts the field back. For every field,
//! `get_x(&add_x(doc, x)?)` reproduces `x`, whether or not the document went
//! through `io::write_document` / `io::read_document` in between.
//!
//! Storage layout:
//! - running speed       → processing `running` / `speed` (cm/s)
//! - running data        → processing `running_data`, one series per column
//! - stimulus templates  → `stimulus_template` image stacks
//! - stimulus timestamps → processing `stimulus` / `timestamps` (s)
//! - presentations       → interval table `stimulus_presentations`
//! - ophys timestamps    → processing `two_photon_imaging` / `timestamps` (s)
//! - trials              → `trials` table
//! - licks               → processing `licking` / `licks` (s), one series per extra column
//! - rewards             → processing `rewards`, one series per column (`volume` in ml)
//! - images              → processing `ophys` images
//!
//! Tables split into one series per column keep their row index on the
//! module (`ProcessingModule::rows`), so index values, index dtype and the
//! row count of a table without columns survive the split.

use std::collections::BTreeMap;

use ndarray::Array3;
use polars::prelude::{NamedFrom, Series};

use crate::document::{
    DynamicTable, GrayscaleImage, ImageStack, NwbDocument, ProcessingModule, TimeSeries,
};
use crate::error::{NwbError, Result};
use crate::table::{to_f64_vec, Table};

pub const RUNNING_MODULE: &str = "running";
pub const RUNNING_DATA_MODULE: &str = "running_data";
pub const STIMULUS_MODULE: &str = "stimulus";
pub const OPHYS_TIMESTAMPS_MODULE: &str = "two_photon_imaging";
pub const LICKING_MODULE: &str = "licking";
pub const REWARDS_MODULE: &str = "rewards";
pub const OPHYS_MODULE: &str = "ophys";
pub const STIMULUS_PRESENTATIONS: &str = "stimulus_presentations";

/// Name of the index shared by time-indexed tables (running data, rewards).
pub const TIMESTAMPS_INDEX: &str = "timestamps";

const LICK_TIME: &str = "time";
const LICKS_SERIES: &str = "licks";

#[derive(Debug, Clone, PartialEq)]
pub struct RunningSpeed {
    pub timestamps: Vec<f64>,
    pub values: Vec<f64>,
}

// ============================================================================
// Running
// ============================================================================

pub fn add_running_speed(mut doc: NwbDocument, running_speed: &RunningSpeed) -> Result<NwbDocument> {
    let series = TimeSeries::new(
        "speed",
        "cm/s",
        Series::new("speed".into(), running_speed.values.as_slice()),
        running_speed.timestamps.clone(),
    )?;
    doc.processing_module_mut(RUNNING_MODULE, "Running speed processing module")
        .add_series(series)?;
    Ok(doc)
}

pub fn get_running_speed(doc: &NwbDocument) -> Result<RunningSpeed> {
    let series = doc
        .require_processing_module(RUNNING_MODULE)?
        .require_series("speed")?;
    Ok(RunningSpeed {
        timestamps: series.timestamps.clone(),
        values: to_f64_vec(&series.data)?,
    })
}

/// Write a timestamp-indexed running table, one series per column.
///
/// `units` must name a unit for every column; the index unit is always seconds.
pub fn add_running_data(
    mut doc: NwbDocument,
    running_data: &Table,
    units: &BTreeMap<String, String>,
) -> Result<NwbDocument> {
    let timestamps = time_index(running_data, "running data")?;
    let mut series = Vec::new();
    for column in running_data.columns() {
        let name = column.name().as_str();
        let unit = units.get(name).ok_or_else(|| {
            NwbError::schema(format!("no unit given for running column '{}'", name))
        })?;
        series.push(TimeSeries::new(name, unit.as_str(), column.clone(), timestamps.clone())?);
    }

    let module = doc.processing_module_mut(RUNNING_DATA_MODULE, "Raw running encoder data");
    store_table_series(module, running_data, series)?;
    Ok(doc)
}

pub fn get_running_data(doc: &NwbDocument) -> Result<Table> {
    load_table_series(doc.require_processing_module(RUNNING_DATA_MODULE)?, |name| name)
}

// ============================================================================
// Stimulus
// ============================================================================

pub fn add_stimulus_template(mut doc: NwbDocument, name: &str, frames: &Array3<f32>) -> Result<NwbDocument> {
    let (n, rows, cols) = frames.dim();
    doc.add_stimulus_template(ImageStack {
        name: name.to_string(),
        source: "stimulus template".to_string(),
        pixels: frames.iter().copied().collect(),
        shape: [n, rows, cols],
    })?;
    Ok(doc)
}

pub fn get_stimulus_templates(doc: &NwbDocument) -> Result<BTreeMap<String, Array3<f32>>> {
    doc.stimulus_templates()
        .iter()
        .map(|stack| {
            let [n, rows, cols] = stack.shape;
            let frames = Array3::from_shape_vec((n, rows, cols), stack.pixels.clone()).map_err(|e| {
                NwbError::schema(format!("stimulus template '{}': {}", stack.name, e))
            })?;
            Ok((stack.name.clone(), frames))
        })
        .collect()
}

pub fn add_stimulus_timestamps(mut doc: NwbDocument, timestamps: &[f64]) -> Result<NwbDocument> {
    let series = TimeSeries::new(
        "timestamps",
        "s",
        Series::new("timestamps".into(), timestamps),
        timestamps.to_vec(),
    )?;
    doc.processing_module_mut(STIMULUS_MODULE, "Stimulus times processing")
        .add_series(series)?;
    Ok(doc)
}

pub fn get_stimulus_timestamps(doc: &NwbDocument) -> Result<Vec<f64>> {
    Ok(doc
        .require_processing_module(STIMULUS_MODULE)?
        .require_series("timestamps")?
        .timestamps
        .clone())
}

/// Presentations need `start_time` and `stop_time`; other columns ride along.
pub fn add_stimulus_presentations(mut doc: NwbDocument, presentations: &Table) -> Result<NwbDocument> {
    require_interval_columns(presentations, STIMULUS_PRESENTATIONS)?;
    let mut table = DynamicTable::new(STIMULUS_PRESENTATIONS, doc.source.clone(), presentations.clone());
    table.description = "Stimulus presentation epochs".to_string();
    doc.add_interval(table)?;
    Ok(doc)
}

pub fn get_stimulus_presentations(doc: &NwbDocument) -> Result<Table> {
    doc.interval(STIMULUS_PRESENTATIONS)
        .map(|t| t.table.clone())
        .ok_or_else(|| NwbError::schema("no stimulus presentations in document"))
}

// ============================================================================
// Ophys
// ============================================================================

pub fn add_ophys_timestamps(mut doc: NwbDocument, timestamps: &[f64]) -> Result<NwbDocument> {
    let series = TimeSeries::new(
        "timestamps",
        "s",
        Series::new("timestamps".into(), timestamps),
        timestamps.to_vec(),
    )?;
    doc.processing_module_mut(OPHYS_TIMESTAMPS_MODULE, "Two-photon frame times")
        .add_series(series)?;
    Ok(doc)
}

pub fn get_ophys_timestamps(doc: &NwbDocument) -> Result<Vec<f64>> {
    Ok(doc
        .require_processing_module(OPHYS_TIMESTAMPS_MODULE)?
        .require_series("timestamps")?
        .timestamps
        .clone())
}

pub fn add_max_projection(doc: NwbDocument, image: &GrayscaleImage) -> Result<NwbDocument> {
    add_ophys_image(doc, "max_projection", image)
}

pub fn get_max_projection(doc: &NwbDocument) -> Result<GrayscaleImage> {
    get_ophys_image(doc, "max_projection")
}

pub fn add_average_image(doc: NwbDocument, image: &GrayscaleImage) -> Result<NwbDocument> {
    add_ophys_image(doc, "average_image", image)
}

pub fn get_average_image(doc: &NwbDocument) -> Result<GrayscaleImage> {
    get_ophys_image(doc, "average_image")
}

fn add_ophys_image(mut doc: NwbDocument, name: &str, image: &GrayscaleImage) -> Result<NwbDocument> {
    let [rows, cols] = image.shape;
    if image.pixels.len() != rows * cols {
        return Err(NwbError::schema(format!(
            "image '{}' has {} pixels for shape {:?}",
            name,
            image.pixels.len(),
            image.shape
        )));
    }
    let mut stored = image.clone();
    stored.name = name.to_string();
    doc.processing_module_mut(OPHYS_MODULE, "Ophys processing module")
        .add_image(stored)?;
    Ok(doc)
}

fn get_ophys_image(doc: &NwbDocument, name: &str) -> Result<GrayscaleImage> {
    doc.require_processing_module(OPHYS_MODULE)?
        .image(name)
        .cloned()
        .ok_or_else(|| NwbError::schema(format!("no image '{}' in module '{}'", name, OPHYS_MODULE)))
}

// ============================================================================
// Task
// ============================================================================

/// Trials need `start_time` and `stop_time`. Columns without a description get an empty one.
pub fn add_trials(
    mut doc: NwbDocument,
    trials: &Table,
    column_descriptions: &BTreeMap<String, String>,
) -> Result<NwbDocument> {
    require_interval_columns(trials, "trials")?;
    if doc.trials.is_some() {
        return Err(NwbError::schema("document already has trials"));
    }
    let mut table = DynamicTable::new("trials", doc.source.clone(), trials.clone());
    table.description = "Behavior trials".to_string();
    table.column_descriptions = trials
        .column_names()
        .into_iter()
        .map(|name| {
            let description = column_descriptions.get(name).cloned().unwrap_or_default();
            (name.to_string(), description)
        })
        .collect();
    doc.trials = Some(table);
    Ok(doc)
}

pub fn get_trials(doc: &NwbDocument) -> Result<Table> {
    doc.trials
        .as_ref()
        .map(|t| t.table.clone())
        .ok_or_else(|| NwbError::schema("no trials in document"))
}

/// Licks need a `time` column, stored as the `licks` series (s).
///
/// Every other column is kept as its own series on the lick times.
pub fn add_licks(mut doc: NwbDocument, licks: &Table) -> Result<NwbDocument> {
    let times = to_f64_vec(licks.require_column(LICK_TIME)?)?;
    let mut series = Vec::new();
    for column in licks.columns() {
        let (name, unit) = match column.name().as_str() {
            LICK_TIME => (LICKS_SERIES, "s"),
            other => (other, "none"),
        };
        series.push(TimeSeries::new(name, unit, column.clone(), times.clone())?);
    }

    let module = doc.processing_module_mut(LICKING_MODULE, "Licking behavior processing module");
    store_table_series(module, licks, series)?;
    Ok(doc)
}

pub fn get_licks(doc: &NwbDocument) -> Result<Table> {
    let module = doc.require_processing_module(LICKING_MODULE)?;
    module.require_series(LICKS_SERIES)?;
    load_table_series(module, |name| if name == LICKS_SERIES { LICK_TIME } else { name })
}

/// Rewards are indexed by `timestamps` and need `volume` (ml) and `autorewarded`.
///
/// Every column is kept as its own series, in table order.
pub fn add_rewards(mut doc: NwbDocument, rewards: &Table) -> Result<NwbDocument> {
    let timestamps = time_index(rewards, "rewards")?;
    rewards.require_column("volume")?;
    rewards.require_column("autorewarded")?;
    let mut series = Vec::new();
    for column in rewards.columns() {
        let name = column.name().as_str();
        let unit = if name == "volume" { "ml" } else { "none" };
        series.push(TimeSeries::new(name, unit, column.clone(), timestamps.clone())?);
    }

    let module = doc.processing_module_mut(REWARDS_MODULE, "Reward delivery processing module");
    store_table_series(module, rewards, series)?;
    Ok(doc)
}

pub fn get_rewards(doc: &NwbDocument) -> Result<Table> {
    load_table_series(doc.require_processing_module(REWARDS_MODULE)?, |name| name)
}

// ============================================================================
// Helpers
// ============================================================================

fn require_interval_columns(table: &Table, what: &str) -> Result<()> {
    for name in ["start_time", "stop_time"] {
        if table.column(name).is_none() {
            return Err(NwbError::schema(format!("{} table is missing '{}'", what, name)));
        }
    }
    Ok(())
}

fn time_index(table: &Table, what: &str) -> Result<Vec<f64>> {
    if table.index_name() != Some(TIMESTAMPS_INDEX) {
        return Err(NwbError::schema(format!(
            "{} must be indexed by '{}', found {:?}",
            what,
            TIMESTAMPS_INDEX,
            table.index_name()
        )));
    }
    to_f64_vec(table.index())
}

/// Add one series per table column and record the table's row index on the module.
fn store_table_series(module: &mut ProcessingModule, table: &Table, series: Vec<TimeSeries>) -> Result<()> {
    if module.rows.is_some() {
        return Err(NwbError::schema(format!(
            "module '{}' already holds a table",
            module.name
        )));
    }
    for s in series {
        module.add_series(s)?;
    }
    module.rows = Some(table.index_only());
    Ok(())
}

/// Rebuild a table from the module's row index and its series, in write order.
fn load_table_series<F>(module: &ProcessingModule, column_name: F) -> Result<Table>
where
    F: Fn(&str) -> &str,
{
    let rows = module.rows.as_ref().ok_or_else(|| {
        NwbError::schema(format!("module '{}' holds no table", module.name))
    })?;
    module.series.iter().try_fold(rows.clone(), |table, s| {
        table.with_column(s.data.clone().with_name(column_name(&s.name).into()))
    })
}
