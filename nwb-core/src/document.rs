//! In-memory NWB session document
//!
//! Mirrors the NWB hierarchy this workspace writes: devices and electrode
//! groups under `general`, the electrode and unit tables, processing modules
//! holding timeseries and images, stimulus templates, interval tables and
//! trials. Container names are unique within their parent; adding a second
//! container under an existing name is an error.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use polars::prelude::Series;
use serde::{Deserialize, Serialize};

use crate::error::{NwbError, Result};
use crate::table::{series_diff, CompareOptions, Table};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeGroup {
    pub name: String,
    pub source: String,
    pub description: String,
    pub location: String,
    /// Name of the `Device` this group records from.
    pub device: String,
}

/// A table plus the NWB metadata around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicTable {
    pub name: String,
    pub source: String,
    pub description: String,
    pub column_descriptions: BTreeMap<String, String>,
    pub table: Table,
}

impl DynamicTable {
    pub fn new(name: impl Into<String>, source: impl Into<String>, table: Table) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            description: String::new(),
            column_descriptions: BTreeMap::new(),
            table,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub unit: String,
    pub description: String,
    #[serde(with = "crate::table::series_serde")]
    pub data: Series,
    /// Seconds, one per data row.
    pub timestamps: Vec<f64>,
}

impl PartialEq for TimeSeries {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.unit == other.unit
            && self.description == other.description
            && self.timestamps == other.timestamps
            && series_diff(&self.data, &other.data, &CompareOptions::exact()).is_none()
    }
}

impl TimeSeries {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, data: Series, timestamps: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if data.len() != timestamps.len() {
            return Err(NwbError::schema(format!(
                "timeseries '{}' has {} values but {} timestamps",
                name,
                data.len(),
                timestamps.len()
            )));
        }
        Ok(Self {
            data: data.with_name(name.as_str().into()),
            name,
            unit: unit.into(),
            description: String::new(),
            timestamps,
        })
    }
}

/// Single-plane image stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrayscaleImage {
    pub name: String,
    pub pixels: Vec<f32>,
    /// (rows, columns)
    pub shape: [usize; 2],
    /// Physical size of one pixel along (rows, columns).
    pub spacing: [f64; 2],
    pub unit: String,
}

/// Stack of frames (frames × rows × columns) stored row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStack {
    pub name: String,
    pub source: String,
    pub pixels: Vec<f32>,
    pub shape: [usize; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingModule {
    pub name: String,
    pub description: String,
    pub series: Vec<TimeSeries>,
    pub images: Vec<GrayscaleImage>,
    /// Row labels shared by series written from one table (no columns).
    pub rows: Option<Table>,
}

impl ProcessingModule {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            series: Vec::new(),
            images: Vec::new(),
            rows: None,
        }
    }

    pub fn add_series(&mut self, series: TimeSeries) -> Result<()> {
        if self.series(&series.name).is_some() {
            return Err(NwbError::schema(format!(
                "timeseries '{}' already exists in module '{}'",
                series.name, self.name
            )));
        }
        self.series.push(series);
        Ok(())
    }

    pub fn series(&self, name: &str) -> Option<&TimeSeries> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn require_series(&self, name: &str) -> Result<&TimeSeries> {
        self.series(name).ok_or_else(|| {
            NwbError::schema(format!(
                "module '{}' has no timeseries '{}'",
                self.name, name
            ))
        })
    }

    pub fn add_image(&mut self, image: GrayscaleImage) -> Result<()> {
        if self.image(&image.name).is_some() {
            return Err(NwbError::schema(format!(
                "image '{}' already exists in module '{}'",
                image.name, self.name
            )));
        }
        self.images.push(image);
        Ok(())
    }

    pub fn image(&self, name: &str) -> Option<&GrayscaleImage> {
        self.images.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NwbDocument {
    pub identifier: String,
    pub session_description: String,
    pub session_start_time: DateTime<Utc>,
    pub file_create_date: Vec<DateTime<Utc>>,
    pub source: String,
    devices: Vec<Device>,
    electrode_groups: Vec<ElectrodeGroup>,
    pub electrodes: Option<DynamicTable>,
    pub units: Option<DynamicTable>,
    pub trials: Option<DynamicTable>,
    processing: Vec<ProcessingModule>,
    stimulus_templates: Vec<ImageStack>,
    intervals: Vec<DynamicTable>,
}

impl NwbDocument {
    pub fn new(
        identifier: impl Into<String>,
        session_description: impl Into<String>,
        session_start_time: DateTime<Utc>,
        file_create_date: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            session_description: session_description.into(),
            session_start_time,
            file_create_date: vec![file_create_date],
            source: source.into(),
            devices: Vec::new(),
            electrode_groups: Vec::new(),
            electrodes: None,
            units: None,
            trials: None,
            processing: Vec::new(),
            stimulus_templates: Vec::new(),
            intervals: Vec::new(),
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn add_device(&mut self, device: Device) -> Result<()> {
        if self.device(&device.name).is_some() {
            return Err(NwbError::assembly(format!(
                "device '{}' already registered",
                device.name
            )));
        }
        self.devices.push(device);
        Ok(())
    }

    pub fn electrode_groups(&self) -> &[ElectrodeGroup] {
        &self.electrode_groups
    }

    pub fn electrode_group(&self, name: &str) -> Option<&ElectrodeGroup> {
        self.electrode_groups.iter().find(|g| g.name == name)
    }

    /// Register a group; its device must already be registered.
    pub fn add_electrode_group(&mut self, group: ElectrodeGroup) -> Result<()> {
        if self.device(&group.device).is_none() {
            return Err(NwbError::assembly(format!(
                "electrode group '{}' references unknown device '{}'",
                group.name, group.device
            )));
        }
        if self.electrode_group(&group.name).is_some() {
            return Err(NwbError::assembly(format!(
                "electrode group '{}' already registered",
                group.name
            )));
        }
        self.electrode_groups.push(group);
        Ok(())
    }

    pub fn processing_modules(&self) -> &[ProcessingModule] {
        &self.processing
    }

    pub fn processing_module(&self, name: &str) -> Option<&ProcessingModule> {
        self.processing.iter().find(|m| m.name == name)
    }

    pub fn require_processing_module(&self, name: &str) -> Result<&ProcessingModule> {
        self.processing_module(name)
            .ok_or_else(|| NwbError::schema(format!("no processing module '{}'", name)))
    }

    /// Fetch a module for writing, creating it on first use.
    pub fn processing_module_mut(
        &mut self,
        name: &str,
        description: &str,
    ) -> &mut ProcessingModule {
        let position = match self.processing.iter().position(|m| m.name == name) {
            Some(p) => p,
            None => {
                self.processing.push(ProcessingModule::new(name, description));
                self.processing.len() - 1
            }
        };
        &mut self.processing[position]
    }

    pub fn stimulus_templates(&self) -> &[ImageStack] {
        &self.stimulus_templates
    }

    pub fn add_stimulus_template(&mut self, stack: ImageStack) -> Result<()> {
        if self.stimulus_templates.iter().any(|s| s.name == stack.name) {
            return Err(NwbError::schema(format!(
                "stimulus template '{}' already exists",
                stack.name
            )));
        }
        self.stimulus_templates.push(stack);
        Ok(())
    }

    pub fn intervals(&self) -> &[DynamicTable] {
        &self.intervals
    }

    pub fn interval(&self, name: &str) -> Option<&DynamicTable> {
        self.intervals.iter().find(|t| t.name == name)
    }

    pub fn add_interval(&mut self, table: DynamicTable) -> Result<()> {
        if self.interval(&table.name).is_some() {
            return Err(NwbError::schema(format!(
                "interval table '{}' already exists",
                table.name
            )));
        }
        self.intervals.push(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::NamedFrom;

    fn document() -> NwbDocument {
        let t = Utc::now();
        NwbDocument::new("754312389", "EcephysSession", t, t, "test")
    }

    #[test]
    fn test_duplicate_device_is_assembly_error() {
        let mut doc = document();
        let device = Device {
            name: "10".to_string(),
            source: "test".to_string(),
        };
        doc.add_device(device.clone()).unwrap();
        assert!(matches!(doc.add_device(device), Err(NwbError::Assembly(_))));
    }

    #[test]
    fn test_group_requires_registered_device() {
        let mut doc = document();
        let group = ElectrodeGroup {
            name: "10".to_string(),
            source: "test".to_string(),
            description: "probeA".to_string(),
            location: String::new(),
            device: "10".to_string(),
        };
        assert!(matches!(
            doc.add_electrode_group(group),
            Err(NwbError::Assembly(_))
        ));
    }

    #[test]
    fn test_processing_module_created_once() {
        let mut doc = document();
        doc.processing_module_mut("running", "Running speed processing module");
        doc.processing_module_mut("running", "ignored");
        assert_eq!(doc.processing_modules().len(), 1);
        assert_eq!(
            doc.processing_module("running").unwrap().description,
            "Running speed processing module"
        );
    }

    #[test]
    fn test_timeseries_length_mismatch() {
        let result = TimeSeries::new(
            "speed",
            "cm/s",
            Series::new("v".into(), &[1.0f64]),
            vec![0.0, 0.1],
        );
        assert!(matches!(result, Err(NwbError::Schema(_))));
    }
}
