use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use polars::prelude::{NamedFrom, Series};

/// Source label attached to every table and container written by the ingest flow.
pub const DEFAULT_SOURCE: &str = "Allen Institute for Brain Science";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LimsNwbConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub document: DocumentConfig,
    #[serde(default)]
    pub placeholders: PlaceholderConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("LIMS_DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://limsreader@localhost:5432/lims2".to_string()),
            max_connections: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DocumentConfig {
    pub source: String,
    pub session_description: String,
    /// LIMS `date_of_acquisition` is not the true session start; only use it when asked.
    pub use_acquisition_date: bool,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            session_description: "EcephysSession".to_string(),
            use_acquisition_date: false,
        }
    }
}

/// Constant values written into channel columns that LIMS cannot supply yet.
///
/// Each field is a column of the electrode table. CCF positions (`x`, `y`, `z`)
/// and `location` wait on CCF registration; `imp` on impedance tracking.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PlaceholderConfig {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub imp: f64,
    pub location: String,
    pub filtering: String,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            x: -1.0,
            y: -1.0,
            z: -1.0,
            imp: -1.0,
            location: "null".to_string(),
            filtering: "here is a description of our filtering".to_string(),
        }
    }
}

impl PlaceholderConfig {
    /// Constant columns of `rows` rows, in electrode-table order.
    pub fn columns(&self, rows: usize) -> Vec<Series> {
        vec![
            Series::new("x".into(), vec![self.x; rows]),
            Series::new("y".into(), vec![self.y; rows]),
            Series::new("z".into(), vec![self.z; rows]),
            Series::new("imp".into(), vec![self.imp; rows]),
            Series::new("location".into(), vec![self.location.as_str(); rows]),
            Series::new("filtering".into(), vec![self.filtering.as_str(); rows]),
        ]
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelIdScheme {
    /// Keep the LIMS channel id as the electrode id.
    #[default]
    PrimaryKey,
    /// Number electrodes by row position.
    RowIndex,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChannelConfig {
    #[serde(default)]
    pub id_scheme: ChannelIdScheme,
}

impl LimsNwbConfig {
    /// Load from an optional TOML file, then apply `LIMS_NWB__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("LIMS_NWB").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
