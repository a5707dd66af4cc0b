pub mod behavior;
pub mod config;
pub mod document;
pub mod error;
pub mod image_api;
pub mod io;
pub mod models;
pub mod table;

pub use config::LimsNwbConfig;
pub use document::{
    Device, DynamicTable, ElectrodeGroup, GrayscaleImage, ImageStack, NwbDocument,
    ProcessingModule, TimeSeries,
};
pub use error::{NwbError, Result};
pub use io::{read_document, write_document, WriteMode};
pub use models::{ChannelRecord, ProbeRecord, SessionRecord};
pub use table::{datetime_series, series_diff, to_f64_vec, to_i64_options, to_string_options, CompareOptions, Table};
