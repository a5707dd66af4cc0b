pub mod assemble;
pub mod lims;
pub mod normalize;
pub mod pipeline;
pub mod source;

pub use assemble::{add_units_to_document, build_session_document};
pub use lims::LimsSessionSource;
pub use normalize::{normalize_channel_table, IdMapper, PrimaryKeyIds, RowIndexIds};
pub use pipeline::{build_document, convert_session, default_nwb_path, ConversionReport};
pub use source::{MemorySessionSource, SessionRecordSource};
