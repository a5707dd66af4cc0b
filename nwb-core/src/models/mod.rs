pub mod channel;
pub mod probe;
pub mod session;

pub use channel::ChannelRecord;
pub use probe::ProbeRecord;
pub use session::SessionRecord;
