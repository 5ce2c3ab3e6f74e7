//! Chunked Data Transport
//!
//! Splits one in-flight message (a coredump, a run of events, a log
//! collection) into MTU-sized chunks with a compact framing header and a
//! whole-message CRC. The packetizer drives the process: it picks the
//! highest-priority data source with something to send, drains it chunk by
//! chunk, and retires the data once the final chunk is out.

pub mod packetizer;
pub mod sources;
pub mod transport;

pub use packetizer::{Packetizer, PacketizerConfig, PacketizerMetadata, PacketizerStatus};
pub use sources::DataSource;
pub use transport::MIN_CHUNK_BUF_LEN;
