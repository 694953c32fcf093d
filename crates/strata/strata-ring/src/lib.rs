//! Fixed-capacity, mmap-backed circular packet store with a per-stream
//! secondary index and reader-cursor abstraction.

mod cursor;
mod error;
mod header;
mod ring;
mod slot;
mod stream_index;

pub use cursor::{ReaderCursor, SeekDirection};
pub use error::{NextOutcome, RingError};
pub use header::{RING_MAGIC, RING_VERSION, RingValidation};
pub use ring::{HeaderSnapshot, PacketRing};
pub use stream_index::{StreamEntry, StreamIndex};
