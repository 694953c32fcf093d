//! Ring-facing error taxonomy.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("ring backing store is corrupt")]
    Corrupt,

    #[error("ring geometry mismatch with no available converter")]
    GeometryMismatch,

    #[error("payload of {len} bytes exceeds pktsize-minus-header capacity of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("ring I/O error at {path:?}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },
}

impl From<std::io::Error> for RingError {
    fn from(source: std::io::Error) -> Self {
        RingError::Io { path: None, source }
    }
}

/// Returned by [`crate::cursor::ReaderCursor::next`].
#[derive(Debug)]
pub enum NextOutcome {
    Packet(strata_packet::Packet),
    /// No packet currently satisfies the cursor's filters.
    WouldBlock,
    /// The writer evicted packets the cursor had not yet delivered; the
    /// cursor has been repositioned to the current earliest. Carries the
    /// count of packets skipped.
    Skipped(u64),
}
