//! Ring header layout and geometry validation.
//!
//! Unlike a fixed-size broadcast log's header (magic + version + capacity +
//! elem_size + write_seq), this header additionally tracks the
//! earliest/latest id and offset pairs needed for a bounded, evicting ring.

use std::sync::atomic::AtomicU64;

pub const RING_MAGIC: u64 = 0x5354_5241_5441_5242; // "STRATARB"
pub const RING_VERSION: u64 = 1;

/// Fits in one cache line so the header never false-shares with slot 0.
#[repr(C)]
pub struct RingHeader {
    pub magic: u64,
    pub version: u64,
    pub pktsize: u64,
    pub maxpackets: u64,
    pub maxoffset: u64,
    pub earliestid: AtomicU64,
    pub latestid: AtomicU64,
    pub earliestoffset: AtomicU64,
    pub latestoffset: AtomicU64,
    /// Nonzero until a clean shutdown clears it.
    pub corruption_flag: AtomicU64,
}

impl RingHeader {
    pub const SIZE: usize = std::mem::size_of::<RingHeader>();

    pub fn init(pktsize: u64, maxpackets: u64) -> Self {
        Self {
            magic: RING_MAGIC,
            version: RING_VERSION,
            pktsize,
            maxpackets,
            maxoffset: pktsize * maxpackets,
            earliestid: AtomicU64::new(strata_packet::RINGID_UNSET),
            latestid: AtomicU64::new(strata_packet::RINGID_UNSET),
            earliestoffset: AtomicU64::new(0),
            latestoffset: AtomicU64::new(strata_packet::OFFSET_UNSET),
            corruption_flag: AtomicU64::new(1),
        }
    }
}

/// Classification of an on-disk header found at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingValidation {
    /// No existing file / empty region: initialize fresh.
    Fresh,
    /// Existing header matches requested geometry exactly: adopt in place.
    Adopted,
    /// `-1`: header inconsistent, offsets out of range, or the corruption
    /// flag was left set by an unclean shutdown.
    Corrupt,
    /// `-2`: geometry mismatch (including any on-disk version other than
    /// the one this build writes) with no converter available.
    GeometryMismatch,
}

/// Validate an existing header against the requested geometry. Only one
/// on-disk version exists so far; a version mismatch is classified the
/// same as a geometry mismatch rather than routed through a migration path.
pub fn validate(header: &RingHeader, pktsize: u64, maxpackets: u64) -> RingValidation {
    if header.magic != RING_MAGIC {
        return RingValidation::Corrupt;
    }
    if header.version != RING_VERSION {
        return RingValidation::GeometryMismatch;
    }
    if header.pktsize != pktsize || header.maxpackets != maxpackets {
        return RingValidation::GeometryMismatch;
    }
    if header.maxoffset != pktsize * maxpackets {
        return RingValidation::Corrupt;
    }
    use std::sync::atomic::Ordering::Relaxed;
    if header.corruption_flag.load(Relaxed) != 0 {
        return RingValidation::Corrupt;
    }
    let earliest = header.earliestoffset.load(Relaxed);
    let latest = header.latestoffset.load(Relaxed);
    if earliest >= header.maxoffset || (latest != strata_packet::OFFSET_UNSET && latest >= header.maxoffset) {
        return RingValidation::Corrupt;
    }
    RingValidation::Adopted
}

/// Total bytes required for the header plus `maxpackets` slots, each
/// `slot_stride` bytes (8-byte seqlock sequence + `pktsize` data bytes).
pub fn bytes_for_ring(pktsize: u64, maxpackets: u64) -> u64 {
    RingHeader::SIZE as u64 + maxpackets * slot_stride(pktsize)
}

pub fn slot_stride(pktsize: u64) -> u64 {
    8 + pktsize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_header_has_unset_sentinels() {
        let h = RingHeader::init(512, 16);
        assert_eq!(h.earliestid.load(std::sync::atomic::Ordering::Relaxed), strata_packet::RINGID_UNSET);
        assert_eq!(h.maxoffset, 512 * 16);
    }

    #[test]
    fn validate_detects_geometry_mismatch() {
        let h = RingHeader::init(512, 16);
        assert_eq!(validate(&h, 256, 16), RingValidation::GeometryMismatch);
    }

    #[test]
    fn validate_detects_corruption_flag() {
        let h = RingHeader::init(512, 16);
        assert_eq!(validate(&h, 512, 16), RingValidation::Corrupt);
        h.corruption_flag.store(0, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(validate(&h, 512, 16), RingValidation::Adopted);
    }
}
