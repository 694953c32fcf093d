//! `strata-packet`: the wire-independent packet and stream-key types shared
//! by the ring and the supervisor crates.
//!
//! A small `Copy` POD newtype for the stream identifier, plus a `Copy`
//! fixed-layout header struct for the packet record itself.

mod glob;
mod packet;
mod stream_key;

pub use glob::{glob_match, glob_match_any};
pub use packet::{OFFSET_UNSET, Packet, PacketHeader, RINGID_MAXIMUM, RINGID_UNSET};
pub use stream_key::{STREAM_KEY_MAX, StreamKey, StreamKeyError};
