//! `StreamIndex`: stream key → {earliest/latest id, earliest/latest time,
//! packet count, byte count}.
//!
//! A short `RwLock` guards the map; writes happen only under the ring's
//! single writer lock, so the `RwLock` here only ever has one writer at a
//! time and is held for the handful of instructions needed to update one
//! entry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use strata_packet::{OFFSET_UNSET, StreamKey};

/// Reader-visible projection of a stream's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    pub stream_key: StreamKey,
    pub earliest_id: u64,
    pub latest_id: u64,
    pub earliest_time: i64,
    pub latest_time: i64,
    pub packetcount: u64,
    pub bytecount: u64,
}

/// Full writer-side bookkeeping, including the ring offsets needed to find
/// a stream's oldest/newest slot and to relink `next_in_stream` on publish.
/// `#[repr(C)]` so the sidecar file can be a flat array of these records.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct StreamState {
    pub stream_key: StreamKey,
    pub earliest_id: u64,
    pub latest_id: u64,
    pub earliest_time: i64,
    pub latest_time: i64,
    pub packetcount: u64,
    pub bytecount: u64,
    pub earliest_offset: u64,
    pub latest_offset: u64,
}

impl StreamState {
    pub fn to_entry(self) -> StreamEntry {
        StreamEntry {
            stream_key: self.stream_key,
            earliest_id: self.earliest_id,
            latest_id: self.latest_id,
            earliest_time: self.earliest_time,
            latest_time: self.latest_time,
            packetcount: self.packetcount,
            bytecount: self.bytecount,
        }
    }
}

pub struct StreamIndex {
    inner: RwLock<HashMap<StreamKey, StreamState>>,
}

impl StreamIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self, key: &StreamKey) -> Option<StreamEntry> {
        self.inner
            .read()
            .unwrap()
            .get(key)
            .map(|s| (*s).to_entry())
    }

    pub fn all_snapshots(&self) -> Vec<StreamEntry> {
        self.inner
            .read()
            .unwrap()
            .values()
            .map(|s| (*s).to_entry())
            .collect()
    }

    pub(crate) fn state(&self, key: &StreamKey) -> Option<StreamState> {
        self.inner.read().unwrap().get(key).copied()
    }

    /// Record a newly published packet for `key`. Returns the offset of the
    /// stream's previous tail packet (to be relinked via `next_in_stream`),
    /// or [`OFFSET_UNSET`] if `key` had no prior packets.
    pub(crate) fn on_publish(
        &self,
        key: StreamKey,
        pktid: u64,
        start_time: i64,
        end_time: i64,
        bytes: u64,
        offset: u64,
    ) -> u64 {
        let mut map = self.inner.write().unwrap();
        match map.get_mut(&key) {
            Some(state) => {
                let prior_tail = state.latest_offset;
                state.latest_id = pktid;
                state.latest_time = end_time;
                state.latest_offset = offset;
                state.packetcount += 1;
                state.bytecount += bytes;
                prior_tail
            }
            None => {
                map.insert(
                    key,
                    StreamState {
                        stream_key: key,
                        earliest_id: pktid,
                        latest_id: pktid,
                        earliest_time: start_time,
                        latest_time: end_time,
                        packetcount: 1,
                        bytecount: bytes,
                        earliest_offset: offset,
                        latest_offset: offset,
                    },
                );
                OFFSET_UNSET
            }
        }
    }

    /// Record the eviction of `key`'s current earliest packet, advancing it
    /// to the next packet in the chain (or removing the entry entirely if
    /// that was the stream's last resident packet).
    pub(crate) fn on_evict(
        &self,
        key: &StreamKey,
        new_earliest_offset: u64,
        new_earliest_id: u64,
        new_earliest_time: i64,
        evicted_bytes: u64,
    ) {
        let mut map = self.inner.write().unwrap();
        if let Some(state) = map.get_mut(key) {
            state.packetcount = state.packetcount.saturating_sub(1);
            state.bytecount = state.bytecount.saturating_sub(evicted_bytes);
            if state.packetcount == 0 {
                map.remove(key);
            } else {
                state.earliest_offset = new_earliest_offset;
                state.earliest_id = new_earliest_id;
                state.earliest_time = new_earliest_time;
            }
        }
    }

    pub fn persist(&self, path: &Path) -> std::io::Result<()> {
        let map = self.inner.read().unwrap();
        let states: Vec<StreamState> = map.values().copied().collect();
        let bytes = unsafe {
            std::slice::from_raw_parts(
                states.as_ptr() as *const u8,
                states.len() * std::mem::size_of::<StreamState>(),
            )
        };
        std::fs::write(path, bytes)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let rec_size = std::mem::size_of::<StreamState>();
        let count = bytes.len() / rec_size;
        let mut map = HashMap::with_capacity(count);
        for i in 0..count {
            let off = i * rec_size;
            let state: StreamState =
                unsafe { std::ptr::read(bytes[off..off + rec_size].as_ptr() as *const StreamState) };
            map.insert(state.stream_key, state);
        }
        Ok(Self {
            inner: RwLock::new(map),
        })
    }
}

impl Default for StreamIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> StreamKey {
        s.parse().unwrap()
    }

    #[test]
    fn publish_then_evict_removes_empty_stream() {
        let idx = StreamIndex::new();
        let prior = idx.on_publish(key("A"), 1, 100, 100, 10, 0);
        assert_eq!(prior, OFFSET_UNSET);
        idx.on_evict(&key("A"), OFFSET_UNSET, 2, 200, 10);
        assert!(idx.snapshot(&key("A")).is_none());
    }

    #[test]
    fn persist_and_load_roundtrip() {
        let idx = StreamIndex::new();
        idx.on_publish(key("A"), 1, 100, 100, 10, 0);
        idx.on_publish(key("B"), 2, 200, 200, 20, 512);
        let tmp = tempfile::NamedTempFile::new().unwrap();
        idx.persist(tmp.path()).unwrap();

        let loaded = StreamIndex::load(tmp.path()).unwrap();
        let a = loaded.snapshot(&key("A")).unwrap();
        assert_eq!(a.packetcount, 1);
        assert_eq!(a.bytecount, 10);
        let b = loaded.snapshot(&key("B")).unwrap();
        assert_eq!(b.bytecount, 20);
    }
}
