//! `PacketRing`: the fixed-capacity, mmap-backed circular packet store
//!.

use std::mem::offset_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use strata_mmap::MmapFileMut;
use strata_packet::{OFFSET_UNSET, Packet, PacketHeader, RINGID_MAXIMUM, RINGID_UNSET, StreamKey};
use tracing::{info, warn};

use crate::cursor::ReaderCursor;
use crate::error::RingError;
use crate::header::{self, RingHeader, RingValidation};
use crate::stream_index::{StreamEntry, StreamIndex};

/// A point-in-time read of the header's atomic fields, taken with `Acquire`
/// on `latestid` so everything at or below that id (packet bodies, the
/// chain pointers relinking them) is visible per the seqlock + header
/// publish order established in [`crate::slot`].
#[derive(Debug, Clone, Copy)]
pub struct HeaderSnapshot {
    pub earliestid: u64,
    pub latestid: u64,
    pub earliestoffset: u64,
    pub latestoffset: u64,
    pub maxoffset: u64,
}

enum Backing {
    Anon(MmapFileMut),
    File(MmapFileMut),
}

struct RingInner {
    backing: Mutex<Backing>,
    base: *mut u8,
    pktsize: u64,
    maxpackets: u64,
    maxoffset: u64,
    write_lock: Mutex<()>,
    stream_index: StreamIndex,
    ring_path: Option<PathBuf>,
    sidecar_path: Option<PathBuf>,
    generation: Mutex<u64>,
    woken: Condvar,
}

// SAFETY: `base` points into the mmap owned by `backing`, which outlives
// every use of `base` for the lifetime of `RingInner`. All concurrent
// access to the slot region goes through the seqlock protocol in
// `crate::slot`; all access to the header's atomics uses `AtomicU64`
// directly. Non-atomic header fields (magic/version/pktsize/...) are
// written once at construction and never mutated afterward.
unsafe impl Send for RingInner {}
unsafe impl Sync for RingInner {}

#[derive(Clone)]
pub struct PacketRing {
    inner: Arc<RingInner>,
}

impl RingInner {
    fn header(&self) -> &RingHeader {
        unsafe { &*(self.base as *const RingHeader) }
    }

    fn slots_base(&self) -> *mut u8 {
        unsafe { self.base.add(RingHeader::SIZE) }
    }

    fn slot_ptr(&self, offset: u64) -> *mut u8 {
        let idx = offset / self.pktsize;
        let stride = header::slot_stride(self.pktsize);
        unsafe { self.slots_base().add((idx * stride) as usize) }
    }
}

impl PacketRing {
    /// Build a ring over an anonymous, process-private mapping. Useful for
    /// tests and for the Non-goal-scoped "no persistence required" case.
    pub fn create_anon(pktsize: u64, maxpackets: u64) -> Result<Self, RingError> {
        let total = header::bytes_for_ring(pktsize, maxpackets);
        let mut mmap = MmapFileMut::create_anon(total as usize)?;
        let base = mmap.as_mut_ptr();
        unsafe {
            std::ptr::write(base as *mut RingHeader, RingHeader::init(pktsize, maxpackets));
        }
        let header = unsafe { &*(base as *const RingHeader) };
        header.corruption_flag.store(0, Relaxed);
        Ok(Self::from_parts(Backing::Anon(mmap), base, pktsize, maxpackets, None, None))
    }

    /// Open (or create) a file-backed ring at `path`, applying the
    /// auto-recovery policy when an existing file doesn't match the
    /// requested geometry.
    pub fn open(path: &Path, pktsize: u64, maxpackets: u64, autorecovery: u8) -> Result<(Self, RingValidation), RingError> {
        let total = header::bytes_for_ring(pktsize, maxpackets);
        let existed = path.exists();
        let existing_len = if existed {
            std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        let validation = if !existed {
            RingValidation::Fresh
        } else if existing_len < RingHeader::SIZE as u64 {
            RingValidation::Corrupt
        } else {
            let mut probe = MmapFileMut::open_rw(path).map_err(|source| RingError::Io {
                path: Some(path.to_path_buf()),
                source,
            })?;
            let existing = unsafe { &*(probe.as_mut_ptr() as *const RingHeader) };
            header::validate(existing, pktsize, maxpackets)
        };

        if !matches!(validation, RingValidation::Fresh | RingValidation::Adopted) {
            Self::recover(path, autorecovery, &validation)?;
        }

        let reinit = !matches!(validation, RingValidation::Adopted);
        let mut mmap = if reinit {
            MmapFileMut::create_rw(path, total).map_err(|source| RingError::Io {
                path: Some(path.to_path_buf()),
                source,
            })?
        } else {
            MmapFileMut::open_rw(path).map_err(|source| RingError::Io {
                path: Some(path.to_path_buf()),
                source,
            })?
        };
        let base = mmap.as_mut_ptr();
        if reinit {
            unsafe {
                std::ptr::write(base as *mut RingHeader, RingHeader::init(pktsize, maxpackets));
            }
            let header = unsafe { &*(base as *const RingHeader) };
            header.corruption_flag.store(0, Relaxed);
        } else {
            info!(path = %path.display(), "adopting existing ring");
            let header = unsafe { &*(base as *const RingHeader) };
            header.corruption_flag.store(1, Relaxed);
        }

        let sidecar_path = sidecar_path_for(path);
        let stream_index = if matches!(validation, RingValidation::Adopted) && sidecar_path.exists() {
            StreamIndex::load(&sidecar_path).unwrap_or_default()
        } else {
            StreamIndex::default()
        };

        let mut ring = Self::from_parts(
            Backing::File(mmap),
            base,
            pktsize,
            maxpackets,
            Some(path.to_path_buf()),
            Some(sidecar_path),
        );
        ring.replace_stream_index(stream_index);
        Ok((ring, validation))
    }

    /// A geometry mismatch is unrecoverable: fail regardless of
    /// `autorecovery` rather than wiping a ring that may simply have been
    /// opened with the wrong `pktsize`/`maxpackets`. Only `Corrupt` gets the
    /// rename-aside-and-reinit treatment, and `autorecovery == 2`
    /// intentionally logs a rename but performs an unlink instead
    /// (see DESIGN.md: preserved quirk, not a bug).
    fn recover(path: &Path, autorecovery: u8, validation: &RingValidation) -> Result<(), RingError> {
        if matches!(validation, RingValidation::GeometryMismatch) {
            return Err(RingError::GeometryMismatch);
        }
        debug_assert!(matches!(validation, RingValidation::Corrupt));
        match autorecovery {
            0 => Err(RingError::Corrupt),
            1 => {
                let aside = path.with_extension("corrupt");
                warn!(from = %path.display(), to = %aside.display(), "renaming unusable ring aside");
                std::fs::rename(path, &aside)?;
                Ok(())
            }
            _ => {
                warn!(path = %path.display(), "renaming unusable ring aside");
                std::fs::remove_file(path)?;
                Ok(())
            }
        }
    }

    fn from_parts(
        backing: Backing,
        base: *mut u8,
        pktsize: u64,
        maxpackets: u64,
        ring_path: Option<PathBuf>,
        sidecar_path: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(RingInner {
                backing: Mutex::new(backing),
                base,
                pktsize,
                maxpackets,
                maxoffset: pktsize * maxpackets,
                write_lock: Mutex::new(()),
                stream_index: StreamIndex::default(),
                ring_path,
                sidecar_path,
                generation: Mutex::new(0),
                woken: Condvar::new(),
            }),
        }
    }

    fn replace_stream_index(&mut self, index: StreamIndex) {
        // `Arc::get_mut` succeeds here: the ring has exactly one owner at
        // this point in construction, before `open`/`create_anon` return it.
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.stream_index = index;
        }
    }

    pub fn stream_index(&self) -> &StreamIndex {
        &self.inner.stream_index
    }

    pub fn stream_entry(&self, key: &StreamKey) -> Option<StreamEntry> {
        self.inner.stream_index.snapshot(key)
    }

    pub fn open_cursor(&self) -> ReaderCursor {
        ReaderCursor::new(self.clone())
    }

    pub fn header_snapshot(&self) -> HeaderSnapshot {
        let header = self.inner.header();
        let latestid = header.latestid.load(Acquire);
        HeaderSnapshot {
            earliestid: header.earliestid.load(Relaxed),
            latestid,
            earliestoffset: header.earliestoffset.load(Relaxed),
            latestoffset: header.latestoffset.load(Relaxed),
            maxoffset: self.inner.maxoffset,
        }
    }

    /// Map a resident pktid to its current slot offset. Assumes `id` lies
    /// within `[snap.earliestid, snap.latestid]` and that no `pktid`
    /// wraparound occurred within that window —
    /// wraparound-safe arithmetic is left as a follow-on (see DESIGN.md).
    pub(crate) fn offset_of_id(&self, id: u64, snap: &HeaderSnapshot) -> u64 {
        let delta = snap.latestid.wrapping_sub(id);
        let back = delta.wrapping_mul(self.inner.pktsize);
        (snap.latestoffset + self.inner.maxoffset - back % self.inner.maxoffset) % self.inner.maxoffset
    }

    pub(crate) fn read_header_at_offset(&self, offset: u64) -> Option<PacketHeader> {
        if offset == OFFSET_UNSET {
            return None;
        }
        let mut buf = vec![0u8; self.inner.pktsize as usize];
        unsafe {
            crate::slot::read_slot(self.inner.slot_ptr(offset) as *const u8, self.inner.pktsize as usize, &mut buf);
        }
        Some(unsafe { std::ptr::read(buf.as_ptr() as *const PacketHeader) })
    }

    pub(crate) fn read_header_by_id(&self, id: u64) -> Option<PacketHeader> {
        let snap = self.header_snapshot();
        if snap.latestid == RINGID_UNSET || id < snap.earliestid || id > snap.latestid {
            return None;
        }
        self.read_header_at_offset(self.offset_of_id(id, &snap))
    }

    pub(crate) fn read_packet_at(&self, offset: u64) -> Packet {
        let mut buf = vec![0u8; self.inner.pktsize as usize];
        unsafe {
            crate::slot::read_slot(self.inner.slot_ptr(offset) as *const u8, self.inner.pktsize as usize, &mut buf);
        }
        let header = unsafe { std::ptr::read(buf.as_ptr() as *const PacketHeader) };
        let payload = buf[PacketHeader::SIZE..PacketHeader::SIZE + header.payload_length as usize].to_vec();
        Packet {
            pktid: header.pktid,
            stream_key: header.stream_key,
            data_start_time: header.data_start_time,
            data_end_time: header.data_end_time,
            payload,
            offset,
            next_in_stream: header.next_in_stream,
        }
    }

    /// Append one packet, evicting the oldest resident packet first if the
    /// ring is full. Spec §4.1 "Write", seven steps: compute next id and
    /// offset, evict if the slot is occupied, serialize into the slot,
    /// relink the stream's previous tail, publish `latestoffset` then
    /// `latestid` with `Release`, wake parked cursors.
    pub fn write(&self, stream_key: StreamKey, start: i64, end: i64, payload: &[u8]) -> Result<Packet, RingError> {
        let max_payload = self.inner.pktsize as usize - PacketHeader::SIZE;
        if payload.len() > max_payload {
            return Err(RingError::PayloadTooLarge {
                len: payload.len(),
                max: max_payload,
            });
        }

        let _guard = self.inner.write_lock.lock().unwrap();
        let header = self.inner.header();

        let prior_latestid = header.latestid.load(Relaxed);
        let pktid = next_pktid(prior_latestid);
        let prior_latestoffset = header.latestoffset.load(Relaxed);
        let new_offset = if prior_latestoffset == OFFSET_UNSET {
            0
        } else {
            (prior_latestoffset + self.inner.pktsize) % self.inner.maxoffset
        };

        let ring_was_full = prior_latestoffset != OFFSET_UNSET && new_offset == header.earliestoffset.load(Relaxed);
        if ring_was_full {
            self.evict_one(header)?;
        }

        let prior_tail_offset = self
            .inner
            .stream_index
            .on_publish(stream_key, pktid, start, end, (PacketHeader::SIZE + payload.len()) as u64, new_offset);

        let mut slot_buf = vec![0u8; self.inner.pktsize as usize];
        let packet_header = PacketHeader {
            pktid,
            stream_key,
            data_start_time: start,
            data_end_time: end,
            payload_length: payload.len() as u32,
            next_in_stream: OFFSET_UNSET,
        };
        unsafe {
            std::ptr::write(slot_buf.as_mut_ptr() as *mut PacketHeader, packet_header);
        }
        slot_buf[PacketHeader::SIZE..PacketHeader::SIZE + payload.len()].copy_from_slice(payload);
        unsafe {
            crate::slot::write_slot(self.inner.slot_ptr(new_offset), self.inner.pktsize as usize, &slot_buf);
        }

        if prior_tail_offset != OFFSET_UNSET {
            let field_offset = offset_of!(PacketHeader, next_in_stream);
            unsafe {
                crate::slot::patch_slot(
                    self.inner.slot_ptr(prior_tail_offset),
                    self.inner.pktsize as usize,
                    field_offset,
                    &new_offset.to_ne_bytes(),
                );
            }
        }

        if prior_latestoffset == OFFSET_UNSET {
            header.earliestid.store(pktid, Relaxed);
        }
        header.latestoffset.store(new_offset, Release);
        header.latestid.store(pktid, Release);

        {
            let mut gen = self.inner.generation.lock().unwrap();
            *gen = gen.wrapping_add(1);
        }
        self.inner.woken.notify_all();

        Ok(Packet {
            pktid,
            stream_key,
            data_start_time: start,
            data_end_time: end,
            payload: payload.to_vec(),
            offset: new_offset,
            next_in_stream: OFFSET_UNSET,
        })
    }

    fn evict_one(&self, header: &RingHeader) -> Result<(), RingError> {
        let earliest_offset = header.earliestoffset.load(Relaxed);
        let evicted = self
            .read_header_at_offset(earliest_offset)
            .ok_or(RingError::Corrupt)?;

        let (new_earliest_id, new_earliest_time) = if evicted.next_in_stream != OFFSET_UNSET {
            let next = self
                .read_header_at_offset(evicted.next_in_stream)
                .ok_or(RingError::Corrupt)?;
            (next.pktid, next.data_start_time)
        } else {
            (0, 0)
        };
        self.inner.stream_index.on_evict(
            &evicted.stream_key,
            evicted.next_in_stream,
            new_earliest_id,
            new_earliest_time,
            (PacketHeader::SIZE + evicted.payload_length as usize) as u64,
        );

        let new_ring_earliest_offset = (earliest_offset + self.inner.pktsize) % self.inner.maxoffset;
        header.earliestoffset.store(new_ring_earliest_offset, Relaxed);
        header.earliestid.store(next_pktid(evicted.pktid), Relaxed);
        Ok(())
    }

    /// Block up to `timeout` for the next write to occur. Used by a worker
    /// thread holding a cursor that just returned `WouldBlock`, so it can
    /// park instead of busy-polling.
    pub fn wait_for_write(&self, timeout: Duration) -> bool {
        let gen = self.inner.generation.lock().unwrap();
        let start = *gen;
        let (guard, result) = self
            .inner
            .woken
            .wait_timeout_while(gen, timeout, |g| *g == start)
            .unwrap();
        drop(guard);
        !result.timed_out()
    }

    /// Clear the corruption flag and flush the backing mapping, marking a
    /// clean shutdown.
    pub fn shutdown(&self) -> Result<(), RingError> {
        let _guard = self.inner.write_lock.lock().unwrap();
        self.inner.header().corruption_flag.store(0, Release);
        if let Some(path) = &self.inner.sidecar_path {
            self.inner.stream_index.persist(path)?;
        }
        let mut backing = self.inner.backing.lock().unwrap();
        match &mut *backing {
            Backing::Anon(m) => m.flush()?,
            Backing::File(m) => m.flush()?,
        }
        Ok(())
    }

    pub fn maxpackets(&self) -> u64 {
        self.inner.maxpackets
    }

    pub fn pktsize(&self) -> u64 {
        self.inner.pktsize
    }

    pub fn ring_path(&self) -> Option<&Path> {
        self.inner.ring_path.as_deref()
    }
}

/// Next id after `prior`, with `RINGID_UNSET` (never written) starting at 1
/// and `RINGID_MAXIMUM` wrapping back to 1.
fn next_pktid(prior: u64) -> u64 {
    if prior == RINGID_UNSET {
        1
    } else if prior >= RINGID_MAXIMUM {
        1
    } else {
        prior + 1
    }
}

fn sidecar_path_for(ring_path: &Path) -> PathBuf {
    let mut p = ring_path.as_os_str().to_owned();
    p.push(".streamidx");
    PathBuf::from(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> StreamKey {
        s.parse().unwrap()
    }

    #[test]
    fn monotonic_pktids() {
        let ring = PacketRing::create_anon(256, 8).unwrap();
        let p1 = ring.write(key("A"), 1, 1, b"one").unwrap();
        let p2 = ring.write(key("A"), 2, 2, b"two").unwrap();
        assert_eq!(p1.pktid, 1);
        assert_eq!(p2.pktid, 2);
    }

    #[test]
    fn eviction_advances_earliest_and_stream_index() {
        let ring = PacketRing::create_anon(256, 2).unwrap();
        ring.write(key("A"), 1, 1, b"one").unwrap();
        ring.write(key("A"), 2, 2, b"two").unwrap();
        ring.write(key("A"), 3, 3, b"three").unwrap();

        let snap = ring.header_snapshot();
        assert_eq!(snap.earliestid, 2);
        assert_eq!(snap.latestid, 3);

        let entry = ring.stream_entry(&key("A")).unwrap();
        assert_eq!(entry.earliest_id, 2);
        assert_eq!(entry.latest_id, 3);
        assert_eq!(entry.packetcount, 2);
    }

    #[test]
    fn per_stream_chain_links_forward() {
        let ring = PacketRing::create_anon(256, 8).unwrap();
        ring.write(key("A"), 1, 1, b"one").unwrap();
        ring.write(key("B"), 2, 2, b"b").unwrap();
        ring.write(key("A"), 3, 3, b"three").unwrap();

        let entry = ring.stream_entry(&key("A")).unwrap();
        let first = ring.read_header_by_id(entry.earliest_id).unwrap();
        assert_ne!(first.next_in_stream, OFFSET_UNSET);
        let second = ring.read_header_at_offset(first.next_in_stream).unwrap();
        assert_eq!(second.pktid, 3);
    }

    #[test]
    fn rejects_oversize_payload() {
        let ring = PacketRing::create_anon(64, 4).unwrap();
        let oversize = vec![0u8; 64];
        let err = ring.write(key("A"), 1, 1, &oversize).unwrap_err();
        assert!(matches!(err, RingError::PayloadTooLarge { .. }));
    }

    #[test]
    fn open_file_backed_ring_roundtrips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.dat");
        {
            let (ring, validation) = PacketRing::open(&path, 256, 8, 1).unwrap();
            assert_eq!(validation, RingValidation::Fresh);
            ring.write(key("A"), 1, 1, b"one").unwrap();
            ring.shutdown().unwrap();
        }
        let (ring, validation) = PacketRing::open(&path, 256, 8, 1).unwrap();
        assert_eq!(validation, RingValidation::Adopted);
        let entry = ring.stream_entry(&key("A")).unwrap();
        assert_eq!(entry.packetcount, 1);
    }

    #[test]
    fn reopen_with_mismatched_geometry_fails_without_touching_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.dat");
        {
            let (ring, _) = PacketRing::open(&path, 256, 8, 1).unwrap();
            ring.write(key("A"), 1, 1, b"one").unwrap();
            ring.shutdown().unwrap();
        }
        let err = PacketRing::open(&path, 512, 4, 1).unwrap_err();
        assert!(matches!(err, RingError::GeometryMismatch));
        assert!(path.exists());
        assert!(!dir.path().join("ring.corrupt").exists());
    }
}
