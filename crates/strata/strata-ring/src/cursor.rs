//! `ReaderCursor`: a single reader's position within a [`crate::ring::PacketRing`]
//! plus its match/reject/time-window filters.

use strata_packet::{RINGID_UNSET, glob_match_any};

use crate::error::NextOutcome;
use crate::ring::{HeaderSnapshot, PacketRing};

/// Direction for [`ReaderCursor::position_at_time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    Forward,
    Backward,
}

pub struct ReaderCursor {
    ring: PacketRing,
    /// Highest pktid already handed to the caller, or `RINGID_UNSET` if the
    /// cursor has never delivered anything. `next()` always targets
    /// `last_delivered + 1`.
    last_delivered: u64,
    match_pattern: Option<String>,
    reject_pattern: Option<String>,
    time_window: Option<(i64, i64)>,
    percent_lag: u32,
}

impl ReaderCursor {
    pub(crate) fn new(ring: PacketRing) -> Self {
        Self {
            ring,
            last_delivered: RINGID_UNSET,
            match_pattern: None,
            reject_pattern: None,
            time_window: None,
            percent_lag: 0,
        }
    }

    pub fn set_match(&mut self, pattern: impl Into<String>) {
        self.match_pattern = Some(pattern.into());
    }

    pub fn clear_match(&mut self) {
        self.match_pattern = None;
    }

    pub fn set_reject(&mut self, pattern: impl Into<String>) {
        self.reject_pattern = Some(pattern.into());
    }

    pub fn clear_reject(&mut self) {
        self.reject_pattern = None;
    }

    pub fn set_time_window(&mut self, start: i64, end: i64) {
        self.time_window = Some((start, end));
    }

    pub fn clear_time_window(&mut self) {
        self.time_window = None;
    }

    pub fn percent_lag(&self) -> u32 {
        self.percent_lag
    }

    /// Position so the next [`Self::next`] call delivers the ring's current
    /// earliest resident packet.
    pub fn position_earliest(&mut self) {
        let snap = self.ring.header_snapshot();
        self.last_delivered = if snap.earliestid == RINGID_UNSET {
            RINGID_UNSET
        } else {
            snap.earliestid.wrapping_sub(1)
        };
    }

    /// Position so the next [`Self::next`] call delivers the ring's current
    /// latest packet (the most recent write known at the time this is
    /// called), per the Open Question resolved in SPEC_FULL.md: "latest"
    /// means inclusive of the current tail, mirroring `position_after_id`'s
    /// exclusive semantics one packet earlier.
    pub fn position_latest(&mut self) {
        let snap = self.ring.header_snapshot();
        self.last_delivered = if snap.latestid == RINGID_UNSET {
            RINGID_UNSET
        } else {
            snap.latestid.wrapping_sub(1)
        };
    }

    /// Position so the next [`Self::next`] call delivers the smallest
    /// resident pktid strictly greater than `id`. If `id` has already been
    /// evicted the cursor snaps to the current earliest instead.
    pub fn position_after_id(&mut self, id: u64) {
        let snap = self.ring.header_snapshot();
        if snap.earliestid != RINGID_UNSET && id < snap.earliestid {
            self.last_delivered = snap.earliestid.wrapping_sub(1);
        } else {
            self.last_delivered = id;
        }
    }

    /// Position at the first resident packet (within the streams matched by
    /// the cursor's current match pattern, or all streams if unset) whose
    /// `data_start_time` satisfies `direction` relative to `t`.
    pub fn position_at_time(&mut self, t: i64, direction: SeekDirection) {
        let entries = self.ring.stream_index().all_snapshots();
        let mut best: Option<u64> = None;
        for entry in entries {
            if let Some(pat) = &self.match_pattern {
                if !glob_match_any(pat, entry.stream_key.as_str()) {
                    continue;
                }
            }
            let mut id = entry.earliest_id;
            let mut candidate = None;
            loop {
                let Some(header) = self.ring.read_header_by_id(id) else {
                    break;
                };
                let satisfies = match direction {
                    SeekDirection::Forward => header.data_start_time >= t,
                    SeekDirection::Backward => header.data_start_time <= t,
                };
                if satisfies {
                    candidate = Some(id);
                    if direction == SeekDirection::Forward {
                        break;
                    }
                } else if direction == SeekDirection::Backward {
                    break;
                }
                if header.next_in_stream == strata_packet::OFFSET_UNSET {
                    break;
                }
                let Some(next_header) = self.ring.read_header_at_offset(header.next_in_stream) else {
                    break;
                };
                id = next_header.pktid;
            }
            if let Some(c) = candidate {
                best = Some(match (best, direction) {
                    (None, _) => c,
                    (Some(b), SeekDirection::Forward) => b.min(c),
                    (Some(b), SeekDirection::Backward) => b.max(c),
                });
            }
        }
        match best {
            Some(id) => self.last_delivered = id.wrapping_sub(1),
            None => self.last_delivered = RINGID_UNSET,
        }
    }

    pub fn next(&mut self) -> NextOutcome {
        let snap = self.ring.header_snapshot();
        if snap.latestid == RINGID_UNSET {
            return NextOutcome::WouldBlock;
        }

        if self.last_delivered != RINGID_UNSET && self.last_delivered.wrapping_add(1) < snap.earliestid {
            let missed = snap.earliestid - self.last_delivered - 1;
            self.last_delivered = snap.earliestid.wrapping_sub(1);
            self.update_lag(&snap);
            return NextOutcome::Skipped(missed);
        }

        let mut target = if self.last_delivered == RINGID_UNSET {
            snap.earliestid
        } else {
            self.last_delivered.wrapping_add(1)
        };

        loop {
            if target > snap.latestid {
                self.update_lag(&snap);
                return NextOutcome::WouldBlock;
            }
            let offset = self.ring.offset_of_id(target, &snap);
            let packet = self.ring.read_packet_at(offset);
            self.last_delivered = target;
            if self.passes_filters(&packet) {
                self.update_lag(&snap);
                return NextOutcome::Packet(packet);
            }
            target = target.wrapping_add(1);
        }
    }

    fn passes_filters(&self, packet: &strata_packet::Packet) -> bool {
        if let Some(pat) = &self.match_pattern {
            if !glob_match_any(pat, packet.stream_key.as_str()) {
                return false;
            }
        }
        if let Some(pat) = &self.reject_pattern {
            if glob_match_any(pat, packet.stream_key.as_str()) {
                return false;
            }
        }
        if let Some((start, end)) = self.time_window {
            if packet.data_end_time < start || packet.data_start_time > end {
                return false;
            }
        }
        true
    }

    /// Percent-lag metric: how far behind the writer's current
    /// tail this cursor's last-delivered packet is, as a percentage of the
    /// ring's currently occupied span. Offsets are "unwrapped" by adding
    /// `maxoffset` when they lie before `earliestoffset`, so the subtraction
    /// below is always non-negative even across a ring wrap.
    fn update_lag(&mut self, snap: &HeaderSnapshot) {
        if snap.latestoffset == strata_packet::OFFSET_UNSET {
            self.percent_lag = 0;
            return;
        }
        let unwrap = |offset: u64| -> u64 {
            if offset < snap.earliestoffset {
                offset + snap.maxoffset
            } else {
                offset
            }
        };
        let l = unwrap(snap.latestoffset);
        let span = l.saturating_sub(snap.earliestoffset);
        if span == 0 {
            self.percent_lag = 0;
            return;
        }
        let r = if self.last_delivered == RINGID_UNSET {
            unwrap(snap.earliestoffset)
        } else {
            unwrap(self.ring.offset_of_id(self.last_delivered, snap))
        };
        let lag = l.saturating_sub(r);
        self.percent_lag = ((lag as u128 * 100) / span as u128).min(100) as u32;
    }
}
