//! Integration tests exercising `PacketRing` end to end: monotonic pktid
//! assignment across eviction, crash-consistent recovery on reopen, time
//! seek, and the percent-lag metric.

use strata_ring::{PacketRing, RingValidation, SeekDirection};

fn key(s: &str) -> strata_packet::StreamKey {
    s.parse().unwrap()
}

#[test]
fn pktids_stay_monotonic_across_eviction() {
    let ring = PacketRing::create_anon(256, 4).unwrap();
    let mut prior = 0u64;
    for i in 0..20u64 {
        let packet = ring.write(key("A"), i as i64, i as i64, b"payload").unwrap();
        assert!(packet.pktid > prior, "pktid went backwards at write {i}");
        prior = packet.pktid;
    }
    let snap = ring.header_snapshot();
    assert_eq!(snap.latestid, 20);
    // Ring only holds 4 packets; the rest were evicted.
    assert_eq!(snap.earliestid, 17);
}

#[test]
fn crash_without_clean_shutdown_is_recovered_by_rename() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring.dat");
    {
        let (ring, validation) = PacketRing::open(&path, 256, 8, 1).unwrap();
        assert_eq!(validation, RingValidation::Fresh);
        ring.write(key("A"), 1, 1, b"one").unwrap();
        // Dropped without calling `shutdown()`, so the corruption flag set
        // at `RingHeader::init` is never cleared — simulates a crash.
    }

    let (ring, validation) = PacketRing::open(&path, 256, 8, 1).unwrap();
    assert_eq!(validation, RingValidation::Corrupt);
    assert!(dir.path().join("ring.corrupt").exists());
    assert!(ring.stream_entry(&key("A")).is_none());
}

#[test]
fn geometry_mismatch_on_reopen_is_unrecoverable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring.dat");
    {
        let (ring, _) = PacketRing::open(&path, 256, 8, 1).unwrap();
        ring.write(key("A"), 1, 1, b"one").unwrap();
        ring.shutdown().unwrap();
    }
    let err = PacketRing::open(&path, 512, 4, 1).unwrap_err();
    assert!(matches!(err, strata_ring::RingError::GeometryMismatch));
    // The original file is untouched: no rename-aside, no reinit.
    assert!(path.exists());
    assert!(!dir.path().join("ring.corrupt").exists());
}

#[test]
fn position_at_time_seeks_forward_to_the_right_packet() {
    let ring = PacketRing::create_anon(256, 8).unwrap();
    ring.write(key("A"), 100, 100, b"a").unwrap();
    ring.write(key("A"), 200, 200, b"b").unwrap();
    ring.write(key("A"), 300, 300, b"c").unwrap();

    let mut cursor = ring.open_cursor();
    cursor.position_at_time(250, SeekDirection::Forward);
    let strata_ring::NextOutcome::Packet(packet) = cursor.next() else {
        panic!("expected a packet at or after t=250")
    };
    assert_eq!(packet.data_start_time, 300);

    let mut cursor = ring.open_cursor();
    cursor.position_at_time(200, SeekDirection::Forward);
    let strata_ring::NextOutcome::Packet(packet) = cursor.next() else {
        panic!("expected a packet at or after t=200")
    };
    assert_eq!(packet.data_start_time, 200);
}

#[test]
fn percent_lag_reflects_how_far_behind_the_tail_the_cursor_is() {
    let ring = PacketRing::create_anon(256, 20).unwrap();
    for i in 1..=11u64 {
        ring.write(key("A"), i as i64, i as i64, b"x").unwrap();
    }

    let mut cursor = ring.open_cursor();
    cursor.position_earliest();
    for _ in 0..10 {
        assert!(matches!(cursor.next(), strata_ring::NextOutcome::Packet(_)));
    }

    assert_eq!(cursor.percent_lag(), 10);
}
