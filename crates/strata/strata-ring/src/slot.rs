//! Per-slot seqlock protocol over a runtime-sized byte region.
//!
//! Unlike a compile-time-sized `SeqlockSlot<T: Copy>`, a slot here has a
//! data length (`pktsize`) fixed only at ring-creation time. The protocol
//! itself — odd/even sequence number, `Release` on write, `Acquire`-with-
//! retry on read — is the standard seqlock shape.

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

const SEQ_BYTES: usize = 8;

/// Bytes from slot start to the start of its data region.
pub const DATA_OFFSET: usize = SEQ_BYTES;

/// Write `data` into the slot at `slot_ptr`, clearing any bytes beyond
/// `data.len()` up to `slot_len` so stale payload tails never leak into a
/// shorter subsequent packet.
///
/// # Safety
/// `slot_ptr` must point to a valid, writable region of at least
/// `DATA_OFFSET + slot_len` bytes, exclusively owned by the single ring
/// writer for the duration of this call.
pub unsafe fn write_slot(slot_ptr: *mut u8, slot_len: usize, data: &[u8]) {
    debug_assert!(data.len() <= slot_len);
    unsafe {
        let seq = slot_ptr as *mut AtomicU64;
        let dst = slot_ptr.add(DATA_OFFSET);
        let s0 = (*seq).load(Ordering::Relaxed);
        (*seq).store(s0.wrapping_add(1), Ordering::Release);
        ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        if data.len() < slot_len {
            ptr::write_bytes(dst.add(data.len()), 0, slot_len - data.len());
        }
        (*seq).store(s0.wrapping_add(2), Ordering::Release);
    }
}

/// Patch an already-published slot's bytes at `field_offset..field_offset +
/// patch.len()` (used to back-fill `next_in_stream` on the previous tail
/// packet of a stream once a new packet for that stream is appended).
/// Goes through the same seqlock protocol as a full write so readers never
/// observe a torn field.
///
/// # Safety
/// Same preconditions as [`write_slot`]; `field_offset + patch.len()` must
/// be `<= slot_len`.
pub unsafe fn patch_slot(slot_ptr: *mut u8, slot_len: usize, field_offset: usize, patch: &[u8]) {
    debug_assert!(field_offset + patch.len() <= slot_len);
    unsafe {
        let seq = slot_ptr as *mut AtomicU64;
        let dst = slot_ptr.add(DATA_OFFSET + field_offset);
        let s0 = (*seq).load(Ordering::Relaxed);
        (*seq).store(s0.wrapping_add(1), Ordering::Release);
        ptr::copy_nonoverlapping(patch.as_ptr(), dst, patch.len());
        (*seq).store(s0.wrapping_add(2), Ordering::Release);
    }
}

/// Read `slot_len` bytes from the slot at `slot_ptr` into `out`, spinning
/// until a consistent (non-torn) snapshot is obtained.
///
/// # Safety
/// `slot_ptr` must point to a valid, readable region of at least
/// `DATA_OFFSET + slot_len` bytes for the lifetime of the call.
pub unsafe fn read_slot(slot_ptr: *const u8, slot_len: usize, out: &mut [u8]) {
    debug_assert!(out.len() >= slot_len);
    unsafe {
        let seq = slot_ptr as *const AtomicU64;
        let src = slot_ptr.add(DATA_OFFSET);
        loop {
            let s1 = (*seq).load(Ordering::Acquire);
            if s1 & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            ptr::copy_nonoverlapping(src, out.as_mut_ptr(), slot_len);
            let s2 = (*seq).load(Ordering::Acquire);
            if s1 == s2 {
                return;
            }
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips() {
        let slot_len = 32;
        let mut buf = vec![0u8; DATA_OFFSET + slot_len];
        let data = vec![7u8; 10];
        unsafe {
            write_slot(buf.as_mut_ptr(), slot_len, &data);
        }
        let mut out = vec![0u8; slot_len];
        unsafe {
            read_slot(buf.as_ptr(), slot_len, &mut out);
        }
        assert_eq!(&out[..10], &data[..]);
        assert!(out[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn patch_updates_only_targeted_field() {
        let slot_len = 16;
        let mut buf = vec![0u8; DATA_OFFSET + slot_len];
        unsafe {
            write_slot(buf.as_mut_ptr(), slot_len, &[1u8; 16]);
            patch_slot(buf.as_mut_ptr(), slot_len, 8, &[9u8; 4]);
        }
        let mut out = vec![0u8; slot_len];
        unsafe {
            read_slot(buf.as_ptr(), slot_len, &mut out);
        }
        assert_eq!(&out[0..8], &[1u8; 8]);
        assert_eq!(&out[8..12], &[9u8; 4]);
        assert_eq!(&out[12..16], &[1u8; 4]);
    }
}
