// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// Fast box: a private sender→receiver ring for small eager messages,
// carved from the sender's segment once traffic to a peer warms up.
//
// Layout: one cache line of control (the receiver's published read
// counter) followed by a power-of-two data area. Records are a FragHeader
// plus inline payload, 8-byte aligned; the header's atomic `flags` word is
// the commit point. Both counters are free-running u32s — the sender keeps
// its write counter locally (nobody else needs it), the receiver publishes
// its read counter so the sender can compute free space. A FLAG_SKIP
// marker fills the tail when a record will not fit before the end of the
// ring; both sides account for the skipped bytes identically.
//
// Records reuse the FIFO header format on purpose: the progress engine
// hands fast-box records to the same frag-handling code as FIFO entries.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::frag::{self, FragHeader, FLAG_READY, FLAG_SKIP, HDR_SIZE};

/// Control space preceding the data area.
pub const FBOX_CTRL_SIZE: usize = 64;

/// Receiver-owned control block at the base of every fast box.
#[repr(C)]
pub struct FboxCtrl {
    /// Free-running count of bytes the receiver has consumed.
    read_total: AtomicU32,
    _pad: [u8; FBOX_CTRL_SIZE - 4],
}

/// Bytes a record occupies in the ring.
fn record_size(payload_len: usize) -> u32 {
    ((HDR_SIZE + payload_len + 7) & !7) as u32
}

/// Sender half of a fast box. Lives in the sending process; `base` points
/// into that process's own segment.
pub struct FboxSender {
    ctrl: *const FboxCtrl,
    data: *mut u8,
    data_len: u32,
    write_total: u32,
}

// Safety: points into a process-shared mapping; the sender half is only
// ever driven under the endpoint's fast-box lock.
unsafe impl Send for FboxSender {}

impl FboxSender {
    /// Wrap a zeroed region of `FBOX_CTRL_SIZE + data_len` bytes.
    ///
    /// # Safety
    /// `base` must be 64-byte aligned, zero-initialized, and sized
    /// `FBOX_CTRL_SIZE + data_len`; `data_len` must be a power of two.
    pub unsafe fn new(base: *mut u8, data_len: u32) -> Self {
        debug_assert!(data_len.is_power_of_two());
        Self {
            ctrl: base as *const FboxCtrl,
            data: base.add(FBOX_CTRL_SIZE),
            data_len,
            write_total: 0,
        }
    }

    fn free_bytes(&self) -> u32 {
        let read = unsafe { &*self.ctrl }.read_total.load(Ordering::Acquire);
        self.data_len - self.write_total.wrapping_sub(read)
    }

    /// Try to place one message. Returns `false` when the box is too full
    /// (or the record is too large for it) — the caller falls back to the
    /// FIFO path; order within each path is preserved.
    pub fn try_write(&mut self, tag: u8, payload: &[u8]) -> bool {
        let rec = record_size(payload.len());
        if rec + 8 > self.data_len {
            return false;
        }
        loop {
            let pos = self.write_total & (self.data_len - 1);
            let tail = self.data_len - pos;
            if rec > tail {
                // Record will not fit before the end: burn the tail with a
                // skip marker and restart at offset 0. Only the flag word is
                // written — the tail may be smaller than a full header.
                if self.free_bytes() < tail + rec {
                    return false;
                }
                unsafe {
                    let flag = &*(self.data.add(pos as usize) as *const AtomicU32);
                    flag.store(FLAG_READY | FLAG_SKIP, Ordering::Release);
                }
                self.write_total = self.write_total.wrapping_add(tail);
                continue;
            }
            if self.free_bytes() < rec {
                return false;
            }

            unsafe {
                let ptr = self.data.add(pos as usize);
                let hdr = frag::header_at_mut(ptr);
                hdr.tag = tag;
                hdr.class = 0;
                hdr.len = payload.len() as u64;
                hdr.frag = 0;
                hdr.sc_base = 0;
                hdr.sc_len = 0;
                hdr.fbox_base = 0;
                hdr.fbox_len = 0;
                std::ptr::copy_nonoverlapping(
                    payload.as_ptr(),
                    ptr.add(HDR_SIZE),
                    payload.len(),
                );
                // Commit: the receiver's acquire load of flags makes every
                // store above visible.
                hdr.flags.store(FLAG_READY, Ordering::Release);
            }
            self.write_total = self.write_total.wrapping_add(rec);
            return true;
        }
    }
}

/// Receiver half, attached from the peer's segment mapping after a
/// setup-fast-box header arrives.
pub struct FboxReceiver {
    ctrl: *const FboxCtrl,
    data: *mut u8,
    data_len: u32,
    read_total: u32,
}

// Safety: same sharing argument as FboxSender; driven only under the
// progress guard.
unsafe impl Send for FboxReceiver {}

impl FboxReceiver {
    /// Attach to a fast box set up by the sending peer.
    ///
    /// # Safety
    /// `base` must be the local mapping of a region initialized by
    /// [`FboxSender::new`] with the same `data_len`.
    pub unsafe fn attach(base: *mut u8, data_len: u32) -> Self {
        debug_assert!(data_len.is_power_of_two());
        Self {
            ctrl: base as *const FboxCtrl,
            data: base.add(FBOX_CTRL_SIZE),
            data_len,
            read_total: 0,
        }
    }

    /// Next committed record, or `None` when the box is empty. The pointer
    /// stays valid until [`consume`](Self::consume) retires the record; the
    /// caller processes it and then must consume it.
    pub fn poll(&mut self) -> Option<*const FragHeader> {
        loop {
            let pos = self.read_total & (self.data_len - 1);
            // Inspect the flag word alone first: a skip marker at the ring
            // tail is not backed by a full header.
            let flag_ptr = unsafe { &*(self.data.add(pos as usize) as *const AtomicU32) };
            let flags = flag_ptr.load(Ordering::Acquire);
            if flags & FLAG_READY == 0 {
                return None;
            }
            if flags & FLAG_SKIP != 0 {
                let tail = self.data_len - pos;
                flag_ptr.store(0, Ordering::Relaxed);
                self.advance(tail);
                continue;
            }
            return Some(self.data.wrapping_add(pos as usize) as *const FragHeader);
        }
    }

    /// Retire the record returned by the last [`poll`](Self::poll),
    /// releasing its bytes back to the sender.
    pub fn consume(&mut self, payload_len: usize) {
        let pos = self.read_total & (self.data_len - 1);
        let hdr = unsafe { frag::header_at(self.data.add(pos as usize)) };
        hdr.flags.store(0, Ordering::Relaxed);
        self.advance(record_size(payload_len));
    }

    fn advance(&mut self, bytes: u32) {
        self.read_total = self.read_total.wrapping_add(bytes);
        unsafe { &*self.ctrl }
            .read_total
            .store(self.read_total, Ordering::Release);
    }
}
