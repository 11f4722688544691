// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// Per-peer endpoint state.
//
// Each endpoint owns an attached mapping of its peer's segment (the peer's
// FIFO lives at its base), a pending queue for fragments rejected by a
// full FIFO, and the fast-box halves for each direction. Lock order across
// the crate: the component-wide pending-endpoints lock encloses the
// per-endpoint pending lock, never the reverse.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::Mutex;

use crate::fbox::{FboxReceiver, FboxSender};
use crate::fifo::Fifo;
use crate::segment::SharedSegment;
use crate::single_copy::SingleCopyMechanism;

pub struct Endpoint {
    pub rank: u32,
    /// Our mapping of the peer's segment.
    segment: SharedSegment,
    /// The peer's own mapping base (from modex); used to translate
    /// addresses the peer advertises into offsets.
    pub peer_base: u64,
    pub peer_pid: i32,
    /// Mechanism the peer selected (from its modex descriptor).
    pub peer_mechanism: SingleCopyMechanism,
    /// Whether both processes share a user namespace; the cross-process
    /// copy syscalls are refused between namespaces.
    pub same_user_ns: bool,

    /// Fragments (relative header addresses) waiting for FIFO space, in
    /// original send order.
    pub pending: Mutex<VecDeque<i64>>,
    /// Set while this endpoint sits on the component pending list.
    pub waiting: AtomicBool,
    /// Outbound sends so far; drives fast-box activation.
    pub send_count: AtomicU32,

    /// Our sender half of the fast box toward this peer.
    pub fbox_out: Mutex<Option<FboxSender>>,
    /// Our receiver half of the peer's fast box toward us.
    pub fbox_in: Mutex<Option<FboxReceiver>>,
}

impl Endpoint {
    pub fn new(
        rank: u32,
        segment: SharedSegment,
        peer_base: u64,
        peer_pid: i32,
        peer_mechanism: SingleCopyMechanism,
        same_user_ns: bool,
    ) -> Self {
        Self {
            rank,
            segment,
            peer_base,
            peer_pid,
            peer_mechanism,
            same_user_ns,
            pending: Mutex::new(VecDeque::new()),
            waiting: AtomicBool::new(false),
            send_count: AtomicU32::new(0),
            fbox_out: Mutex::new(None),
            fbox_in: Mutex::new(None),
        }
    }

    /// The peer's FIFO, at the base of its segment.
    pub fn fifo(&self) -> &Fifo {
        unsafe { &*(self.segment.base() as *const Fifo) }
    }

    /// Local pointer for an offset into the peer's segment.
    pub fn translate(&self, offset: u64) -> *mut u8 {
        assert!(
            self.segment.contains(offset, 1),
            "relative address outside peer rank {} segment",
            self.rank
        );
        self.segment.ptr_at(offset)
    }

    /// Local pointer for an address the peer advertised in its own address
    /// space. The region must lie inside the peer's registered segment —
    /// anything else is a protocol violation, not a recoverable error.
    pub fn translate_peer_va(&self, addr: u64, len: usize) -> *mut u8 {
        let offset = addr.wrapping_sub(self.peer_base);
        assert!(
            addr >= self.peer_base && self.segment.contains(offset, len),
            "remote address {addr:#x}+{len} outside peer rank {} registered segment",
            self.rank
        );
        self.segment.ptr_at(offset)
    }
}
