// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// The transport component: one instance per local rank.
//
// Owns the local segment (FIFO + arena), the size-classed fragment pools,
// the endpoint table, the pending-endpoint list, and the progress engine.
// Everything here is driven cooperatively: sends either complete
// immediately, park on a pending queue, or fail with a retryable error;
// `progress` is the single entry point the caller's event loop invokes.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::TransportConfig;
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::fbox::{FboxReceiver, FboxSender, FBOX_CTRL_SIZE};
use crate::fifo::Fifo;
use crate::frag::{
    self, Arena, FragClass, FragHeader, FragPool, FLAG_COMPLETE, FLAG_SETUP_FBOX,
    FLAG_SINGLE_COPY, HDR_SIZE,
};
use crate::modex::{self, ModexDescriptor};
use crate::segment::{RelAddr, SharedSegment};
use crate::single_copy::{self, AtomicOp, SingleCopyMechanism};

/// Slots polled from the local FIFO per progress pass; bounds the work one
/// call can do so it never starves the caller's loop.
const FIFO_POLL_BOUND: usize = 31;

/// What a receive callback sees. The referenced memory belongs to the
/// transport and must not be retained past the call.
pub struct ReceiveDescriptor<'a> {
    pub src_rank: u32,
    pub tag: u8,
    /// One segment for inline data; a second when a single-copy region was
    /// attached.
    pub segments: &'a [&'a [u8]],
    /// The context value supplied at registration.
    pub context: &'a (dyn Any + Send + Sync),
}

/// Receive upcall registered per tag.
pub type ActiveMessageHandler = Arc<dyn Fn(&ReceiveDescriptor<'_>) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    handler: ActiveMessageHandler,
    context: Arc<dyn Any + Send + Sync>,
}

/// A shared-memory transport instance for one local rank.
pub struct Transport {
    config: TransportConfig,
    mechanism: SingleCopyMechanism,
    segment: SharedSegment,
    seg_path: Option<std::path::PathBuf>,
    arena: Arena,
    pools: [FragPool; 3],

    endpoints: RwLock<Vec<Option<Arc<Endpoint>>>>,
    registrations: RwLock<Vec<Option<Registration>>>,

    /// Component lock: ranks whose endpoints have pending fragments.
    pending_endpoints: Mutex<Vec<u32>>,
    /// Ranks with an installed inbound fast box, polled first each pass.
    fbox_poll: Mutex<Vec<u32>>,
    num_fbox_in: AtomicUsize,
    /// Outbound fast boxes allocated so far, bounded by `fbox_max`.
    fbox_out_count: AtomicU32,

    /// Keeps zero-copy payloads alive until their completion echo.
    zero_copy_refs: Mutex<HashMap<u64, Arc<[u8]>>>,

    progress_guard: AtomicBool,
    my_pid: i32,
    user_ns: u64,
}

impl Transport {
    /// Build a transport for this rank. Any failure here means "no
    /// transport instance" — the process carries on with whatever other
    /// transports it has.
    pub fn new(mut config: TransportConfig) -> Result<Self, TransportError> {
        config.normalize();

        let selection =
            single_copy::select_mechanism(config.single_copy_mechanism, single_copy::probe_mechanism);
        let mechanism = selection.mechanism;
        tracing::debug!(rank = config.local_rank, %mechanism, "single-copy mechanism selected");

        // With a true address-space-attach backend the segment needs no
        // backing file — peers reach it through the attach token instead.
        let (segment, seg_path) = if mechanism == SingleCopyMechanism::AddressSpaceAttach {
            let seg = SharedSegment::create_anonymous(config.segment_size)
                .map_err(TransportError::Init)?;
            (seg, None)
        } else {
            let path = config.backing_directory.join(format!(
                "smtl_segment.{}.{}",
                config.session_id, config.local_rank
            ));
            let seg = SharedSegment::create(&path, config.segment_size)
                .map_err(TransportError::Init)?;
            (seg, Some(path))
        };

        unsafe { Fifo::init(segment.base(), config.fifo_slots) };

        let arena_start = (Fifo::size_of(config.fifo_slots) as u64 + 63) & !63;
        let arena = Arena::new(arena_start, config.segment_size as u64);

        let pools = [
            FragPool::new(
                FragClass::Eager,
                config.eager_limit,
                config.free_list_inc,
                config.free_list_max,
            ),
            FragPool::new(
                FragClass::MaxSend,
                config.max_send_size,
                config.free_list_inc,
                config.free_list_max,
            ),
            FragPool::new(
                FragClass::User,
                config.max_inline_send,
                config.free_list_inc,
                config.free_list_max,
            ),
        ];
        for pool in &pools {
            pool.reserve(&arena, config.free_list_num).map_err(|_| {
                TransportError::Init(std::io::Error::new(
                    std::io::ErrorKind::OutOfMemory,
                    "segment too small for the initial fragment pools",
                ))
            })?;
        }

        let peers = config.num_local_peers as usize + 1;
        Ok(Self {
            my_pid: std::process::id() as i32,
            user_ns: modex::user_ns_id(),
            config,
            mechanism,
            segment,
            seg_path,
            arena,
            pools,
            endpoints: RwLock::new((0..peers).map(|_| None).collect()),
            registrations: RwLock::new((0..256).map(|_| None).collect()),
            pending_endpoints: Mutex::new(Vec::new()),
            fbox_poll: Mutex::new(Vec::new()),
            num_fbox_in: AtomicUsize::new(0),
            fbox_out_count: AtomicU32::new(0),
            zero_copy_refs: Mutex::new(HashMap::new()),
            progress_guard: AtomicBool::new(false),
        })
    }

    /// The single-copy mechanism this instance settled on.
    pub fn mechanism(&self) -> SingleCopyMechanism {
        self.mechanism
    }

    pub fn local_rank(&self) -> u32 {
        self.config.local_rank
    }

    /// The descriptor this process publishes for peers (once, out of band).
    pub fn modex(&self) -> Result<Vec<u8>, TransportError> {
        ModexDescriptor::Mapped {
            mechanism: self.mechanism,
            path: self.seg_path.clone().unwrap_or_default(),
            segment_size: self.config.segment_size as u64,
            segment_base: self.segment.base() as u64,
            pid: self.my_pid,
            user_ns_id: self.user_ns,
            rank: self.config.local_rank,
        }
        .encode()
    }

    /// Establish an endpoint from a peer's modex descriptor.
    pub fn add_peer(&self, descriptor: &[u8]) -> Result<u32, TransportError> {
        match ModexDescriptor::decode(descriptor)? {
            ModexDescriptor::AddressSpaceAttach { rank, .. } => {
                tracing::debug!(peer = rank, "peer requires address-space attach");
                Err(TransportError::Modex(format!(
                    "peer rank {rank} uses an address-space-attach segment this build cannot map"
                )))
            }
            ModexDescriptor::Mapped {
                mechanism,
                path,
                segment_size,
                segment_base,
                pid,
                user_ns_id,
                rank,
            } => {
                let peer_segment = SharedSegment::attach(&path, segment_size as usize)
                    .map_err(TransportError::Init)?;
                let same_user_ns = user_ns_id == self.user_ns;
                if !same_user_ns {
                    tracing::debug!(peer = rank, "user namespace mismatch, cross-process copy disabled");
                }
                let ep = Arc::new(Endpoint::new(
                    rank,
                    peer_segment,
                    segment_base,
                    pid,
                    mechanism,
                    same_user_ns,
                ));

                let mut endpoints = self.endpoints.write().unwrap();
                if endpoints.len() <= rank as usize {
                    endpoints.resize_with(rank as usize + 1, || None);
                }
                if endpoints[rank as usize].is_some() {
                    return Err(TransportError::Modex(format!(
                        "endpoint for rank {rank} already exists"
                    )));
                }
                endpoints[rank as usize] = Some(ep);
                Ok(rank)
            }
        }
    }

    /// Register the receive upcall for `tag`. `context` is handed back on
    /// every delivery for this registration.
    pub fn register_callback<F>(&self, tag: u8, context: Arc<dyn Any + Send + Sync>, handler: F)
    where
        F: Fn(&ReceiveDescriptor<'_>) + Send + Sync + 'static,
    {
        self.registrations.write().unwrap()[tag as usize] = Some(Registration {
            handler: Arc::new(handler),
            context,
        });
    }

    // -----------------------------------------------------------------------
    // Send paths
    // -----------------------------------------------------------------------

    /// Copy-in send. Small payloads ride the peer's fast box once one is
    /// warmed up; everything else goes through a pooled fragment and the
    /// peer's FIFO. A full FIFO parks the fragment on the endpoint's
    /// pending queue — the send is still accepted.
    pub fn send(&self, rank: u32, tag: u8, payload: &[u8]) -> Result<(), TransportError> {
        let ep = self.endpoint(rank)?;
        if payload.len() > self.config.max_send_size {
            return Err(TransportError::MessageTooLarge {
                len: payload.len(),
                max: self.config.max_send_size,
            });
        }

        let prev_sends = ep.send_count.fetch_add(1, Ordering::Relaxed);

        let mut fbox_out = ep.fbox_out.lock().unwrap();
        if let Some(tx) = fbox_out.as_mut() {
            if payload.len() <= self.config.max_inline_send && tx.try_write(tag, payload) {
                return Ok(());
            }
        }

        let class = if payload.len() <= self.config.eager_limit {
            FragClass::Eager
        } else {
            FragClass::MaxSend
        };
        let off = self.pools[class as usize].alloc(&self.arena)?;

        // Past the warm-up threshold, piggyback fast-box setup on this
        // fragment: the receiver installs the box while handling it, which
        // keeps setup ordered with the triggering send.
        let mut setup = None;
        if fbox_out.is_none() && prev_sends >= self.config.fbox_threshold {
            setup = self.try_setup_fbox(&mut fbox_out);
        }
        drop(fbox_out);

        unsafe {
            let ptr = self.segment.ptr_at(off);
            let hdr = frag::header_at_mut(ptr);
            hdr.tag = tag;
            hdr.class = class as u8;
            hdr.len = payload.len() as u64;
            hdr.frag = RelAddr::new(self.config.local_rank, off).as_raw();
            hdr.sc_base = 0;
            hdr.sc_len = 0;
            let mut flags = 0;
            match setup {
                Some((rel, len)) => {
                    hdr.fbox_base = rel;
                    hdr.fbox_len = len;
                    flags |= FLAG_SETUP_FBOX;
                }
                None => {
                    hdr.fbox_base = 0;
                    hdr.fbox_len = 0;
                }
            }
            std::ptr::copy_nonoverlapping(payload.as_ptr(), ptr.add(HDR_SIZE), payload.len());
            hdr.flags.store(flags, Ordering::Relaxed);
        }

        self.post(&ep, RelAddr::new(self.config.local_rank, off).as_raw() as i64);
        Ok(())
    }

    /// Zero-copy send: the receiver pulls `payload` directly from this
    /// process's memory via the cross-process copy backend. The payload is
    /// kept alive until the peer's completion echo arrives. Declined when
    /// the selected mechanism cannot read arbitrary sender memory.
    pub fn send_zero_copy(
        &self,
        rank: u32,
        tag: u8,
        payload: Arc<[u8]>,
    ) -> Result<(), TransportError> {
        let ep = self.endpoint(rank)?;
        let capable = self.mechanism == SingleCopyMechanism::ProcessVm
            && ep.peer_mechanism == SingleCopyMechanism::ProcessVm
            && ep.same_user_ns;
        if !capable {
            return Err(TransportError::NotSupported);
        }

        let off = self.pools[FragClass::User as usize].alloc(&self.arena)?;
        unsafe {
            let ptr = self.segment.ptr_at(off);
            let hdr = frag::header_at_mut(ptr);
            hdr.tag = tag;
            hdr.class = FragClass::User as u8;
            hdr.len = 0;
            hdr.frag = RelAddr::new(self.config.local_rank, off).as_raw();
            hdr.sc_base = payload.as_ptr() as u64;
            hdr.sc_len = payload.len() as u64;
            hdr.fbox_base = 0;
            hdr.fbox_len = 0;
            hdr.flags.store(FLAG_SINGLE_COPY, Ordering::Relaxed);
        }
        self.zero_copy_refs.lock().unwrap().insert(off, payload);

        self.post(&ep, RelAddr::new(self.config.local_rank, off).as_raw() as i64);
        Ok(())
    }

    /// Reserve an outbound fast-box slot and carve the ring from the
    /// arena. Declines silently (logging aside) at capacity; the peer
    /// simply keeps receiving through the FIFO.
    fn try_setup_fbox(&self, slot: &mut Option<FboxSender>) -> Option<(u64, u32)> {
        let mut reserved = false;
        let mut count = self.fbox_out_count.load(Ordering::Relaxed);
        while count < self.config.fbox_max {
            match self.fbox_out_count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    reserved = true;
                    break;
                }
                Err(c) => count = c,
            }
        }
        if !reserved {
            return None;
        }

        let data_len = self.config.fbox_size as u32;
        match self.arena.alloc(FBOX_CTRL_SIZE + data_len as usize, 64) {
            Some(base_off) => {
                *slot = Some(unsafe { FboxSender::new(self.segment.ptr_at(base_off), data_len) });
                let rel = RelAddr::new(self.config.local_rank, base_off).as_raw();
                tracing::debug!(base = base_off, "fast box allocated");
                Some((rel, data_len))
            }
            None => {
                self.fbox_out_count.fetch_sub(1, Ordering::AcqRel);
                tracing::debug!("fast box declined: segment arena exhausted");
                None
            }
        }
    }

    /// Push into the peer's FIFO, preserving order behind anything already
    /// pending; a full FIFO parks the entry on the pending queue.
    fn post(&self, ep: &Endpoint, rel: i64) {
        if ep.waiting.load(Ordering::Acquire) || !ep.fifo().push(rel) {
            self.add_pending(ep, rel);
        }
    }

    /// Component lock encloses the per-endpoint pending lock.
    fn add_pending(&self, ep: &Endpoint, rel: i64) {
        let mut list = self.pending_endpoints.lock().unwrap();
        ep.pending.lock().unwrap().push_back(rel);
        if !ep.waiting.swap(true, Ordering::AcqRel) {
            list.push(ep.rank);
        }
    }

    // -----------------------------------------------------------------------
    // RDMA-style operations
    // -----------------------------------------------------------------------

    /// Read `local.len()` bytes from `remote` in the peer's address space.
    pub fn get(&self, rank: u32, local: &mut [u8], remote: u64) -> Result<(), TransportError> {
        let ep = self.endpoint(rank)?;
        match self.mechanism {
            SingleCopyMechanism::ProcessVm if ep.same_user_ns => {
                single_copy::cma_copy(ep.peer_pid, local.as_mut_ptr(), remote, local.len(), false)
                    .map_err(TransportError::Backend)
            }
            SingleCopyMechanism::ProcessVm | SingleCopyMechanism::Emulated => {
                let src = ep.translate_peer_va(remote, local.len());
                unsafe {
                    std::ptr::copy_nonoverlapping(src, local.as_mut_ptr(), local.len());
                }
                Ok(())
            }
            _ => Err(TransportError::NotSupported),
        }
    }

    /// Write `local` to `remote` in the peer's address space.
    pub fn put(&self, rank: u32, local: &[u8], remote: u64) -> Result<(), TransportError> {
        let ep = self.endpoint(rank)?;
        match self.mechanism {
            SingleCopyMechanism::ProcessVm if ep.same_user_ns => single_copy::cma_copy(
                ep.peer_pid,
                local.as_ptr() as *mut u8,
                remote,
                local.len(),
                true,
            )
            .map_err(TransportError::Backend),
            SingleCopyMechanism::ProcessVm | SingleCopyMechanism::Emulated => {
                let dst = ep.translate_peer_va(remote, local.len());
                unsafe {
                    std::ptr::copy_nonoverlapping(local.as_ptr(), dst, local.len());
                }
                Ok(())
            }
            _ => Err(TransportError::NotSupported),
        }
    }

    /// Fetching atomic on an 8-byte word in the peer's segment. Available
    /// whatever single-copy mechanism won: the word is reached through the
    /// shared mapping, so hardware atomics keep it linearizable.
    pub fn atomic_fetch_op(
        &self,
        rank: u32,
        remote: u64,
        op: AtomicOp,
        operand: u64,
    ) -> Result<u64, TransportError> {
        let ep = self.endpoint(rank)?;
        assert!(remote % 8 == 0, "atomic target must be 8-byte aligned");
        let ptr = ep.translate_peer_va(remote, 8);
        Ok(unsafe { single_copy::atomic_fetch_op(ptr, op, operand) })
    }

    /// Compare-and-swap on an 8-byte word in the peer's segment; returns
    /// the previous value.
    pub fn atomic_cswap(
        &self,
        rank: u32,
        remote: u64,
        compare: u64,
        value: u64,
    ) -> Result<u64, TransportError> {
        let ep = self.endpoint(rank)?;
        assert!(remote % 8 == 0, "atomic target must be 8-byte aligned");
        let ptr = ep.translate_peer_va(remote, 8);
        Ok(unsafe { single_copy::atomic_cswap(ptr, compare, value) })
    }

    /// Carve a region from the local segment for peers to target with
    /// get/put/atomic operations. Returns its address in this process's
    /// mapping — the value peers pass as `remote`.
    pub fn allocate_shared(&self, len: usize) -> Result<u64, TransportError> {
        let off = self
            .arena
            .alloc(len.max(8), 8)
            .ok_or(TransportError::OutOfResource)?;
        Ok(self.segment.ptr_at(off) as u64)
    }

    // -----------------------------------------------------------------------
    // Progress engine
    // -----------------------------------------------------------------------

    /// One cooperative progress pass: fast boxes, then pending endpoints,
    /// then the local FIFO (bounded). Safe to call from multiple threads —
    /// a thread that loses the entry race returns 0 immediately. Returns
    /// the exact number of events handled (deliveries plus completion
    /// echoes; pending-queue drains are not events).
    pub fn progress(&self) -> usize {
        if self.progress_guard.swap(true, Ordering::Acquire) {
            return 0;
        }

        let mut count = 0;
        if self.num_fbox_in.load(Ordering::Relaxed) > 0 {
            count += self.check_fboxes();
        }

        self.progress_pending();

        if self.my_fifo().has_activity() {
            count += self.poll_fifo(FIFO_POLL_BOUND);
        }

        // Everything stored while holding the guard must be visible to the
        // next thread that wins it.
        std::sync::atomic::fence(Ordering::SeqCst);
        self.progress_guard.store(false, Ordering::Release);
        count
    }

    fn my_fifo(&self) -> &Fifo {
        unsafe { &*(self.segment.base() as *const Fifo) }
    }

    fn check_fboxes(&self) -> usize {
        let ranks: Vec<u32> = self.fbox_poll.lock().unwrap().clone();
        let mut count = 0;
        for rank in ranks {
            let Some(ep) = self.endpoint_opt(rank) else {
                continue;
            };
            let mut guard = ep.fbox_in.lock().unwrap();
            let Some(rx) = guard.as_mut() else { continue };
            while let Some(hdr) = rx.poll() {
                let len = unsafe { (*hdr).len } as usize;
                self.deliver(rank, &ep, hdr);
                rx.consume(len);
                count += 1;
            }
        }
        count
    }

    /// Walk the waiting endpoints once; each drains as much of its pending
    /// queue as fits and leaves the waiting set only when fully drained.
    fn progress_pending(&self) {
        let mut list = self.pending_endpoints.lock().unwrap();
        if list.is_empty() {
            return;
        }
        let endpoints = self.endpoints.read().unwrap();
        list.retain(|&rank| {
            let Some(ep) = endpoints.get(rank as usize).and_then(|e| e.as_ref()) else {
                return false;
            };
            let mut queue = ep.pending.lock().unwrap();
            while let Some(&head) = queue.front() {
                if ep.fifo().push(head) {
                    queue.pop_front();
                } else {
                    return true;
                }
            }
            ep.waiting.store(false, Ordering::Release);
            false
        });
    }

    fn poll_fifo(&self, limit: usize) -> usize {
        let mut count = 0;
        for _ in 0..limit {
            let Some(value) = self.my_fifo().poll() else {
                break;
            };
            self.handle_frag(value);
            count += 1;
        }
        count
    }

    /// Process one FIFO entry: either a completion echo for one of our own
    /// fragments, or an incoming fragment from a peer.
    fn handle_frag(&self, value: i64) {
        let rel = RelAddr::from_raw(value as u64);
        let rank = rel.rank();

        if rank == self.config.local_rank {
            let hdr = unsafe { frag::header_at(self.segment.ptr_at(rel.offset())) };
            debug_assert!(hdr.flags.load(Ordering::Acquire) & FLAG_COMPLETE != 0);
            debug_assert_eq!(hdr.frag, value as u64, "echo must reference its own fragment");
            let class = FragClass::from_u8(hdr.class);
            if class == FragClass::User {
                self.zero_copy_refs.lock().unwrap().remove(&rel.offset());
            }
            self.pools[class as usize].release(rel.offset());
            return;
        }

        let ep = self
            .endpoint_opt(rank)
            .expect("fragment from a rank with no endpoint");
        let hdr_ptr = ep.translate(rel.offset()) as *const FragHeader;
        let flags = unsafe { (*hdr_ptr).flags.load(Ordering::Acquire) };

        self.deliver(rank, &ep, hdr_ptr);

        if flags & FLAG_SETUP_FBOX != 0 {
            self.install_fbox(&ep, unsafe { &*hdr_ptr });
        }

        // Flip the header to complete and echo it through the sender's
        // FIFO so the fragment can be recycled.
        unsafe { (*hdr_ptr).flags.store(FLAG_COMPLETE, Ordering::Release) };
        self.post(&ep, value);
    }

    /// Invoke the registered upcall for one header (FIFO fragment or
    /// fast-box record — the two share this path).
    fn deliver(&self, src_rank: u32, ep: &Endpoint, hdr: *const FragHeader) {
        let hdr = unsafe { &*hdr };
        let registration = self.registrations.read().unwrap()[hdr.tag as usize].clone();
        let registration = registration
            .unwrap_or_else(|| panic!("message arrived for unregistered tag {}", hdr.tag));

        let inline =
            unsafe { std::slice::from_raw_parts(frag::payload_ptr(hdr), hdr.len as usize) };

        let flags = hdr.flags.load(Ordering::Acquire);
        let single_copy = flags & FLAG_SINGLE_COPY != 0;
        let mut scratch: Vec<u8> = Vec::new();
        if single_copy {
            // Acquire the descriptor for the duration of the upcall.
            scratch = vec![0u8; hdr.sc_len as usize];
            single_copy::cma_copy(
                ep.peer_pid,
                scratch.as_mut_ptr(),
                hdr.sc_base,
                scratch.len(),
                false,
            )
            .expect("single-copy read from peer memory failed");
        }

        let segments: [&[u8]; 2] = [inline, &scratch];
        let segment_count = if single_copy { 2 } else { 1 };
        let descriptor = ReceiveDescriptor {
            src_rank,
            tag: hdr.tag,
            segments: &segments[..segment_count],
            context: registration.context.as_ref(),
        };
        (registration.handler)(&descriptor);
        // scratch drops here: the single-copy descriptor is released as
        // soon as the callback returns.
    }

    fn install_fbox(&self, ep: &Endpoint, hdr: &FragHeader) {
        let rel = RelAddr::from_raw(hdr.fbox_base);
        assert_eq!(
            rel.rank(),
            ep.rank,
            "fast box must live in the sending peer's segment"
        );
        let base = ep.translate(rel.offset());
        let rx = unsafe { FboxReceiver::attach(base, hdr.fbox_len) };
        *ep.fbox_in.lock().unwrap() = Some(rx);
        self.fbox_poll.lock().unwrap().push(ep.rank);
        self.num_fbox_in.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(peer = ep.rank, "inbound fast box installed");
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Fragments parked for `rank`, waiting for FIFO space.
    pub fn pending_count(&self, rank: u32) -> usize {
        self.endpoint_opt(rank)
            .map(|ep| ep.pending.lock().unwrap().len())
            .unwrap_or(0)
    }

    /// Whether an outbound fast box toward `rank` has been set up.
    pub fn fbox_active(&self, rank: u32) -> bool {
        self.endpoint_opt(rank)
            .map(|ep| ep.fbox_out.lock().unwrap().is_some())
            .unwrap_or(false)
    }

    /// Outbound fast boxes allocated so far.
    pub fn fbox_out_count(&self) -> u32 {
        self.fbox_out_count.load(Ordering::Relaxed)
    }

    fn endpoint(&self, rank: u32) -> Result<Arc<Endpoint>, TransportError> {
        self.endpoint_opt(rank)
            .ok_or(TransportError::UnknownPeer(rank))
    }

    fn endpoint_opt(&self, rank: u32) -> Option<Arc<Endpoint>> {
        self.endpoints
            .read()
            .unwrap()
            .get(rank as usize)
            .and_then(|e| e.clone())
    }
}
