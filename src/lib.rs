// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// smtl — shared-memory byte transport layer.
//
// Moves messages between processes co-located on one host. Each rank owns
// a shared segment holding a lock-free multi-producer/single-consumer FIFO
// and an arena of pooled fragments; peers attach each other's segments and
// exchange relative addresses, never pointers. Small messages to a warm
// peer bypass the FIFO through a per-direction fast box. Large transfers
// go through the best available single-copy mechanism, falling back down a
// preference list at init time.
//
// Everything is cooperative: no call blocks, and `Transport::progress`
// drives all receive-side and retry work.

#[cfg(not(unix))]
compile_error!("smtl requires a Unix platform: segments are mmap-backed");

pub mod config;
pub mod endpoint;
pub mod error;
pub mod fbox;
pub mod fifo;
pub mod frag;
pub mod modex;
pub mod segment;
pub mod single_copy;
pub mod transport;

pub use config::TransportConfig;
pub use error::TransportError;
pub use modex::ModexDescriptor;
pub use single_copy::{AtomicOp, SingleCopyMechanism};
pub use transport::{ReceiveDescriptor, Transport};
