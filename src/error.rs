// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// Transport error taxonomy.
//
// Initialization failures are fatal to the transport instance (the caller
// simply gets no transport); resource exhaustion is retryable via the
// pending/progress machinery; capability gaps surface as NotSupported.
// Invariant violations (addresses outside a peer's registered segment,
// unregistered message tags) are asserts, not errors — they indicate a
// memory-safety risk, not a recoverable condition.

use std::io;

use thiserror::Error;

/// Errors surfaced by the shared-memory transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Segment create/attach or backend bring-up failed. Fatal to this
    /// transport instance; the process continues without it.
    #[error("transport initialization failed: {0}")]
    Init(io::Error),

    /// A pool hit its configured maximum or the segment arena is spent.
    /// Retryable: call `progress` and try again once completions recycle
    /// fragments.
    #[error("transport resource temporarily exhausted")]
    OutOfResource,

    /// The selected single-copy mechanism cannot perform this operation.
    #[error("operation not supported by the selected single-copy mechanism")]
    NotSupported,

    /// No endpoint has been established for this rank.
    #[error("unknown peer rank {0}")]
    UnknownPeer(u32),

    /// Payload exceeds the maximum send size for the copy-in path.
    #[error("message length {len} exceeds the maximum send size {max}")]
    MessageTooLarge { len: usize, max: usize },

    /// A peer's modex descriptor could not be decoded, or it advertises a
    /// mechanism this build cannot interoperate with.
    #[error("modex descriptor error: {0}")]
    Modex(String),

    /// I/O error from the single-copy backend during steady-state operation.
    #[error("single-copy backend error: {0}")]
    Backend(io::Error),
}

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        TransportError::Modex(e.to_string())
    }
}
