// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// Transport configuration. Defaults follow the tuning of mature
// shared-memory transports: small initial fragment pools that grow in
// increments, a 4 KiB eager limit (32 KiB when an address-space-attach
// mechanism is active), 16-send fast-box activation, and a 16 MiB segment.
//
// Rank/session identity comes from the launcher; this crate does not do
// peer discovery or option registration itself.

use std::path::PathBuf;

use crate::segment;
use crate::single_copy::SingleCopyMechanism;

/// Configuration for one transport instance (one local rank).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Job-wide identifier; namespaces the segment backing files so
    /// concurrent jobs on one host do not collide.
    pub session_id: String,
    /// This process's rank among the local peer group.
    pub local_rank: u32,
    /// Number of other local processes this transport may talk to.
    pub num_local_peers: u32,

    /// Initial number of fragments per free list.
    pub free_list_num: usize,
    /// Maximum number of fragments per free list.
    pub free_list_max: usize,
    /// Number of fragments added per free-list growth.
    pub free_list_inc: usize,

    /// Largest payload sent with copy-in copy-out through a fast box.
    pub max_inline_send: usize,
    /// Largest payload carried by an eager-class fragment.
    pub eager_limit: usize,
    /// Largest payload accepted by `send` at all.
    pub max_send_size: usize,

    /// Number of sends to one peer before a fast box is proposed.
    pub fbox_threshold: u32,
    /// Maximum number of outbound fast boxes across all peers.
    pub fbox_max: u32,
    /// Data capacity of each fast box, rounded up to a power of two.
    pub fbox_size: usize,

    /// Slot count of the inter-process FIFO, rounded up to a power of two.
    pub fifo_slots: usize,
    /// Shared segment size, rounded up to a power of two, minimum 2 MiB.
    pub segment_size: usize,

    /// Requested single-copy mechanism. `Auto` picks the best available.
    pub single_copy_mechanism: SingleCopyMechanism,
    /// Directory for segment backing files (ignored for anonymous segments).
    pub backing_directory: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            session_id: "smtl".to_string(),
            local_rank: 0,
            num_local_peers: 0,
            free_list_num: 8,
            free_list_max: 512,
            free_list_inc: 64,
            max_inline_send: 256,
            eager_limit: 4 * 1024,
            max_send_size: 32 * 1024,
            fbox_threshold: 16,
            fbox_max: 32,
            fbox_size: 4096,
            fifo_slots: 4096,
            segment_size: 1 << 24,
            single_copy_mechanism: SingleCopyMechanism::Auto,
            backing_directory: default_backing_directory(),
        }
    }
}

impl TransportConfig {
    /// Clamp and round every size field into its valid range.
    pub(crate) fn normalize(&mut self) {
        // A true address-space-attach mechanism makes large eager sends
        // cheap; widen the eager limit the way tuned transports do.
        if self.single_copy_mechanism == SingleCopyMechanism::AddressSpaceAttach {
            self.eager_limit = 32 * 1024;
        }

        self.segment_size = segment::round_segment_size(self.segment_size);
        self.fifo_slots = self.fifo_slots.max(2).next_power_of_two();
        self.fbox_size = self.fbox_size.max(1024).next_power_of_two();
        self.max_send_size = self.max_send_size.max(self.eager_limit);
        self.max_inline_send = self.max_inline_send.min(self.eager_limit);
        self.free_list_max = self.free_list_max.max(self.free_list_num);
        self.free_list_inc = self.free_list_inc.max(1);
    }
}

/// Prefer a tmpfs-backed directory for the segment files; fall back to the
/// system temp dir when /dev/shm is absent or not writable.
pub fn default_backing_directory() -> PathBuf {
    #[cfg(unix)]
    {
        let probe =
            unsafe { libc::access(b"/dev/shm\0".as_ptr() as *const libc::c_char, libc::W_OK) };
        if probe == 0 {
            return PathBuf::from("/dev/shm");
        }
    }
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.free_list_num, 8);
        assert_eq!(cfg.free_list_max, 512);
        assert_eq!(cfg.fbox_threshold, 16);
        assert!(cfg.backing_directory.is_dir());
    }

    #[test]
    fn normalize_rounds_sizes() {
        let mut cfg = TransportConfig {
            segment_size: 3_000_000,
            fifo_slots: 100,
            fbox_size: 5000,
            ..TransportConfig::default()
        };
        cfg.normalize();
        assert!(cfg.segment_size.is_power_of_two());
        assert!(cfg.segment_size >= 2 * 1024 * 1024);
        assert_eq!(cfg.fifo_slots, 128);
        assert_eq!(cfg.fbox_size, 8192);
    }

    #[test]
    fn normalize_widens_eager_for_address_space_attach() {
        let mut cfg = TransportConfig {
            single_copy_mechanism: SingleCopyMechanism::AddressSpaceAttach,
            ..TransportConfig::default()
        };
        cfg.normalize();
        assert_eq!(cfg.eager_limit, 32 * 1024);
    }
}
