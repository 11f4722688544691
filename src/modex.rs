// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// Modex: the opaque descriptor each process publishes once, exchanged
// out of band before first contact. A tagged union keyed by the selected
// single-copy mechanism — an address-space-attach token, or the mapped
// segment's identity plus the metadata the copy backends need (pid for the
// cross-process copy syscalls, user-namespace id to validate they are
// legal between the two processes).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::single_copy::SingleCopyMechanism;

/// Wire descriptor published by one transport instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModexDescriptor {
    /// The peer exposes its whole address space through an attach token;
    /// no backing file exists.
    AddressSpaceAttach {
        seg_id: u64,
        segment_base: u64,
        address_max: u64,
        rank: u32,
    },
    /// The peer's segment is a named mapping; attach by path.
    Mapped {
        mechanism: SingleCopyMechanism,
        path: PathBuf,
        segment_size: u64,
        /// The peer's own mapping base, for translating addresses it
        /// advertises into segment offsets.
        segment_base: u64,
        pid: i32,
        /// Inode of /proc/self/ns/user; 0 when undetectable. Differing
        /// namespaces disable the process-vm path between the two peers.
        user_ns_id: u64,
        rank: u32,
    },
}

impl ModexDescriptor {
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// User-namespace identity of the current process: the inode of
/// /proc/self/ns/user. Returns 0 when the kernel predates namespaces (all
/// processes then agree on 0 and no peer is rejected).
#[cfg(target_os = "linux")]
pub fn user_ns_id() -> u64 {
    use std::os::linux::fs::MetadataExt;
    std::fs::metadata("/proc/self/ns/user")
        .map(|m| m.st_ino())
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
pub fn user_ns_id() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_descriptor_roundtrips() {
        let desc = ModexDescriptor::Mapped {
            mechanism: SingleCopyMechanism::Emulated,
            path: PathBuf::from("/dev/shm/smtl_segment.test.3"),
            segment_size: 1 << 24,
            segment_base: 0x7f00_0000_0000,
            pid: 4242,
            user_ns_id: 0xdead_beef,
            rank: 3,
        };
        let bytes = desc.encode().unwrap();
        assert_eq!(ModexDescriptor::decode(&bytes).unwrap(), desc);
    }

    #[test]
    fn attach_descriptor_roundtrips() {
        let desc = ModexDescriptor::AddressSpaceAttach {
            seg_id: 9,
            segment_base: 0x1000,
            address_max: u64::MAX,
            rank: 0,
        };
        let bytes = desc.encode().unwrap();
        assert_eq!(ModexDescriptor::decode(&bytes).unwrap(), desc);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(ModexDescriptor::decode(&[0xff; 3]).is_err());
    }
}
