// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// Single-copy mechanism selection and dispatch.
//
// Mechanisms are tried in a fixed preference order; a probe failure
// advances to the next entry. Only a failure of the mechanism the user
// explicitly requested produces a warning — default fallbacks degrade with
// a debug line. Selection is a pure function over an injected probe so the
// chain is testable without the underlying OS facilities.
//
// Atomic memory operations are NOT tied to the selected mechanism: every
// peer maps every other peer's segment, so atomics execute as hardware
// atomics on the shared mapping and stay linearizable regardless of which
// (or no) single-copy mechanism won.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A zero-extra-copy transfer mechanism, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SingleCopyMechanism {
    /// Pick the best available mechanism.
    Auto,
    /// Map the peer's whole address space (xpmem-style kernel module).
    AddressSpaceAttach,
    /// Cross-process memory copy syscalls (process_vm_readv/writev).
    ProcessVm,
    /// Kernel-module-assisted copy through a character device.
    KernelCopy,
    /// Direct copy through the mapped peer segment; remote addresses must
    /// fall inside the peer's registered segment.
    Emulated,
    /// No single-copy support: get/put disabled, sends copy through the
    /// FIFO only.
    None,
}

impl fmt::Display for SingleCopyMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SingleCopyMechanism::Auto => "auto",
            SingleCopyMechanism::AddressSpaceAttach => "address-space-attach",
            SingleCopyMechanism::ProcessVm => "process-vm",
            SingleCopyMechanism::KernelCopy => "kernel-copy",
            SingleCopyMechanism::Emulated => "emulated",
            SingleCopyMechanism::None => "none",
        };
        f.write_str(name)
    }
}

/// Probe/selection order. `Emulated` always probes clean, so `None` is
/// reached only when explicitly requested.
pub const PREFERENCE: [SingleCopyMechanism; 5] = [
    SingleCopyMechanism::AddressSpaceAttach,
    SingleCopyMechanism::ProcessVm,
    SingleCopyMechanism::KernelCopy,
    SingleCopyMechanism::Emulated,
    SingleCopyMechanism::None,
];

/// Outcome of mechanism selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub mechanism: SingleCopyMechanism,
    /// The explicitly requested mechanism that failed, if any; a warning
    /// was logged for it.
    pub warned: Option<SingleCopyMechanism>,
}

/// Walk the preference list starting at the requested mechanism (or the
/// head for `Auto`) until a probe succeeds.
pub fn select_mechanism<F>(requested: SingleCopyMechanism, mut probe: F) -> Selection
where
    F: FnMut(SingleCopyMechanism) -> io::Result<()>,
{
    let explicit = requested != SingleCopyMechanism::Auto;
    let start = if explicit {
        PREFERENCE.iter().position(|&m| m == requested).unwrap_or(0)
    } else {
        0
    };

    let mut warned = None;
    for &mechanism in &PREFERENCE[start..] {
        match probe(mechanism) {
            Ok(()) => {
                return Selection { mechanism, warned };
            }
            Err(e) => {
                if explicit && mechanism == requested {
                    tracing::warn!(
                        mechanism = %mechanism,
                        error = %e,
                        "requested single-copy mechanism unavailable, falling back"
                    );
                    warned = Some(mechanism);
                } else {
                    tracing::debug!(mechanism = %mechanism, error = %e, "single-copy probe failed");
                }
            }
        }
    }

    // The list ends in None, which never fails to probe; this is only
    // reachable with a probe that rejects everything (tests).
    Selection {
        mechanism: SingleCopyMechanism::None,
        warned,
    }
}

/// Production probe for one mechanism.
pub fn probe_mechanism(mechanism: SingleCopyMechanism) -> io::Result<()> {
    match mechanism {
        SingleCopyMechanism::AddressSpaceAttach | SingleCopyMechanism::KernelCopy => Err(
            io::Error::new(io::ErrorKind::Unsupported, "no driver bindings in this build"),
        ),
        SingleCopyMechanism::ProcessVm => probe_process_vm(),
        SingleCopyMechanism::Emulated | SingleCopyMechanism::None => Ok(()),
        SingleCopyMechanism::Auto => unreachable!("Auto is resolved before probing"),
    }
}

// ---------------------------------------------------------------------------
// process_vm_readv/writev backend (Linux)
// ---------------------------------------------------------------------------

/// Verify the cross-process copy syscalls work: a one-byte self-read, then
/// the Yama ptrace-scope check. Scope 0 allows attaching to any process of
/// the same owner; under a stricter scope we try
/// prctl(PR_SET_PTRACER, PR_SET_PTRACER_ANY) so peers may attach to us.
#[cfg(target_os = "linux")]
fn probe_process_vm() -> io::Result<()> {
    let src: u8 = 0x5A;
    let mut dst: u8 = 0;
    cma_copy(
        unsafe { libc::getpid() },
        &mut dst as *mut u8,
        &src as *const u8 as u64,
        1,
        false,
    )?;
    if dst != 0x5A {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "process_vm_readv self-test returned wrong data",
        ));
    }

    let scope = std::fs::read("/proc/sys/kernel/yama/ptrace_scope")
        .ok()
        .and_then(|buf| buf.first().copied())
        .unwrap_or(b'0');
    if scope != b'0' {
        let ret = unsafe { libc::prctl(libc::PR_SET_PTRACER, libc::PR_SET_PTRACER_ANY, 0, 0, 0) };
        if ret != 0 {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "ptrace scope forbids cross-process attach",
            ));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn probe_process_vm() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process_vm_readv is not available on this platform",
    ))
}

/// Copy between this process and `pid`. `write` selects the direction:
/// false = read remote into `local`, true = write `local` into remote.
/// The kernel may copy fewer bytes than asked; loop until done.
#[cfg(target_os = "linux")]
pub fn cma_copy(
    pid: libc::pid_t,
    local: *mut u8,
    remote: u64,
    len: usize,
    write: bool,
) -> io::Result<()> {
    let mut done = 0usize;
    while done < len {
        let local_iov = libc::iovec {
            iov_base: unsafe { local.add(done) } as *mut libc::c_void,
            iov_len: len - done,
        };
        let remote_iov = libc::iovec {
            iov_base: (remote + done as u64) as *mut libc::c_void,
            iov_len: len - done,
        };
        let copied = unsafe {
            if write {
                libc::process_vm_writev(pid, &local_iov, 1, &remote_iov, 1, 0)
            } else {
                libc::process_vm_readv(pid, &local_iov, 1, &remote_iov, 1, 0)
            }
        };
        if copied < 0 {
            return Err(io::Error::last_os_error());
        }
        if copied == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "cross-process copy made no progress",
            ));
        }
        done += copied as usize;
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn cma_copy(
    _pid: i32,
    _local: *mut u8,
    _remote: u64,
    _len: usize,
    _write: bool,
) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process_vm copy is not available on this platform",
    ))
}

// ---------------------------------------------------------------------------
// Atomic memory operations on shared mappings
// ---------------------------------------------------------------------------

/// Fetching atomic operations offered on peer segment memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    And,
    Or,
    Xor,
    Swap,
    Min,
    Max,
}

/// Apply `op` to the 8-byte word at `ptr`, returning the previous value.
///
/// # Safety
/// `ptr` must be 8-byte aligned and point into a live shared mapping.
pub unsafe fn atomic_fetch_op(ptr: *mut u8, op: AtomicOp, operand: u64) -> u64 {
    let target = &*(ptr as *const AtomicU64);
    match op {
        AtomicOp::Add => target.fetch_add(operand, Ordering::SeqCst),
        AtomicOp::And => target.fetch_and(operand, Ordering::SeqCst),
        AtomicOp::Or => target.fetch_or(operand, Ordering::SeqCst),
        AtomicOp::Xor => target.fetch_xor(operand, Ordering::SeqCst),
        AtomicOp::Swap => target.swap(operand, Ordering::SeqCst),
        AtomicOp::Min => target.fetch_min(operand, Ordering::SeqCst),
        AtomicOp::Max => target.fetch_max(operand, Ordering::SeqCst),
    }
}

/// Compare-and-swap the 8-byte word at `ptr`, returning the previous value.
///
/// # Safety
/// Same contract as [`atomic_fetch_op`].
pub unsafe fn atomic_cswap(ptr: *mut u8, compare: u64, value: u64) -> u64 {
    let target = &*(ptr as *const AtomicU64);
    match target.compare_exchange(compare, value, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(prev) => prev,
        Err(prev) => prev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_falls_back_to_first_working_mechanism() {
        // A and B fail, C succeeds — C must win and nothing is warned.
        let selection = select_mechanism(SingleCopyMechanism::Auto, |m| match m {
            SingleCopyMechanism::AddressSpaceAttach | SingleCopyMechanism::ProcessVm => {
                Err(io::Error::new(io::ErrorKind::Unsupported, "nope"))
            }
            _ => Ok(()),
        });
        assert_eq!(selection.mechanism, SingleCopyMechanism::KernelCopy);
        assert_eq!(selection.warned, None);
    }

    #[test]
    fn explicit_request_warns_once_on_failure() {
        let selection = select_mechanism(SingleCopyMechanism::ProcessVm, |m| match m {
            SingleCopyMechanism::ProcessVm | SingleCopyMechanism::KernelCopy => {
                Err(io::Error::new(io::ErrorKind::Unsupported, "nope"))
            }
            _ => Ok(()),
        });
        assert_eq!(selection.mechanism, SingleCopyMechanism::Emulated);
        assert_eq!(selection.warned, Some(SingleCopyMechanism::ProcessVm));
    }

    #[test]
    fn explicit_request_skips_earlier_mechanisms() {
        // Requesting Emulated must never probe (or warn about) anything
        // ahead of it in the preference list.
        let mut probed = Vec::new();
        let selection = select_mechanism(SingleCopyMechanism::Emulated, |m| {
            probed.push(m);
            Ok(())
        });
        assert_eq!(selection.mechanism, SingleCopyMechanism::Emulated);
        assert_eq!(probed, vec![SingleCopyMechanism::Emulated]);
    }

    #[test]
    fn none_is_terminal() {
        let selection = select_mechanism(SingleCopyMechanism::None, |_| Ok(()));
        assert_eq!(selection.mechanism, SingleCopyMechanism::None);
    }

    #[test]
    fn atomic_ops_return_previous_value() {
        let word = AtomicU64::new(10);
        let ptr = &word as *const AtomicU64 as *mut u8;
        unsafe {
            assert_eq!(atomic_fetch_op(ptr, AtomicOp::Add, 5), 10);
            assert_eq!(atomic_fetch_op(ptr, AtomicOp::Max, 100), 15);
            assert_eq!(atomic_fetch_op(ptr, AtomicOp::Swap, 1), 100);
            assert_eq!(atomic_cswap(ptr, 1, 42), 1);
            assert_eq!(atomic_cswap(ptr, 1, 99), 42);
        }
        assert_eq!(word.load(Ordering::SeqCst), 42);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn process_vm_self_copy_roundtrip() {
        if probe_process_vm().is_err() {
            return; // kernel or sandbox forbids it; nothing to test
        }
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        cma_copy(
            unsafe { libc::getpid() },
            dst.as_mut_ptr(),
            src.as_ptr() as u64,
            4,
            false,
        )
        .unwrap();
        assert_eq!(dst, src);
    }
}
