// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Contract with the kernel packet queue.
//!
//! The queue library itself is an external collaborator; the engine only
//! relies on the shape of its interface: a blocking receive on a file
//! descriptor, a dispatcher that turns one received chunk into zero or more
//! `(id, mark, payload)` tuples, and a per-packet verdict call. The real
//! netlink binding and the in-memory test driver both implement this trait.

use std::io;
use thiserror::Error;

/// Verdict returned to the kernel for one packet. The discriminants are the
/// wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Verdict {
    /// Drop the packet.
    Drop = 0,
    /// Release the packet (optionally with a replacement payload).
    Accept = 1,
}

/// One packet as delivered by the queue dispatcher.
///
/// `payload` is `None` when the kernel message carried no retrievable
/// payload; such packets are released unmodified. The slice borrows the
/// receive buffer and is valid until the next receive.
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    /// Kernel-assigned packet id, echoed back on the verdict.
    pub id: u32,
    /// Mark the packet carried when it entered the queue.
    pub mark: u32,
    /// Raw datagram bytes, if the kernel delivered them.
    pub payload: Option<&'a [u8]>,
}

/// Kernel queue failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to open the kernel queue connection: {0}")]
    Open(io::Error),

    #[error("failed to bind the queue protocol family: {0}")]
    Bind(io::Error),

    #[error("failed to create kernel queue {num}: {source}")]
    Create { num: u16, source: io::Error },

    #[error("failed to set the queue copy mode: {0}")]
    SetMode(io::Error),

    #[error("receive from the kernel queue failed: {0}")]
    Receive(io::Error),

    #[error("queue dispatcher rejected a received chunk: {0}")]
    Dispatch(io::Error),

    #[error("verdict for packet {id} was not delivered: {source}")]
    Verdict { id: u32, source: io::Error },
}

/// The queue handle as the engine sees it.
///
/// One instance is owned by the [`engine`](crate::queue::engine) and touched
/// only from the dispatch thread.
pub trait QueueDriver: Send {
    /// Blocking read of the next chunk of queued-packet data into `buf`.
    ///
    /// Errors are reported with OS semantics: `ErrorKind::Interrupted` for a
    /// signal, `ENOBUFS` as a raw OS error for kernel-side overflow. The
    /// engine owns the retry policy.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Split one received chunk into packets, appending to `out`.
    ///
    /// May yield zero, one, or several packets per chunk.
    fn unpack<'a>(
        &mut self,
        data: &'a [u8],
        out: &mut Vec<RawPacket<'a>>,
    ) -> Result<(), QueueError>;

    /// Deliver the verdict for packet `id`, tagging it with the
    /// classification `mark`. For [`Verdict::Accept`], a `Some` payload
    /// replaces the packet bytes; `None` releases the original.
    fn set_verdict(
        &mut self,
        id: u32,
        verdict: Verdict,
        mark: u32,
        payload: Option<&[u8]>,
    ) -> Result<(), QueueError>;
}
