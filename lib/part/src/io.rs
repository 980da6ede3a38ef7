// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request and completion model for block I/O.
//!
//! A request owns its buffers for the duration of the operation: submission
//! moves the [`IoRequest`] into the device, and the completion callback hands
//! it back together with an [`IoStatus`]. This replaces refcounted I/O
//! descriptors with plain ownership -- an in-flight request cannot be observed
//! or freed by anyone but the layer currently holding it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::device::{DifCheckFlags, IoKind};

/// Opaque identifier naming an in-flight I/O, used by abort requests.
pub type IoTag = u64;

/// Opaque memory-domain handle forwarded to the base device unchanged.
pub type MemoryDomainRef = Arc<dyn Any + Send + Sync>;

/// Vectored data payload plus an optional separate metadata buffer.
#[derive(Debug, Default)]
pub struct IoBuffers {
    pub iovs: Vec<Vec<u8>>,
    pub md: Option<Vec<u8>>,
}

impl IoBuffers {
    pub fn from_single(buf: Vec<u8>) -> Self {
        Self {
            iovs: vec![buf],
            md: None,
        }
    }

    pub fn data_len(&self) -> usize {
        self.iovs.iter().map(Vec::len).sum()
    }
}

/// Operation-specific shape of a request.
#[derive(Debug)]
pub enum IoPayload {
    Read(IoBuffers),
    Write(IoBuffers),
    WriteZeroes,
    Unmap,
    Flush,
    Reset,
    Abort {
        target: IoTag,
    },
    /// Zero-copy start: the device returns a buffer reference in `buf`
    /// instead of filling a caller-supplied one.
    ZcopyStart {
        populate: bool,
        buf: Option<Vec<u8>>,
    },
    Compare(IoBuffers),
    CompareAndWrite {
        compare: IoBuffers,
        write: IoBuffers,
    },
    Copy {
        src_offset_blocks: u64,
    },
    /// Raw passthrough command. Carried in the taxonomy so capability checks
    /// and rejection paths can name it; partitions never forward it.
    NvmePassthrough {
        kind: IoKind,
    },
}

impl IoPayload {
    pub fn kind(&self) -> IoKind {
        match self {
            Self::Read(_) => IoKind::Read,
            Self::Write(_) => IoKind::Write,
            Self::WriteZeroes => IoKind::WriteZeroes,
            Self::Unmap => IoKind::Unmap,
            Self::Flush => IoKind::Flush,
            Self::Reset => IoKind::Reset,
            Self::Abort { .. } => IoKind::Abort,
            Self::ZcopyStart { .. } => IoKind::ZcopyStart,
            Self::Compare(_) => IoKind::Compare,
            Self::CompareAndWrite { .. } => IoKind::CompareAndWrite,
            Self::Copy { .. } => IoKind::Copy,
            Self::NvmePassthrough { kind } => *kind,
        }
    }

    pub fn buffers(&self) -> Option<&IoBuffers> {
        match self {
            Self::Read(b) | Self::Write(b) | Self::Compare(b) => Some(b),
            Self::CompareAndWrite { write, .. } => Some(write),
            _ => None,
        }
    }

    pub fn buffers_mut(&mut self) -> Option<&mut IoBuffers> {
        match self {
            Self::Read(b) | Self::Write(b) | Self::Compare(b) => Some(b),
            Self::CompareAndWrite { write, .. } => Some(write),
            _ => None,
        }
    }
}

/// Completion status of one I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Success,
    Failed,
}

impl IoStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Completion callback: receives the finished request (buffers included) and
/// its status.
pub type IoCompletion = Box<dyn FnOnce(IoRequest, IoStatus) + Send>;

/// One block I/O request against a device.
///
/// `offset_blocks` is relative to whichever device the request is submitted
/// against; the forwarder shifts it when handing the request down to a base.
pub struct IoRequest {
    pub offset_blocks: u64,
    pub num_blocks: u64,
    pub dif_check_flags: DifCheckFlags,
    /// Exclude mask set on forwarded requests: checks the original request did
    /// not ask for, which the base must not add back.
    pub dif_check_exclude: DifCheckFlags,
    pub memory_domain: Option<MemoryDomainRef>,
    pub payload: IoPayload,
    completion: Option<IoCompletion>,
}

impl fmt::Debug for IoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoRequest")
            .field("kind", &self.kind())
            .field("offset_blocks", &self.offset_blocks)
            .field("num_blocks", &self.num_blocks)
            .field("dif_check_flags", &self.dif_check_flags)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

impl IoRequest {
    pub fn new(offset_blocks: u64, num_blocks: u64, payload: IoPayload) -> Self {
        Self {
            offset_blocks,
            num_blocks,
            dif_check_flags: DifCheckFlags::NONE,
            dif_check_exclude: DifCheckFlags::NONE,
            memory_domain: None,
            payload,
            completion: None,
        }
    }

    pub fn with_dif_check_flags(mut self, flags: DifCheckFlags) -> Self {
        self.dif_check_flags = flags;
        self
    }

    pub fn with_memory_domain(mut self, domain: MemoryDomainRef) -> Self {
        self.memory_domain = Some(domain);
        self
    }

    /// Attach the completion callback invoked when the request finishes.
    pub fn on_complete(
        mut self,
        completion: impl FnOnce(IoRequest, IoStatus) + Send + 'static,
    ) -> Self {
        self.completion = Some(Box::new(completion));
        self
    }

    pub fn kind(&self) -> IoKind {
        self.payload.kind()
    }

    /// Finish the request, handing it back to its completion callback.
    /// A request without a callback completes silently.
    pub fn complete(mut self, status: IoStatus) {
        if let Some(cb) = self.completion.take() {
            cb(self, status);
        }
    }

    pub(crate) fn take_completion(&mut self) -> Option<IoCompletion> {
        self.completion.take()
    }

    pub(crate) fn set_completion(&mut self, completion: Option<IoCompletion>) {
        self.completion = completion;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn payload_kind_mapping() {
        assert_eq!(IoPayload::Flush.kind(), IoKind::Flush);
        assert_eq!(IoPayload::Abort { target: 7 }.kind(), IoKind::Abort);
        assert_eq!(
            IoPayload::Copy {
                src_offset_blocks: 3
            }
            .kind(),
            IoKind::Copy
        );
        assert_eq!(
            IoPayload::NvmePassthrough {
                kind: IoKind::NvmeAdmin
            }
            .kind(),
            IoKind::NvmeAdmin
        );
    }

    #[test]
    fn completion_returns_buffers() {
        let seen: Arc<Mutex<Option<(IoStatus, usize)>>> = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();

        let io = IoRequest::new(4, 2, IoPayload::Read(IoBuffers::from_single(vec![0u8; 1024])))
            .on_complete(move |io, status| {
                let len = io.payload.buffers().map(IoBuffers::data_len).unwrap_or(0);
                *seen2.lock() = Some((status, len));
            });

        io.complete(IoStatus::Success);
        assert_eq!(*seen.lock(), Some((IoStatus::Success, 1024)));
    }

    #[test]
    fn complete_without_callback_is_a_noop() {
        IoRequest::new(0, 1, IoPayload::Flush).complete(IoStatus::Failed);
    }
}
