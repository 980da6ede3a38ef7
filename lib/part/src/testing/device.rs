// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory base device executing I/O synchronously against a byte store.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{DeviceInfo, DifCheckFlags, IoKind};
use crate::framework::{BaseChannel, BaseDevice};
use crate::io::{IoBuffers, IoPayload, IoRequest, IoStatus};

/// Record of one request that reached the stub, captured at submission.
#[derive(Debug, Clone)]
pub struct SubmittedIo {
    pub kind: IoKind,
    pub offset_blocks: u64,
    pub num_blocks: u64,
    pub src_offset_blocks: Option<u64>,
    pub dif_check_flags: DifCheckFlags,
    pub dif_check_exclude: DifCheckFlags,
}

struct StubState {
    data: Vec<u8>,
    md: Vec<u8>,
    submitted: Vec<SubmittedIo>,
    fail_all: bool,
    channels_enabled: bool,
}

/// In-memory [`BaseDevice`]: every submitted request completes inline, and the
/// raw store is inspectable so tests can assert on what actually landed where.
pub struct StubDevice {
    info: DeviceInfo,
    state: Arc<Mutex<StubState>>,
}

impl StubDevice {
    pub fn new(info: DeviceInfo) -> Self {
        let data = vec![0u8; (info.block_count * u64::from(info.block_len)) as usize];
        let md = if info.md_interleave {
            Vec::new()
        } else {
            vec![0u8; (info.block_count * u64::from(info.md_len)) as usize]
        };
        Self {
            info,
            state: Arc::new(Mutex::new(StubState {
                data,
                md,
                submitted: Vec::new(),
                fail_all: false,
                channels_enabled: true,
            })),
        }
    }

    /// Every request submitted so far, in order.
    pub fn submitted(&self) -> Vec<SubmittedIo> {
        self.state.lock().submitted.clone()
    }

    pub fn last_submitted(&self) -> Option<SubmittedIo> {
        self.state.lock().submitted.last().cloned()
    }

    /// Complete every subsequent request with `Failed` without touching the
    /// store.
    pub fn set_fail_all(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    /// Make [`BaseDevice::create_channel`] return `None`.
    pub fn disable_channels(&self) {
        self.state.lock().channels_enabled = false;
    }

    /// Raw bytes of `num_blocks` blocks starting at `offset_blocks`, in the
    /// device's own (base) address space.
    pub fn read_raw(&self, offset_blocks: u64, num_blocks: u64) -> Vec<u8> {
        let state = self.state.lock();
        let (start, end) = self.data_range(offset_blocks, num_blocks);
        state.data[start..end].to_vec()
    }

    pub fn write_raw(&self, offset_blocks: u64, bytes: &[u8]) {
        let mut state = self.state.lock();
        let start = (offset_blocks * u64::from(self.info.block_len)) as usize;
        state.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn data_range(&self, offset_blocks: u64, num_blocks: u64) -> (usize, usize) {
        let start = (offset_blocks * u64::from(self.info.block_len)) as usize;
        let len = (num_blocks * u64::from(self.info.block_len)) as usize;
        (start, start + len)
    }
}

impl BaseDevice for StubDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn io_type_supported(&self, _kind: IoKind) -> bool {
        // The stub claims support for everything, passthrough included, so
        // capability-narrowing tests can observe the partition saying no.
        true
    }

    fn create_channel(&self) -> Option<Box<dyn BaseChannel>> {
        if !self.state.lock().channels_enabled {
            return None;
        }
        Some(Box::new(StubChannel {
            info: self.info.clone(),
            state: self.state.clone(),
        }))
    }
}

struct StubChannel {
    info: DeviceInfo,
    state: Arc<Mutex<StubState>>,
}

impl StubChannel {
    fn copy_out(&self, state: &StubState, offset_blocks: u64, bufs: &mut IoBuffers) {
        let mut at = (offset_blocks * u64::from(self.info.block_len)) as usize;
        for iov in &mut bufs.iovs {
            let n = iov.len();
            iov.copy_from_slice(&state.data[at..at + n]);
            at += n;
        }
        if let Some(md) = &mut bufs.md
            && !self.info.md_interleave
        {
            let md_at = (offset_blocks * u64::from(self.info.md_len)) as usize;
            let n = md.len();
            md.copy_from_slice(&state.md[md_at..md_at + n]);
        }
    }

    fn copy_in(&self, state: &mut StubState, offset_blocks: u64, bufs: &IoBuffers) {
        let mut at = (offset_blocks * u64::from(self.info.block_len)) as usize;
        for iov in &bufs.iovs {
            state.data[at..at + iov.len()].copy_from_slice(iov);
            at += iov.len();
        }
        if let Some(md) = &bufs.md
            && !self.info.md_interleave
        {
            let md_at = (offset_blocks * u64::from(self.info.md_len)) as usize;
            state.md[md_at..md_at + md.len()].copy_from_slice(md);
        }
    }

    fn matches(&self, state: &StubState, offset_blocks: u64, bufs: &IoBuffers) -> bool {
        let mut at = (offset_blocks * u64::from(self.info.block_len)) as usize;
        for iov in &bufs.iovs {
            if state.data[at..at + iov.len()] != iov[..] {
                return false;
            }
            at += iov.len();
        }
        true
    }
}

impl BaseChannel for StubChannel {
    fn submit(&mut self, mut io: IoRequest) {
        let record = SubmittedIo {
            kind: io.kind(),
            offset_blocks: io.offset_blocks,
            num_blocks: io.num_blocks,
            src_offset_blocks: match &io.payload {
                IoPayload::Copy { src_offset_blocks } => Some(*src_offset_blocks),
                _ => None,
            },
            dif_check_flags: io.dif_check_flags,
            dif_check_exclude: io.dif_check_exclude,
        };

        let mut state = self.state.lock();
        state.submitted.push(record);

        if state.fail_all {
            drop(state);
            io.complete(IoStatus::Failed);
            return;
        }

        let offset = io.offset_blocks;
        let num_blocks = io.num_blocks;
        let block_len = u64::from(self.info.block_len);
        let mut status = IoStatus::Success;

        match &mut io.payload {
            IoPayload::Read(bufs) => self.copy_out(&state, offset, bufs),
            IoPayload::Write(bufs) => self.copy_in(&mut state, offset, bufs),
            IoPayload::WriteZeroes | IoPayload::Unmap => {
                let start = (offset * block_len) as usize;
                let len = (num_blocks * block_len) as usize;
                state.data[start..start + len].fill(0);
            }
            IoPayload::Flush | IoPayload::Reset | IoPayload::Abort { .. } => {}
            IoPayload::ZcopyStart { populate, buf } => {
                let start = (offset * block_len) as usize;
                let len = (num_blocks * block_len) as usize;
                *buf = Some(if *populate {
                    state.data[start..start + len].to_vec()
                } else {
                    vec![0u8; len]
                });
            }
            IoPayload::Compare(bufs) => {
                if !self.matches(&state, offset, bufs) {
                    status = IoStatus::Failed;
                }
            }
            IoPayload::CompareAndWrite { compare, write } => {
                if self.matches(&state, offset, compare) {
                    self.copy_in(&mut state, offset, write);
                } else {
                    status = IoStatus::Failed;
                }
            }
            IoPayload::Copy { src_offset_blocks } => {
                let src = (*src_offset_blocks * block_len) as usize;
                let dst = (offset * block_len) as usize;
                let len = (num_blocks * block_len) as usize;
                state.data.copy_within(src..src + len, dst);
            }
            IoPayload::NvmePassthrough { .. } => status = IoStatus::Failed,
        }

        drop(state);
        io.complete(status);
    }
}
