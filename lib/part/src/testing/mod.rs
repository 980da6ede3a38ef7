// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory doubles for the external framework boundary.
//!
//! - [`StubDevice`] -- an in-memory base device that executes submitted I/O
//!   synchronously against a byte store and records every request it sees.
//! - [`TestRegistry`] -- a [`DeviceRegistry`](crate::framework::DeviceRegistry)
//!   that tracks opens/closes, claims, registrations, and drives the
//!   asynchronous destruct protocol inline.
//! - [`InlineRuntime`] / [`PumpRuntime`] -- message runtimes for same-thread
//!   tests and for exercising the affinity-thread close dispatch.

mod device;
mod registry;
mod runtime;

pub use device::{StubDevice, SubmittedIo};
pub use registry::TestRegistry;
pub use runtime::{InlineRuntime, PumpRuntime, foreign_thread_id};

use std::sync::Arc;

use crate::base::PartBase;
use crate::device::{DeviceInfo, DifCheckFlags, DifType};
use crate::framework::{MessageRuntime, ModuleId};

pub const TEST_MODULE: ModuleId = ModuleId("part_test");

/// Plain 512-byte-block device without metadata.
pub fn simple_device(name: &str, block_count: u64) -> Arc<StubDevice> {
    Arc::new(StubDevice::new(DeviceInfo {
        name: name.into(),
        product_name: "Stub Disk".into(),
        uuid: uuid::Uuid::new_v4(),
        block_len: 512,
        block_count,
        write_cache: false,
        required_alignment: 0,
        md_len: 0,
        md_interleave: false,
        dif_type: DifType::None,
        dif_is_head_of_md: false,
        dif_check_flags: DifCheckFlags::NONE,
    }))
}

/// Device with 8 bytes of interleaved metadata and Type1 protection.
pub fn dif_device(name: &str, block_count: u64) -> Arc<StubDevice> {
    Arc::new(StubDevice::new(DeviceInfo {
        name: name.into(),
        product_name: "Stub DIF Disk".into(),
        uuid: uuid::Uuid::new_v4(),
        block_len: 512 + 8,
        block_count,
        write_cache: false,
        required_alignment: 0,
        md_len: 8,
        md_interleave: true,
        dif_type: DifType::Type1,
        dif_is_head_of_md: false,
        dif_check_flags: DifCheckFlags::REF_TAG,
    }))
}

/// Open a base over `device` through a fresh registry and runtime.
pub fn open_base(
    registry: &Arc<TestRegistry>,
    runtime: Arc<dyn MessageRuntime>,
    device_name: &str,
) -> Arc<PartBase> {
    PartBase::builder()
        .device_name(device_name)
        .module(TEST_MODULE)
        .registry(registry.clone())
        .runtime(runtime)
        .open()
        .expect("open test base")
}
