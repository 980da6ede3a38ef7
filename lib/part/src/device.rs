// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Block-device descriptors and the I/O taxonomy shared by bases and partitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Every I/O operation a block device may be asked to perform.
///
/// The NVMe passthrough kinds are part of the taxonomy because the capability
/// query must be able to name them, but the partition forwarder never accepts
/// them: raw commands cannot be decoded and offset-shifted safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoKind {
    Read,
    Write,
    WriteZeroes,
    Unmap,
    Flush,
    Reset,
    Abort,
    ZcopyStart,
    Compare,
    CompareAndWrite,
    Copy,
    NvmeAdmin,
    NvmeIo,
    NvmeIoMd,
}

impl IoKind {
    /// Kinds the partition layer refuses to forward regardless of base support.
    pub fn is_passthrough(self) -> bool {
        matches!(self, Self::NvmeAdmin | Self::NvmeIo | Self::NvmeIoMd)
    }
}

/// End-to-end protection type of a device's per-block metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DifType {
    #[default]
    None,
    Type1,
    Type2,
    Type3,
}

/// Which fields of the per-block protection tuple a request wants verified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifCheckFlags {
    pub guard: bool,
    pub app_tag: bool,
    pub ref_tag: bool,
}

impl DifCheckFlags {
    pub const NONE: Self = Self {
        guard: false,
        app_tag: false,
        ref_tag: false,
    };

    pub const REF_TAG: Self = Self {
        guard: false,
        app_tag: false,
        ref_tag: true,
    };

    /// The checks *not* requested here. Forwarded requests carry this as an
    /// exclude mask so the base device does not add verification the original
    /// request never asked for.
    pub fn complement(self) -> Self {
        Self {
            guard: !self.guard,
            app_tag: !self.app_tag,
            ref_tag: !self.ref_tag,
        }
    }

    pub fn any(self) -> bool {
        self.guard || self.app_tag || self.ref_tag
    }
}

/// Descriptor of one block device, base or partition.
///
/// A partition's descriptor is copied verbatim from its base except for the
/// name, product name, UUID, and `block_count` (which becomes the partition
/// length).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub product_name: String,
    pub uuid: Uuid,

    /// Logical block length in bytes. Includes the metadata region when
    /// `md_interleave` is set.
    pub block_len: u32,
    pub block_count: u64,
    pub write_cache: bool,
    pub required_alignment: u8,

    /// Per-block metadata length in bytes; 0 when the device carries none.
    pub md_len: u32,
    /// Metadata interleaved with block data, as opposed to a separate buffer.
    pub md_interleave: bool,
    pub dif_type: DifType,
    /// Protection tuple sits at the head of the metadata region rather than
    /// its tail.
    pub dif_is_head_of_md: bool,
    pub dif_check_flags: DifCheckFlags,
}

impl DeviceInfo {
    /// Descriptor for a partition carved out of `base`.
    pub(crate) fn derive_partition(
        base: &DeviceInfo,
        name: &str,
        product_name: &str,
        uuid: Uuid,
        num_blocks: u64,
    ) -> DeviceInfo {
        DeviceInfo {
            name: name.to_owned(),
            product_name: product_name.to_owned(),
            uuid,
            block_len: base.block_len,
            block_count: num_blocks,
            write_cache: base.write_cache,
            required_alignment: base.required_alignment,
            md_len: base.md_len,
            md_interleave: base.md_interleave,
            dif_type: base.dif_type,
            dif_is_head_of_md: base.dif_is_head_of_md,
            dif_check_flags: base.dif_check_flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_info() -> DeviceInfo {
        DeviceInfo {
            name: "base0".into(),
            product_name: "Test Disk".into(),
            uuid: Uuid::new_v4(),
            block_len: 4096 + 64,
            block_count: 1024,
            write_cache: true,
            required_alignment: 12,
            md_len: 64,
            md_interleave: true,
            dif_type: DifType::Type1,
            dif_is_head_of_md: false,
            dif_check_flags: DifCheckFlags::REF_TAG,
        }
    }

    #[test]
    fn partition_inherits_geometry() {
        let base = base_info();
        let uuid = Uuid::new_v4();
        let part = DeviceInfo::derive_partition(&base, "base0p1", "Partition", uuid, 100);

        assert_eq!(part.block_count, 100);
        assert_eq!(part.block_len, base.block_len);
        assert_eq!(part.md_len, base.md_len);
        assert_eq!(part.dif_type, base.dif_type);
        assert_eq!(part.dif_check_flags, base.dif_check_flags);
        assert_eq!(part.name, "base0p1");
        assert_eq!(part.uuid, uuid);
    }

    #[test]
    fn check_flag_complement() {
        let flags = DifCheckFlags::REF_TAG;
        let excl = flags.complement();
        assert!(!excl.ref_tag);
        assert!(excl.guard);
        assert!(excl.app_tag);
        assert!(DifCheckFlags::NONE.complement().any());
    }

    #[test]
    fn passthrough_kinds() {
        assert!(IoKind::NvmeAdmin.is_passthrough());
        assert!(IoKind::NvmeIoMd.is_passthrough());
        assert!(!IoKind::Read.is_passthrough());
        assert!(!IoKind::Copy.is_passthrough());
    }
}
