// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reference-tag remapping for per-block integrity metadata.
//!
//! A block's expected reference tag depends on its address, so forwarding an
//! I/O across the partition offset shift changes every tag in the request.
//! [`remap_request`] verifies each block's stored tag against the offset the
//! request was issued at and rewrites it for the offset it is being forwarded
//! to, over either interleaved metadata ([`DifCtx::remap_ref_tag`]) or a
//! separate metadata buffer ([`DifCtx::dix_remap_ref_tag`]).

use thiserror::Error;

use crate::device::{DeviceInfo, DifCheckFlags, DifType};
use crate::io::IoBuffers;

/// Size in bytes of the protection tuple: 16-bit guard, 16-bit app tag,
/// 32-bit reference tag.
pub const PI_SIZE: u32 = 8;

/// Stored reference tag meaning "do not check this block".
const REF_TAG_IGNORE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifErrorKind {
    /// Context construction rejected the device's metadata parameters.
    Context,
    /// A stored reference tag did not match the expected value.
    RefTag,
    /// Buffers too short for the metadata layout.
    Layout,
}

/// First failing block of a remap pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reference tag remap failed: {kind:?} at block offset {err_offset}")]
pub struct DifRemapError {
    pub kind: DifErrorKind,
    /// Offset (in the pre-remap namespace) of the failing block; 0 for
    /// context errors.
    pub err_offset: u64,
}

/// Remap context seeded at a request's original offset.
#[derive(Debug, Clone)]
pub struct DifCtx {
    block_len: u32,
    md_len: u32,
    dif_is_head_of_md: bool,
    check_flags: DifCheckFlags,
    init_ref_tag: u64,
    remapped_init_ref_tag: u64,
}

impl DifCtx {
    pub fn new(
        info: &DeviceInfo,
        check_flags: DifCheckFlags,
        init_ref_tag: u64,
    ) -> Result<Self, DifRemapError> {
        let bad_ctx = DifRemapError {
            kind: DifErrorKind::Context,
            err_offset: 0,
        };
        if info.dif_type == DifType::None || info.md_len < PI_SIZE || info.block_len == 0 {
            return Err(bad_ctx);
        }
        if info.md_interleave && info.block_len <= info.md_len {
            return Err(bad_ctx);
        }
        Ok(Self {
            block_len: info.block_len,
            md_len: info.md_len,
            dif_is_head_of_md: info.dif_is_head_of_md,
            check_flags,
            init_ref_tag,
            remapped_init_ref_tag: init_ref_tag,
        })
    }

    /// Set the offset namespace the tags are being rewritten into.
    pub fn set_remapped_init_ref_tag(&mut self, offset_blocks: u64) {
        self.remapped_init_ref_tag = offset_blocks;
    }

    /// Byte offset of the reference tag within one metadata region.
    fn ref_tag_offset_in_md(&self) -> u32 {
        let pi_start = if self.dif_is_head_of_md {
            0
        } else {
            self.md_len - PI_SIZE
        };
        pi_start + 4
    }

    /// Remap tags across interleaved data+metadata blocks.
    pub fn remap_ref_tag(
        &self,
        iovs: &mut [Vec<u8>],
        num_blocks: u64,
    ) -> Result<(), DifRemapError> {
        let md_start = self.block_len - self.md_len;
        self.remap_with_stride(
            iovs,
            num_blocks,
            u64::from(self.block_len),
            u64::from(md_start + self.ref_tag_offset_in_md()),
        )
    }

    /// Remap tags in a separate metadata buffer (one `md_len` region per
    /// block).
    pub fn dix_remap_ref_tag(
        &self,
        md: &mut [u8],
        num_blocks: u64,
    ) -> Result<(), DifRemapError> {
        let stride = u64::from(self.md_len);
        let tag_offset = u64::from(self.ref_tag_offset_in_md());
        for i in 0..num_blocks {
            let at = (i * stride + tag_offset) as usize;
            let slot = md.get(at..at + 4).ok_or(self.layout_error(i))?;
            let stored = u32::from_be_bytes([slot[0], slot[1], slot[2], slot[3]]);

            if let Some(remapped) = self.remap_one(i, stored)? {
                md[at..at + 4].copy_from_slice(&remapped.to_be_bytes());
            }
        }
        Ok(())
    }

    fn remap_with_stride(
        &self,
        iovs: &mut [Vec<u8>],
        num_blocks: u64,
        stride: u64,
        tag_offset: u64,
    ) -> Result<(), DifRemapError> {
        let mut cursor = SglCursor::new(iovs);
        for i in 0..num_blocks {
            let at = i * stride + tag_offset;
            let stored = cursor.read_u32(at).ok_or(self.layout_error(i))?;
            if let Some(remapped) = self.remap_one(i, stored)? {
                cursor.write_u32(at, remapped);
            }
        }
        Ok(())
    }

    /// Verify one block's stored tag and compute its replacement. `None`
    /// passes an ignored block through untouched.
    fn remap_one(&self, block: u64, stored: u32) -> Result<Option<u32>, DifRemapError> {
        if stored == REF_TAG_IGNORE {
            return Ok(None);
        }

        let expected = (self.init_ref_tag.wrapping_add(block)) as u32;
        if self.check_flags.ref_tag && stored != expected {
            return Err(DifRemapError {
                kind: DifErrorKind::RefTag,
                err_offset: self.init_ref_tag + block,
            });
        }

        Ok(Some((self.remapped_init_ref_tag.wrapping_add(block)) as u32))
    }

    fn layout_error(&self, block: u64) -> DifRemapError {
        DifRemapError {
            kind: DifErrorKind::Layout,
            err_offset: self.init_ref_tag + block,
        }
    }
}

/// Remap every reference tag of a request being forwarded from
/// `offset_blocks` to `remapped_offset_blocks`. No-op unless the request asked
/// for reference-tag checking.
pub(crate) fn remap_request(
    info: &DeviceInfo,
    buffers: &mut IoBuffers,
    num_blocks: u64,
    check_flags: DifCheckFlags,
    offset_blocks: u64,
    remapped_offset_blocks: u64,
) -> Result<(), DifRemapError> {
    if !check_flags.ref_tag {
        return Ok(());
    }

    let mut ctx = DifCtx::new(info, check_flags, offset_blocks).inspect_err(|_| {
        tracing::error!(
            device = %info.name,
            "initialization of DIF context failed"
        );
    })?;
    ctx.set_remapped_init_ref_tag(remapped_offset_blocks);

    let rc = if info.md_interleave {
        ctx.remap_ref_tag(&mut buffers.iovs, num_blocks)
    } else {
        let md = buffers.md.as_deref_mut().ok_or(DifRemapError {
            kind: DifErrorKind::Layout,
            err_offset: offset_blocks,
        })?;
        ctx.dix_remap_ref_tag(md, num_blocks)
    };

    if let Err(err) = &rc {
        tracing::error!(
            kind = ?err.kind,
            offset = err.err_offset,
            "remapping reference tag failed"
        );
    }
    rc
}

/// Scatter-gather cursor for 32-bit accesses at absolute byte offsets,
/// tolerant of values straddling an iov boundary.
struct SglCursor<'a> {
    iovs: &'a mut [Vec<u8>],
}

impl<'a> SglCursor<'a> {
    fn new(iovs: &'a mut [Vec<u8>]) -> Self {
        Self { iovs }
    }

    fn locate(&self, mut offset: u64) -> Option<(usize, usize)> {
        for (idx, iov) in self.iovs.iter().enumerate() {
            if offset < iov.len() as u64 {
                return Some((idx, offset as usize));
            }
            offset -= iov.len() as u64;
        }
        None
    }

    fn read_u32(&self, offset: u64) -> Option<u32> {
        let mut bytes = [0u8; 4];
        let (mut idx, mut at) = self.locate(offset)?;
        for b in bytes.iter_mut() {
            while at >= self.iovs[idx].len() {
                idx += 1;
                at = 0;
                if idx >= self.iovs.len() {
                    return None;
                }
            }
            *b = self.iovs[idx][at];
            at += 1;
        }
        Some(u32::from_be_bytes(bytes))
    }

    fn write_u32(&mut self, offset: u64, value: u32) -> bool {
        let bytes = value.to_be_bytes();
        let Some((mut idx, mut at)) = self.locate(offset) else {
            return false;
        };
        for b in bytes {
            while at >= self.iovs[idx].len() {
                idx += 1;
                at = 0;
                if idx >= self.iovs.len() {
                    return false;
                }
            }
            self.iovs[idx][at] = b;
            at += 1;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DifCheckFlags;
    use proptest::prelude::*;
    use rstest::rstest;
    use uuid::Uuid;

    const BLOCK_LEN: u32 = 512 + 8;
    const MD_LEN: u32 = 8;

    fn dif_info(md_interleave: bool, head_of_md: bool) -> DeviceInfo {
        DeviceInfo {
            name: "dif0".into(),
            product_name: "DIF Test".into(),
            uuid: Uuid::nil(),
            block_len: BLOCK_LEN,
            block_count: 64,
            write_cache: false,
            required_alignment: 0,
            md_len: MD_LEN,
            md_interleave,
            dif_type: DifType::Type1,
            dif_is_head_of_md: head_of_md,
            dif_check_flags: DifCheckFlags::REF_TAG,
        }
    }

    /// Interleaved payload of `num_blocks` blocks with ref tags seeded in the
    /// `offset` namespace.
    fn seeded_blocks(num_blocks: u64, offset: u64) -> Vec<u8> {
        let mut buf = vec![0u8; (num_blocks * u64::from(BLOCK_LEN)) as usize];
        for i in 0..num_blocks {
            let tag = (offset + i) as u32;
            let at = (i * u64::from(BLOCK_LEN) + u64::from(BLOCK_LEN) - 4) as usize;
            buf[at..at + 4].copy_from_slice(&tag.to_be_bytes());
        }
        buf
    }

    fn tag_at(buf: &[u8], block: u64) -> u32 {
        let at = (block * u64::from(BLOCK_LEN) + u64::from(BLOCK_LEN) - 4) as usize;
        u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn ctx_rejects_missing_metadata() {
        let mut info = dif_info(true, false);
        info.md_len = 0;
        let err = DifCtx::new(&info, DifCheckFlags::REF_TAG, 0).unwrap_err();
        assert_eq!(err.kind, DifErrorKind::Context);

        let mut info = dif_info(true, false);
        info.dif_type = DifType::None;
        assert!(DifCtx::new(&info, DifCheckFlags::REF_TAG, 0).is_err());
    }

    #[rstest]
    #[case::tail_of_md(false)]
    #[case::head_of_md(true)]
    fn interleaved_remap_rewrites_every_tag(#[case] head_of_md: bool) {
        let mut info = dif_info(true, head_of_md);
        // With an 8-byte metadata region the tuple fills it entirely, so the
        // head/tail placement coincides; widen the region for the tail case.
        info.md_len = 16;
        info.block_len = 512 + 16;

        let num_blocks = 4u64;
        let mut buf = vec![0u8; (num_blocks * u64::from(info.block_len)) as usize];
        let tag_off = if head_of_md {
            u64::from(info.block_len - info.md_len) + 4
        } else {
            u64::from(info.block_len) - 4
        };
        for i in 0..num_blocks {
            let at = (i * u64::from(info.block_len) + tag_off) as usize;
            buf[at..at + 4].copy_from_slice(&((100 + i) as u32).to_be_bytes());
        }

        let mut iovs = vec![buf];
        let mut ctx = DifCtx::new(&info, DifCheckFlags::REF_TAG, 100).unwrap();
        ctx.set_remapped_init_ref_tag(500);
        ctx.remap_ref_tag(&mut iovs, num_blocks).unwrap();

        for i in 0..num_blocks {
            let at = (i * u64::from(info.block_len) + tag_off) as usize;
            let tag = u32::from_be_bytes(iovs[0][at..at + 4].try_into().unwrap());
            assert_eq!(tag, (500 + i) as u32);
        }
    }

    #[test]
    fn mismatched_tag_reports_failing_block() {
        let info = dif_info(true, false);
        let mut buf = seeded_blocks(8, 40);
        // Corrupt block 5.
        let at = (5 * u64::from(BLOCK_LEN) + u64::from(BLOCK_LEN) - 4) as usize;
        buf[at..at + 4].copy_from_slice(&0xdead_beefu32.to_be_bytes());

        let mut iovs = vec![buf];
        let mut ctx = DifCtx::new(&info, DifCheckFlags::REF_TAG, 40).unwrap();
        ctx.set_remapped_init_ref_tag(140);
        let err = ctx.remap_ref_tag(&mut iovs, 8).unwrap_err();
        assert_eq!(err.kind, DifErrorKind::RefTag);
        assert_eq!(err.err_offset, 45);
    }

    #[test]
    fn ignore_tag_is_skipped() {
        let info = dif_info(true, false);
        let mut buf = seeded_blocks(3, 10);
        let at = (u64::from(BLOCK_LEN) - 4) as usize;
        buf[at..at + 4].copy_from_slice(&u32::MAX.to_be_bytes());

        let mut iovs = vec![buf];
        let mut ctx = DifCtx::new(&info, DifCheckFlags::REF_TAG, 10).unwrap();
        ctx.set_remapped_init_ref_tag(20);
        ctx.remap_ref_tag(&mut iovs, 3).unwrap();

        assert_eq!(tag_at(&iovs[0], 0), u32::MAX);
        assert_eq!(tag_at(&iovs[0], 1), 21);
        assert_eq!(tag_at(&iovs[0], 2), 22);
    }

    #[test]
    fn tag_straddling_iov_boundary() {
        let buf = seeded_blocks(2, 7);
        // Split inside block 1's reference tag.
        let cut = buf.len() - 2;
        let (a, b) = buf.split_at(cut);
        let mut iovs = vec![a.to_vec(), b.to_vec()];

        let info = dif_info(true, false);
        let mut ctx = DifCtx::new(&info, DifCheckFlags::REF_TAG, 7).unwrap();
        ctx.set_remapped_init_ref_tag(207);
        ctx.remap_ref_tag(&mut iovs, 2).unwrap();

        let flat: Vec<u8> = iovs.concat();
        assert_eq!(tag_at(&flat, 0), 207);
        assert_eq!(tag_at(&flat, 1), 208);
    }

    #[test]
    fn separate_metadata_remap() {
        let info = dif_info(false, false);
        let num_blocks = 5u64;
        let mut md = vec![0u8; (num_blocks * u64::from(MD_LEN)) as usize];
        for i in 0..num_blocks {
            let at = (i * u64::from(MD_LEN) + 4) as usize;
            md[at..at + 4].copy_from_slice(&((30 + i) as u32).to_be_bytes());
        }

        let mut ctx = DifCtx::new(&info, DifCheckFlags::REF_TAG, 30).unwrap();
        ctx.set_remapped_init_ref_tag(0);
        ctx.dix_remap_ref_tag(&mut md, num_blocks).unwrap();

        for i in 0..num_blocks {
            let at = (i * u64::from(MD_LEN) + 4) as usize;
            let tag = u32::from_be_bytes(md[at..at + 4].try_into().unwrap());
            assert_eq!(tag, i as u32);
        }
    }

    #[test]
    fn remap_request_requires_md_buffer_for_separate_layout() {
        let info = dif_info(false, false);
        let mut buffers = IoBuffers::from_single(vec![0u8; 512]);
        let err = remap_request(&info, &mut buffers, 1, DifCheckFlags::REF_TAG, 0, 10).unwrap_err();
        assert_eq!(err.kind, DifErrorKind::Layout);
    }

    #[test]
    fn remap_request_noop_without_ref_tag_check() {
        let info = dif_info(true, false);
        let mut buffers = IoBuffers::from_single(seeded_blocks(2, 999));
        remap_request(&info, &mut buffers, 2, DifCheckFlags::NONE, 0, 10).unwrap();
        // Tags untouched.
        assert_eq!(tag_at(&buffers.iovs[0], 0), 999);
    }

    proptest! {
        /// Remapping from `a` to `b` and back restores the original tags.
        #[test]
        fn prop_remap_round_trips(
            a in 0u64..1 << 40,
            b in 0u64..1 << 40,
            num_blocks in 1u64..32,
        ) {
            let info = dif_info(true, false);
            let original = seeded_blocks(num_blocks, a);
            let mut iovs = vec![original.clone()];

            let mut ctx = DifCtx::new(&info, DifCheckFlags::REF_TAG, a).unwrap();
            ctx.set_remapped_init_ref_tag(b);
            ctx.remap_ref_tag(&mut iovs, num_blocks).unwrap();

            let mut back = DifCtx::new(&info, DifCheckFlags::REF_TAG, b).unwrap();
            back.set_remapped_init_ref_tag(a);
            back.remap_ref_tag(&mut iovs, num_blocks).unwrap();

            prop_assert_eq!(&iovs[0], &original);
        }
    }
}
