// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The I/O forwarder: translates each request against a partition into the
//! equivalent request against the base device.
//!
//! Offsets are shifted by the partition offset (copy shifts source and
//! destination independently; reset and abort are forwarded untranslated),
//! reference tags are remapped across the shift, and the base's completion is
//! bridged back into a partition-relative completion. Buffers travel down with
//! the forwarded request and come back through the bridge, so the forwarded
//! I/O is always released exactly once regardless of outcome.

use crate::device::IoKind;
use crate::dif;
use crate::error::SubmitError;
use crate::io::{IoCompletion, IoPayload, IoRequest, IoStatus};
use crate::part::PartChannel;

/// Forward `io` to the partition's base device. Completion is reported
/// through the request's own completion callback.
pub fn submit_request(ch: &mut PartChannel, io: IoRequest) -> Result<(), SubmitError> {
    submit_request_ext(ch, io, None)
}

/// Like [`submit_request`], with an override completion that replaces the
/// request's default completion path. Used when the forwarder serves as a
/// building block of a higher-level splitting operation that needs to observe
/// each fragment's completion itself.
pub fn submit_request_ext(
    ch: &mut PartChannel,
    mut io: IoRequest,
    override_completion: Option<IoCompletion>,
) -> Result<(), SubmitError> {
    let kind = io.kind();
    if kind.is_passthrough() {
        tracing::error!(?kind, "unknown I/O kind");
        return Err(SubmitError::Unsupported { kind, io });
    }

    let part = ch.part().clone();
    let part_offset = part.offset_blocks();
    let info = part.info().clone();

    let completion = io.take_completion();
    let offset = io.offset_blocks;
    let num_blocks = io.num_blocks;
    let flags = io.dif_check_flags;
    let memory_domain = io.memory_domain.clone();
    let mut payload = io.payload;

    let remapped_offset = offset + part_offset;

    // Writes carry tags in the partition's offset namespace; rewrite them for
    // the base before the data leaves this layer. A failure here rejects the
    // submission outright.
    if let IoPayload::Write(bufs) = &mut payload
        && let Err(source) =
            dif::remap_request(&info, bufs, num_blocks, flags, offset, remapped_offset)
    {
        let mut io = IoRequest::new(offset, num_blocks, payload).with_dif_check_flags(flags);
        io.memory_domain = memory_domain;
        io.set_completion(completion);
        return Err(SubmitError::Remap { source, io });
    }

    match &mut payload {
        // Both ranges of a copy live in the partition's address space.
        IoPayload::Copy { src_offset_blocks } => *src_offset_blocks += part_offset,
        // Zero-copy start forwards an empty placeholder; the base returns the
        // real buffer on completion.
        IoPayload::ZcopyStart { buf, .. } => *buf = None,
        _ => {}
    }

    // Reset and abort target the device as a whole, not a block range.
    let child_offset = match kind {
        IoKind::Reset | IoKind::Abort => offset,
        _ => remapped_offset,
    };

    let bridge: IoCompletion = Box::new(move |mut child: IoRequest, mut status: IoStatus| {
        // Read data comes back tagged in the base's offset namespace; remap
        // into the partition's. A remap failure downgrades the completion,
        // the underlying I/O itself already finished.
        if status.is_success()
            && let IoPayload::Read(bufs) = &mut child.payload
            && dif::remap_request(
                &info,
                bufs,
                child.num_blocks,
                flags,
                child.offset_blocks,
                offset,
            )
            .is_err()
        {
            status = IoStatus::Failed;
        }

        let mut payload = child.payload;
        if let IoPayload::Copy { src_offset_blocks } = &mut payload {
            *src_offset_blocks -= part_offset;
        }

        // Rebuild the partition-relative request for the completion; a
        // zero-copy payload now carries the buffer the base returned.
        let mut parent = IoRequest::new(offset, num_blocks, payload).with_dif_check_flags(flags);
        parent.memory_domain = memory_domain;
        match override_completion {
            Some(cb) => cb(parent, status),
            None => {
                if let Some(cb) = completion {
                    cb(parent, status);
                }
            }
        }
    });

    let mut child = IoRequest::new(child_offset, num_blocks, payload)
        .with_dif_check_flags(flags)
        .on_complete(bridge);
    // Forward the extended options: memory domain unchanged, plus a mask
    // keeping the base from adding checks the original request never asked
    // for.
    child.dif_check_exclude = flags.complement();
    child.memory_domain = io.memory_domain;

    ch.base_channel_mut().submit(child);
    Ok(())
}
