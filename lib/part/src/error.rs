// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the partition layer.
//!
//! All of these are local, recoverable conditions returned to the immediate
//! caller. Contract violations (freeing a base whose reference count is not
//! zero, double-closing a descriptor) are prevented by invariant and
//! `debug_assert!`, not represented here.

use thiserror::Error;

use crate::device::IoKind;
use crate::dif::DifRemapError;

/// Failures opening the shared base device.
#[derive(Debug, Error)]
pub enum BaseError {
    /// The named underlying device does not exist. Nothing was allocated, so
    /// there is no partial state to unwind.
    #[error("block device '{0}' not found")]
    NotFound(String),

    #[error("could not open block device '{name}': {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("invalid base configuration: {0}")]
    Config(&'static str),
}

/// Another module already owns the underlying device.
#[derive(Debug, Error)]
#[error("device '{device}' already claimed by module '{owner}'")]
pub struct ClaimError {
    pub device: String,
    pub owner: String,
}

/// The framework rejected a device registration.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("device name '{0}' already registered")]
    NameCollision(String),

    #[error("device registration failed: {0}")]
    Other(String),
}

/// Failures constructing a partition. Any state taken before the failure
/// (base reference, first claim, io-device registration) has been unwound by
/// the time this is returned.
#[derive(Debug, Error)]
pub enum ConstructError {
    #[error(
        "partition range [{offset_blocks}, {offset_blocks}+{num_blocks}) exceeds \
         base capacity of {base_blocks} blocks"
    )]
    RangeOutOfBounds {
        offset_blocks: u64,
        num_blocks: u64,
        base_blocks: u64,
    },

    #[error("could not claim base device: {0}")]
    Claim(#[from] ClaimError),

    #[error("could not register partition: {0}")]
    Register(#[from] RegisterError),
}

/// Failures creating a partition's per-thread I/O channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("could not open a channel on the base device")]
    BaseChannel,

    #[error("channel create hook failed: {0}")]
    Hook(String),
}

/// Synchronous submission failures from the I/O forwarder. Asynchronous
/// failures are reported through the request's completion instead.
///
/// The rejected request rides along in the error so the caller gets its
/// buffers and completion back instead of leaking them.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Unknown or deliberately unexposed I/O kind.
    #[error("I/O kind {kind:?} is not supported on a partition")]
    Unsupported { kind: IoKind, io: crate::io::IoRequest },

    /// Write-side reference-tag remap was rejected before dispatch.
    #[error("reference tag remap rejected the write: {source}")]
    Remap {
        #[source]
        source: DifRemapError,
        io: crate::io::IoRequest,
    },
}

impl SubmitError {
    /// Recover the rejected request.
    pub fn into_io(self) -> crate::io::IoRequest {
        match self {
            Self::Unsupported { io, .. } | Self::Remap { io, .. } => io,
        }
    }
}
