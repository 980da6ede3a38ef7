// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Common infrastructure for partition-style virtual block devices.
//!
//! This crate is the shared core for virtual devices that carve one
//! underlying block device into multiple independently addressable children:
//! - One reference-counted [`PartBase`] handle to the underlying device,
//!   shared by every [`Part`] built on it and closed exactly once, on the
//!   thread that opened it.
//! - An I/O forwarder ([`submit_request`]) that offset-shifts every operation
//!   kind down to the base and bridges the completion back.
//! - Reference-tag remapping ([`dif`]) so per-block integrity metadata stays
//!   consistent across the offset shift.
//! - A two-phase asynchronous destruction protocol per partition
//!   ([`Part::destroy`]).
//!
//! The surrounding block-device framework, the thread/messaging runtime, and
//! the concrete storage driver are consumed through the traits in
//! [`framework`]; this crate does not interpret partition tables or schedule
//! I/O itself.

pub mod base;
pub mod device;
pub mod dif;
pub mod error;
pub mod forward;
pub mod framework;
pub mod ident;
pub mod io;
pub mod part;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use base::{PartBase, PartBaseBuilder};
pub use device::{DeviceInfo, DifCheckFlags, DifType, IoKind};
pub use error::{
    BaseError, ChannelError, ClaimError, ConstructError, RegisterError, SubmitError,
};
pub use forward::{submit_request, submit_request_ext};
pub use framework::{
    BaseChannel, BaseDescriptor, BaseDevice, DeviceRegistry, MessageRuntime, ModuleId,
};
pub use io::{IoBuffers, IoCompletion, IoPayload, IoRequest, IoStatus};
pub use part::{DestructOutcome, DestructState, Part, PartChannel, PartConstructOpts};
