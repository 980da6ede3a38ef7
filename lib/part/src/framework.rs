// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Boundary traits for the external collaborators of the partition core.
//!
//! The partition layer does not implement device registration, dispatch, or
//! thread scheduling itself; it consumes them through the traits here:
//!
//! - [`BaseDevice`] / [`BaseChannel`] -- the underlying device and its
//!   per-thread submission path.
//! - [`DeviceRegistry`] -- open/register/claim bookkeeping plus the
//!   asynchronous destruct protocol.
//! - [`MessageRuntime`] -- thread identity and fire-and-forget task handoff to
//!   a specific thread.
//!
//! Production implementations live in the surrounding block-device framework;
//! in-memory doubles for tests live in [`crate::testing`].

use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use crate::device::{DeviceInfo, IoKind};
use crate::error::{BaseError, ClaimError, RegisterError};
use crate::io::{IoRequest, IoStatus};
use crate::part::Part;

/// A unit of work handed to another thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Hook invoked when the framework reports removal of an opened device.
pub type RemoveCallback = Arc<dyn Fn() + Send + Sync>;

/// Identity of the module claiming exclusive ownership of a base device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId(pub &'static str);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// The underlying block device a base handle refers to.
pub trait BaseDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Capability query for one I/O kind.
    fn io_type_supported(&self, kind: IoKind) -> bool;

    /// Open a submission channel for the calling thread. `None` when the
    /// device cannot provide one.
    fn create_channel(&self) -> Option<Box<dyn BaseChannel>>;
}

/// Per-thread submission path into a [`BaseDevice`].
///
/// Submission never fails synchronously; errors are reported through the
/// request's completion callback.
pub trait BaseChannel: Send {
    fn submit(&mut self, io: IoRequest);
}

/// The open handle a registry returns for a named device.
///
/// The handle is closed exactly once: either explicitly via [`close`], which
/// the base lifecycle always runs on the opening thread, or as a last resort
/// on drop.
///
/// [`close`]: BaseDescriptor::close
pub struct BaseDescriptor {
    device: Arc<dyn BaseDevice>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl fmt::Debug for BaseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseDescriptor")
            .field("device", &self.device.info().name)
            .field("open", &self.on_close.is_some())
            .finish()
    }
}

impl BaseDescriptor {
    pub fn new(device: Arc<dyn BaseDevice>, on_close: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            device,
            on_close: Some(on_close),
        }
    }

    pub fn device(&self) -> &Arc<dyn BaseDevice> {
        &self.device
    }

    pub fn close(mut self) {
        if let Some(f) = self.on_close.take() {
            f();
        }
    }
}

impl Drop for BaseDescriptor {
    fn drop(&mut self) {
        if let Some(f) = self.on_close.take() {
            tracing::debug!(
                device = %self.device.info().name,
                "descriptor dropped without an explicit close"
            );
            f();
        }
    }
}

/// Device registration and ownership bookkeeping, plus the asynchronous
/// destruct protocol for virtual devices.
pub trait DeviceRegistry: Send + Sync {
    /// Open the named device. `remove_cb` fires if the framework later
    /// reports the device removed out from under the handle.
    fn open(&self, name: &str, remove_cb: RemoveCallback) -> Result<BaseDescriptor, BaseError>;

    /// Claim exclusive ownership of `name` on behalf of `module`.
    fn claim(&self, name: &str, module: &ModuleId) -> Result<(), ClaimError>;

    /// Release a claim previously taken by `module`.
    fn release(&self, name: &str, module: &ModuleId);

    /// Register a partition as an externally visible device.
    fn register(&self, part: &Arc<Part>) -> Result<(), RegisterError>;

    /// Request asynchronous removal of a registered device. The registry
    /// drives the partition's destruct protocol; completion is signalled back
    /// through [`destruct_done`](Self::destruct_done).
    fn unregister(&self, name: &str);

    /// Register `part` as an I/O-channel-capable device.
    fn register_io_device(&self, part: &Arc<Part>);

    /// Deregister the io-device for `name`. `on_done` runs once no channels
    /// remain; the partition layer uses it to drive the detach step.
    fn unregister_io_device(&self, name: &str, on_done: Task);

    /// Signal that an asynchronous destruct has finished.
    fn destruct_done(&self, name: &str, status: IoStatus);
}

/// Thread identity and cross-thread task dispatch.
///
/// The only consumer in this crate is the base close path, which must run on
/// the thread that opened the descriptor. Implementations must guarantee that
/// a task sent to a thread cannot be observed before work previously queued to
/// that thread completes.
pub trait MessageRuntime: Send + Sync {
    fn current_thread(&self) -> ThreadId;

    /// Fire-and-forget handoff of `task` to `thread`.
    fn send_to(&self, thread: ThreadId, task: Task);
}
