// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Partition construction, per-thread channels, and the asynchronous
//! destruction protocol.
//!
//! # Destruction state machine
//!
//! ```text
//!                destroy()                 io-device teardown done
//!  Registered ──────────────► Deregistering ──────────────────────► Detached
//!                                                                      │
//!                                               destruct_done ◄────────┘
//! ```
//!
//! [`Part::destroy`] never completes inline: it deregisters the io-device with
//! the framework and returns [`DestructOutcome::Pending`]. The framework's
//! completion callback then detaches the partition from its base (list removal
//! and reference-count decrement under one lock), frees the base if this was
//! the last reference, and signals `destruct_done` back to the framework.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use derive_builder::Builder;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::base::PartBase;
use crate::device::{DeviceInfo, IoKind};
use crate::error::{ChannelError, ConstructError};
use crate::framework::BaseChannel;
use crate::ident::derive_partition_uuid;
use crate::io::IoStatus;

/// Optional construction parameters. New options get new defaulted fields;
/// callers go through the generated [`PartConstructOptsBuilder`].
#[derive(Debug, Clone, Default, Builder)]
#[builder(default, setter(strip_option))]
pub struct PartConstructOpts {
    /// Explicit partition identifier. Derived deterministically from the base
    /// UUID and block range when unset.
    pub uuid: Option<Uuid>,
}

impl PartConstructOpts {
    pub fn builder() -> PartConstructOptsBuilder {
        PartConstructOptsBuilder::default()
    }
}

/// Where a partition stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestructState {
    /// Visible to the framework, accepting I/O.
    Registered,
    /// `destroy` has been requested; io-device teardown in flight.
    Deregistering,
    /// Detached from the base; destruct completion has been signalled.
    Detached,
}

/// Result of [`Part::destroy`]: destruction is always asynchronous and the
/// caller must wait for the framework's destruct-completion signal.
#[must_use = "destruction completes asynchronously; wait for destruct_done"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestructOutcome {
    Pending,
}

/// One virtual child device exposing a contiguous block range of its base.
pub struct Part {
    info: DeviceInfo,
    /// Offset of this partition within the base's address space, in blocks.
    offset_blocks: u64,
    base: Arc<PartBase>,
    state: Mutex<DestructState>,
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("name", &self.info.name)
            .field("offset_blocks", &self.offset_blocks)
            .field("num_blocks", &self.info.block_count)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Part {
    /// Construct a partition over `base` covering
    /// `offset_blocks..offset_blocks + num_blocks` and register it with the
    /// framework as an independent, channel-capable device.
    ///
    /// On any failure after the base reference has been taken, the reference
    /// and any claim taken with it are unwound before returning.
    pub fn construct(
        base: &Arc<PartBase>,
        name: &str,
        offset_blocks: u64,
        num_blocks: u64,
        product_name: &str,
        opts: Option<PartConstructOpts>,
    ) -> Result<Arc<Part>, ConstructError> {
        let base_info = base.device().info().clone();

        // Reject ranges falling outside the base rather than trusting the
        // caller to have validated them.
        let end = offset_blocks.checked_add(num_blocks);
        if end.is_none() || end.unwrap() > base_info.block_count {
            return Err(ConstructError::RangeOutOfBounds {
                offset_blocks,
                num_blocks,
                base_blocks: base_info.block_count,
            });
        }

        let uuid = opts
            .and_then(|o| o.uuid)
            .unwrap_or_else(|| derive_partition_uuid(&base_info.uuid, offset_blocks, num_blocks));

        let info = DeviceInfo::derive_partition(&base_info, name, product_name, uuid, num_blocks);
        let part = Arc::new(Part {
            info,
            offset_blocks,
            base: base.clone(),
            state: Mutex::new(DestructState::Registered),
        });

        let first_claim = base.attach()?;

        let registry = base.registry().clone();
        registry.register_io_device(&part);
        if let Err(err) = registry.register(&part) {
            tracing::error!(part = %part.info.name, %err, "could not register partition");
            registry.unregister_io_device(part.name(), Box::new(|| {}));
            base.unwind_attach(first_claim);
            return Err(err.into());
        }

        base.insert(&part);
        Ok(part)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn uuid(&self) -> Uuid {
        self.info.uuid
    }

    pub fn block_count(&self) -> u64 {
        self.info.block_count
    }

    pub fn offset_blocks(&self) -> u64 {
        self.offset_blocks
    }

    pub fn base(&self) -> &Arc<PartBase> {
        &self.base
    }

    pub fn state(&self) -> DestructState {
        *self.state.lock()
    }

    /// Capability query. Partitions never report raw passthrough kinds --
    /// the forwarder cannot decode or offset-shift those commands -- and
    /// delegate everything else to the base device.
    pub fn io_type_supported(&self, kind: IoKind) -> bool {
        if kind.is_passthrough() {
            return false;
        }
        self.base.device().io_type_supported(kind)
    }

    /// Begin asynchronous destruction. See the module docs for the protocol.
    pub fn destroy(self: &Arc<Self>) -> DestructOutcome {
        {
            let mut state = self.state.lock();
            debug_assert_eq!(
                *state,
                DestructState::Registered,
                "destroy on a partition already being torn down"
            );
            *state = DestructState::Deregistering;
        }

        let part = self.clone();
        self.base
            .registry()
            .unregister_io_device(self.name(), Box::new(move || part.detach()));
        DestructOutcome::Pending
    }

    /// Framework-driven completion of the destruct protocol.
    fn detach(self: Arc<Self>) {
        self.base.detach(&self);
        *self.state.lock() = DestructState::Detached;
        self.base
            .registry()
            .destruct_done(self.name(), IoStatus::Success);
    }
}

/// Per-thread I/O path for one partition: the partition handle plus an opened
/// channel into the base device.
pub struct PartChannel {
    part: Arc<Part>,
    base_ch: Box<dyn BaseChannel>,
    /// Consumer per-channel state, owned by the create/destroy hooks.
    ctx: Option<Box<dyn Any + Send>>,
    /// Set once the create hook has succeeded; the destroy hook only runs for
    /// fully created channels.
    created: bool,
}

impl PartChannel {
    /// Channel-create trampoline: opens a channel into the base device for
    /// the calling thread, then runs the consumer's create hook if one was
    /// supplied at base open time.
    pub fn create(part: &Arc<Part>) -> Result<PartChannel, ChannelError> {
        let base_ch = part
            .base()
            .device()
            .create_channel()
            .ok_or(ChannelError::BaseChannel)?;

        let mut ch = PartChannel {
            part: part.clone(),
            base_ch,
            ctx: None,
            created: false,
        };

        if let Some(hook) = part.base().ch_create_hook().cloned() {
            hook(&mut ch)?;
        }
        ch.created = true;
        Ok(ch)
    }

    pub fn part(&self) -> &Arc<Part> {
        &self.part
    }

    pub(crate) fn base_channel_mut(&mut self) -> &mut dyn BaseChannel {
        self.base_ch.as_mut()
    }

    pub fn set_ctx(&mut self, ctx: impl Any + Send) {
        self.ctx = Some(Box::new(ctx));
    }

    pub fn ctx(&self) -> Option<&(dyn Any + Send)> {
        self.ctx.as_deref()
    }

    pub fn ctx_mut(&mut self) -> Option<&mut (dyn Any + Send)> {
        self.ctx.as_deref_mut()
    }
}

impl Drop for PartChannel {
    /// Channel-destroy trampoline: the consumer hook runs before the base
    /// channel is released. A channel whose create hook failed is dropped
    /// without it; the consumer has no state to tear down.
    fn drop(&mut self) {
        if !self.created {
            return;
        }
        if let Some(hook) = self.part.base().ch_destroy_hook().cloned() {
            hook(self);
        }
    }
}
