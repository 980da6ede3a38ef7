// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared base-device lifecycle.
//!
//! A [`PartBase`] owns exactly one open handle to the underlying device and
//! multiplexes every partition carved out of it. Partitions take a reference
//! on construction and release it when their asynchronous destruction
//! completes; the underlying handle is closed exactly once, after the last
//! reference is gone, and always on the thread that opened it.
//!
//! Reference count, claim flag, and the partition list are guarded by a single
//! mutex so that list removal and count decrement are atomic -- a torn update
//! could free the base while [`hot_remove`](PartBase::hot_remove) is still
//! enumerating partitions.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::error::{BaseError, ChannelError, ClaimError};
use crate::framework::{BaseDescriptor, BaseDevice, DeviceRegistry, MessageRuntime, ModuleId};
use crate::part::{Part, PartChannel};

/// One-shot callback run after the base's handle has been closed.
pub type FreeCallback = Box<dyn FnOnce() + Send>;

/// Consumer hook run when the framework reports the underlying device removed.
pub type RemoveHook = Arc<dyn Fn(&Arc<PartBase>) + Send + Sync>;

/// Consumer hook run after a partition channel has opened its base channel.
pub type ChannelCreateHook =
    Arc<dyn Fn(&mut PartChannel) -> Result<(), ChannelError> + Send + Sync>;

/// Consumer hook run before a partition channel releases its base channel.
pub type ChannelDestroyHook = Arc<dyn Fn(&mut PartChannel) + Send + Sync>;

#[derive(Default)]
struct BaseShared {
    ref_count: u32,
    claimed: bool,
    parts: Vec<Weak<Part>>,
}

/// Reference-counted open handle to an underlying device, shared by all
/// partitions built on top of it.
pub struct PartBase {
    name: String,
    module: ModuleId,
    registry: Arc<dyn DeviceRegistry>,
    runtime: Arc<dyn MessageRuntime>,
    /// Thread the descriptor was opened on; the close must run here.
    thread: ThreadId,
    device: Arc<dyn BaseDevice>,
    descriptor: Mutex<Option<BaseDescriptor>>,
    ctx: Option<Box<dyn Any + Send + Sync>>,
    ch_create: Option<ChannelCreateHook>,
    ch_destroy: Option<ChannelDestroyHook>,
    remove_hook: Option<RemoveHook>,
    free_fn: Mutex<Option<FreeCallback>>,
    shared: Mutex<BaseShared>,
}

impl fmt::Debug for PartBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("PartBase")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("ref_count", &shared.ref_count)
            .field("claimed", &shared.claimed)
            .finish()
    }
}

impl PartBase {
    pub fn builder() -> PartBaseBuilder {
        PartBaseBuilder::default()
    }

    /// Name of the underlying device.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    /// The underlying device the base handle refers to.
    pub fn device(&self) -> &Arc<dyn BaseDevice> {
        &self.device
    }

    /// Consumer context attached at open time.
    pub fn ctx(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.ctx.as_deref()
    }

    /// Live partitions currently referencing this base.
    pub fn parts(&self) -> Vec<Arc<Part>> {
        self.shared
            .lock()
            .parts
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn ref_count(&self) -> u32 {
        self.shared.lock().ref_count
    }

    pub fn is_claimed(&self) -> bool {
        self.shared.lock().claimed
    }

    pub(crate) fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    pub(crate) fn ch_create_hook(&self) -> Option<&ChannelCreateHook> {
        self.ch_create.as_ref()
    }

    pub(crate) fn ch_destroy_hook(&self) -> Option<&ChannelDestroyHook> {
        self.ch_destroy.as_ref()
    }

    /// Take a reference for a new partition, claiming the underlying device
    /// on behalf of the owning module if this is the first one. Returns
    /// whether the claim was taken by this call; a claim failure leaves the
    /// reference count untouched.
    pub(crate) fn attach(&self) -> Result<bool, ClaimError> {
        let mut shared = self.shared.lock();
        shared.ref_count += 1;

        if shared.claimed {
            return Ok(false);
        }

        if let Err(err) = self.registry.claim(&self.name, &self.module) {
            tracing::error!(device = %self.name, %err, "could not claim base device");
            shared.ref_count -= 1;
            return Err(err);
        }
        shared.claimed = true;
        Ok(true)
    }

    /// Undo a successful [`attach`](Self::attach) after a later construction
    /// step failed.
    pub(crate) fn unwind_attach(&self, first_claim: bool) {
        let mut shared = self.shared.lock();
        shared.ref_count -= 1;
        if first_claim {
            shared.claimed = false;
            self.registry.release(&self.name, &self.module);
        }
    }

    /// Record a fully constructed partition in the partition list.
    pub(crate) fn insert(&self, part: &Arc<Part>) {
        self.shared.lock().parts.push(Arc::downgrade(part));
    }

    /// Release one partition's reference: list removal and count decrement
    /// happen under a single lock acquisition. Releases the device claim and
    /// frees the base when the count reaches zero.
    pub(crate) fn detach(self: &Arc<Self>, part: &Part) {
        let last = {
            let mut shared = self.shared.lock();
            shared
                .parts
                .retain(|w| !std::ptr::eq(w.as_ptr(), part as *const Part));
            shared.ref_count -= 1;
            if shared.ref_count == 0 {
                shared.claimed = false;
                true
            } else {
                false
            }
        };

        if last {
            self.registry.release(&self.name, &self.module);
            self.free();
        }
    }

    /// Close the underlying handle and run the free callback.
    ///
    /// Must only be invoked once the reference count has reached zero. When
    /// called off the affinity thread, the close (and the callback after it)
    /// is dispatched as a fire-and-forget message to that thread so it cannot
    /// race channel operations still in flight there.
    pub fn free(self: &Arc<Self>) {
        debug_assert_eq!(
            self.shared.lock().ref_count,
            0,
            "freeing a base that partitions still reference"
        );

        let descriptor = self.descriptor.lock().take();
        let free_fn = self.free_fn.lock().take();

        match descriptor {
            Some(descriptor) if self.runtime.current_thread() != self.thread => {
                // Close the underlying device on the same thread it was
                // opened on.
                self.runtime.send_to(
                    self.thread,
                    Box::new(move || {
                        descriptor.close();
                        if let Some(f) = free_fn {
                            f();
                        }
                    }),
                );
            }
            descriptor => {
                if let Some(descriptor) = descriptor {
                    descriptor.close();
                }
                if let Some(f) = free_fn {
                    f();
                }
            }
        }
    }

    /// Request asynchronous removal of every partition referencing this base.
    /// Each removal runs the full per-partition destruct protocol; the base
    /// itself is freed when the last partition releases it.
    pub fn hot_remove(self: &Arc<Self>) {
        for part in self.parts() {
            self.registry.unregister(part.name());
        }
    }
}

/// Builder for [`PartBase::open`]-style construction.
///
/// Required: device name, module, registry, runtime. Everything else is
/// optional consumer configuration.
#[derive(Default)]
pub struct PartBaseBuilder {
    device_name: Option<String>,
    module: Option<ModuleId>,
    registry: Option<Arc<dyn DeviceRegistry>>,
    runtime: Option<Arc<dyn MessageRuntime>>,
    ctx: Option<Box<dyn Any + Send + Sync>>,
    ch_create: Option<ChannelCreateHook>,
    ch_destroy: Option<ChannelDestroyHook>,
    remove_hook: Option<RemoveHook>,
    free_fn: Option<FreeCallback>,
}

impl PartBaseBuilder {
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn module(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn MessageRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Opaque consumer context retrievable through [`PartBase::ctx`].
    pub fn ctx(mut self, ctx: impl Any + Send + Sync) -> Self {
        self.ctx = Some(Box::new(ctx));
        self
    }

    /// Hooks run when a partition channel is created/destroyed, after the
    /// base channel is opened and before it is released respectively.
    pub fn channel_hooks(mut self, create: ChannelCreateHook, destroy: ChannelDestroyHook) -> Self {
        self.ch_create = Some(create);
        self.ch_destroy = Some(destroy);
        self
    }

    pub fn remove_hook(mut self, hook: RemoveHook) -> Self {
        self.remove_hook = Some(hook);
        self
    }

    /// Callback run once, after the base's handle has been closed.
    pub fn free_fn(mut self, f: FreeCallback) -> Self {
        self.free_fn = Some(f);
        self
    }

    /// Open the named underlying device and build the shared base. The
    /// calling thread becomes the handle's affinity thread.
    pub fn open(self) -> Result<Arc<PartBase>, BaseError> {
        let name = self.device_name.ok_or(BaseError::Config("device name missing"))?;
        let module = self.module.ok_or(BaseError::Config("module missing"))?;
        let registry = self.registry.ok_or(BaseError::Config("registry missing"))?;
        let runtime = self.runtime.ok_or(BaseError::Config("runtime missing"))?;

        // The remove callback outlives this function but the base does not
        // exist yet; give it a slot filled in after construction.
        let slot: Arc<OnceLock<Weak<PartBase>>> = Arc::new(OnceLock::new());
        let remove_cb = {
            let slot = slot.clone();
            Arc::new(move || {
                if let Some(base) = slot.get().and_then(Weak::upgrade)
                    && let Some(hook) = &base.remove_hook
                {
                    hook(&base);
                }
            })
        };

        let descriptor = registry.open(&name, remove_cb).inspect_err(|err| {
            if !matches!(err, BaseError::NotFound(_)) {
                tracing::error!(device = %name, %err, "could not open base device");
            }
        })?;
        let device = descriptor.device().clone();

        let base = Arc::new(PartBase {
            name,
            module,
            thread: runtime.current_thread(),
            registry,
            runtime,
            device,
            descriptor: Mutex::new(Some(descriptor)),
            ctx: self.ctx,
            ch_create: self.ch_create,
            ch_destroy: self.ch_destroy,
            remove_hook: self.remove_hook,
            free_fn: Mutex::new(self.free_fn),
            shared: Mutex::new(BaseShared::default()),
        });
        let _ = slot.set(Arc::downgrade(&base));
        Ok(base)
    }
}
