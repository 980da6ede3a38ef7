// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory device registry driving the destruct protocol inline.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::error::{BaseError, ClaimError, RegisterError};
use crate::framework::{
    BaseDescriptor, BaseDevice, DeviceRegistry, ModuleId, RemoveCallback, Task,
};
use crate::io::IoStatus;
use crate::part::Part;
use crate::testing::StubDevice;

#[derive(Default)]
struct RegState {
    devices: HashMap<String, Arc<StubDevice>>,
    opens: HashMap<String, u32>,
    closes: HashMap<String, Arc<AtomicU32>>,
    remove_cbs: HashMap<String, Vec<RemoveCallback>>,
    claims: HashMap<String, ModuleId>,
    parts: HashMap<String, Arc<Part>>,
    io_devices: HashMap<String, ()>,
    destructed: Vec<(String, IoStatus)>,
    fail_open: Vec<String>,
}

/// Test double for the block-device framework's registry.
///
/// Callbacks (`on_done`, remove hooks, destruct completion) always run with
/// the internal lock released, matching the framework contract that registry
/// reentrancy from a callback is legal.
#[derive(Default)]
pub struct TestRegistry {
    state: Mutex<RegState>,
}

impl TestRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_device(&self, device: Arc<StubDevice>) {
        let name = device.info().name.clone();
        let mut state = self.state.lock();
        state.closes.entry(name.clone()).or_default();
        state.devices.insert(name, device);
    }

    /// Force `open(name)` to fail with `OpenFailed` instead of `NotFound`.
    pub fn fail_open(&self, name: &str) {
        self.state.lock().fail_open.push(name.to_owned());
    }

    pub fn open_count(&self, name: &str) -> u32 {
        self.state.lock().opens.get(name).copied().unwrap_or(0)
    }

    pub fn close_count(&self, name: &str) -> u32 {
        self.state
            .lock()
            .closes
            .get(name)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state.lock().parts.contains_key(name)
    }

    pub fn registered_part(&self, name: &str) -> Option<Arc<Part>> {
        self.state.lock().parts.get(name).cloned()
    }

    pub fn claim_owner(&self, name: &str) -> Option<ModuleId> {
        self.state.lock().claims.get(name).cloned()
    }

    /// Claim `name` directly, bypassing the partition layer. Used to simulate
    /// another module already owning the device.
    pub fn claim_directly(&self, name: &str, module: ModuleId) {
        self.state.lock().claims.insert(name.to_owned(), module);
    }

    /// Names whose destruct protocol has completed, in completion order.
    pub fn destructed(&self) -> Vec<String> {
        self.state
            .lock()
            .destructed
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Simulate the framework reporting `name` removed (e.g. hot-unplug),
    /// firing every remove callback registered by open handles.
    pub fn trigger_remove(&self, name: &str) {
        let cbs = {
            let state = self.state.lock();
            state.remove_cbs.get(name).cloned().unwrap_or_default()
        };
        for cb in cbs {
            cb();
        }
    }
}

impl DeviceRegistry for TestRegistry {
    fn open(&self, name: &str, remove_cb: RemoveCallback) -> Result<BaseDescriptor, BaseError> {
        let mut state = self.state.lock();
        if state.fail_open.iter().any(|n| n == name) {
            return Err(BaseError::OpenFailed {
                name: name.to_owned(),
                reason: "forced open failure".into(),
            });
        }
        let device = state
            .devices
            .get(name)
            .cloned()
            .ok_or_else(|| BaseError::NotFound(name.to_owned()))?;

        *state.opens.entry(name.to_owned()).or_insert(0) += 1;
        state
            .remove_cbs
            .entry(name.to_owned())
            .or_default()
            .push(remove_cb);
        let closes = state.closes.entry(name.to_owned()).or_default().clone();

        Ok(BaseDescriptor::new(
            device,
            Box::new(move || {
                closes.fetch_add(1, Ordering::SeqCst);
            }),
        ))
    }

    fn claim(&self, name: &str, module: &ModuleId) -> Result<(), ClaimError> {
        let mut state = self.state.lock();
        if let Some(owner) = state.claims.get(name) {
            if owner != module {
                return Err(ClaimError {
                    device: name.to_owned(),
                    owner: owner.0.to_owned(),
                });
            }
            return Ok(());
        }
        state.claims.insert(name.to_owned(), module.clone());
        Ok(())
    }

    fn release(&self, name: &str, module: &ModuleId) {
        let mut state = self.state.lock();
        match state.claims.get(name) {
            Some(owner) if owner == module => {
                state.claims.remove(name);
            }
            _ => tracing::warn!(device = name, "release without a matching claim"),
        }
    }

    fn register(&self, part: &Arc<Part>) -> Result<(), RegisterError> {
        let mut state = self.state.lock();
        let name = part.name().to_owned();
        if state.parts.contains_key(&name) {
            return Err(RegisterError::NameCollision(name));
        }
        state.parts.insert(name, part.clone());
        Ok(())
    }

    fn unregister(&self, name: &str) {
        let part = self.state.lock().parts.remove(name);
        if let Some(part) = part {
            let _ = part.destroy();
        } else {
            tracing::warn!(device = name, "unregister of unknown device");
        }
    }

    fn register_io_device(&self, part: &Arc<Part>) {
        self.state
            .lock()
            .io_devices
            .insert(part.name().to_owned(), ());
    }

    fn unregister_io_device(&self, name: &str, on_done: Task) {
        self.state.lock().io_devices.remove(name);
        // No channel draining to wait for in the double; teardown completes
        // immediately.
        on_done();
    }

    fn destruct_done(&self, name: &str, status: IoStatus) {
        self.state
            .lock()
            .destructed
            .push((name.to_owned(), status));
    }
}
