// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Message-runtime doubles.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::framework::{MessageRuntime, Task};

/// A real `ThreadId` distinct from the calling thread's.
pub fn foreign_thread_id() -> ThreadId {
    std::thread::spawn(|| std::thread::current().id())
        .join()
        .expect("spawn probe thread")
}

/// Runs every dispatched task immediately on the calling thread. Suitable for
/// tests where everything lives on one thread anyway.
#[derive(Default)]
pub struct InlineRuntime;

impl InlineRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl MessageRuntime for InlineRuntime {
    fn current_thread(&self) -> ThreadId {
        std::thread::current().id()
    }

    fn send_to(&self, _thread: ThreadId, task: Task) {
        task();
    }
}

/// Queues dispatched tasks until [`pump`](PumpRuntime::pump) runs them, and
/// can masquerade as a different thread so tests can exercise the off-affinity
/// close path without real threads.
#[derive(Default)]
pub struct PumpRuntime {
    masquerade: Mutex<Option<ThreadId>>,
    queue: Mutex<VecDeque<Task>>,
}

impl PumpRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report `thread` from `current_thread` until cleared.
    pub fn masquerade_as(&self, thread: ThreadId) {
        *self.masquerade.lock() = Some(thread);
    }

    pub fn clear_masquerade(&self) {
        *self.masquerade.lock() = None;
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued tasks in dispatch order; returns how many ran.
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(task) = self.queue.lock().pop_front() else {
                return ran;
            };
            task();
            ran += 1;
        }
    }
}

impl MessageRuntime for PumpRuntime {
    fn current_thread(&self) -> ThreadId {
        self.masquerade
            .lock()
            .unwrap_or_else(|| std::thread::current().id())
    }

    fn send_to(&self, _thread: ThreadId, task: Task) {
        self.queue.lock().push_back(task);
    }
}
