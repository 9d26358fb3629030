// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Abort fan-out to blocked waiters
//!
//! A waiter that may block for a long time (a timed wait on a section
//! signal, a producer thread sleeping between packets) registers a weak
//! handle here. Raising abort walks the list and wakes every live entry so
//! no one sleeps out their full budget after the agent has been told to stop.

use std::sync::Weak;

use parking_lot::Mutex;

/// Something that can be woken early when abort is raised
pub trait AbortWaker: Send + Sync {
    fn wake_for_abort(&self);
}

/// Registry of weakly-held abort wakers
#[derive(Default)]
pub struct WakerRegistry {
    wakers: Mutex<Vec<Weak<dyn AbortWaker>>>,
}

impl WakerRegistry {
    pub fn new() -> Self {
        Self {
            wakers: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, waker: Weak<dyn AbortWaker>) {
        let mut wakers = self.wakers.lock();
        wakers.retain(|w| w.strong_count() > 0);
        wakers.push(waker);
    }

    /// Wake every live waker, dropping dead entries. Returns how many were woken.
    pub fn wake_all(&self) -> usize {
        // Collect under the lock, wake outside it
        let live: Vec<_> = {
            let mut wakers = self.wakers.lock();
            wakers.retain(|w| w.strong_count() > 0);
            wakers.iter().filter_map(Weak::upgrade).collect()
        };
        for waker in &live {
            waker.wake_for_abort();
        }
        live.len()
    }

    pub fn len(&self) -> usize {
        self.wakers
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
