// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Backend-owned producer thread with bounded shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use ota_state_manager::AgentStateManager;

use super::{PersonalityError, PersonalityResult};

/// Granularity of shutdown polling and of interruptible sleeps
const POLL_SLICE: Duration = Duration::from_millis(100);
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// A named producer thread and its run flag
pub struct ProducerThread {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProducerThread {
    /// Spawn `body`, which must return promptly once its flag goes false
    pub fn spawn<F>(name: &str, body: F) -> PersonalityResult<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))
            .map_err(|source| PersonalityError::ThreadSpawn {
                name: name.to_string(),
                source,
            })?;

        info!("[PRODUCER] {} started", name);
        Ok(Self {
            name: name.to_string(),
            running,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Clear the run flag and wait up to `timeout` for the thread to exit
    pub fn stop(&mut self, timeout: Duration) -> PersonalityResult<()> {
        self.running.store(false, Ordering::Release);
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };

        // JoinHandle has no timed join, so a helper thread joins and reports back
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("{}-join", self.name))
            .spawn(move || {
                let _ = tx.send(handle.join());
            })
            .map_err(|source| PersonalityError::ThreadSpawn {
                name: format!("{}-join", self.name),
                source,
            })?;

        let start = Instant::now();
        loop {
            match rx.recv_timeout(POLL_SLICE) {
                Ok(Ok(())) => {
                    info!("[PRODUCER] {} stopped cleanly", self.name);
                    return Ok(());
                }
                Ok(Err(_)) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    warn!("[PRODUCER] {} panicked during shutdown", self.name);
                    return Err(PersonalityError::ThreadPanicked(self.name.clone()));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        warn!(
                            "[PRODUCER] {} did not stop within {:?}",
                            self.name, waited
                        );
                        return Err(PersonalityError::StillRunning {
                            name: self.name.clone(),
                            waited,
                        });
                    }
                }
            }
        }
    }
}

impl Drop for ProducerThread {
    fn drop(&mut self) {
        // Detach; the body sees the flag and exits on its own
        self.running.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for ProducerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerThread")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Sleep for `duration` unless stopped or aborted first; true if still running
pub(crate) fn pause(running: &AtomicBool, agent: &AgentStateManager, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if !running.load(Ordering::Acquire) || agent.is_aborting() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
