//! In-memory registry of live judge executions.
//!
//! Membership is what separates a genuinely running job from an orphan:
//! the reaper only reads it, and each entry is written and removed solely
//! by the worker that owns the execution. Removal happens in
//! [`RegistrationGuard::drop`], so it runs on every exit path including
//! panics and task cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use triage_core::types::ThreadId;

/// Control signal delivered to a live execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to exit (SIGTERM).
    Terminate,
    /// Force the process down (SIGKILL).
    Kill,
}

/// Shared handle to a registered execution, used to signal it and to
/// observe when its owner has finished with it.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    signals: mpsc::UnboundedSender<Signal>,
    exited: CancellationToken,
}

/// Receiving end of a [`ProcessHandle`], owned by the execution itself.
#[derive(Debug)]
pub struct ProcessControl {
    signals: mpsc::UnboundedReceiver<Signal>,
}

impl ProcessHandle {
    /// Create a connected handle/control pair for an execution.
    pub fn new(pid: Option<u32>) -> (Self, ProcessControl) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            pid,
            signals: tx,
            exited: CancellationToken::new(),
        };
        (handle, ProcessControl { signals: rx })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Send a signal. Returns `false` if the execution already stopped
    /// listening.
    pub fn signal(&self, signal: Signal) -> bool {
        self.signals.send(signal).is_ok()
    }

    /// Wait up to `timeout` for the owner to unregister the execution.
    /// Returns `true` if it did.
    pub async fn wait_exit(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.exited.cancelled())
            .await
            .is_ok()
    }
}

impl ProcessControl {
    /// Next signal, or `None` once every handle is gone.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.signals.recv().await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    generation: u64,
    handle: ProcessHandle,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ThreadId, Entry>,
    next_generation: u64,
}

/// Map from thread id to its live execution.
///
/// The mutex only makes concurrent map access safe; ownership of each key
/// belongs to a single worker, so no lock is ever held across an await.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<Inner>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handle` under `thread_id` until the returned guard drops.
    pub fn register(self: &Arc<Self>, thread_id: &str, handle: ProcessHandle) -> RegistrationGuard {
        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let previous = inner
            .entries
            .insert(thread_id.to_string(), Entry { generation, handle });
        if previous.is_some() {
            tracing::warn!(thread_id, "Replaced an existing process registration");
        }

        RegistrationGuard {
            registry: Arc::clone(self),
            thread_id: thread_id.to_string(),
            generation,
        }
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.lock().entries.contains_key(thread_id)
    }

    pub fn get(&self, thread_id: &str) -> Option<ProcessHandle> {
        self.lock().entries.get(thread_id).map(|e| e.handle.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, thread_id: &str, generation: u64) {
        let removed = {
            let mut inner = self.lock();
            match inner.entries.get(thread_id) {
                Some(entry) if entry.generation == generation => inner.entries.remove(thread_id),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            entry.handle.exited.cancel();
        }
    }
}

/// Keeps a registration alive; dropping it unregisters the execution and
/// wakes anyone blocked in [`ProcessHandle::wait_exit`].
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<ProcessRegistry>,
    thread_id: ThreadId,
    generation: u64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.release(&self.thread_id, self.generation);
    }
}
