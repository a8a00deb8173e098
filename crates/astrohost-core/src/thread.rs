//! Named worker threads.
//!
//! Every unit of work runs on its own OS thread, registered under a
//! caller-chosen name until it is joined:
//!
//! ```text
//!  add_thread ──► Running ──(work returns or panics)──► Completed ──(join)──► reclaimed
//! ```
//!
//! One mutex guards the whole registry and a condition variable is signalled
//! on each completion, waking `join_*` and `sleep_thread_by_name` waiters.
//! There is no cancellation: a running unit of work can only be waited for.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::defaults;
use crate::error::{Error, Result};

/// Lifecycle state of a named thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadState {
    Running,
    Completed,
}

/// Point-in-time view of a tracked thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub name: String,
    pub state: ThreadState,
    pub started_at: DateTime<Utc>,
}

struct TrackedThread {
    handle: Option<JoinHandle<()>>,
    state: ThreadState,
    started_at: DateTime<Utc>,
}

struct Shared {
    registry: Mutex<HashMap<String, TrackedThread>>,
    completed: Condvar,
}

/// Registry of named worker threads.
///
/// At most `max_threads` threads may be Running at once; a submission beyond
/// that is rejected with [`Error::CapacityExceeded`] rather than queued, so
/// submitting never blocks the caller.
pub struct ThreadManager {
    shared: Arc<Shared>,
    max_threads: usize,
}

impl ThreadManager {
    /// Create a manager with the default bound.
    pub fn new() -> Self {
        Self::with_max_threads(defaults::MAX_THREADS)
    }

    /// Create a manager allowing `max_threads` concurrently running threads.
    pub fn with_max_threads(max_threads: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(HashMap::new()),
                completed: Condvar::new(),
            }),
            max_threads: max_threads.max(1),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Spawn `work` on a new OS thread tracked under `name`.
    ///
    /// Fails with [`Error::DuplicateName`] while a thread of that name is
    /// still Running. A Completed thread that was never joined is reclaimed
    /// here, so its name can be reused.
    pub fn add_thread<F>(&self, name: impl Into<String>, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::argument("thread name must not be empty"));
        }

        let mut registry = self.shared.registry.lock();

        let stale = match registry.get(&name).map(|t| t.state) {
            Some(ThreadState::Running) => {
                warn!(thread = %name, "Thread name already in use");
                return Err(Error::duplicate(format!("thread '{}'", name)));
            }
            Some(ThreadState::Completed) => registry.remove(&name),
            None => None,
        };

        let running = registry
            .values()
            .filter(|t| t.state == ThreadState::Running)
            .count();
        if running >= self.max_threads {
            warn!(thread = %name, running, limit = self.max_threads, "Thread capacity exceeded");
            drop(registry);
            reclaim(&name, stale);
            return Err(Error::CapacityExceeded {
                limit: self.max_threads,
            });
        }

        let shared = Arc::clone(&self.shared);
        let thread_name = name.clone();
        // The registry lock is held across spawn, so the completion guard
        // cannot run before the record below is inserted.
        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _completion = scopeguard::guard((), move |_| {
                    let mut registry = shared.registry.lock();
                    if let Some(tracked) = registry.get_mut(&thread_name) {
                        tracked.state = ThreadState::Completed;
                    }
                    shared.completed.notify_all();
                });
                work();
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                drop(registry);
                reclaim(&name, stale);
                return Err(Error::internal(format!(
                    "failed to spawn thread '{}': {}",
                    name, e
                )));
            }
        };

        registry.insert(
            name.clone(),
            TrackedThread {
                handle: Some(handle),
                state: ThreadState::Running,
                started_at: Utc::now(),
            },
        );
        drop(registry);

        reclaim(&name, stale);
        debug!(thread = %name, "Thread started");
        Ok(())
    }

    /// Block until every tracked thread has completed, then empty the registry.
    ///
    /// Meant for a single coordinator at shutdown.
    pub fn join_all_threads(&self) {
        let mut registry = self.shared.registry.lock();
        while registry
            .values()
            .any(|t| t.state == ThreadState::Running)
        {
            self.shared.completed.wait(&mut registry);
        }
        let finished: Vec<(String, TrackedThread)> = registry.drain().collect();
        drop(registry);

        let count = finished.len();
        for (name, tracked) in finished {
            reclaim(&name, Some(tracked));
        }
        if count > 0 {
            info!(count, "Joined all threads");
        }
    }

    /// Block until the thread called `name` completes, then reclaim it.
    ///
    /// Unknown names are logged and ignored.
    pub fn join_thread_by_name(&self, name: &str) {
        let mut registry = self.shared.registry.lock();
        if !registry.contains_key(name) {
            warn!(thread = %name, "Cannot join unknown thread");
            return;
        }
        loop {
            match registry.get(name).map(|t| t.state) {
                Some(ThreadState::Running) => self.shared.completed.wait(&mut registry),
                Some(ThreadState::Completed) => break,
                // Joined by another caller while we waited.
                None => return,
            }
        }
        let tracked = registry.remove(name);
        drop(registry);
        reclaim(name, tracked);
    }

    /// Wait at most `timeout` for the thread called `name` to complete.
    ///
    /// Only the caller waits; the named thread keeps running. Returns `true`
    /// when the thread completed within the bound, `false` on timeout or when
    /// the name is unknown. The thread is not reclaimed.
    pub fn sleep_thread_by_name(&self, name: &str, timeout: Duration) -> bool {
        // A bound past the clock's range waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut registry = self.shared.registry.lock();
        if !registry.contains_key(name) {
            warn!(thread = %name, "Cannot wait on unknown thread");
            return false;
        }
        loop {
            match registry.get(name).map(|t| t.state) {
                Some(ThreadState::Running) => {
                    let timed_out = match deadline {
                        Some(deadline) => self
                            .shared
                            .completed
                            .wait_until(&mut registry, deadline)
                            .timed_out(),
                        None => {
                            self.shared.completed.wait(&mut registry);
                            false
                        }
                    };
                    if timed_out {
                        return registry
                            .get(name)
                            .map_or(true, |t| t.state == ThreadState::Completed);
                    }
                }
                Some(ThreadState::Completed) | None => return true,
            }
        }
    }

    /// Whether a thread called `name` is tracked and still Running.
    pub fn is_thread_running(&self, name: &str) -> bool {
        self.shared
            .registry
            .lock()
            .get(name)
            .map_or(false, |t| t.state == ThreadState::Running)
    }

    /// Names of all tracked (not yet joined) threads, sorted.
    pub fn thread_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.registry.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of tracked threads.
    pub fn len(&self) -> usize {
        self.shared.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of threads currently Running.
    pub fn running_count(&self) -> usize {
        self.shared
            .registry
            .lock()
            .values()
            .filter(|t| t.state == ThreadState::Running)
            .count()
    }

    pub fn snapshot(&self) -> Vec<ThreadInfo> {
        let registry = self.shared.registry.lock();
        let mut infos: Vec<ThreadInfo> = registry
            .iter()
            .map(|(name, t)| ThreadInfo {
                name: name.clone(),
                state: t.state,
                started_at: t.started_at,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

impl Default for ThreadManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        self.join_all_threads();
    }
}

/// Join the OS thread of a completed record. Must be called without the lock.
fn reclaim(name: &str, tracked: Option<TrackedThread>) {
    if let Some(handle) = tracked.and_then(|t| t.handle) {
        if handle.join().is_err() {
            warn!(thread = %name, "Thread panicked before completing its work");
        }
    }
}
