//! The concurrency gate: a global parallelism semaphore coupled with keyed
//! mutual exclusion.
//!
//! Every execution attempt takes a slot under the global cap first; exclusive
//! jobs then try-lock their concurrency key. A busy key turns the attempt
//! into a recorded skip instead of queueing behind the holder.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use crate::catalog::Job;

/// What a dispatch attempt got from the gate.
pub enum Acquisition {
    /// Both the global slot and (for exclusive jobs) the key are held.
    /// Dropping the permits releases everything.
    Acquired(Permits),
    /// The job's concurrency key is busy. Nothing is held; the caller records
    /// the attempt as a skip and spawns no process.
    Conflict,
}

/// Held resources for one execution. Releases on drop, on every exit path.
pub struct Permits {
    _permit: OwnedSemaphorePermit,
    _key: Option<OwnedMutexGuard<()>>,
}

pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max_parallelism: usize,
    keys: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConcurrencyGate {
    pub fn new(max_parallelism: usize) -> Self {
        let max = max_parallelism.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max_parallelism: max,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for a slot under the global cap, then — when `allow_parallel` is
    /// false — try-lock the job's key. The key check is non-blocking: a busy
    /// key releases the global slot immediately and reports a conflict.
    pub async fn acquire(&self, job: &Job) -> Acquisition {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore closed");

        if job.allow_parallel {
            return Acquisition::Acquired(Permits {
                _permit: permit,
                _key: None,
            });
        }

        match self.key_lock(&job.concurrency_key).try_lock_owned() {
            Ok(guard) => Acquisition::Acquired(Permits {
                _permit: permit,
                _key: Some(guard),
            }),
            Err(_) => {
                drop(permit);
                Acquisition::Conflict
            }
        }
    }

    /// Key mutexes are created on first use and shared by every job carrying
    /// the same key.
    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut keys = self.keys.lock().expect("gate key map poisoned");
        keys.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Free slots under the global cap; equals
    /// [`max_parallelism`](Self::max_parallelism) when nothing is running.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }
}
