//! # Request Deduplicator
//!
//! Collapses concurrent calls sharing a key into one underlying request.
//!
//! The in-flight table maps `key → (generation, shared future)`. The first
//! caller for a key spawns the producer as a task; later callers clone the
//! shared future and observe the same outcome. The task removes its own
//! entry when it settles (success or failure), so removal is tied to task
//! completion rather than to whichever waiter happens to poll last.

use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Result, TrekRouteError};
use crate::lock_unpoisoned;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Pending<T: Clone> {
    generation: u64,
    outcome: SharedOutcome<T>,
}

type PendingTable<T> = Arc<Mutex<HashMap<String, Pending<T>>>>;

/// Deduplicates in-flight requests by key.
///
/// Requires a tokio runtime: producers run as spawned tasks.
pub struct RequestDeduplicator<T: Clone> {
    pending: PendingTable<T>,
    next_generation: AtomicU64,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Run `producer` for `key` unless a call for the same key is in flight,
    /// in which case wait for that call's outcome instead.
    ///
    /// `producer` is invoked at most once per in-flight window. It must not
    /// call back into this deduplicator synchronously. An error resolves every
    /// concurrent waiter with the same error; after settlement the next call
    /// for `key` invokes its producer again.
    pub async fn execute<F, Fut>(&self, key: &str, producer: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let outcome = {
            let mut pending = lock_unpoisoned(&self.pending);
            match pending.get(key) {
                Some(existing) => {
                    debug!("[Dedup] Joining in-flight request {}", key);
                    existing.outcome.clone()
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let outcome = self.launch(key, generation, producer());
                    pending.insert(
                        key.to_string(),
                        Pending {
                            generation,
                            outcome: outcome.clone(),
                        },
                    );
                    outcome
                }
            }
        };

        outcome.await
    }

    fn launch<Fut>(&self, key: &str, generation: u64, work: Fut) -> SharedOutcome<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let table = Arc::clone(&self.pending);
        let task_key = key.to_string();
        let handle = tokio::spawn(async move {
            let result = work.await;
            settle(&table, &task_key, generation);
            result
        });

        // A panicking producer never reaches its own settle call.
        let table = Arc::clone(&self.pending);
        let waiter_key = key.to_string();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    settle(&table, &waiter_key, generation);
                    Err(TrekRouteError::internal(format!(
                        "request task for '{}' failed: {}",
                        waiter_key, join_error
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Check if a request for `key` is in flight.
    pub fn is_pending(&self, key: &str) -> bool {
        lock_unpoisoned(&self.pending).contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        lock_unpoisoned(&self.pending).len()
    }

    /// Forget in-flight entries whose key matches `regex`.
    ///
    /// The running producers are not cancelled and still resolve their
    /// current waiters; later calls for those keys start fresh requests.
    pub fn forget_matching(&self, regex: &Regex) -> usize {
        let mut pending = lock_unpoisoned(&self.pending);
        let before = pending.len();
        pending.retain(|key, _| !regex.is_match(key));
        let forgotten = before - pending.len();
        if forgotten > 0 {
            debug!(
                "[Dedup] Forgot {} in-flight requests matching '{}'",
                forgotten,
                regex.as_str()
            );
        }
        forgotten
    }

    /// Forget all in-flight entries.
    ///
    /// Running producers still resolve the callers already waiting on them,
    /// but new calls start fresh requests.
    pub fn clear(&self) {
        lock_unpoisoned(&self.pending).clear();
    }
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Remove the entry for `key` if it still belongs to `generation`.
fn settle<T: Clone>(table: &Mutex<HashMap<String, Pending<T>>>, key: &str, generation: u64) {
    let mut pending = lock_unpoisoned(table);
    if pending
        .get(key)
        .is_some_and(|entry| entry.generation == generation)
    {
        pending.remove(key);
        debug!("[Dedup] Settled {}", key);
    }
}
