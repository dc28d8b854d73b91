//! Bounded parallel fan-out with per-key failure isolation
//!
//! Platform fetches and per-platform scans run on a rayon pool sized by the
//! configured worker count. A failing (or panicking) key never aborts the
//! others: every key comes back paired with its own result, in input order.

use crate::error::{Result, SyncError};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Build a rayon pool with `workers` threads
pub fn worker_pool(workers: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("savesync-worker-{}", i))
        .build()
        .map_err(|e| SyncError::ThreadPool(e.to_string()))
}

/// Run `f` for each key on a bounded pool and collect `(key, result)` pairs
///
/// Results keep the order of `keys`. A panic inside `f` is caught and
/// reported as [`SyncError::Internal`] for that key only.
///
/// # Errors
///
/// - [`SyncError::ThreadPool`] if the pool cannot be created
///
/// # Example
///
/// ```rust
/// use savesync::parallel::map_keys;
/// use savesync::SyncError;
///
/// let outcomes = map_keys(vec![1u32, 2, 3], 2, |k| {
///     if *k == 2 { Err(SyncError::remote("down")) } else { Ok(k * 10) }
/// }).unwrap();
///
/// assert_eq!(outcomes[0].1.as_ref().ok(), Some(&10));
/// assert!(outcomes[1].1.is_err());
/// assert_eq!(outcomes[2].1.as_ref().ok(), Some(&30));
/// ```
pub fn map_keys<K, T, F>(keys: Vec<K>, workers: usize, f: F) -> Result<Vec<(K, Result<T>)>>
where
    K: Send + std::fmt::Debug,
    T: Send,
    F: Fn(&K) -> Result<T> + Sync,
{
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let pool = worker_pool(workers)?;
    debug!("Processing {} keys on {} workers", keys.len(), pool.current_num_threads());

    let outcomes = pool.install(|| {
        keys.into_par_iter()
            .map(|key| {
                let result = match panic::catch_unwind(AssertUnwindSafe(|| f(&key))) {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Worker panicked while processing {:?}", key);
                        Err(SyncError::internal(format!("worker panicked on {:?}", key)))
                    }
                };
                (key, result)
            })
            .collect()
    });

    Ok(outcomes)
}

/// Split outcomes into successes and failures, preserving order
pub fn partition<K, T>(outcomes: Vec<(K, Result<T>)>) -> (Vec<(K, T)>, Vec<(K, SyncError)>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();

    for (key, result) in outcomes {
        match result {
            Ok(value) => ok.push((key, value)),
            Err(e) => failed.push((key, e)),
        }
    }

    (ok, failed)
}
