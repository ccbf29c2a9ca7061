//! Proof-of-work nonce search
//!
//! A block hash satisfies difficulty `d` when its hex form starts with `d`
//! zero characters.

use log::debug;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use super::digest::KeyedDigest;

/// Result of a successful search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    /// The winning nonce
    pub nonce: u64,

    /// Digest of (prev_hash, merkle_root, nonce)
    pub hash: String,

    /// Number of digests computed, across all workers
    pub attempts: u64,
}

/// Shared flag used to stop a running search
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Requests every search holding this token to stop
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Checks whether a hash meets the leading-zero target
pub fn meets_target(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Finds the smallest nonce whose block hash meets `difficulty`
///
/// Runs until a nonce is found; there is no upper bound on the search.
pub fn search(digest: &KeyedDigest, prev_hash: &str, merkle_root: &str, difficulty: u32) -> Solution {
    let mut nonce = 0u64;

    loop {
        let hash = digest.block_hash(prev_hash, merkle_root, nonce);

        if meets_target(&hash, difficulty) {
            return Solution {
                nonce,
                hash,
                attempts: nonce + 1,
            };
        }

        nonce += 1;
    }
}

/// Same as [`search`] but checks `cancel` before every attempt
///
/// # Returns
///
/// `None` if the token was cancelled before a nonce was found
pub fn search_cancellable(
    digest: &KeyedDigest,
    prev_hash: &str,
    merkle_root: &str,
    difficulty: u32,
    cancel: &CancelToken,
) -> Option<Solution> {
    search_stride(digest, prev_hash, merkle_root, difficulty, 0, 1, || cancel.is_cancelled())
        .map(|(nonce, hash, attempts)| Solution { nonce, hash, attempts })
}

/// Races `workers` threads over disjoint slices of the nonce space
///
/// Worker `k` tries nonces `k, k + workers, k + 2 * workers, ...`. The first
/// worker to find a satisfying nonce wins and the others stop, so the result
/// is only minimal within the winning worker's slice.
///
/// # Returns
///
/// `None` if `cancel` was triggered by the caller before any worker succeeded
pub fn search_parallel(
    digest: &KeyedDigest,
    prev_hash: &str,
    merkle_root: &str,
    difficulty: u32,
    workers: usize,
    cancel: &CancelToken,
) -> Option<Solution> {
    let workers = workers.max(1) as u64;
    if workers == 1 {
        return search_cancellable(digest, prev_hash, merkle_root, difficulty, cancel);
    }

    // Stops the workers without touching the caller's token
    let stop = CancelToken::new();
    let winner: Mutex<Option<(u64, String)>> = Mutex::new(None);
    let mut attempts = 0u64;

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|start| {
                let stop = &stop;
                let winner = &winner;
                scope.spawn(move || {
                    let found = search_stride(
                        digest,
                        prev_hash,
                        merkle_root,
                        difficulty,
                        start,
                        workers,
                        || cancel.is_cancelled() || stop.is_cancelled(),
                    );

                    match found {
                        Some((nonce, hash, tried)) => {
                            let mut slot = winner.lock().unwrap_or_else(PoisonError::into_inner);
                            if slot.is_none() {
                                debug!("Worker {} found nonce {}", start, nonce);
                                *slot = Some((nonce, hash));
                            }
                            stop.cancel();
                            tried
                        }
                        None => 0,
                    }
                })
            })
            .collect();

        for handle in handles {
            // A panicking worker simply contributes no attempts
            attempts += handle.join().unwrap_or(0);
        }
    });

    let winner = winner.into_inner().unwrap_or_else(PoisonError::into_inner);
    winner.map(|(nonce, hash)| Solution { nonce, hash, attempts })
}

fn search_stride<F>(
    digest: &KeyedDigest,
    prev_hash: &str,
    merkle_root: &str,
    difficulty: u32,
    start: u64,
    step: u64,
    should_stop: F,
) -> Option<(u64, String, u64)>
where
    F: Fn() -> bool,
{
    let mut nonce = start;
    let mut attempts = 0u64;

    loop {
        if should_stop() {
            return None;
        }

        let hash = digest.block_hash(prev_hash, merkle_root, nonce);
        attempts += 1;

        if meets_target(&hash, difficulty) {
            return Some((nonce, hash, attempts));
        }

        nonce = nonce.checked_add(step)?;
    }
}
