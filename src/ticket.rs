//! Execve ticket table (C2): a ticketed rendezvous between a blocking
//! execve hook and the daemon's asynchronous verdict.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Number of hash buckets backing the ticket table. Matches the reference
/// sizing; each bucket has its own lock and condition variable so waiters on
/// distinct tickets never contend.
const BUCKET_COUNT: usize = 256;

/// Fixed wait deadline for an execve decision, per the fail-open contract.
pub const EXECVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Verdict a ticket can be resolved to by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The daemon allowed the exec.
    Allow,
    /// The daemon denied the exec.
    Deny,
}

/// Outcome observed by a waiter: a resolved verdict, or `Invalid` if the
/// wait elapsed (or the ticket was never resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Daemon allowed the exec.
    Allow,
    /// Daemon denied the exec.
    Deny,
    /// Timed out, or the ticket was unknown by the time of the check.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Resolved(Verdict),
}

struct Bucket {
    entries: Mutex<HashMap<u32, State>>,
    cv: Condvar,
}

impl Default for Bucket {
    fn default() -> Self {
        Bucket {
            entries: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
        }
    }
}

/// Hash-partitioned table of in-flight execve tickets.
pub struct TicketTable {
    buckets: Vec<Bucket>,
    next_id: AtomicU32,
}

impl std::fmt::Debug for TicketTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketTable")
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl Default for TicketTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketTable {
    /// Create an empty table with the reference bucket count.
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        buckets.resize_with(BUCKET_COUNT, Bucket::default);
        TicketTable {
            buckets,
            // Start at 1: id 0 is reserved and never returned.
            next_id: AtomicU32::new(1),
        }
    }

    fn bucket(&self, id: u32) -> &Bucket {
        &self.buckets[(id as usize) % BUCKET_COUNT]
    }

    /// Allocate a fresh ticket id in state `Pending`. Wrapping past
    /// `u32::MAX` is acceptable; id 0 is skipped.
    pub fn allocate(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            let bucket = self.bucket(id);
            bucket.entries.lock().insert(id, State::Pending);
            return id;
        }
    }

    /// Resolve `id` to `verdict` and wake its waiter. No-op if `id` is
    /// unknown (a late reply after the waiter already timed out).
    pub fn resolve(&self, id: u32, verdict: Verdict) {
        let bucket = self.bucket(id);
        let mut entries = bucket.entries.lock();
        if let Some(state) = entries.get_mut(&id) {
            *state = State::Resolved(verdict);
        }
        drop(entries);
        bucket.cv.notify_all();
    }

    /// Block the calling thread until `id` resolves or `deadline` elapses
    /// (measured from the moment `wait` is entered). Always removes the
    /// ticket before returning.
    pub fn wait(&self, id: u32, deadline: Duration) -> Outcome {
        let bucket = self.bucket(id);
        let start = Instant::now();
        let mut entries = bucket.entries.lock();
        loop {
            match entries.get(&id) {
                None => return Outcome::Invalid,
                Some(State::Resolved(Verdict::Allow)) => {
                    entries.remove(&id);
                    return Outcome::Allow;
                }
                Some(State::Resolved(Verdict::Deny)) => {
                    entries.remove(&id);
                    return Outcome::Deny;
                }
                Some(State::Pending) => {}
            }
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                entries.remove(&id);
                return Outcome::Invalid;
            }
            let remaining = deadline - elapsed;
            let timed_out = bucket.cv.wait_for(&mut entries, remaining).timed_out();
            if timed_out {
                // One last check before giving up: the resolver may have run
                // and notified just as the timeout fired.
                let outcome = match entries.get(&id) {
                    Some(State::Resolved(Verdict::Allow)) => Outcome::Allow,
                    Some(State::Resolved(Verdict::Deny)) => Outcome::Deny,
                    _ => Outcome::Invalid,
                };
                entries.remove(&id);
                return outcome;
            }
        }
    }
}
