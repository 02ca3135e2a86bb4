use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, error};

/// Where a submitted job lands in the FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Back,
    /// "Play this now": jumps ahead of everything queued.
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Key was already queued; with `Placement::Front` it has been moved to the head.
    AlreadyQueued,
    AlreadyRunning,
}

struct Job<K> {
    key: K,
    task: BoxFuture<'static, ()>,
}

struct PoolState<K> {
    limit: usize,
    queue: VecDeque<Job<K>>,
    /// Running keys and the dispatch ticket that holds each one.
    running: HashMap<K, u64>,
    next_ticket: u64,
    peak_running: usize,
}

/// Bounded worker pool: a FIFO of keyed jobs, at most `limit` running at once.
///
/// The limit can be changed at runtime; running jobs are never interrupted, the
/// new bound applies from the next dispatch. A job's completion (including a
/// panic inside it) always frees its slot and pulls the next job. A job may
/// also free its key early with `release`, before publishing its result.
pub struct WorkerPool<K> {
    name: &'static str,
    state: Arc<Mutex<PoolState<K>>>,
}

impl<K> Clone for WorkerPool<K> {
    fn clone(&self) -> Self {
        Self { name: self.name, state: Arc::clone(&self.state) }
    }
}

impl<K> WorkerPool<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new(name: &'static str, limit: usize) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(PoolState {
                limit: limit.max(1),
                queue: VecDeque::new(),
                running: HashMap::new(),
                next_ticket: 0,
                peak_running: 0,
            })),
        }
    }

    pub fn limit(&self) -> usize {
        self.state.lock().limit
    }

    pub fn running(&self) -> usize {
        self.state.lock().running.len()
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn peak_running(&self) -> usize {
        self.state.lock().peak_running
    }

    pub fn is_active(&self, key: &K) -> bool {
        let state = self.state.lock();
        state.running.contains_key(key) || state.queue.iter().any(|j| &j.key == key)
    }

    /// Must be called from within a tokio runtime.
    pub fn set_limit(&self, limit: usize) {
        self.state.lock().limit = limit.max(1);
        debug!(pool = self.name, limit, "pool limit changed");
        self.pump();
    }

    /// Queues `task` under `key`. A key that is queued or running is never
    /// queued twice.
    pub fn submit(&self, key: K, placement: Placement, task: BoxFuture<'static, ()>) -> Submission {
        let outcome = {
            let mut state = self.state.lock();
            if state.running.contains_key(&key) {
                Submission::AlreadyRunning
            } else if let Some(pos) = state.queue.iter().position(|j| j.key == key) {
                if placement == Placement::Front {
                    if let Some(job) = state.queue.remove(pos) {
                        state.queue.push_front(job);
                    }
                }
                Submission::AlreadyQueued
            } else {
                let job = Job { key, task };
                match placement {
                    Placement::Back => state.queue.push_back(job),
                    Placement::Front => state.queue.push_front(job),
                }
                Submission::Queued
            }
        };
        self.pump();
        outcome
    }

    /// Moves an already-queued `key` to the head. False if it is not queued.
    pub fn promote(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.queue.iter().position(|j| &j.key == key) else {
            return false;
        };
        if let Some(job) = state.queue.remove(pos) {
            state.queue.push_front(job);
        }
        true
    }

    /// Frees a running key and its slot ahead of the job's completion. The
    /// caller must be the job holding `key`; the same key can be submitted
    /// again as soon as this returns.
    pub fn release(&self, key: &K) -> bool {
        let released = self.state.lock().running.remove(key).is_some();
        if released {
            self.pump();
        }
        released
    }

    /// Drops queued jobs matching `pred`; returns their keys. Running jobs are untouched.
    pub fn drain_queued(&self, pred: impl Fn(&K) -> bool) -> Vec<K> {
        let mut state = self.state.lock();
        let mut dropped = Vec::new();
        state.queue.retain(|job| {
            if pred(&job.key) {
                dropped.push(job.key.clone());
                false
            } else {
                true
            }
        });
        dropped
    }

    fn pump(&self) {
        loop {
            let (job, ticket) = {
                let mut state = self.state.lock();
                if state.running.len() >= state.limit {
                    return;
                }
                let Some(job) = state.queue.pop_front() else {
                    return;
                };
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.running.insert(job.key.clone(), ticket);
                state.peak_running = state.peak_running.max(state.running.len());
                (job, ticket)
            };
            self.spawn(job, ticket);
        }
    }

    fn spawn(&self, job: Job<K>, ticket: u64) {
        let pool = self.clone();
        let Job { key, task } = job;
        tokio::spawn(async move {
            // Inner spawn isolates panics: the slot is released either way
            if let Err(e) = tokio::spawn(task).await {
                error!(pool = pool.name, key = ?key, error = %e, "pool job aborted");
            }
            {
                let mut state = pool.state.lock();
                // Released early and possibly re-dispatched: the key is no longer ours
                if state.running.get(&key) == Some(&ticket) {
                    state.running.remove(&key);
                }
            }
            pool.pump();
        });
    }
}
