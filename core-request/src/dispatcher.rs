//! Bounded-concurrency admission with priorities and aging.
//!
//! The dispatcher only decides the order in which waiting calls start; it
//! never cancels anything that already holds a permit. A waiter that has been
//! passed over by `aging_interval` later admissions is treated as one
//! priority level higher, so `Low` work always gets through eventually.

use crate::error::{RequestError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::trace;

/// Admission priority of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    /// Speculative work (prefetch)
    Low = 0,
    /// Background reconciliation
    #[default]
    Normal = 1,
    /// User-visible requests
    High = 2,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(i: i32) -> Result<Self> {
        match i {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            _ => Err(RequestError::InvalidPriority(i)),
        }
    }
}

const DEFAULT_AGING_INTERVAL: u32 = 4;

struct Waiter {
    seq: u64,
    priority: Priority,
    passed_by: u32,
    tx: oneshot::Sender<DispatchPermit>,
}

impl Waiter {
    fn effective_level(&self, aging_interval: u32) -> i32 {
        let boost = (self.passed_by / aging_interval) as i32;
        (self.priority.as_i32() + boost).min(Priority::High.as_i32())
    }
}

#[derive(Default)]
struct State {
    in_flight: usize,
    next_seq: u64,
    waiters: Vec<Waiter>,
}

struct Inner {
    limit: usize,
    aging_interval: u32,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand out permits while capacity remains. Called with the lock held.
    fn grant_ready(self: &Arc<Self>, state: &mut State) {
        while state.in_flight < self.limit && !state.waiters.is_empty() {
            let aging = self.aging_interval;
            let Some(pos) = state
                .waiters
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    a.effective_level(aging)
                        .cmp(&b.effective_level(aging))
                        .then(b.seq.cmp(&a.seq))
                })
                .map(|(pos, _)| pos)
            else {
                break;
            };

            let waiter = state.waiters.remove(pos);
            for other in state.waiters.iter_mut().filter(|w| w.seq < waiter.seq) {
                other.passed_by = other.passed_by.saturating_add(1);
            }

            state.in_flight += 1;
            let permit = DispatchPermit {
                inner: Some(Arc::clone(self)),
            };
            if let Err(mut unclaimed) = waiter.tx.send(permit) {
                // Receiver went away; take the slot back without re-locking.
                unclaimed.inner = None;
                state.in_flight -= 1;
                continue;
            }
            trace!(priority = ?waiter.priority, seq = waiter.seq, "Admitted request");
        }
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.grant_ready(&mut state);
    }
}

/// Shared admission queue. Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct PriorityDispatcher {
    inner: Arc<Inner>,
}

impl PriorityDispatcher {
    pub fn new(limit: usize) -> Result<Self> {
        Self::with_aging_interval(limit, DEFAULT_AGING_INTERVAL)
    }

    pub fn with_aging_interval(limit: usize, aging_interval: u32) -> Result<Self> {
        if limit == 0 {
            return Err(RequestError::InvalidConfig(
                "concurrency limit must be greater than 0".to_string(),
            ));
        }
        if aging_interval == 0 {
            return Err(RequestError::InvalidConfig(
                "aging interval must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                limit,
                aging_interval,
                state: Mutex::new(State::default()),
            }),
        })
    }

    /// Wait for a slot. Dropping the future before it resolves gives up the
    /// place in the queue.
    pub async fn acquire(&self, priority: Priority) -> DispatchPermit {
        loop {
            let rx = {
                let mut state = self.inner.lock();
                if state.in_flight < self.inner.limit && state.waiters.is_empty() {
                    state.in_flight += 1;
                    return DispatchPermit {
                        inner: Some(Arc::clone(&self.inner)),
                    };
                }

                let (tx, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiters.push(Waiter {
                    seq,
                    priority,
                    passed_by: 0,
                    tx,
                });
                self.inner.grant_ready(&mut state);
                rx
            };

            if let Ok(permit) = rx.await {
                return permit;
            }
        }
    }

    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

impl std::fmt::Debug for PriorityDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("PriorityDispatcher")
            .field("limit", &self.inner.limit)
            .field("in_flight", &state.in_flight)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

/// Slot in the dispatcher; released on drop.
pub struct DispatchPermit {
    inner: Option<Arc<Inner>>,
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }
}
