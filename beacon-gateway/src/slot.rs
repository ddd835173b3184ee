//! Single-slot "latest value" hand-off between the window and the publisher.
//!
//! The slot holds at most one value. `put` overwrites whatever has not been
//! taken yet and cancels the token of the value currently being worked on,
//! so the consumer always moves to the newest batch.
//!
//! This is deliberate backpressure: under a sustained eviction rate older
//! batches are superseded and their detections are never published.

use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct SlotState<T> {
    value: Option<T>,
    in_flight: Option<(u64, CancellationToken)>,
    next_generation: u64,
    closed: bool,
}

/// A value taken from the slot, with the token that signals it was superseded.
#[derive(Debug)]
pub struct Claim<T> {
    pub value: T,
    pub token: CancellationToken,
    pub generation: u64,
}

/// What `put` displaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutOutcome {
    /// An unconsumed value was overwritten.
    pub replaced_pending: bool,
    /// The in-flight consumer was cancelled.
    pub cancelled_in_flight: bool,
}

pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        LatestSlot {
            state: Mutex::new(SlotState {
                value: None,
                in_flight: None,
                next_generation: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value`, replacing any pending one and cancelling in-flight work.
    /// Values put after `close` are dropped.
    pub fn put(&self, value: T) -> PutOutcome {
        let mut outcome = PutOutcome::default();
        {
            let mut state = self.lock();
            if state.closed {
                return outcome;
            }
            outcome.replaced_pending = state.value.replace(value).is_some();
            if let Some((_, token)) = state.in_flight.take() {
                token.cancel();
                outcome.cancelled_in_flight = true;
            }
        }
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next value. Its token is cancelled when a newer value
    /// arrives or the slot is closed. `None` once closed.
    pub async fn next(&self) -> Option<Claim<T>> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(value) = state.value.take() {
                    let token = CancellationToken::new();
                    let generation = state.next_generation;
                    state.next_generation += 1;
                    state.in_flight = Some((generation, token.clone()));
                    return Some(Claim {
                        value,
                        token,
                        generation,
                    });
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark a claim as done so a later `put` does not cancel it.
    pub fn finish(&self, generation: u64) {
        let mut state = self.lock();
        if matches!(state.in_flight, Some((g, _)) if g == generation) {
            state.in_flight = None;
        }
    }

    /// Close the slot: drop any pending value, cancel in-flight work, and
    /// wake the consumer so `next` returns `None`.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.value = None;
            if let Some((_, token)) = state.in_flight.take() {
                token.cancel();
            }
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn has_pending(&self) -> bool {
        self.lock().value.is_some()
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
