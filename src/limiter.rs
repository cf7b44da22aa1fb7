use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, trace};

use crate::{
    config::FixedWindowConfig,
    error::Result,
    queue::{QueueOverflow, WaitQueue},
};

/// Outcome of an admission attempt
///
/// Throttling decisions are ordinary values, never errors. `Cancelled` is
/// returned for waits drained at shutdown and for any acquire made after
/// shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A permit was granted in the current window
    Admitted,
    /// No permit was available and no queue slot either
    Rejected,
    /// The caller-supplied wait bound elapsed before a rotation freed a permit
    TimedOut,
    /// The limiter shut down before the wait resolved
    Cancelled,
}

impl AcquireOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AcquireOutcome::Admitted)
    }

    /// Stable lowercase name, usable as a metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquireOutcome::Admitted => "admitted",
            AcquireOutcome::Rejected => "rejected",
            AcquireOutcome::TimedOut => "timed_out",
            AcquireOutcome::Cancelled => "cancelled",
        }
    }
}

/// Point-in-time snapshot of limiter state and cumulative outcome counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    /// Permits still grantable in the current window
    pub available_permits: u32,
    /// Callers currently parked in the wait queue
    pub queued: usize,
    pub admitted: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Waits whose future was dropped before resolution
    pub abandoned: u64,
    /// Window transitions performed so far
    pub rotations: u64,
}

/// Mutable limiter state, all guarded by one lock
struct LimiterState {
    window_start: Instant,
    permits_issued: u32,
    queue: WaitQueue<AcquireOutcome>,
    next_waiter_id: u64,
    closed: bool,
    admitted: u64,
    rejected: u64,
    timed_out: u64,
    cancelled: u64,
    abandoned: u64,
    rotations: u64,
}

struct Shared {
    config: FixedWindowConfig,
    state: Mutex<LimiterState>,
    shutdown: Notify,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().expect("limiter state lock poisoned")
    }

    /// Replace the window if at least one full window has elapsed, then
    /// drain queued waiters into the fresh permits. Idempotent within a
    /// window; callers must hold the state lock.
    fn maybe_rotate(&self, state: &mut LimiterState, now: Instant) -> bool {
        if state.closed {
            return false;
        }
        let elapsed = now.duration_since(state.window_start);
        if elapsed < self.config.window {
            return false;
        }
        assert!(state.permits_issued <= self.config.permit_limit);

        // Boundaries stay aligned: skip whole windows when a check comes in
        // late, instead of restarting the grid at `now`.
        let into_window = elapsed.as_nanos() % self.config.window.as_nanos();
        state.window_start = now - Duration::from_nanos(into_window as u64);
        state.permits_issued = 0;
        state.rotations += 1;

        let mut granted = 0u32;
        while state.permits_issued < self.config.permit_limit {
            match state.queue.take_next(self.config.queue_order) {
                Some(waiter) => {
                    state.permits_issued += 1;
                    state.admitted += 1;
                    granted += 1;
                    waiter.complete(AcquireOutcome::Admitted);
                }
                None => break,
            }
        }

        trace!(
            "window rotated: {} queued waiter(s) granted, {} still waiting",
            granted,
            state.queue.len()
        );
        true
    }
}

/// Fixed-window admission controller with bounded queueing
///
/// At most `permit_limit` callers are admitted per window. When the current
/// window is exhausted, up to `queue_limit` callers wait for the next
/// rotation; everyone else is rejected on the spot. Rotation happens lazily
/// inside every call and, unless `auto_rotation` is disabled, also on a
/// background timer so queued waiters drain even while the limiter is idle.
///
/// The limiter is shared via [`Arc`]; all methods take `&self`. Constructing
/// one with `auto_rotation` enabled requires a running Tokio runtime.
pub struct FixedWindowLimiter {
    shared: Arc<Shared>,
}

impl FixedWindowLimiter {
    /// Create a limiter from a validated policy
    pub fn new(config: FixedWindowConfig) -> Result<Self> {
        config.validate()?;

        let state = LimiterState {
            window_start: Instant::now(),
            permits_issued: 0,
            queue: WaitQueue::new(config.queue_limit),
            next_waiter_id: 0,
            closed: false,
            admitted: 0,
            rejected: 0,
            timed_out: 0,
            cancelled: 0,
            abandoned: 0,
            rotations: 0,
        };
        let auto_rotation = config.auto_rotation;
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(state),
            shutdown: Notify::new(),
        });

        if auto_rotation {
            spawn_rotation_task(Arc::clone(&shared));
        }

        debug!(
            "fixed-window limiter created: {} permits per {:?}, queue limit {}",
            shared.config.permit_limit, shared.config.window, shared.config.queue_limit
        );
        Ok(Self { shared })
    }

    /// The policy this limiter was built from
    pub fn config(&self) -> &FixedWindowConfig {
        &self.shared.config
    }

    /// Synchronous admission attempt; never suspends
    ///
    /// Resolves `Admitted` or `Rejected` without consulting the queue, or
    /// `Cancelled` after shutdown.
    pub fn try_acquire(&self) -> AcquireOutcome {
        let mut state = self.shared.lock_state();
        if state.closed {
            state.cancelled += 1;
            return AcquireOutcome::Cancelled;
        }
        self.shared.maybe_rotate(&mut state, Instant::now());

        if state.permits_issued < self.shared.config.permit_limit {
            state.permits_issued += 1;
            state.admitted += 1;
            trace!(
                "permit granted ({}/{} used)",
                state.permits_issued,
                self.shared.config.permit_limit
            );
            AcquireOutcome::Admitted
        } else {
            state.rejected += 1;
            trace!("window exhausted, rejecting caller");
            AcquireOutcome::Rejected
        }
    }

    /// Admission attempt that may park the caller until the next rotation
    ///
    /// Resolves `Admitted`, `Rejected` (no permit and no queue slot), or
    /// `Cancelled` (shutdown). Cancel-safe: dropping the future removes the
    /// caller from the queue.
    pub async fn acquire(&self) -> AcquireOutcome {
        match self.begin_acquire() {
            AcquireStart::Resolved(outcome) => outcome,
            AcquireStart::Queued(handle) => handle.wait().await,
        }
    }

    /// Like [`acquire`](Self::acquire), with a bound on the queued wait
    ///
    /// Resolves `TimedOut` when `max_wait` elapses before a rotation frees a
    /// permit. A grant that races the timeout wins if it took the state lock
    /// first; once granted, a permit is never taken back.
    pub async fn acquire_timeout(&self, max_wait: Duration) -> AcquireOutcome {
        match self.begin_acquire() {
            AcquireStart::Resolved(outcome) => outcome,
            AcquireStart::Queued(handle) => handle.wait_with_timeout(max_wait).await,
        }
    }

    /// One locked pass: admit, reject, or park the caller
    fn begin_acquire(&self) -> AcquireStart {
        let mut state = self.shared.lock_state();
        if state.closed {
            state.cancelled += 1;
            return AcquireStart::Resolved(AcquireOutcome::Cancelled);
        }
        self.shared.maybe_rotate(&mut state, Instant::now());

        if state.permits_issued < self.shared.config.permit_limit {
            state.permits_issued += 1;
            state.admitted += 1;
            trace!(
                "permit granted ({}/{} used)",
                state.permits_issued,
                self.shared.config.permit_limit
            );
            return AcquireStart::Resolved(AcquireOutcome::Admitted);
        }

        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        match state.queue.enqueue(id, tx) {
            Ok(()) => {
                trace!("caller {} queued ({} waiting)", id, state.queue.len());
                AcquireStart::Queued(WaiterHandle {
                    shared: Arc::clone(&self.shared),
                    id,
                    rx,
                    armed: true,
                })
            }
            Err(QueueOverflow) => {
                state.rejected += 1;
                trace!("wait queue full, rejecting caller {}", id);
                AcquireStart::Resolved(AcquireOutcome::Rejected)
            }
        }
    }

    /// Rotate now if at least one full window has elapsed
    ///
    /// Returns whether a rotation happened. This is the driver for policies
    /// running with `auto_rotation` off; with the background task on it is
    /// rarely needed.
    pub fn try_rotate(&self) -> bool {
        let mut state = self.shared.lock_state();
        self.shared.maybe_rotate(&mut state, Instant::now())
    }

    /// Snapshot current state and cumulative outcome counts
    pub fn stats(&self) -> LimiterStats {
        let mut state = self.shared.lock_state();
        self.shared.maybe_rotate(&mut state, Instant::now());
        LimiterStats {
            available_permits: self
                .shared
                .config
                .permit_limit
                .saturating_sub(state.permits_issued),
            queued: state.queue.len(),
            admitted: state.admitted,
            rejected: state.rejected,
            timed_out: state.timed_out,
            cancelled: state.cancelled,
            abandoned: state.abandoned,
            rotations: state.rotations,
        }
    }

    /// Permits still grantable in the current window
    pub fn available_permits(&self) -> u32 {
        self.stats().available_permits
    }

    /// Callers currently parked in the wait queue
    pub fn queued(&self) -> usize {
        self.stats().queued
    }

    /// Time left until the current window rotates
    pub fn duration_until_reset(&self) -> Duration {
        let mut state = self.shared.lock_state();
        self.shared.maybe_rotate(&mut state, Instant::now());
        let elapsed = state.window_start.elapsed();
        if elapsed >= self.shared.config.window {
            Duration::ZERO
        } else {
            self.shared.config.window - elapsed
        }
    }

    /// Resolve every queued waiter to `Cancelled` and stop rotating
    ///
    /// Idempotent; also runs on drop. Acquire calls made afterwards resolve
    /// `Cancelled` immediately.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained = state.queue.drain_all();
            state.cancelled += drained.len() as u64;
            drained
        };
        let waiting = drained.len();
        for waiter in drained {
            waiter.complete(AcquireOutcome::Cancelled);
        }
        self.shared.shutdown.notify_one();
        debug!("limiter shut down, {} queued waiter(s) cancelled", waiting);
    }
}

impl Drop for FixedWindowLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum AcquireStart {
    Resolved(AcquireOutcome),
    Queued(WaiterHandle),
}

/// A parked caller's side of the wait
///
/// Holds the receive half of the completion channel plus enough context to
/// pull itself back out of the queue. Dropping an armed handle removes the
/// queue entry, so abandoning a wait can never leak a slot.
struct WaiterHandle {
    shared: Arc<Shared>,
    id: u64,
    rx: oneshot::Receiver<AcquireOutcome>,
    armed: bool,
}

impl WaiterHandle {
    async fn wait(mut self) -> AcquireOutcome {
        let outcome = match (&mut self.rx).await {
            Ok(outcome) => outcome,
            // Sender gone without a resolution; only reachable through
            // shutdown tearing the state down.
            Err(_) => AcquireOutcome::Cancelled,
        };
        self.armed = false;
        outcome
    }

    async fn wait_with_timeout(mut self, max_wait: Duration) -> AcquireOutcome {
        let outcome = match tokio::time::timeout(max_wait, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => AcquireOutcome::Cancelled,
            Err(_) => self.finish_timed_out(),
        };
        self.armed = false;
        outcome
    }

    /// Resolve the race between an elapsed timeout and a rotation grant.
    /// Whichever side takes the state lock first wins.
    fn finish_timed_out(&mut self) -> AcquireOutcome {
        let mut state = self.shared.lock_state();
        match state.queue.remove(self.id) {
            Some(_waiter) => {
                state.timed_out += 1;
                trace!("caller {} timed out waiting for a permit", self.id);
                AcquireOutcome::TimedOut
            }
            // Already pulled out of the queue: a grant (or shutdown) beat
            // the timeout to the lock and its resolution stands.
            None => {
                drop(state);
                match self.rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => AcquireOutcome::Cancelled,
                }
            }
        }
    }
}

impl Drop for WaiterHandle {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.lock_state();
        if state.queue.remove(self.id).is_some() {
            state.abandoned += 1;
            trace!("caller {} abandoned its wait", self.id);
        }
    }
}

fn spawn_rotation_task(shared: Arc<Shared>) {
    tokio::spawn(async move {
        let window = shared.config.window;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + window, window);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut state = shared.lock_state();
                    shared.maybe_rotate(&mut state, Instant::now());
                }
                _ = shared.shutdown.notified() => break,
            }
        }
        trace!("rotation task stopped");
    });
}
