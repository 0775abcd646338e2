//! Bus-wide lock for locking messages.
//!
//! A message whose [`lock_policy`](kbus_core::Message::lock_policy) is `Some`
//! takes an exclusive lock for the duration of its handling. Other tasks wait
//! for the lock, up to a timeout. A message submitted by the task that holds
//! the lock is postponed instead: it fails fast with [`BusLockedFailure`] and
//! is handled right after the lock holder finishes.
//!
//! State machine: Unlocked -> Locked(owner) -> Draining(owner) -> previous
//!
//! Postponed messages are drained by the owner before the lock is given up,
//! so other tasks never interleave with them.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use kbus_core::{FailureReason, LockPolicy, Message};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{Envelope, Middleware, Next, Reply};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::task::TaskIdentity;

// ---------------------------------------------------------------------------
// BusLockedFailure
// ---------------------------------------------------------------------------

/// The bus is locked by the submitting task; the message was postponed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusLockedFailure {
    message: Option<String>,
}

impl BusLockedFailure {
    pub const SAME_TASK: &'static str =
        "Cannot handle message as message bus is locked by the same task";

    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

impl FailureReason for BusLockedFailure {
    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Unlocked,
    /// A locking message owned by the task is being handled.
    Locked(TaskIdentity),
    /// The owner is handling messages it postponed while locked.
    Draining(TaskIdentity),
}

impl LockState {
    /// Whether `task` has to wait before handling a message.
    fn blocks(self, task: TaskIdentity) -> bool {
        match self {
            Self::Unlocked => false,
            Self::Locked(owner) | Self::Draining(owner) => owner != task,
        }
    }
}

struct Postponed {
    envelope: Envelope,
    next: Next,
}

struct LockerState {
    lock: LockState,
    /// Wait horizon published to tasks that start waiting.
    timeout: Duration,
    queue: VecDeque<Postponed>,
}

enum Admission<'a> {
    /// Not a locking message and the bus is free to this task.
    Free,
    /// The lock was taken for this task.
    Acquired(LockGuard<'a>),
    /// Gave up waiting for another task's lock.
    TimedOut,
}

// ---------------------------------------------------------------------------
// BusLocker
// ---------------------------------------------------------------------------

/// Middleware serializing locking messages across tasks.
pub struct BusLocker {
    default_timeout: Duration,
    poll_interval: Duration,
    state: Mutex<LockerState>,
}

impl BusLocker {
    /// Creates an unlocked locker with the given default wait timeout.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self::with_poll_interval(default_timeout, Duration::from_millis(1))
    }

    #[must_use]
    pub fn with_poll_interval(default_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            default_timeout,
            poll_interval,
            state: Mutex::new(LockerState {
                lock: LockState::Unlocked,
                timeout: default_timeout,
                queue: VecDeque::new(),
            }),
        }
    }

    #[must_use]
    pub fn from_config(config: &BusConfig) -> Self {
        Self::with_poll_interval(config.default_lock_timeout, config.lock_poll_interval)
    }

    /// Whether any task currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().lock != LockState::Unlocked
    }

    /// The task holding the lock, if any.
    #[must_use]
    pub fn holder(&self) -> Option<TaskIdentity> {
        match self.state.lock().lock {
            LockState::Unlocked => None,
            LockState::Locked(owner) | LockState::Draining(owner) => Some(owner),
        }
    }

    /// Wait horizon a task starting to wait now would use.
    #[must_use]
    pub fn current_timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    #[must_use]
    pub fn postponed_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Queue the message if `task` holds the lock. Hands the envelope back
    /// otherwise.
    fn postpone_if_owner(
        &self,
        task: TaskIdentity,
        envelope: Envelope,
        next: Next,
    ) -> Option<(Envelope, Next)> {
        let mut state = self.state.lock();
        if state.lock == LockState::Locked(task) {
            state.queue.push_back(Postponed { envelope, next });
            None
        } else {
            Some((envelope, next))
        }
    }

    /// Poll until the bus is free to `task` or the horizon has passed.
    ///
    /// The horizon is fixed when waiting starts: the message's own wait
    /// timeout if it has one, else the timeout published by the lock holder.
    async fn wait_for_unlock(&self, task: TaskIdentity, message: &dyn Message) -> Admission<'_> {
        let policy = message.lock_policy();
        let horizon = message
            .wait_timeout()
            .unwrap_or_else(|| self.current_timeout());
        let deadline = Instant::now() + horizon;

        loop {
            if let Some(admission) = self.try_admit(task, policy) {
                return admission;
            }

            if Instant::now() >= deadline {
                return Admission::TimedOut;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Check the lock and, for a locking message, take it in the same step.
    fn try_admit(&self, task: TaskIdentity, policy: Option<LockPolicy>) -> Option<Admission<'_>> {
        let mut state = self.state.lock();
        if state.lock.blocks(task) {
            return None;
        }

        let Some(policy) = policy else {
            return Some(Admission::Free);
        };

        let restore = state.lock;
        state.lock = LockState::Locked(task);
        state.timeout = policy.timeout.unwrap_or(self.default_timeout);
        Some(Admission::Acquired(LockGuard {
            locker: self,
            task,
            restore,
        }))
    }

    fn pop_postponed(&self) -> Option<Postponed> {
        self.state.lock().queue.pop_front()
    }
}

impl Default for BusLocker {
    fn default() -> Self {
        Self::from_config(&BusConfig::default())
    }
}

#[async_trait]
impl Middleware for BusLocker {
    async fn handle(&self, envelope: Envelope, next: Next) -> Result<Reply, BusError> {
        let task = TaskIdentity::current();

        let Some((envelope, next)) = self.postpone_if_owner(task, envelope, next) else {
            debug!(%task, "bus locked by the submitting task, message postponed");
            return Ok(Reply::failed(BusLockedFailure::new(BusLockedFailure::SAME_TASK)));
        };

        match self.wait_for_unlock(task, envelope.message()).await {
            Admission::Free => next.run(envelope).await,
            Admission::Acquired(guard) => {
                let result = next.run(envelope).await;
                guard.drain().await;
                result
            }
            Admission::TimedOut => {
                warn!(
                    %task,
                    message = envelope.message().name(),
                    "timed out waiting for the bus lock, proceeding without it"
                );
                next.run(envelope).await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LockGuard
// ---------------------------------------------------------------------------

/// Held while a task owns the lock. Dropping it restores the state found on
/// acquisition, so a cancelled holder never leaves the bus locked.
struct LockGuard<'a> {
    locker: &'a BusLocker,
    task: TaskIdentity,
    restore: LockState,
}

impl LockGuard<'_> {
    /// Handle everything postponed while locked, in submission order, then
    /// release.
    async fn drain(self) {
        {
            let mut state = self.locker.state.lock();
            state.lock = LockState::Draining(self.task);
            state.timeout = self.locker.default_timeout;
        }

        while let Some(Postponed { envelope, next }) = self.locker.pop_postponed() {
            let name = envelope.message().name();
            if let Err(err) = next.run(envelope).await {
                error!(task = %self.task, message = name, error = %err, "postponed message failed");
            }
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let stale = {
            let mut state = self.locker.state.lock();
            state.lock = self.restore;
            state.timeout = self.locker.default_timeout;
            // Only a holder cancelled before draining leaves entries behind.
            if self.restore == LockState::Unlocked {
                std::mem::take(&mut state.queue)
            } else {
                VecDeque::new()
            }
        };

        if !stale.is_empty() {
            warn!(
                task = %self.task,
                dropped = stale.len(),
                "lock holder cancelled, dropping postponed messages"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
