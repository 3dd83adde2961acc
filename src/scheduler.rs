use crate::bus::Bus;
use crate::error::FlushError;
use crate::message::{Message, Priority};
use serde::{Deserialize, Serialize};
use static_assertions::assert_impl_all;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

/// Milliseconds on a scheduler [`Clock`].
pub type Timestamp = u64;

/// Monotonic time source consulted by [`Scheduler`].
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Timestamp;
}

/// Milliseconds since construction, backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> Timestamp {
        duration_ms(self.origin.elapsed())
    }
}

/// Clock that only moves when told to. Used by tests and the simulator's
/// fast-forward mode.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_ms(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

fn duration_ms(duration: Duration) -> Timestamp {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub message: Message,
    pub priority: Priority,
    pub due: Timestamp,
    pub scheduled_at: Timestamp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_scheduled: u64,
    pub total_flushed: u64,
    pub total_failed: u64,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Inner {
    // Keyed by (due, insertion sequence): equal due times keep insertion order.
    entries: BTreeMap<(Timestamp, u64), ScheduledMessage>,
    next_seq: u64,
    stats: SchedulerStats,
}

/// Holds messages until their due time, then hands them to a [`Bus`].
///
/// Nothing bounds the number of pending entries.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

assert_impl_all!(Scheduler: Send, Sync);

impl Scheduler {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    /// Deliver `message` into lane `priority` once the clock reaches `due`.
    ///
    /// The priority is not checked here; an invalid one surfaces from
    /// [`Scheduler::flush`].
    pub fn schedule(&self, message: Message, priority: Priority, due: Timestamp) {
        trace!(
            from = %message.from,
            to = %message.to,
            payload = message.payload.kind(),
            priority,
            due,
            "planning"
        );

        let scheduled_at = self.clock.now_ms();
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq = inner.next_seq.wrapping_add(1);
        inner.entries.insert(
            (due, seq),
            ScheduledMessage {
                message,
                priority,
                due,
                scheduled_at,
            },
        );
        inner.stats.total_scheduled += 1;
    }

    /// [`Scheduler::schedule`] relative to now.
    pub fn schedule_after(&self, message: Message, priority: Priority, delay: Duration) {
        let due = self.clock.now_ms().saturating_add(duration_ms(delay));
        self.schedule(message, priority, due);
    }

    /// Move every entry due at or before now into `bus`, oldest due time
    /// first. Returns how many entries were handed over.
    ///
    /// On a bus error the entries handed over so far and the failing entry
    /// are gone from the scheduler; the rest stay for the next call.
    pub fn flush(&self, bus: &Bus) -> Result<usize, FlushError> {
        let cutoff = self.clock.now_ms();
        let mut inner = self.lock();
        let mut committed = 0;

        while let Some(entry) = inner.entries.first_entry() {
            if entry.key().0 > cutoff {
                break;
            }

            let ScheduledMessage {
                message,
                priority,
                due,
                scheduled_at,
            } = entry.remove();
            committed += 1;

            trace!(
                from = %message.from,
                to = %message.to,
                payload = message.payload.kind(),
                priority,
                waited_ms = cutoff.saturating_sub(scheduled_at),
                late_ms = cutoff - due,
                "execution"
            );

            if let Err(source) = bus.enqueue_at(message, priority) {
                inner.stats.total_failed += 1;
                return Err(FlushError { committed, source });
            }
            inner.stats.total_flushed += 1;
        }

        Ok(committed)
    }

    pub fn pending(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Due time of the earliest entry.
    pub fn next_due(&self) -> Option<Timestamp> {
        self.lock().entries.keys().next().map(|(due, _)| *due)
    }

    /// Snapshot of pending entries in delivery order.
    pub fn scheduled(&self) -> Vec<ScheduledMessage> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        let inner = self.lock();
        SchedulerStats {
            pending: inner.entries.len(),
            ..inner.stats
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now())
            .field("pending", &self.pending())
            .finish()
    }
}
