//! The message bus (context).
//!
//! The bus owns one FIFO lane per priority level and the registry of
//! systems. [`Bus::dispatch_one`] pops a single message from the
//! lowest-numbered non-empty lane and presents it to every registered
//! system in registration order.
//!
//! The lock protecting lanes and registry is released before the fan-out,
//! so systems may enqueue from inside [`System::process`](crate::System::process).
//! Lock order when both are taken: scheduler first, then bus.

use crate::error::BusError;
use crate::message::{Message, Priority};
use crate::system::{System, SystemRef};
use serde::{Deserialize, Serialize};
use static_assertions::{assert_impl_all, const_assert};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

pub const DEFAULT_PRIORITIES: usize = 2;

const_assert!(DEFAULT_PRIORITIES >= 1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub total_enqueued: u64,
    pub total_dispatched: u64,
    /// Dispatched messages dropped because their destination was `none`.
    pub total_unaddressed: u64,
    pub pending: usize,
}

struct Inner {
    lanes: Vec<VecDeque<Message>>,
    systems: Vec<SystemRef>,
    stats: BusStats,
}

impl Inner {
    fn pop(&mut self) -> Option<Message> {
        self.lanes.iter_mut().find_map(VecDeque::pop_front)
    }
}

pub struct Bus {
    num_priorities: usize,
    inner: Mutex<Inner>,
}

assert_impl_all!(Bus: Send, Sync);

impl Bus {
    /// Create a bus with `num_priorities` lanes.
    pub fn new(num_priorities: usize) -> Result<Self, BusError> {
        if num_priorities == 0 {
            return Err(BusError::NoPriorities);
        }
        Ok(Self::with_lanes(num_priorities))
    }

    fn with_lanes(num_priorities: usize) -> Self {
        Self {
            num_priorities,
            inner: Mutex::new(Inner {
                lanes: (0..num_priorities).map(|_| VecDeque::new()).collect(),
                systems: Vec::new(),
                stats: BusStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn num_priorities(&self) -> usize {
        self.num_priorities
    }

    /// Background priority, used by [`Bus::enqueue`].
    pub fn lowest_priority(&self) -> Priority {
        self.num_priorities - 1
    }

    /// Append `message` to lane `priority`.
    pub fn enqueue_at(&self, message: Message, priority: Priority) -> Result<(), BusError> {
        if priority >= self.num_priorities {
            return Err(BusError::PriorityOutOfRange {
                priority,
                levels: self.num_priorities,
            });
        }

        self.push(message, priority);
        Ok(())
    }

    /// Append `message` at the lowest priority.
    pub fn enqueue(&self, message: Message) {
        self.push(message, self.lowest_priority());
    }

    // `priority` must already be below `num_priorities`.
    fn push(&self, message: Message, priority: Priority) {
        trace!(
            from = %message.from,
            to = %message.to,
            payload = message.payload.kind(),
            priority,
            "push"
        );

        let mut inner = self.lock();
        inner.lanes[priority].push_back(message);
        inner.stats.total_enqueued += 1;
    }

    /// Add a system to the dispatch registry.
    ///
    /// Registering the same system twice makes it see every message twice.
    pub fn register(&self, system: Option<SystemRef>) -> Result<(), BusError> {
        let system = system.ok_or(BusError::MissingSystem)?;
        self.insert_system(system);
        Ok(())
    }

    /// Typed convenience over [`Bus::register`].
    pub fn add_system<S: System + 'static>(&self, system: Arc<S>) {
        self.insert_system(system);
    }

    fn insert_system(&self, system: SystemRef) {
        let id = system.id();
        let mut inner = self.lock();
        inner.systems.push(system);
        debug!(%id, registered = inner.systems.len(), "system registered");
    }

    /// Pop and fan out one message.
    ///
    /// Returns `false` without side effects when every lane is empty, `true`
    /// whenever a message was removed, whether or not anyone reacted to it.
    pub fn dispatch_one(&self) -> bool {
        let (message, systems) = {
            let mut inner = self.lock();
            let Some(message) = inner.pop() else {
                return false;
            };
            inner.stats.total_dispatched += 1;

            if message.is_unaddressed() {
                inner.stats.total_unaddressed += 1;
                trace!(from = %message.from, "dropped unaddressed message");
                return true;
            }

            (message, inner.systems.clone())
        };

        trace!(
            from = %message.from,
            to = %message.to,
            payload = message.payload.kind(),
            "process"
        );

        for system in &systems {
            system.process(&message);
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.lock().lanes.iter().map(VecDeque::len).sum()
    }

    pub fn pending_at(&self, priority: Priority) -> Option<usize> {
        self.lock().lanes.get(priority).map(VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn system_count(&self) -> usize {
        self.lock().systems.len()
    }

    pub fn stats(&self) -> BusStats {
        let inner = self.lock();
        BusStats {
            pending: inner.lanes.iter().map(VecDeque::len).sum(),
            ..inner.stats
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::with_lanes(DEFAULT_PRIORITIES)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("num_priorities", &self.num_priorities)
            .field("pending", &self.pending())
            .field("systems", &self.system_count())
            .finish()
    }
}
