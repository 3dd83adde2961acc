//! The driving loop.
//!
//! Neither the bus nor the scheduler owns a thread. A [`Driver`] moves due
//! entries from the scheduler into the bus and then drains the bus, once per
//! tick.

use crate::bus::Bus;
use crate::error::FlushError;
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, trace};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("scheduler flush failed: {0}")]
    Flush(#[from] FlushError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub flushed: usize,
    pub dispatched: usize,
    /// The per-tick cap stopped dispatching with messages still queued.
    pub capped: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub dispatched: u64,
}

#[derive(Debug)]
pub struct Driver {
    bus: Arc<Bus>,
    scheduler: Arc<Scheduler>,
    max_dispatch_per_tick: Option<usize>,
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    dispatched: AtomicU64,
}

impl Driver {
    pub fn new(bus: Arc<Bus>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            bus,
            scheduler,
            max_dispatch_per_tick: None,
            ticks: AtomicU64::new(0),
            failed_ticks: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Stop draining after `limit` messages per tick. Without a cap a system
    /// that keeps re-enqueueing itself keeps the tick running.
    pub fn with_dispatch_limit(mut self, limit: Option<usize>) -> Self {
        self.max_dispatch_per_tick = limit;
        self
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// One loop iteration: flush due entries, then dispatch until the bus is
    /// empty. A flush error fails the iteration before anything is dispatched.
    pub fn tick(&self) -> Result<TickReport, DriverError> {
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let flushed = self.scheduler.flush(&self.bus).map_err(|e| {
            self.failed_ticks.fetch_add(1, Ordering::Relaxed);
            DriverError::from(e)
        })?;

        let mut report = TickReport {
            flushed,
            ..TickReport::default()
        };
        loop {
            if self.max_dispatch_per_tick.is_some_and(|limit| report.dispatched >= limit) {
                report.capped = !self.bus.is_empty();
                break;
            }
            if !self.bus.dispatch_one() {
                break;
            }
            report.dispatched += 1;
        }

        self.dispatched.fetch_add(report.dispatched as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Tick every `period` until `shutdown` turns `true` or its sender is
    /// dropped. Failed iterations are logged and the loop carries on.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(period);
        info!(?period, "driver loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    let stop = changed.is_err() || *shutdown.borrow();
                    if stop {
                        break;
                    }
                    continue;
                }
            }

            match self.tick() {
                Ok(report) if report.dispatched > 0 || report.flushed > 0 => {
                    trace!(flushed = report.flushed, dispatched = report.dispatched, "tick");
                }
                Ok(_) => {}
                Err(e) => error!("driver iteration failed: {}", e),
            }
        }

        info!(ticks = self.stats().ticks, "driver loop stopped");
    }

    pub fn stats(&self) -> DriverStats {
        DriverStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Addr, Id};
    use crate::message::Message;
    use crate::scheduler::ManualClock;
    use crate::system::System;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        hits: AtomicUsize,
    }

    impl System for Counter {
        fn id(&self) -> Id {
            Id::Logic
        }

        fn process(&self, message: &Message) {
            if message.is_addressed_to(self.id()) {
                self.hits.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn setup() -> (Arc<ManualClock>, Arc<Counter>, Driver) {
        let clock = Arc::new(ManualClock::new(0));
        let bus = Arc::new(Bus::new(2).unwrap());
        let scheduler = Arc::new(Scheduler::with_clock(clock.clone()));
        let counter = Arc::new(Counter {
            hits: AtomicUsize::new(0),
        });
        bus.add_system(counter.clone());
        (clock, counter, Driver::new(bus, scheduler))
    }

    fn ping() -> Message {
        Message::to(Addr::new(Id::Logic, 0))
    }

    #[test]
    fn test_tick_flushes_then_drains() {
        let (clock, counter, driver) = setup();
        driver.bus().enqueue(ping());
        driver.scheduler().schedule(ping(), 0, 10);

        let report = driver.tick().unwrap();
        assert_eq!(report, TickReport { flushed: 0, dispatched: 1, capped: false });

        clock.set(10);
        let report = driver.tick().unwrap();
        assert_eq!(report.flushed, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(counter.hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispatch_limit() {
        let (_clock, counter, driver) = setup();
        let driver = driver.with_dispatch_limit(Some(2));
        for _ in 0..5 {
            driver.bus().enqueue(ping());
        }

        let report = driver.tick().unwrap();
        assert_eq!(report.dispatched, 2);
        assert!(report.capped);
        assert_eq!(counter.hits.load(Ordering::SeqCst), 2);
        assert_eq!(driver.bus().pending(), 3);
    }

    #[test]
    fn test_failed_flush_fails_iteration() {
        let (_clock, counter, driver) = setup();
        driver.bus().enqueue(ping());
        driver.scheduler().schedule(ping(), 7, 0);

        assert!(matches!(driver.tick(), Err(DriverError::Flush(_))));
        assert_eq!(counter.hits.load(Ordering::SeqCst), 0);

        // The bad entry is gone; the next iteration proceeds normally.
        assert_eq!(driver.tick().unwrap().dispatched, 1);
        let stats = driver.stats();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.failed_ticks, 1);
        assert_eq!(stats.dispatched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let (_clock, counter, driver) = setup();
        let driver = Arc::new(driver);
        for _ in 0..3 {
            driver.bus().enqueue(ping());
        }

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let driver = Arc::clone(&driver);
            async move { driver.run(Duration::from_millis(10), rx).await }
        });

        time::sleep(Duration::from_millis(35)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(counter.hits.load(Ordering::SeqCst), 3);
        assert!(driver.stats().ticks >= 3);
    }
}
