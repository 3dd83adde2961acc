use scalebus::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Collector {
    seen: Mutex<Vec<u16>>,
}

impl System for Collector {
    fn id(&self) -> Id {
        Id::WeightMeter
    }

    fn process(&self, message: &Message) {
        if message.is_addressed_to(self.id()) {
            self.seen.lock().unwrap().push(message.to.ev);
        }
    }
}

fn create_test_message(ev: u16) -> Message {
    Message::to(Addr::new(Id::WeightMeter, ev))
}

fn setup(levels: usize) -> (Arc<ManualClock>, Scheduler, Bus, Arc<Collector>) {
    let clock = Arc::new(ManualClock::new(0));
    let scheduler = Scheduler::with_clock(clock.clone());
    let bus = Bus::new(levels).unwrap();
    let collector = Arc::new(Collector {
        seen: Mutex::new(Vec::new()),
    });
    bus.add_system(collector.clone());
    (clock, scheduler, bus, collector)
}

#[test]
fn test_schedule_after_waits_for_delay() {
    let (clock, scheduler, bus, _) = setup(2);
    scheduler.schedule_after(create_test_message(1), 0, Duration::from_millis(250));

    clock.advance(Duration::from_millis(249));
    assert_eq!(scheduler.flush(&bus), Ok(0));
    assert_eq!(scheduler.pending(), 1);
    assert!(bus.is_empty());

    clock.advance(Duration::from_millis(1));
    assert_eq!(scheduler.flush(&bus), Ok(1));
    assert!(scheduler.is_empty());
    assert_eq!(bus.pending_at(0), Some(1));
    assert_eq!(bus.pending_at(1), Some(0));
}

#[test]
fn test_flush_never_moves_future_entries() {
    let (clock, scheduler, bus, _) = setup(1);
    scheduler.schedule(create_test_message(1), 0, 100);
    scheduler.schedule(create_test_message(2), 0, 101);

    clock.set(100);
    assert_eq!(scheduler.flush(&bus), Ok(1));
    assert_eq!(scheduler.next_due(), Some(101));
}

#[test]
fn test_flushed_entries_keep_due_order_across_lanes() {
    let (clock, scheduler, bus, collector) = setup(2);
    scheduler.schedule(create_test_message(3), 1, 30);
    scheduler.schedule(create_test_message(1), 1, 10);
    scheduler.schedule(create_test_message(2), 1, 20);
    scheduler.schedule(create_test_message(0), 0, 40);

    clock.set(40);
    assert_eq!(scheduler.flush(&bus), Ok(4));
    while bus.dispatch_one() {}

    // Lane 0 first, then lane 1 in due order
    assert_eq!(*collector.seen.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn test_failure_on_third_of_five_entries() {
    let (clock, scheduler, bus, collector) = setup(2);
    for ev in 0..5_u16 {
        let priority = if ev == 2 { 42 } else { 1 };
        scheduler.schedule(create_test_message(ev), priority, u64::from(ev));
    }

    clock.set(10);
    let err = scheduler.flush(&bus).unwrap_err();
    assert_eq!(
        err,
        FlushError {
            committed: 3,
            source: BusError::PriorityOutOfRange { priority: 42, levels: 2 },
        }
    );
    assert_eq!(scheduler.pending(), 2);

    // Only the two untouched entries are attempted again.
    assert_eq!(scheduler.flush(&bus), Ok(2));
    assert!(scheduler.is_empty());

    while bus.dispatch_one() {}
    assert_eq!(*collector.seen.lock().unwrap(), vec![0, 1, 3, 4]);
}

#[test]
fn test_entries_after_failure_that_are_not_yet_due_stay() {
    let (clock, scheduler, bus, _) = setup(1);
    scheduler.schedule(create_test_message(0), 3, 5);
    scheduler.schedule(create_test_message(1), 0, 50);

    clock.set(10);
    assert_eq!(scheduler.flush(&bus).unwrap_err().committed, 1);
    assert_eq!(scheduler.next_due(), Some(50));
}

#[test]
fn test_stats_track_lifecycle() {
    let (clock, scheduler, bus, _) = setup(1);
    scheduler.schedule(create_test_message(0), 0, 1);
    scheduler.schedule(create_test_message(1), 0, 2);
    scheduler.schedule(create_test_message(2), 0, 100);

    clock.set(2);
    scheduler.flush(&bus).unwrap();

    let stats = scheduler.stats();
    assert_eq!(stats.total_scheduled, 3);
    assert_eq!(stats.total_flushed, 2);
    assert_eq!(stats.total_failed, 0);
    assert_eq!(stats.pending, 1);
}

#[test]
fn test_monotonic_clock_scheduler_flushes_immediate_entries() {
    let scheduler = Scheduler::new();
    let bus = Bus::new(1).unwrap();
    scheduler.schedule_after(create_test_message(0), 0, Duration::ZERO);
    assert_eq!(scheduler.flush(&bus), Ok(1));

    scheduler.schedule_after(create_test_message(1), 0, Duration::from_secs(3600));
    assert_eq!(scheduler.flush(&bus), Ok(0));
    assert_eq!(scheduler.pending(), 1);
}
