use crate::bus::Bus;
use crate::error::BusError;
use crate::message::{Message, Priority};
use std::sync::Arc;
use tracing::debug;

/// Edge-triggered push button.
///
/// Each transition into the active level enqueues one copy of the
/// configured message. Holding the button or releasing it sends nothing.
#[derive(Debug)]
pub struct PushButton {
    bus: Arc<Bus>,
    message: Message,
    priority: Priority,
    active_level: bool,
    level: bool,
    presses: u32,
}

impl PushButton {
    /// Button idling at the inactive level. Active-low like the board's
    /// pull-up wiring when `active_level` is `false`.
    pub fn new(bus: Arc<Bus>, message: Message, priority: Priority, active_level: bool) -> Self {
        Self {
            bus,
            message,
            priority,
            active_level,
            level: !active_level,
            presses: 0,
        }
    }

    /// Sample the input line. Returns `Ok(true)` when a press was emitted.
    pub fn update(&mut self, level: bool) -> Result<bool, BusError> {
        let pressed = level == self.active_level && self.level != self.active_level;
        self.level = level;
        if !pressed {
            return Ok(false);
        }

        self.bus.enqueue_at(self.message.clone(), self.priority)?;
        self.presses += 1;
        debug!(presses = self.presses, to = %self.message.to, "button pressed");
        Ok(true)
    }

    /// Full press-and-release cycle.
    pub fn click(&mut self) -> Result<bool, BusError> {
        let pressed = self.update(self.active_level)?;
        self.update(!self.active_level)?;
        Ok(pressed)
    }

    pub fn presses(&self) -> u32 {
        self.presses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Addr, Id};

    fn setup(active_level: bool) -> (Arc<Bus>, PushButton) {
        let bus = Arc::new(Bus::new(2).unwrap());
        let message = Message::to(Addr::new(Id::Logic, 3));
        let button = PushButton::new(bus.clone(), message, 0, active_level);
        (bus, button)
    }

    #[test]
    fn test_fires_once_per_edge() {
        let (bus, mut button) = setup(false);
        assert!(!button.update(true).unwrap());
        assert!(button.update(false).unwrap());
        assert!(!button.update(false).unwrap());
        assert!(!button.update(true).unwrap());
        assert!(button.update(false).unwrap());

        assert_eq!(button.presses(), 2);
        assert_eq!(bus.pending_at(0), Some(2));
    }

    #[test]
    fn test_click() {
        let (bus, mut button) = setup(true);
        assert!(button.click().unwrap());
        assert!(button.click().unwrap());
        assert_eq!(bus.pending(), 2);
    }

    #[test]
    fn test_bad_priority_is_reported() {
        let bus = Arc::new(Bus::new(1).unwrap());
        let mut button = PushButton::new(bus, Message::to(Addr::new(Id::Logic, 3)), 4, true);
        assert!(button.update(true).is_err());
        assert_eq!(button.presses(), 0);
    }
}
