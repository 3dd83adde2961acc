use super::UnknownEvent;
use crate::address::{Addr, EventCode, Id};
use crate::bus::Bus;
use crate::message::Message;
use crate::sensor::{LoadCell, Scale};
use crate::system::System;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

pub const DEFAULT_AVG_SAMPLES: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum WeightMeterEvent {
    /// Reply to the sender with `Payload::Float(grams)`.
    Read = 0,
    Tare = 1,
}

impl WeightMeterEvent {
    pub const fn addr(self) -> Addr {
        Addr::new(Id::WeightMeter, self as EventCode)
    }
}

impl From<WeightMeterEvent> for EventCode {
    fn from(event: WeightMeterEvent) -> Self {
        event as EventCode
    }
}

impl TryFrom<EventCode> for WeightMeterEvent {
    type Error = UnknownEvent;

    fn try_from(ev: EventCode) -> Result<Self, Self::Error> {
        match ev {
            0 => Ok(Self::Read),
            1 => Ok(Self::Tare),
            other => Err(UnknownEvent(other)),
        }
    }
}

/// Weight acquisition unit.
pub struct WeightMeter<L> {
    bus: Arc<Bus>,
    scale: Mutex<Scale<L>>,
    avg_samples: u8,
    tare_samples: u8,
}

impl<L: LoadCell> WeightMeter<L> {
    pub fn new(bus: Arc<Bus>, scale: Scale<L>, avg_samples: u8, tare_samples: u8) -> Self {
        Self {
            bus,
            scale: Mutex::new(scale),
            avg_samples,
            tare_samples,
        }
    }

    fn scale(&self) -> MutexGuard<'_, Scale<L>> {
        self.scale.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Direct access to the scale, e.g. to change a simulated load.
    pub fn with_scale<R>(&self, f: impl FnOnce(&mut Scale<L>) -> R) -> R {
        f(&mut self.scale())
    }

    fn read(&self, request: &Message) {
        let weight = match self.scale().read_units(self.avg_samples) {
            Ok(weight) => weight,
            Err(e) => {
                error!("weight acquisition failed: {}", e);
                return;
            }
        };
        info!(grams = weight, reply_to = %request.from, "weight read");

        self.bus.enqueue(Message::new(request.to, request.from, weight));
    }

    fn tare(&self) {
        if let Err(e) = self.scale().tare(self.tare_samples) {
            error!("tare failed: {}", e);
        }
    }
}

impl<L: LoadCell> System for WeightMeter<L> {
    fn id(&self) -> Id {
        Id::WeightMeter
    }

    fn process(&self, message: &Message) {
        if !message.is_addressed_to(self.id()) {
            return;
        }

        match WeightMeterEvent::try_from(message.to.ev) {
            Ok(WeightMeterEvent::Read) => self.read(message),
            Ok(WeightMeterEvent::Tare) => self.tare(),
            Err(UnknownEvent(ev)) => warn!(ev, "unknown weight meter event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use crate::sensor::SimulatedLoadCell;

    fn setup() -> (Arc<Bus>, WeightMeter<SimulatedLoadCell>) {
        let bus = Arc::new(Bus::new(2).unwrap());
        let scale = Scale::with_tare(SimulatedLoadCell::new(10_000), 4).unwrap();
        let meter = WeightMeter::new(bus.clone(), scale, 4, 4);
        (bus, meter)
    }

    #[test]
    fn test_event_codes() {
        assert_eq!(EventCode::from(WeightMeterEvent::Tare), 1);
        assert_eq!(WeightMeterEvent::try_from(0), Ok(WeightMeterEvent::Read));
        assert_eq!(WeightMeterEvent::try_from(9), Err(UnknownEvent(9)));
        assert_eq!(WeightMeterEvent::Read.addr(), Addr::new(Id::WeightMeter, 0));
    }

    #[test]
    fn test_ignores_other_destinations() {
        let (bus, meter) = setup();
        meter.process(&Message::to(Addr::new(Id::Logic, 0)));
        assert!(bus.is_empty());
    }

    #[test]
    fn test_read_replies_to_sender() {
        let (bus, meter) = setup();
        meter.with_scale(|scale| scale.cell_mut().set_load(100.0));

        let caller = Addr::new(Id::Logic, 2);
        meter.process(&Message::new(caller, WeightMeterEvent::Read.addr(), Payload::Empty));

        assert_eq!(bus.pending_at(1), Some(1));
        let reply = collect_one(&bus);
        assert_eq!(reply.from, WeightMeterEvent::Read.addr());
        assert_eq!(reply.to, caller);
        let grams = reply.payload.as_float().unwrap();
        assert!((grams - 100.0).abs() < 0.05, "got {grams}");
    }

    #[test]
    fn test_tare_zeroes_current_load() {
        let (bus, meter) = setup();
        meter.with_scale(|scale| scale.cell_mut().set_load(40.0));
        meter.process(&Message::to(WeightMeterEvent::Tare.addr()));
        meter.process(&Message::new(Addr::new(Id::Logic, 2), WeightMeterEvent::Read.addr(), Payload::Empty));

        assert_eq!(collect_one(&bus).payload.as_float(), Some(0.0));
    }

    fn collect_one(bus: &Bus) -> Message {
        struct Grab(Mutex<Option<Message>>);
        impl System for Grab {
            fn id(&self) -> Id {
                Id::Logic
            }
            fn process(&self, message: &Message) {
                *self.0.lock().unwrap() = Some(message.clone());
            }
        }

        let grab = Arc::new(Grab(Mutex::new(None)));
        bus.add_system(grab.clone());
        assert!(bus.dispatch_one());
        let message = grab.0.lock().unwrap().take();
        message.unwrap()
    }
}
