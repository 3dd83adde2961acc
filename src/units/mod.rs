pub mod logic;
pub mod weight_meter;

pub use logic::{Logic, LogicConfig, LogicEvent, WeightReport};
pub use weight_meter::{WeightMeter, WeightMeterEvent};

use crate::address::EventCode;

/// Event code that no variant of a unit's event enum claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownEvent(pub EventCode);
