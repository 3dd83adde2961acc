//! Message addressing.
//!
//! Every [`Message`](crate::message::Message) names its sender and its
//! recipient with an [`Addr`]: the identity of a reactive unit plus a
//! unit-local event code. Event codes are private to the owning unit; the
//! bus never interprets them.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Unit-local event code.
pub type EventCode = u16;

/// Identity of a reactive unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum Id {
    /// Unsolicited or system-generated source. Never a valid destination.
    None = 0,
    /// Reserved broadcast destination marker.
    All = 1,
    WeightMeter = 2,
    Logic = 3,
}

impl Id {
    pub const fn value(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Id::None => "none",
            Id::All => "all",
            Id::WeightMeter => "weight-meter",
            Id::Logic => "logic",
        };
        f.write_str(name)
    }
}

/// Source or destination of a message: `(unit, event)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Addr {
    pub sys: Id,
    pub ev: EventCode,
}

impl Addr {
    pub const fn new(sys: Id, ev: EventCode) -> Self {
        Self { sys, ev }
    }
}

impl Default for Addr {
    fn default() -> Self {
        NONE
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sys, self.ev)
    }
}

/// Address of a message nobody sent or nobody should receive.
pub const NONE: Addr = Addr::new(Id::None, 0);

/// Reserved broadcast address. The bus does not treat it specially and the
/// units in this crate only react to their own identity, so a message sent
/// here reaches nobody.
pub const BROADCAST: Addr = Addr::new(Id::All, 0xFFFF);
