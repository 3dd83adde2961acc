use crate::address::{Addr, Id, NONE};
use crate::hex;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Delivery lane index. `0` is dispatched first.
pub type Priority = usize;

/// Message body. Recipients interpret it by convention with the sender for
/// a given destination event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Payload {
    #[default]
    Empty,
    Float(f32),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Payload::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Empty => "empty",
            Payload::Float(_) => "float",
            Payload::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("-"),
            Payload::Float(value) => write!(f, "{value}"),
            Payload::Bytes(bytes) => write!(f, "0x{}", hex::to_hex_str(bytes)),
        }
    }
}

impl From<f32> for Payload {
    fn from(value: f32) -> Self {
        Payload::Float(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

/// A unit of work passed between systems.
///
/// Once handed to the bus or the scheduler a message is only moved, never
/// modified; recipients get it by shared reference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    pub from: Addr,
    pub to: Addr,
    pub payload: Payload,
}

impl Message {
    pub fn new(from: Addr, to: Addr, payload: impl Into<Payload>) -> Self {
        Self {
            from,
            to,
            payload: payload.into(),
        }
    }

    /// Message without a payload and an unsolicited source.
    pub fn to(to: Addr) -> Self {
        Self {
            from: NONE,
            to,
            payload: Payload::Empty,
        }
    }

    pub fn with_from(mut self, from: Addr) -> Self {
        self.from = from;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Whether the unit with identity `id` should react to this message.
    pub fn is_addressed_to(&self, id: Id) -> bool {
        self.to.sys == id
    }

    /// Destination is the `none` sentinel; the bus drops such messages.
    pub fn is_unaddressed(&self) -> bool {
        self.to.sys == Id::None
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} [{}]", self.from, self.to, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::BROADCAST;

    #[test]
    fn test_defaults() {
        let message = Message::default();
        assert_eq!(message.from, NONE);
        assert_eq!(message.to, NONE);
        assert!(message.payload.is_empty());
        assert!(message.is_unaddressed());
    }

    #[test]
    fn test_builder() {
        let message = Message::to(Addr::new(Id::WeightMeter, 0))
            .with_from(Addr::new(Id::Logic, 1))
            .with_payload(12.5_f32);
        assert_eq!(message.from.sys, Id::Logic);
        assert_eq!(message.payload.as_float(), Some(12.5));
        assert!(message.is_addressed_to(Id::WeightMeter));
        assert!(!message.is_addressed_to(Id::Logic));
    }

    #[test]
    fn test_broadcast_is_not_addressed_to_units() {
        let message = Message::to(BROADCAST);
        assert!(!message.is_addressed_to(Id::WeightMeter));
        assert!(!message.is_addressed_to(Id::Logic));
        assert!(!message.is_unaddressed());
    }

    #[test]
    fn test_display_bytes_as_hex() {
        let message = Message::new(NONE, Addr::new(Id::Logic, 4), vec![0x0A_u8, 0xFF]);
        assert_eq!(message.to_string(), "none:0 -> logic:4 [0x0aff]");
    }

    #[test]
    fn test_payload_json_shape() {
        let json = serde_json::to_string(&Payload::Float(1.5)).unwrap();
        assert_eq!(json, r#"{"Float":1.5}"#);
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Payload::Float(1.5));
    }
}
