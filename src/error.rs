use crate::message::Priority;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("number of priority levels must be greater than 0")]
    NoPriorities,
    #[error("the system can not be absent")]
    MissingSystem,
    #[error("priority {priority} out of range, bus has {levels} level(s)")]
    PriorityOutOfRange { priority: Priority, levels: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("sample count must be greater than 0")]
    NoSamples,
    #[error("load cell is disconnected")]
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("the input length {0} is odd")]
    OddLength(usize),
    #[error("non-hex characters in input")]
    NonHex,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// A flush stopped at a bus error.
///
/// `committed` counts the entries removed from the scheduler, the failing
/// one included. Entries after it stay scheduled for the next flush.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("flush stopped after {committed} committed entries: {source}")]
pub struct FlushError {
    pub committed: usize,
    pub source: BusError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("invalid topic `{0}`")]
    InvalidTopic(String),
    #[error("topic exceeds {0} bytes")]
    TopicTooLong(usize),
}
