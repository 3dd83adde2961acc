//! # Scale Bus
//!
//! Message bus and deferred-delivery scheduler for a load-cell scale,
//! together with the reactive units and collaborators that run on it.
//!
//! ## Features
//!
//! - **Priority lanes**: strict priority between lanes, FIFO within a lane
//! - **Fan-out dispatch**: every registered system sees every message and
//!   filters by its own identity
//! - **Deferred delivery**: time-ordered scheduling with commit-through-failure
//!   flush semantics
//! - **Units**: weight acquisition and coordination, driven entirely by messages
//! - **Collaborators**: load-cell averaging, smoothing filter, topic routing,
//!   edge-triggered button
//!
//! ## Quick Start
//!
//! ```rust
//! use scalebus::{Addr, Bus, Id, Message, Scheduler};
//! use std::time::Duration;
//!
//! let bus = Bus::new(2).unwrap();
//! let scheduler = Scheduler::new();
//!
//! // Deliver now at background priority, and again in a second at high priority
//! bus.enqueue(Message::to(Addr::new(Id::WeightMeter, 0)));
//! scheduler.schedule_after(Message::to(Addr::new(Id::WeightMeter, 0)), 0, Duration::from_secs(1));
//!
//! // One iteration of the driving loop
//! scheduler.flush(&bus).unwrap();
//! while bus.dispatch_one() {}
//! ```
//!
//! ## Architecture
//!
//! - [`address`] / [`message`] / [`system`] - addressing, envelope and unit contract
//! - [`bus`] - priority lanes, registry and dispatch
//! - [`scheduler`] - time-ordered deferred delivery
//! - [`driver`] - the flush-then-drain loop
//! - [`units`] - weight meter and coordination logic
//! - [`sensor`], [`filter`], [`transport`], [`button`] - external collaborators
//! - [`config`] - device configuration

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

pub mod address;
pub mod bus;
pub mod button;
pub mod config;
pub mod driver;
pub mod error;
pub mod filter;
pub mod hex;
pub mod message;
pub mod scheduler;
pub mod sensor;
pub mod system;
pub mod transport;
pub mod units;

// Re-export main public types for convenience
pub use address::{Addr, EventCode, Id, BROADCAST, NONE};
pub use bus::{Bus, BusStats};
pub use driver::{Driver, DriverError, TickReport};
pub use error::{BusError, FlushError};
pub use message::{Message, Payload, Priority};
pub use scheduler::{Clock, ManualClock, MonotonicClock, Scheduler, Timestamp};
pub use system::{System, SystemRef};
