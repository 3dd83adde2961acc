use crate::address::Id;
use crate::message::Message;
use std::sync::Arc;

/// A reactive unit registered with a [`Bus`](crate::bus::Bus).
///
/// Every dispatched message is presented to every registered system. An
/// implementation must ignore messages whose destination is not its own
/// identity before looking at the destination event:
///
/// ```rust
/// use scalebus::{Id, Message, System};
///
/// struct Beeper;
///
/// impl System for Beeper {
///     fn id(&self) -> Id {
///         Id::Logic
///     }
///
///     fn process(&self, message: &Message) {
///         if !message.is_addressed_to(self.id()) {
///             return;
///         }
///         // branch on message.to.ev
///     }
/// }
/// ```
///
/// `process` takes `&self` because the bus shares ownership of each system
/// with whoever else holds a handle to it. Mutable state lives behind the
/// implementation's own lock. Systems may enqueue or schedule further
/// messages from inside `process`.
pub trait System: Send + Sync {
    /// Constant for the lifetime of the system.
    fn id(&self) -> Id;

    fn process(&self, message: &Message);
}

/// Shared handle to a registered system.
pub type SystemRef = Arc<dyn System>;
