//! Coordination unit.
//!
//! Drives the periodic read cycle, smooths and publishes readings, and
//! translates button presses and remote commands into bus messages.

use super::{UnknownEvent, WeightMeterEvent};
use crate::address::{Addr, EventCode, Id, NONE};
use crate::bus::Bus;
use crate::error::TransportError;
use crate::filter::Filter;
use crate::message::{Message, Payload, Priority};
use crate::scheduler::Scheduler;
use crate::system::System;
use crate::transport::{topic_path, QoS, TopicBuf, TopicRouter, Transport};
use heapless::HistoryBuffer;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const HISTORY_LEN: usize = 16;

/// Lane used for operator-triggered reads.
pub const URGENT_PRIORITY: Priority = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum LogicEvent {
    Start = 0,
    Stop = 1,
    /// Periodic read cycle.
    Poll = 2,
    /// Reply from the weight meter, `Payload::Float(grams)`.
    Reading = 3,
    ButtonPressed = 4,
    /// Raw bytes received on the command topic.
    RemoteCommand = 5,
}

impl LogicEvent {
    pub const fn addr(self) -> Addr {
        Addr::new(Id::Logic, self as EventCode)
    }
}

impl From<LogicEvent> for EventCode {
    fn from(event: LogicEvent) -> Self {
        event as EventCode
    }
}

impl TryFrom<EventCode> for LogicEvent {
    type Error = UnknownEvent;

    fn try_from(ev: EventCode) -> Result<Self, Self::Error> {
        match ev {
            0 => Ok(Self::Start),
            1 => Ok(Self::Stop),
            2 => Ok(Self::Poll),
            3 => Ok(Self::Reading),
            4 => Ok(Self::ButtonPressed),
            5 => Ok(Self::RemoteCommand),
            other => Err(UnknownEvent(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicConfig {
    pub device_id: String,
    pub topic_prefix: String,
    pub read_period: Duration,
    pub filter_koeff: f32,
    pub qos: QoS,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            device_id: "scale-0".into(),
            topic_prefix: "scale".into(),
            read_period: Duration::from_secs(5),
            filter_koeff: 0.5,
            qos: QoS::AtMostOnce,
        }
    }
}

/// Published on the weight topic after every reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightReport {
    pub device: String,
    pub raw: f32,
    pub weight: f32,
    pub average: f32,
    pub samples: usize,
}

struct LogicState {
    running: bool,
    /// A `Poll` sits in the bus or the scheduler. At most one is ever in
    /// flight, so restarting never forks a second read cycle.
    poll_armed: bool,
    filter: Option<Filter>,
    history: HistoryBuffer<f32, HISTORY_LEN>,
    published: u32,
}

pub struct Logic {
    bus: Arc<Bus>,
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn Transport>,
    config: LogicConfig,
    weight_topic: TopicBuf,
    command_topic: TopicBuf,
    state: Mutex<LogicState>,
}

impl Logic {
    pub fn new(
        bus: Arc<Bus>,
        scheduler: Arc<Scheduler>,
        transport: Arc<dyn Transport>,
        config: LogicConfig,
    ) -> Result<Self, TransportError> {
        let weight_topic = topic_path(&[config.topic_prefix.as_str(), config.device_id.as_str(), "weight"])?;
        let command_topic = topic_path(&[config.topic_prefix.as_str(), config.device_id.as_str(), "cmd"])?;

        Ok(Self {
            bus,
            scheduler,
            transport,
            config,
            weight_topic,
            command_topic,
            state: Mutex::new(LogicState {
                running: false,
                poll_armed: false,
                filter: None,
                history: HistoryBuffer::new(),
                published: 0,
            }),
        })
    }

    /// Subscribe to the command topic and turn every payload received on it
    /// into a `RemoteCommand` message.
    pub fn attach(&self, router: &TopicRouter) -> Result<(), TransportError> {
        let bus = Arc::clone(&self.bus);
        let installed = router.add_handler(&self.command_topic, move |topic, payload| {
            debug!(topic, len = payload.len(), "remote command received");
            bus.enqueue(Message::new(NONE, LogicEvent::RemoteCommand.addr(), payload.to_vec()));
        });
        if !installed {
            warn!(topic = %self.command_topic, "command handler already installed");
        }
        self.transport.subscribe(&self.command_topic, self.config.qos)
    }

    fn state(&self) -> MutexGuard<'_, LogicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn weight_topic(&self) -> &str {
        &self.weight_topic
    }

    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn published(&self) -> u32 {
        self.state().published
    }

    /// Smoothed readings, oldest first.
    pub fn history(&self) -> Vec<f32> {
        self.state().history.oldest_ordered().copied().collect()
    }

    fn read_request() -> Message {
        Message::to(WeightMeterEvent::Read.addr()).with_from(LogicEvent::Reading.addr())
    }

    fn start(&self) {
        let rearm = {
            let mut state = self.state();
            if state.running {
                return;
            }
            state.running = true;
            !std::mem::replace(&mut state.poll_armed, true)
        };
        info!(period = ?self.config.read_period, "periodic reading started");
        if rearm {
            self.bus.enqueue(Message::to(LogicEvent::Poll.addr()));
        } else {
            debug!("poll still armed, resuming its cycle");
        }
    }

    fn stop(&self) {
        self.state().running = false;
        info!("periodic reading stopped");
    }

    fn poll(&self) {
        {
            let mut state = self.state();
            state.poll_armed = state.running;
            if !state.running {
                return;
            }
        }
        self.bus.enqueue(Self::read_request());
        self.scheduler.schedule_after(
            Message::to(LogicEvent::Poll.addr()),
            self.bus.lowest_priority(),
            self.config.read_period,
        );
    }

    fn read_now(&self) {
        if let Err(e) = self.bus.enqueue_at(Self::read_request(), URGENT_PRIORITY) {
            error!("failed to request reading: {}", e);
        }
    }

    fn reading(&self, payload: &Payload) {
        let Some(raw) = payload.as_float() else {
            warn!(payload = payload.kind(), "reading without a weight");
            return;
        };

        let report = {
            let mut state = self.state();
            let koeff = self.config.filter_koeff;
            let weight = state.filter.get_or_insert_with(|| Filter::new(koeff, raw)).filter(raw);
            state.history.write(weight);

            #[allow(clippy::cast_precision_loss)]
            let average = state.history.as_slice().iter().sum::<f32>() / state.history.len() as f32;
            WeightReport {
                device: self.config.device_id.clone(),
                raw,
                weight,
                average,
                samples: state.history.len(),
            }
        };

        let body = match serde_json::to_vec(&report) {
            Ok(body) => body,
            Err(e) => {
                error!("failed to encode weight report: {}", e);
                return;
            }
        };

        match self.transport.publish(&self.weight_topic, &body, self.config.qos) {
            Ok(()) => self.state().published += 1,
            Err(e) => warn!(topic = %self.weight_topic, "publish failed: {}", e),
        }
    }

    fn remote_command(&self, payload: &Payload) {
        let command = payload
            .as_bytes()
            .and_then(|bytes| core::str::from_utf8(bytes).ok())
            .map(str::trim);

        match command {
            Some("read") => self.read_now(),
            Some("tare") => {
                if let Err(e) = self.bus.enqueue_at(Message::to(WeightMeterEvent::Tare.addr()), URGENT_PRIORITY) {
                    error!("failed to request tare: {}", e);
                }
            }
            Some("start") => self.start(),
            Some("stop") => self.stop(),
            _ => warn!(%payload, "unknown remote command"),
        }
    }
}

impl System for Logic {
    fn id(&self) -> Id {
        Id::Logic
    }

    fn process(&self, message: &Message) {
        if !message.is_addressed_to(self.id()) {
            return;
        }

        match LogicEvent::try_from(message.to.ev) {
            Ok(LogicEvent::Start) => self.start(),
            Ok(LogicEvent::Stop) => self.stop(),
            Ok(LogicEvent::Poll) => self.poll(),
            Ok(LogicEvent::Reading) => self.reading(&message.payload),
            Ok(LogicEvent::ButtonPressed) => self.read_now(),
            Ok(LogicEvent::RemoteCommand) => self.remote_command(&message.payload),
            Err(UnknownEvent(ev)) => warn!(ev, "unknown logic event"),
        }
    }
}
