//! Publish/subscribe transport boundary.
//!
//! The bus core never talks to the network directly. Systems publish
//! through a [`Transport`], and inbound payloads arrive through a
//! [`TopicRouter`] whose handlers translate them into bus messages.
//!
//! Topic filters follow the usual hierarchical rules: `+` matches exactly
//! one `/`-separated segment, `#` matches the rest of the topic (including
//! nothing), and wildcards at the start of a filter never match topics
//! beginning with `$`.

use crate::error::TransportError;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const MAX_TOPIC_LEN: usize = 128;

pub type TopicBuf = ArrayString<MAX_TOPIC_LEN>;

/// Whether `topic` matches the subscription `filter`.
pub fn match_topic(filter: &str, topic: &str) -> bool {
    if filter.is_empty() && topic.is_empty() {
        return true;
    }
    if filter.is_empty() || topic.is_empty() {
        return false;
    }
    if filter == "#" {
        return !topic.starts_with('$');
    }
    if filter.starts_with('+') && topic.starts_with('$') {
        return false;
    }

    if let Some(plus) = filter.find('+') {
        if topic.get(..plus) == Some(&filter[..plus]) {
            let rest_filter = &filter[plus + 1..];
            let rest_topic = topic[plus..]
                .find('/')
                .map_or("", |slash| &topic[plus + slash..]);
            return match_topic(rest_filter, rest_topic);
        }
    }

    if filter.ends_with('#') {
        let prefix = filter.len().saturating_sub(2);
        return filter
            .get(..prefix)
            .is_some_and(|head| topic.get(..prefix).unwrap_or(topic) == head);
    }

    filter == topic
}

/// Join segments with `/` into a bounded topic buffer.
pub fn topic_path(segments: &[&str]) -> Result<TopicBuf, TransportError> {
    let mut topic = TopicBuf::new();
    for (index, segment) in segments.iter().enumerate() {
        if index > 0 {
            topic
                .try_push('/')
                .map_err(|_| TransportError::TopicTooLong(MAX_TOPIC_LEN))?;
        }
        topic
            .try_push_str(segment)
            .map_err(|_| TransportError::TopicTooLong(MAX_TOPIC_LEN))?;
    }
    Ok(topic)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

pub trait Transport: Send + Sync {
    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError>;
    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError>;
}

pub type TopicHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Filter -> handler registry for fully received inbound payloads.
#[derive(Default)]
pub struct TopicRouter {
    handlers: Mutex<Vec<(String, TopicHandler)>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, TopicHandler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` if a handler is already registered for `filter`.
    pub fn add_handler<F>(&self, filter: &str, handler: F) -> bool
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        let mut handlers = self.lock();
        if handlers.iter().any(|(existing, _)| existing == filter) {
            return false;
        }
        handlers.push((filter.to_owned(), Arc::new(handler)));
        true
    }

    pub fn remove_handler(&self, filter: &str) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| existing != filter);
        handlers.len() != before
    }

    /// Hand `payload` to the first handler whose filter matches `topic`.
    pub fn route(&self, topic: &str, payload: &[u8]) -> bool {
        let handler = self
            .lock()
            .iter()
            .find(|(filter, _)| match_topic(filter, topic))
            .map(|(_, handler)| Arc::clone(handler));

        match handler {
            Some(handler) => {
                handler(topic, payload);
                true
            }
            None => {
                debug!(topic, "no handler, message ignored");
                false
            }
        }
    }
}

/// One received fragment. The first fragment of a message carries its
/// topic; every fragment carries the total payload length.
#[derive(Debug, Clone, Copy)]
pub struct InboundChunk<'a> {
    pub topic: Option<&'a str>,
    pub data: &'a [u8],
    pub total_len: usize,
}

/// Reassembles fragmented inbound payloads.
#[derive(Debug, Default)]
pub struct InboundAssembler {
    in_flight: Option<(String, Vec<u8>)>,
}

impl InboundAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment; yields `(topic, payload)` once the payload is whole.
    pub fn push(&mut self, chunk: InboundChunk<'_>) -> Option<(String, Vec<u8>)> {
        if let Some(topic) = chunk.topic {
            if self.in_flight.is_some() {
                warn!(topic, "new message started before previous one completed");
            }
            self.in_flight = Some((topic.to_owned(), Vec::with_capacity(chunk.total_len)));
        }

        let Some((_, payload)) = self.in_flight.as_mut() else {
            warn!(len = chunk.data.len(), "fragment without a message, dropped");
            return None;
        };
        payload.extend_from_slice(chunk.data);

        if payload.len() >= chunk.total_len {
            return self.in_flight.take();
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Published {
    pub topic: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// In-process broker.
///
/// Published payloads are logged to an outbox and, when a subscription
/// matches, delivered back through the router in `chunk_size` fragments.
pub struct LoopbackTransport {
    router: Arc<TopicRouter>,
    connected: AtomicBool,
    chunk_size: usize,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    outbox: Mutex<Vec<Published>>,
    assembler: Mutex<InboundAssembler>,
}

impl LoopbackTransport {
    pub const DEFAULT_CHUNK_SIZE: usize = 64;

    pub fn new(router: Arc<TopicRouter>) -> Self {
        Self {
            router,
            connected: AtomicBool::new(true),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            subscriptions: Mutex::new(Vec::new()),
            outbox: Mutex::new(Vec::new()),
            assembler: Mutex::new(InboundAssembler::new()),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
        info!(connected, "loopback link state changed");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Everything published so far.
    pub fn outbox(&self) -> Vec<Published> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Simulate a payload arriving from the broker.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> bool {
        let mut completed = None;
        {
            let mut assembler = self.assembler.lock().unwrap_or_else(PoisonError::into_inner);
            let mut chunks = payload.chunks(self.chunk_size).peekable();
            let mut first = true;
            if chunks.peek().is_none() {
                completed = assembler.push(InboundChunk {
                    topic: Some(topic),
                    data: &[],
                    total_len: 0,
                });
            }
            for data in chunks {
                let chunk = InboundChunk {
                    topic: first.then_some(topic),
                    data,
                    total_len: payload.len(),
                };
                first = false;
                if let Some(done) = assembler.push(chunk) {
                    completed = Some(done);
                }
            }
        }

        match completed {
            Some((topic, payload)) => self.router.route(&topic, &payload),
            None => false,
        }
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(filter, _)| match_topic(filter, topic))
    }
}

impl Transport for LoopbackTransport {
    fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        if filter.is_empty() {
            return Err(TransportError::InvalidTopic(filter.to_owned()));
        }
        info!(filter, "subscribing");
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        subscriptions.retain(|(existing, _)| existing != filter);
        subscriptions.push((filter.to_owned(), qos));
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| existing != filter);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(TransportError::InvalidTopic(topic.to_owned()));
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Published {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
                qos,
            });

        if self.is_subscribed(topic) {
            self.inject(topic, payload);
        }
        Ok(())
    }
}
