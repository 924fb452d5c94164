//! Publish/subscribe seam between the registrar and the bus transport

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Error from the bus transport, passed through untouched
#[derive(Debug, Error)]
#[error(transparent)]
pub struct BusError(Box<dyn std::error::Error + Send + Sync>);

impl BusError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(source.into())
    }
}

/// A message delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub reply_to: Option<String>,
    pub payload: Bytes,
}

/// Messages arriving on one subscription
pub type Subscription = BoxStream<'static, BusMessage>;

/// Minimal publish/subscribe transport
///
/// Connection management and reconnection are the implementation's
/// business; callers see only per-call errors.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;
}

/// Published messages a [`LocalBus`] remembers; older ones are dropped
pub const PUBLISHED_LOG_CAPACITY: usize = 1024;

#[derive(Default)]
struct LocalBusState {
    /// Most recent publishes, oldest first
    published: VecDeque<BusMessage>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>,
    publish_failures: HashMap<String, String>,
    subscribe_failures: HashMap<String, String>,
}

/// In-process bus
///
/// Records the most recent published messages, fans messages out to subscribers of
/// the exact subject, and can be told to fail publishes or subscriptions
/// on a subject.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<LocalBusState>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish with a reply-to subject, as a requester would
    pub fn publish_with_reply_to(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> Result<(), BusError> {
        self.deliver(BusMessage {
            subject: subject.to_string(),
            reply_to: Some(reply_to.to_string()),
            payload,
        })
    }

    /// Messages still in the publish log for `subject`, oldest first
    pub fn published_messages(&self, subject: &str) -> Vec<BusMessage> {
        self.lock()
            .published
            .iter()
            .filter(|message| message.subject == subject)
            .cloned()
            .collect()
    }

    /// Make every later publish on `subject` fail with `message`
    pub fn fail_publishing(&self, subject: &str, message: &str) {
        self.lock()
            .publish_failures
            .insert(subject.to_string(), message.to_string());
    }

    /// Make every later subscribe on `subject` fail with `message`
    pub fn fail_subscribing(&self, subject: &str, message: &str) {
        self.lock()
            .subscribe_failures
            .insert(subject.to_string(), message.to_string());
    }

    /// Live subscriptions on `subject`
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.lock()
            .subscribers
            .get(subject)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn deliver(&self, message: BusMessage) -> Result<(), BusError> {
        let mut state = self.lock();
        if let Some(reason) = state.publish_failures.get(&message.subject) {
            return Err(BusError::new(reason.clone()));
        }

        if state.published.len() == PUBLISHED_LOG_CAPACITY {
            state.published.pop_front();
        }
        state.published.push_back(message.clone());
        if let Some(senders) = state.subscribers.get_mut(&message.subject) {
            senders.retain(|tx| tx.unbounded_send(message.clone()).is_ok());
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LocalBusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.deliver(BusMessage {
            subject: subject.to_string(),
            reply_to: None,
            payload,
        })
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let mut state = self.lock();
        if let Some(reason) = state.subscribe_failures.get(subject) {
            return Err(BusError::new(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded();
        state
            .subscribers
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(Box::pin(rx))
    }
}
