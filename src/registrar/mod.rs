//! Collector registration over the message bus
//!
//! A component announces itself once on `vcap.component.announce` and then
//! answers every message on `vcap.component.discover` with a fresh
//! announcement sent to the message's reply-to subject.

mod bus;
mod messages;
mod nats;

pub use bus::{
    BusError, BusMessage, LocalBus, MessageBus, Subscription, PUBLISHED_LOG_CAPACITY,
};
pub use messages::{
    AnnounceComponentMessage, ANNOUNCE_COMPONENT_MESSAGE_SUBJECT,
    DISCOVER_COMPONENT_MESSAGE_SUBJECT,
};
pub use nats::NatsBus;

use crate::component::Component;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("failed to subscribe to vcap.component.discover: {0}")]
    Subscribe(#[source] BusError),

    #[error("failed to publish to vcap.component.announce: {0}")]
    Publish(#[source] BusError),

    #[error("failed to encode announce message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Announces components to the collector and answers discovery requests
#[derive(Clone)]
pub struct CollectorRegistrar {
    bus: Arc<dyn MessageBus>,
}

impl CollectorRegistrar {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Subscribe to discovery, then publish the announcement
    ///
    /// Both steps finish before this returns. The discovery responder keeps
    /// running for as long as the bus delivers messages. Bus errors are
    /// returned as-is and not retried.
    pub async fn register_with_collector(
        &self,
        component: &Component,
    ) -> Result<(), RegistrarError> {
        let announcement = encode_announcement(component)?;

        let discoveries = self
            .bus
            .subscribe(DISCOVER_COMPONENT_MESSAGE_SUBJECT)
            .await
            .map_err(RegistrarError::Subscribe)?;

        let responder = respond_to_discovery(self.bus.clone(), component.clone(), discoveries);
        tokio::spawn(responder.instrument(component.span().clone()));

        self.bus
            .publish(ANNOUNCE_COMPONENT_MESSAGE_SUBJECT, announcement)
            .await
            .map_err(RegistrarError::Publish)?;

        info!(
            parent: component.span(),
            subject = ANNOUNCE_COMPONENT_MESSAGE_SUBJECT,
            host = %component.status_addr(),
            "Announced component to collector"
        );
        Ok(())
    }
}

fn encode_announcement(component: &Component) -> Result<Bytes, serde_json::Error> {
    let message = AnnounceComponentMessage::new(component);
    Ok(Bytes::from(serde_json::to_vec(&message)?))
}

/// Reply to each discovery request with a freshly derived announcement
async fn respond_to_discovery(
    bus: Arc<dyn MessageBus>,
    component: Component,
    mut discoveries: Subscription,
) {
    while let Some(request) = discoveries.next().await {
        let Some(reply_to) = request.reply_to else {
            debug!("Ignoring discovery request without reply subject");
            continue;
        };

        let announcement = match encode_announcement(&component) {
            Ok(announcement) => announcement,
            Err(e) => {
                warn!(error = %e, "Failed to encode discovery reply");
                continue;
            }
        };

        match bus.publish(&reply_to, announcement).await {
            Ok(()) => debug!(reply_to = %reply_to, "Answered discovery request"),
            Err(e) => warn!(reply_to = %reply_to, error = %e, "Failed to answer discovery request"),
        }
    }

    debug!("Discovery subscription closed");
}

#[cfg(test)]
#[path = "registrar_test.rs"]
mod tests;
