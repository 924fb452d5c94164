use super::bus::{BusError, BusMessage, MessageBus, Subscription};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::info;

/// [`MessageBus`] over a NATS connection
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    /// Connect to any of `addresses` with user/password auth
    ///
    /// Reconnection after the initial connect is handled by the client.
    pub async fn connect(
        addresses: &[String],
        username: &str,
        password: &str,
    ) -> Result<Self, BusError> {
        let servers = addresses
            .iter()
            .map(|addr| addr.parse::<async_nats::ServerAddr>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(BusError::new)?;

        let client = async_nats::ConnectOptions::with_user_and_password(
            username.to_string(),
            password.to_string(),
        )
        .connect(servers.as_slice())
        .await
        .map_err(BusError::new)?;

        info!(servers = ?addresses, "Connected to NATS");
        Ok(Self::new(client))
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(BusError::new)
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(BusError::new)?;

        Ok(subscriber
            .map(|message| BusMessage {
                subject: message.subject.to_string(),
                reply_to: message.reply.map(|reply| reply.to_string()),
                payload: message.payload,
            })
            .boxed())
    }
}
