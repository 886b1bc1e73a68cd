//! NATS-backed transport
//!
//! One client serves both directions: the flusher publishes outbound
//! command signals, the event consumer takes a queue subscription so
//! replicas share the inbound stream. The client reconnects on its own;
//! unflushed messages surface as errors and stay in the outbox.

use async_trait::async_trait;

use super::{MessageTransport, TransportError};

pub struct NatsTransport {
    client: async_nats::Client,
}

impl NatsTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::info!(url = %url, "NATS connection established");
        Ok(Self { client })
    }

    /// Queue subscription shared by consumer replicas.
    pub async fn subscribe_queue(
        &self,
        subject: &str,
        queue_group: &str,
    ) -> Result<async_nats::Subscriber, TransportError> {
        self.client
            .queue_subscribe(subject.to_string(), queue_group.to_string())
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }
}

#[async_trait]
impl MessageTransport for NatsTransport {
    fn name(&self) -> &'static str {
        "nats"
    }

    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.client
            .publish(subject.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Flush(e.to_string()))
    }
}
