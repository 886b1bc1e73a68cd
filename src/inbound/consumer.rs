//! NATS event consumer
//!
//! One queue subscription per process; replicas share the queue group
//! so each event lands on exactly one of them. The loop never exits:
//! when the subscription ends (connection loss, server restart) it
//! resubscribes after a short pause.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use super::dispatch;
use crate::config::{AgentConfig, TransportConfig};
use crate::messages::InboundEvent;
use crate::transport::{NatsTransport, TransportError};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

pub struct EventConsumer {
    pool: PgPool,
    transport: Arc<NatsTransport>,
    agent: AgentConfig,
    subject: String,
    queue_group: String,
}

impl EventConsumer {
    pub fn new(
        pool: PgPool,
        transport: Arc<NatsTransport>,
        agent: AgentConfig,
        config: &TransportConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            agent,
            subject: config.inbound_subject.clone(),
            queue_group: config.queue_group.clone(),
        }
    }

    pub async fn run(self) -> ! {
        info!(
            subject = %self.subject,
            queue_group = %self.queue_group,
            "Event consumer started"
        );

        loop {
            match self.consume().await {
                Ok(()) => warn!("Event subscription ended; resubscribing"),
                Err(e) => error!(error = %e, "Event subscription failed; resubscribing"),
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }

    async fn consume(&self) -> Result<(), TransportError> {
        let mut subscriber = self
            .transport
            .subscribe_queue(&self.subject, &self.queue_group)
            .await?;

        while let Some(message) = subscriber.next().await {
            let event: InboundEvent = match serde_json::from_slice(&message.payload) {
                Ok(event) => event,
                Err(e) => {
                    error!(
                        error = %e,
                        subject = %message.subject,
                        "Malformed inbound event; dropped"
                    );
                    continue;
                }
            };

            let event_type = event.type_name();
            let creditor_id = event.creditor_id();
            match dispatch(&self.pool, &self.agent, event).await {
                Ok(true) => debug!(event = event_type, creditor_id, "Event applied"),
                Ok(false) => {}
                Err(e) => {
                    // The event is lost; the periodic account snapshots
                    // and the reconciliation sweeps re-converge whatever
                    // state it would have changed.
                    error!(
                        error = %e,
                        event = event_type,
                        creditor_id,
                        "Event application failed"
                    );
                }
            }
        }

        Ok(())
    }
}
