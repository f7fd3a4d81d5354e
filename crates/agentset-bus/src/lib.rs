//! The `agent.events` topic exchange (spec.md §6 "Message bus").
//!
//! `RabbitMessageBus` is the production implementation: it owns a
//! reconnecting AMQP connection, republishes `agent.status.update` events,
//! and fans consumed events out to any number of local subscribers through
//! a `tokio::sync::broadcast` channel. `InMemoryBus` is a same-process fake
//! used by tests and by single-AgentSet deployments that don't need a real
//! broker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties, ExchangeKind};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

pub const AGENT_EVENTS_EXCHANGE: &str = "agent.events";
pub const AGENT_STATUS_UPDATE_ROUTING_KEY: &str = "agent.status.update";

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusEvent {
    pub agent_id: String,
    pub status: String,
    pub mission_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connection error: {0}")]
    Connection(#[from] lapin::Error),
    #[error("bus is degraded after exhausting reconnect attempts")]
    Degraded,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_status_update(&self, event: AgentStatusEvent) -> Result<(), BusError>;

    /// Subscribe to `agent.status.update`. Each call returns an independent
    /// receiver; publication order per producer is preserved, but there is
    /// no global ordering across producers (spec.md §5).
    fn subscribe_status_updates(&self) -> broadcast::Receiver<AgentStatusEvent>;

    fn is_degraded(&self) -> bool {
        false
    }
}

/// Reconnecting AMQP-backed bus. `connect` spawns a background task that
/// keeps a channel alive, retrying with exponential backoff capped at 30s
/// for up to 5 attempts before marking the bus degraded (spec.md §4.4).
pub struct RabbitMessageBus {
    amqp_url: String,
    channel: Arc<RwLock<Option<lapin::Channel>>>,
    local_tx: broadcast::Sender<AgentStatusEvent>,
    degraded: Arc<AtomicBool>,
}

impl RabbitMessageBus {
    /// Connect (or, on failure, schedule reconnection) and start consuming
    /// `agent.status.update` into the local broadcast channel.
    pub async fn connect(amqp_url: impl Into<String>) -> Self {
        let amqp_url = amqp_url.into();
        let (local_tx, _) = broadcast::channel(1024);
        let bus = Self {
            amqp_url,
            channel: Arc::new(RwLock::new(None)),
            local_tx,
            degraded: Arc::new(AtomicBool::new(false)),
        };
        bus.spawn_connection_loop();
        bus
    }

    fn spawn_connection_loop(&self) {
        let amqp_url = self.amqp_url.clone();
        let channel_slot = self.channel.clone();
        let local_tx = self.local_tx.clone();
        let degraded = self.degraded.clone();

        tokio::spawn(async move {
            loop {
                match Self::establish(&amqp_url, &local_tx).await {
                    Ok((channel, closed)) => {
                        degraded.store(false, Ordering::SeqCst);
                        *channel_slot.write().await = Some(channel);
                        // Block until the connection drops, then reconnect.
                        closed.await;
                        *channel_slot.write().await = None;
                        tracing::warn!("agent.events bus connection lost, reconnecting");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed all reconnect attempts for agent.events bus");
                        degraded.store(true, Ordering::SeqCst);
                        // Back off one full cycle before trying the whole
                        // connect sequence again; a degraded bus still
                        // periodically retries rather than staying dead
                        // forever.
                        tokio::time::sleep(MAX_BACKOFF).await;
                    }
                }
            }
        });
    }

    /// Attempt to connect with exponential backoff, capped at 30s, up to 5
    /// attempts. Returns the live channel plus a future that resolves when
    /// the underlying connection closes.
    async fn establish(
        amqp_url: &str,
        local_tx: &broadcast::Sender<AgentStatusEvent>,
    ) -> Result<(lapin::Channel, impl std::future::Future<Output = ()>), BusError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = None;

        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            match Self::try_connect_once(amqp_url, local_tx).await {
                Ok(pair) => return Ok(pair),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "agent.events bus connect attempt failed");
                    last_err = Some(e);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        Err(last_err.unwrap_or(BusError::Degraded))
    }

    async fn try_connect_once(
        amqp_url: &str,
        local_tx: &broadcast::Sender<AgentStatusEvent>,
    ) -> Result<(lapin::Channel, impl std::future::Future<Output = ()>), BusError> {
        let connection = Connection::connect(amqp_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                AGENT_EVENTS_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                queue.name().as_str(),
                AGENT_EVENTS_EXCHANGE,
                AGENT_STATUS_UPDATE_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut consumer = channel
            .basic_consume(
                queue.name().as_str(),
                "agentset-task-delegation",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let local_tx = local_tx.clone();
        tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else { continue };
                if let Ok(event) = serde_json::from_slice::<AgentStatusEvent>(&delivery.data) {
                    let _ = local_tx.send(event);
                }
                let _ = delivery.ack(lapin::options::BasicAckOptions::default()).await;
            }
        });

        let closed = {
            let connection = connection.clone();
            async move {
                // `on_error` style close notification: poll status until the
                // connection reports a non-connected state.
                loop {
                    if !matches!(connection.status().state(), lapin::ConnectionState::Connected) {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        };

        Ok((channel, closed))
    }
}

#[async_trait]
impl MessageBus for RabbitMessageBus {
    async fn publish_status_update(&self, event: AgentStatusEvent) -> Result<(), BusError> {
        // Fire-and-forget per spec.md §5 "shared-resource policy": failures
        // are logged, not propagated as fatal to the caller's own state
        // machine, but we still return the error so callers can decide.
        let channel = self.channel.read().await;
        let Some(channel) = channel.as_ref() else {
            tracing::warn!("publish attempted while agent.events bus is disconnected");
            return Err(BusError::Degraded);
        };
        let payload = serde_json::to_vec(&event)?;
        channel
            .basic_publish(
                AGENT_EVENTS_EXCHANGE,
                AGENT_STATUS_UPDATE_ROUTING_KEY,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?
            .await?;
        Ok(())
    }

    fn subscribe_status_updates(&self) -> broadcast::Receiver<AgentStatusEvent> {
        self.local_tx.subscribe()
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

/// Same-process fake: publishing loops straight back into the local
/// broadcast channel with no network involved. Used in tests and by
/// single-process deployments (spec.md keeps RabbitMQ transport details out
/// of scope; this fake honors the same publish/subscribe contract).
pub struct InMemoryBus {
    tx: broadcast::Sender<AgentStatusEvent>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish_status_update(&self, event: AgentStatusEvent) -> Result<(), BusError> {
        let _ = self.tx.send(event);
        Ok(())
    }

    fn subscribe_status_updates(&self) -> broadcast::Receiver<AgentStatusEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_bus_delivers_to_subscriber() {
        let bus = InMemoryBus::new();
        let mut rx = bus.subscribe_status_updates();

        bus.publish_status_update(AgentStatusEvent {
            agent_id: "a1".into(),
            status: "RUNNING".into(),
            mission_id: "m1".into(),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.agent_id, "a1");
        assert_eq!(received.status, "RUNNING");
    }

    #[tokio::test]
    async fn in_memory_bus_fans_out_to_multiple_subscribers() {
        let bus = InMemoryBus::new();
        let mut rx1 = bus.subscribe_status_updates();
        let mut rx2 = bus.subscribe_status_updates();

        bus.publish_status_update(AgentStatusEvent {
            agent_id: "a1".into(),
            status: "ERROR".into(),
            mission_id: "m1".into(),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

        assert_eq!(rx1.recv().await.unwrap().status, "ERROR");
        assert_eq!(rx2.recv().await.unwrap().status, "ERROR");
    }
}
