// Cross-instance transport for room emissions.
//
// Every emission is delivered to local room members first and then published
// here as a `RoomEnvelope`. Peers deliver envelopes from other instances to
// their own local members and drop the ones they published themselves.

use std::{future::Future, pin::Pin, time::Duration};

use anyhow::{bail, Context, Result};
use huddle_common::{protocol::ws::ServerEvent, room::RoomId};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgListener, PgPool};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

pub const ROOM_EVENTS_CHANNEL: &str = "huddle_room_events";
const DEFAULT_BUFFER: usize = 1_024;
// PostgreSQL rejects NOTIFY payloads of 8000 bytes or more.
const MAX_NOTIFY_PAYLOAD_BYTES: usize = 7_999;
const LISTENER_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEnvelope {
    pub origin_instance: Uuid,
    pub room: RoomId,
    pub except: Option<Uuid>,
    pub event: ServerEvent,
}

pub type BackplaneFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

pub trait Backplane: Send + Sync {
    fn publish<'a>(&'a self, envelope: &'a RoomEnvelope) -> BackplaneFuture<'a>;

    fn subscribe(&self) -> broadcast::Receiver<RoomEnvelope>;
}

/// In-process backplane. Registries sharing one instance behave like peers.
pub struct LocalBackplane {
    sender: broadcast::Sender<RoomEnvelope>,
}

impl LocalBackplane {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for LocalBackplane {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl Backplane for LocalBackplane {
    fn publish<'a>(&'a self, envelope: &'a RoomEnvelope) -> BackplaneFuture<'a> {
        Box::pin(async move {
            // No subscribers is not an error.
            let _ = self.sender.send(envelope.clone());
            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<RoomEnvelope> {
        self.sender.subscribe()
    }
}

/// `LISTEN`/`NOTIFY` backplane shared by every instance on one database.
pub struct PostgresBackplane {
    pool: PgPool,
    inbound: broadcast::Sender<RoomEnvelope>,
    listener_task: JoinHandle<()>,
}

impl PostgresBackplane {
    pub async fn connect(pool: PgPool) -> Result<Self> {
        let mut listener = PgListener::connect_with(&pool)
            .await
            .context("failed to open backplane listener connection")?;
        listener
            .listen(ROOM_EVENTS_CHANNEL)
            .await
            .with_context(|| format!("failed to LISTEN on {ROOM_EVENTS_CHANNEL}"))?;

        let (inbound, _) = broadcast::channel(DEFAULT_BUFFER);
        let listener_task = tokio::spawn(forward_notifications(listener, inbound.clone()));

        Ok(Self { pool, inbound, listener_task })
    }
}

impl Drop for PostgresBackplane {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

impl Backplane for PostgresBackplane {
    fn publish<'a>(&'a self, envelope: &'a RoomEnvelope) -> BackplaneFuture<'a> {
        Box::pin(async move {
            let payload = encode_notify_payload(envelope)?;

            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(ROOM_EVENTS_CHANNEL)
                .bind(payload)
                .execute(&self.pool)
                .await
                .context("failed to publish room envelope")?;

            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<RoomEnvelope> {
        self.inbound.subscribe()
    }
}

fn encode_notify_payload(envelope: &RoomEnvelope) -> Result<String> {
    let payload = serde_json::to_string(envelope).context("failed to encode room envelope")?;
    if payload.len() > MAX_NOTIFY_PAYLOAD_BYTES {
        bail!(
            "room envelope for {} is {} bytes, above the {MAX_NOTIFY_PAYLOAD_BYTES} byte NOTIFY limit",
            envelope.room,
            payload.len()
        );
    }

    Ok(payload)
}

async fn forward_notifications(mut listener: PgListener, inbound: broadcast::Sender<RoomEnvelope>) {
    loop {
        match listener.recv().await {
            Ok(notification) => {
                match serde_json::from_str::<RoomEnvelope>(notification.payload()) {
                    Ok(envelope) => {
                        let _ = inbound.send(envelope);
                    }
                    Err(error) => {
                        warn!(?error, channel = ROOM_EVENTS_CHANNEL, "discarding malformed room envelope");
                    }
                }
            }
            Err(error) => {
                // PgListener reconnects on the next recv.
                warn!(?error, "backplane listener lost its connection");
                tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                debug!("retrying backplane listener");
            }
        }
    }
}
