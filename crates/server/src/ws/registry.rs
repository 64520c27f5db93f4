// Connection-scoped room membership.
//
// The registry is the only shared mutable state of the gateway. Emissions
// snapshot their recipients under the read lock and send after releasing it,
// so a slow or closed connection never blocks a broadcast.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use huddle_common::{protocol::ws::ServerEvent, room::RoomId};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc, RwLock},
    task::JoinHandle,
};
use tracing::{debug, warn};
use uuid::Uuid;

use super::backplane::{Backplane, LocalBackplane, RoomEnvelope};

pub type OutboundSender = mpsc::UnboundedSender<ServerEvent>;

struct ConnectionEntry {
    user_id: Uuid,
    joined_rooms: HashSet<RoomId>,
    outbound: OutboundSender,
}

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<RoomId, HashSet<Uuid>>,
    connections: HashMap<Uuid, ConnectionEntry>,
}

impl RegistryState {
    fn join(&mut self, connection_id: Uuid, room: RoomId) -> bool {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return false;
        };

        connection.joined_rooms.insert(room);
        self.rooms.entry(room).or_default().insert(connection_id)
    }

    fn leave(&mut self, connection_id: Uuid, room: RoomId) -> bool {
        if let Some(connection) = self.connections.get_mut(&connection_id) {
            connection.joined_rooms.remove(&room);
        }

        let Some(members) = self.rooms.get_mut(&room) else {
            return false;
        };
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            self.rooms.remove(&room);
        }
        removed
    }
}

pub struct RoomRegistry {
    instance_id: Uuid,
    state: RwLock<RegistryState>,
    backplane: Arc<dyn Backplane>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(Arc::new(LocalBackplane::default()))
    }
}

impl RoomRegistry {
    pub fn new(backplane: Arc<dyn Backplane>) -> Self {
        Self { instance_id: Uuid::new_v4(), state: RwLock::default(), backplane }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Makes a connection live. Rooms only ever contain registered connections.
    pub async fn register(&self, connection_id: Uuid, user_id: Uuid, outbound: OutboundSender) -> bool {
        let mut state = self.state.write().await;
        if state.connections.contains_key(&connection_id) {
            return false;
        }

        state.connections.insert(
            connection_id,
            ConnectionEntry { user_id, joined_rooms: HashSet::new(), outbound },
        );
        true
    }

    /// Returns whether the connection was newly added. Unknown connections are ignored.
    pub async fn join(&self, connection_id: Uuid, room: RoomId) -> bool {
        self.state.write().await.join(connection_id, room)
    }

    /// Returns whether the connection was a member. Empty rooms are dropped.
    pub async fn leave(&self, connection_id: Uuid, room: RoomId) -> bool {
        self.state.write().await.leave(connection_id, room)
    }

    /// Removes the connection from every room it joined, then forgets it.
    pub async fn disconnect(&self, connection_id: Uuid) -> Vec<RoomId> {
        let mut state = self.state.write().await;
        let Some(mut joined) = state
            .connections
            .get(&connection_id)
            .map(|connection| connection.joined_rooms.iter().copied().collect::<Vec<_>>())
        else {
            return Vec::new();
        };
        joined.sort();

        for room in &joined {
            state.leave(connection_id, *room);
        }
        state.connections.remove(&connection_id);

        joined
    }

    /// Delivers `event` to every live connection in `room` except `except`, then
    /// forwards it to peer instances. Returns the number of local deliveries.
    pub async fn emit(&self, room: RoomId, event: ServerEvent, except: Option<Uuid>) -> usize {
        let envelope = RoomEnvelope { origin_instance: self.instance_id, room, except, event };
        let delivered = self.deliver_local(&envelope).await;

        if let Err(error) = self.backplane.publish(&envelope).await {
            warn!(?error, room = %room, "failed to publish room event to backplane");
        }

        delivered
    }

    async fn deliver_local(&self, envelope: &RoomEnvelope) -> usize {
        let recipients = {
            let state = self.state.read().await;
            let Some(members) = state.rooms.get(&envelope.room) else {
                return 0;
            };

            members
                .iter()
                .filter(|connection_id| Some(**connection_id) != envelope.except)
                .filter_map(|connection_id| {
                    state
                        .connections
                        .get(connection_id)
                        .map(|connection| (*connection_id, connection.outbound.clone()))
                })
                .collect::<Vec<_>>()
        };

        let mut delivered = 0;
        for (connection_id, outbound) in recipients {
            if outbound.send(envelope.event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(connection_id = %connection_id, room = %envelope.room, "dropping event for closed connection");
            }
        }
        delivered
    }

    /// Delivers envelopes published by peer instances to local room members.
    pub fn spawn_backplane_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let mut inbound = self.backplane.subscribe();

        tokio::spawn(async move {
            loop {
                match inbound.recv().await {
                    Ok(envelope) if envelope.origin_instance == registry.instance_id => {}
                    Ok(envelope) => {
                        registry.deliver_local(&envelope).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "backplane receiver lagged, room events were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn rooms_of(&self, connection_id: Uuid) -> Option<Vec<RoomId>> {
        let state = self.state.read().await;
        state.connections.get(&connection_id).map(|connection| {
            let mut rooms = connection.joined_rooms.iter().copied().collect::<Vec<_>>();
            rooms.sort();
            rooms
        })
    }

    pub async fn members_of(&self, room: RoomId) -> Vec<Uuid> {
        let state = self.state.read().await;
        let mut members =
            state.rooms.get(&room).map(|set| set.iter().copied().collect()).unwrap_or_else(Vec::new);
        members.sort();
        members
    }

    pub async fn user_of(&self, connection_id: Uuid) -> Option<Uuid> {
        self.state.read().await.connections.get(&connection_id).map(|connection| connection.user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }
}
