use std::fmt;

use huddle_common::{room::RoomId, types::Identity};
use tracing::debug;
use uuid::Uuid;

use super::registry::{OutboundSender, RoomRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
        })
    }
}

/// A transport that has connected but not yet proven who it is.
#[derive(Debug)]
pub struct PendingConnection {
    id: Uuid,
}

impl PendingConnection {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::Connecting
    }

    /// Attaches the verified identity. It cannot be replaced afterwards.
    pub fn authenticate(self, identity: Identity) -> ConnectionSession {
        ConnectionSession { id: self.id, identity, state: SessionState::Authenticated }
    }
}

impl Default for PendingConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ConnectionSession {
    id: Uuid,
    identity: Identity,
    state: SessionState,
}

impl ConnectionSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn personal_room(&self) -> RoomId {
        RoomId::personal(self.identity.user_id)
    }

    /// Registers the connection and joins its personal room.
    pub async fn activate(&mut self, registry: &RoomRegistry, outbound: OutboundSender) -> bool {
        if self.state != SessionState::Authenticated {
            return false;
        }
        if !registry.register(self.id, self.identity.user_id, outbound).await {
            return false;
        }

        registry.join(self.id, self.personal_room()).await;
        self.state = SessionState::Active;
        true
    }

    /// Leaves every joined room. Safe to call more than once.
    pub async fn teardown(&mut self, registry: &RoomRegistry) -> Vec<RoomId> {
        if self.state == SessionState::Disconnected {
            return Vec::new();
        }

        let left = registry.disconnect(self.id).await;
        debug!(
            connection_id = %self.id,
            user_id = %self.identity.user_id,
            rooms = left.len(),
            previous_state = %self.state,
            "connection torn down"
        );
        self.state = SessionState::Disconnected;
        left
    }
}
