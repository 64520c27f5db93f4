use std::sync::Arc;

use huddle_common::{protocol::ws::ServerEvent, room::RoomId, types::MessageView};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::registry::RoomRegistry;
use crate::store::GroupChatRecord;

/// Local delivery counts of one broadcast. Peer instances are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub group_room: usize,
    pub personal_rooms: usize,
}

/// Routes a newly persisted message to everyone who should hear about it.
#[derive(Clone)]
pub struct ChatFanout {
    registry: Arc<RoomRegistry>,
}

impl ChatFanout {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Viewers of the conversation get `new_message`; every member gets a
    /// `group_new_message` notice on their personal room. The originating
    /// connection is skipped in both.
    pub async fn broadcast_new_message(
        &self,
        group_chat: &GroupChatRecord,
        message: &MessageView,
        origin: Option<Uuid>,
    ) -> FanoutReport {
        let group_room = self
            .registry
            .emit(RoomId::group(group_chat.id), ServerEvent::NewMessage(message.clone()), origin)
            .await;

        let summary = group_chat.summary();
        let mut personal_rooms = 0;
        for member_id in &group_chat.members {
            personal_rooms += self
                .registry
                .emit(
                    RoomId::personal(*member_id),
                    ServerEvent::GroupNewMessage(summary.clone()),
                    origin,
                )
                .await;
        }

        let report = FanoutReport { group_room, personal_rooms };
        debug!(
            group_id = %group_chat.id,
            message_id = %message.id,
            group_room = report.group_room,
            personal_rooms = report.personal_rooms,
            "message fanned out"
        );
        report
    }

    /// Runs [`Self::broadcast_new_message`] on its own task so the caller never
    /// waits on delivery or the backplane.
    pub fn spawn_broadcast(
        &self,
        group_chat: GroupChatRecord,
        message: MessageView,
        origin: Option<Uuid>,
    ) -> JoinHandle<FanoutReport> {
        let fanout = self.clone();
        tokio::spawn(async move { fanout.broadcast_new_message(&group_chat, &message, origin).await })
    }
}
