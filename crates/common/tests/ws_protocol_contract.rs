use chrono::{TimeZone, Utc};
use huddle_common::{
    protocol::ws::{
        ClientEvent, ConnectedPayload, GroupRoomAck, GroupRoomRequest, HandshakeFrame,
        ServerEvent,
    },
    types::{GroupChatSummary, GroupChatType, MessageView},
};
use serde_json::{json, Value};
use uuid::Uuid;

fn sorted_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}

#[test]
fn client_events_decode_from_documented_frames() {
    let join: ClientEvent = serde_json::from_value(json!({
        "event": "join_group",
        "data": { "groupId": "8d6f4b8e-1f0c-4a53-9a1e-0d3bd3f0a8a1" }
    }))
    .expect("join_group frame should decode");
    assert_eq!(
        join,
        ClientEvent::JoinGroup(GroupRoomRequest {
            group_id: "8d6f4b8e-1f0c-4a53-9a1e-0d3bd3f0a8a1".to_string()
        })
    );

    let leave: ClientEvent =
        serde_json::from_value(json!({ "event": "leave_group", "data": { "groupId": "g1" } }))
            .expect("leave_group frame should decode even with a malformed id");
    assert_eq!(leave, ClientEvent::LeaveGroup(GroupRoomRequest { group_id: "g1".to_string() }));
}

#[test]
fn unknown_client_event_is_rejected() {
    let result = serde_json::from_value::<ClientEvent>(json!({
        "event": "send_message",
        "data": { "content": "hi" }
    }));
    assert!(result.is_err());
}

#[test]
fn server_event_shapes_match_wire_contract() {
    let id = Uuid::new_v4();
    let samples = [
        (
            ServerEvent::Connected(ConnectedPayload { socket_id: id, user_id: id }),
            "connected",
            &["socketId", "userId"][..],
        ),
        (ServerEvent::JoinedGroup(GroupRoomAck { group_id: id }), "joined_group", &["groupId"][..]),
        (ServerEvent::LeftGroup(GroupRoomAck { group_id: id }), "left_group", &["groupId"][..]),
        (
            ServerEvent::NewMessage(MessageView {
                id,
                content: "hello".to_string(),
                user_id: id,
                username: "alice".to_string(),
                created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
                is_read: false,
            }),
            "new_message",
            &["content", "createdAt", "id", "isRead", "userId", "username"][..],
        ),
        (
            ServerEvent::GroupNewMessage(GroupChatSummary {
                id,
                name: "team".to_string(),
                chat_type: GroupChatType::Group,
            }),
            "group_new_message",
            &["id", "name", "type"][..],
        ),
        (ServerEvent::error("NOT_A_MEMBER", "not a member"), "error", &["code", "message"][..]),
    ];

    for (event, name, expected_keys) in samples {
        assert_eq!(event.name(), name);
        let value = serde_json::to_value(&event).expect("server event should serialize");
        assert_eq!(value["event"], name);
        assert_eq!(sorted_keys(&value["data"]), expected_keys, "payload keys for {name}");

        let decoded: ServerEvent =
            serde_json::from_value(value).expect("server event should decode back");
        assert_eq!(decoded, event);
    }
}

#[test]
fn handshake_frame_carries_token_under_auth() {
    let frame: HandshakeFrame = serde_json::from_value(json!({ "auth": { "token": "abc" } }))
        .expect("handshake frame should decode");
    assert_eq!(frame.auth.token, "abc");
    assert!(serde_json::from_value::<HandshakeFrame>(json!({ "token": "abc" })).is_err());
}
