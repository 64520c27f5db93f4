pub mod backplane;
pub mod fanout;
pub mod gate;
pub mod registry;
pub mod session;

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use huddle_common::{
    protocol::ws::{ClientEvent, ConnectedPayload, HandshakeFrame, ServerEvent},
    types::Identity,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::{sync::mpsc, time::Instant};
use tracing::{info, warn};

use crate::{
    auth::{jwt::JwtAccessTokenService, middleware::bearer_token_from_headers},
    error::{request_id_from_headers_or_generate, with_request_id_scope, ErrorCode},
    store::ChatStore,
};
use registry::RoomRegistry;
use session::{ConnectionSession, PendingConnection};

pub const CHAT_PATH: &str = "/v1/chat";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct ChatGatewayState {
    jwt_service: Arc<JwtAccessTokenService>,
    registry: Arc<RoomRegistry>,
    store: ChatStore,
    handshake_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatConnectQuery {
    token: Option<String>,
}

#[derive(Debug, Error)]
enum HandshakeError {
    #[error("authentication timed out")]
    TimedOut,
    #[error("missing authentication token")]
    MissingToken,
    #[error("invalid authentication token")]
    InvalidToken,
    #[error("connection closed during handshake")]
    Closed,
}

pub fn router(
    jwt_service: Arc<JwtAccessTokenService>,
    registry: Arc<RoomRegistry>,
    store: ChatStore,
    handshake_timeout: Duration,
) -> Router {
    let state = ChatGatewayState { jwt_service, registry, store, handshake_timeout };

    Router::new().route(CHAT_PATH, get(ws_upgrade)).with_state(state)
}

pub async fn ws_upgrade(
    State(state): State<ChatGatewayState>,
    Query(query): Query<ChatConnectQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let credential = query
        .token
        .filter(|token| !token.trim().is_empty())
        .or_else(|| bearer_token_from_headers(&headers).map(ToOwned::to_owned));
    let request_id = request_id_from_headers_or_generate(&headers);

    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| {
        with_request_id_scope(request_id, handle_socket(state, credential, socket))
    })
}

async fn handle_socket(state: ChatGatewayState, credential: Option<String>, mut socket: WebSocket) {
    let pending = PendingConnection::new();
    let connection_id = pending.id();

    let identity = match authenticate(&state, credential, &mut socket).await {
        Ok(identity) => identity,
        Err(rejection) => {
            warn!(connection_id = %connection_id, reason = %rejection, "rejecting websocket connection");
            let _ = send_event(
                &mut socket,
                &ServerEvent::error(ErrorCode::AuthInvalidToken.as_str(), rejection.to_string()),
            )
            .await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let mut session = pending.authenticate(identity);
    let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();
    if !session.activate(&state.registry, outbound_sender).await {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    info!(
        connection_id = %session.id(),
        user_id = %session.identity().user_id,
        "websocket connection established"
    );

    let connected = ServerEvent::Connected(ConnectedPayload {
        socket_id: session.id(),
        user_id: session.identity().user_id,
    });
    if send_event(&mut socket, &connected).await.is_ok() {
        run_session(&state, &session, &mut socket, outbound_receiver).await;
    }

    let rooms = session.teardown(&state.registry).await;
    info!(
        connection_id = %session.id(),
        user_id = %session.identity().user_id,
        rooms = rooms.len(),
        "websocket connection closed"
    );
}

async fn authenticate(
    state: &ChatGatewayState,
    credential: Option<String>,
    socket: &mut WebSocket,
) -> Result<Identity, HandshakeError> {
    let token = match credential {
        Some(token) => token,
        None => tokio::time::timeout(state.handshake_timeout, await_auth_frame(socket))
            .await
            .map_err(|_| HandshakeError::TimedOut)??,
    };

    state.jwt_service.verify(&token).map_err(|_| HandshakeError::InvalidToken)
}

async fn await_auth_frame(socket: &mut WebSocket) -> Result<String, HandshakeError> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(raw))) => {
                return serde_json::from_str::<HandshakeFrame>(&raw)
                    .map(|frame| frame.auth.token)
                    .map_err(|_| HandshakeError::MissingToken);
            }
            Some(Ok(Message::Binary(_))) => return Err(HandshakeError::MissingToken),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                return Err(HandshakeError::Closed)
            }
        }
    }
}

async fn run_session(
    state: &ChatGatewayState,
    session: &ConnectionSession,
    socket: &mut WebSocket,
    mut outbound_receiver: mpsc::UnboundedReceiver<ServerEvent>,
) {
    // Pings go out every HEARTBEAT_INTERVAL; an unanswered ping older than
    // HEARTBEAT_TIMEOUT ends the session.
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.reset();
    let mut awaiting_pong_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if awaiting_pong_since.is_some_and(|sent_at| sent_at.elapsed() > HEARTBEAT_TIMEOUT) {
                    warn!(connection_id = %session.id(), "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong_since.get_or_insert_with(Instant::now);
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(event) => {
                        if send_event(socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        let reply = handle_client_frame(state, session, &raw).await;
                        if send_event(socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        let reply = ServerEvent::error(
                            ErrorCode::ValidationFailed.as_str(),
                            "binary frames are not supported",
                        );
                        if send_event(socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        awaiting_pong_since = None;
                    }
                    Ok(Message::Ping(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        warn!(connection_id = %session.id(), ?error, "websocket transport error");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_client_frame(
    state: &ChatGatewayState,
    session: &ConnectionSession,
    raw: &str,
) -> ServerEvent {
    let event = match serde_json::from_str::<ClientEvent>(raw) {
        Ok(event) => event,
        Err(_) => {
            return ServerEvent::error(
                ErrorCode::ValidationFailed.as_str(),
                "invalid websocket frame payload",
            );
        }
    };

    let outcome = match event {
        ClientEvent::JoinGroup(request) => {
            gate::request_join(&state.registry, &state.store, session, &request.group_id).await
        }
        ClientEvent::LeaveGroup(request) => {
            gate::request_leave(&state.registry, session, &request.group_id).await
        }
    };

    outcome.unwrap_or_else(|rejection| {
        info!(
            connection_id = %session.id(),
            user_id = %session.identity().user_id,
            code = rejection.code().as_str(),
            "group room request rejected"
        );
        rejection.to_event()
    })
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = serde_json::to_string(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
