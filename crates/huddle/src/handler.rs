//! Per-connection handler: frame reading, request routing, notification
//! delivery, and cleanup.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Spawn a reader task that forwards frames and flags closure
//!   2. Loop: run requests one at a time, forward room notifications
//!   3. On close, idle timeout, or server shutdown: disconnect the session

use std::sync::Arc;

use huddle_engine::MediaEngine;
use huddle_protocol::{
    Codec, ErrorKind, PeerId, RequestEnvelope, RoomId, ServerMessage,
};
use huddle_session::PeerSession;
use huddle_transport::{Connection, WebSocketConnection};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::dispatch::dispatch;
use crate::server::ServerState;
use crate::HuddleError;

/// Inbound frames buffered while a request is running.
const FRAME_BUFFER: usize = 32;

/// The correlation id of a frame whose request did not decode.
#[derive(Deserialize)]
struct EnvelopeId {
    id: u64,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<E, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<E, C>>,
) -> Result<(), HuddleError>
where
    E: MediaEngine,
    C: Codec,
{
    let conn_id = conn.id();
    let peer_id = PeerId(conn_id.into_inner());
    tracing::debug!(%conn_id, %peer_id, "handling new connection");

    let conn = Arc::new(conn);
    let (frames_tx, mut frames) = mpsc::channel(FRAME_BUFFER);
    let (closed_tx, mut closed) = watch::channel(false);
    let reader = tokio::spawn(read_frames(Arc::clone(&conn), frames_tx, closed_tx));

    let (notify_tx, mut notifications) = mpsc::unbounded_channel();
    let mut session = PeerSession::new(
        peer_id,
        Arc::clone(&state.rooms),
        state.session_config.clone(),
        notify_tx,
    );

    let result = serve(
        &conn,
        &state,
        &mut session,
        &mut frames,
        &mut closed,
        &mut notifications,
    )
    .await;

    session.disconnect().await;
    reader.abort();
    let _ = conn.close().await;
    tracing::info!(%peer_id, "connection finished");
    result
}

/// The request/notification loop. Returns when the connection should end.
async fn serve<E, C>(
    conn: &WebSocketConnection,
    state: &ServerState<E, C>,
    session: &mut PeerSession<E>,
    frames: &mut mpsc::Receiver<Vec<u8>>,
    closed: &mut watch::Receiver<bool>,
    notifications: &mut mpsc::UnboundedReceiver<huddle_protocol::Notification>,
) -> Result<(), HuddleError>
where
    E: MediaEngine,
    C: Codec,
{
    let peer_id = session.peer_id();
    let mut shutdown = state.shutdown.subscribe();
    let mut last_frame = Instant::now();

    loop {
        tokio::select! {
            _ = server_stopping(&mut shutdown) => {
                tracing::info!(%peer_id, "server shutting down, closing connection");
                return Ok(());
            }
            Some(event) = notifications.recv() => {
                send_message(conn, &state.codec, &ServerMessage::Notification { event }).await?;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    tracing::info!(%peer_id, "connection closed");
                    return Ok(());
                };
                last_frame = Instant::now();
                if !handle_frame(conn, state, session, closed, &frame).await? {
                    return Ok(());
                }
            }
            () = idle_expired(state.idle_timeout.map(|t| last_frame + t)) => {
                tracing::info!(%peer_id, "connection idle, closing");
                return Ok(());
            }
        }
    }
}

/// Decodes and runs one request, then replies to the sender.
///
/// Returns `false` if the connection closed while the request ran.
async fn handle_frame<E, C>(
    conn: &WebSocketConnection,
    state: &ServerState<E, C>,
    session: &mut PeerSession<E>,
    closed: &mut watch::Receiver<bool>,
    frame: &[u8],
) -> Result<bool, HuddleError>
where
    E: MediaEngine,
    C: Codec,
{
    let peer_id = session.peer_id();
    let envelope: RequestEnvelope = match state.codec.decode(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Echo the id when only the request body is bad.
            let id = state
                .codec
                .decode::<EnvelopeId>(frame)
                .map_or(0, |envelope| envelope.id);
            tracing::debug!(%peer_id, id, error = %e, "failed to decode request");
            let reply = ServerMessage::Error {
                id,
                kind: ErrorKind::BadRequest,
                error: e.to_string(),
            };
            send_message(conn, &state.codec, &reply).await?;
            return Ok(true);
        }
    };

    let RequestEnvelope { id, request } = envelope;
    let name = request.name();
    let joined = session.room_id().cloned();

    let result = {
        let op = dispatch(session, request);
        tokio::pin!(op);
        tokio::select! {
            result = &mut op => result,
            () = connection_closed(closed) => {
                finish_abandoned(op, state, peer_id, joined.as_ref(), name).await;
                return Ok(false);
            }
        }
    };

    let reply = match result {
        Ok(result) => ServerMessage::Response { id, result },
        Err(e) => {
            tracing::debug!(%peer_id, request = name, error = %e, "request failed");
            ServerMessage::Error {
                id,
                kind: e.kind(),
                error: e.to_string(),
            }
        }
    };
    send_message(conn, &state.codec, &reply).await?;
    Ok(true)
}

/// Lets a request whose connection is gone run to completion while the
/// peer is removed from its room, then drops the result.
///
/// The request's commit finds the peer missing and closes whatever the
/// engine created for it.
async fn finish_abandoned<E, C, F, T>(
    op: F,
    state: &ServerState<E, C>,
    peer_id: PeerId,
    joined: Option<&RoomId>,
    name: &'static str,
) where
    E: MediaEngine,
    C: Codec,
    F: std::future::Future<Output = T>,
{
    tracing::debug!(%peer_id, request = name, "connection closed mid-request");
    match joined {
        Some(room_id) => {
            let (_, left) = tokio::join!(op, state.rooms.leave_room(room_id, peer_id));
            if let Err(e) = left {
                tracing::debug!(%peer_id, %room_id, error = %e, "leave after close failed");
            }
        }
        None => {
            op.await;
        }
    }
}

/// Forwards frames until the connection closes, then raises `closed`.
async fn read_frames(
    conn: Arc<WebSocketConnection>,
    frames: mpsc::Sender<Vec<u8>>,
    closed: watch::Sender<bool>,
) {
    let conn_id = conn.id();
    loop {
        match conn.recv().await {
            Ok(Some(data)) => {
                if frames.send(data).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        }
    }
    closed.send_replace(true);
}

async fn connection_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn server_stopping(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn idle_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn send_message(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    message: &ServerMessage,
) -> Result<(), HuddleError> {
    let bytes = codec.encode(message)?;
    conn.send(&bytes).await?;
    Ok(())
}
