//! Request dispatch: maps each signaling request to the matching
//! [`PeerSession`] operation.
//!
//! Dispatch is stateless. Everything it needs lives in the session, so the
//! same function serves the WebSocket handler and anyone driving sessions
//! directly.

use huddle_engine::MediaEngine;
use huddle_protocol::{Reply, Request};
use huddle_session::{PeerSession, SessionError};

/// Runs one request against `session` and returns the reply for the
/// sender.
///
/// Every request except `join-room` must name the room the session has
/// joined.
///
/// # Errors
/// Whatever the session operation fails with. No error leaves the session
/// in a different state than before the request.
pub async fn dispatch<E: MediaEngine>(
    session: &mut PeerSession<E>,
    request: Request,
) -> Result<Reply, SessionError> {
    if !matches!(request, Request::JoinRoom { .. }) {
        session.check_room(request.room_id())?;
    }

    match request {
        Request::JoinRoom { room_id, username } => {
            let info = session.join(room_id, username).await?;
            Ok(Reply::Joined {
                capabilities: info.capabilities,
                peers: info.peers,
            })
        }
        Request::CreateTransport { direction, .. } => {
            let params = session.create_transport(direction).await?;
            Ok(Reply::TransportCreated(params))
        }
        Request::ConnectTransport {
            transport_id,
            dtls_parameters,
            ..
        } => {
            session
                .connect_transport(transport_id, dtls_parameters)
                .await?;
            Ok(Reply::success())
        }
        Request::Produce {
            transport_id,
            kind,
            rtp_parameters,
            ..
        } => {
            let id = session.produce(transport_id, kind, rtp_parameters).await?;
            Ok(Reply::Produced { id })
        }
        Request::Consume {
            transport_id,
            producer_id,
            rtp_capabilities,
            ..
        } => {
            let params = session
                .consume(transport_id, producer_id, rtp_capabilities)
                .await?;
            Ok(Reply::Consumed(params))
        }
        Request::ResumeConsumer { consumer_id, .. } => {
            session.resume_consumer(consumer_id).await?;
            Ok(Reply::success())
        }
        Request::GetProducers { .. } => {
            let producers = session.list_producers().await?;
            Ok(Reply::Producers { producers })
        }
        Request::CloseTransport { transport_id, .. } => {
            session.close_transport(transport_id).await?;
            Ok(Reply::success())
        }
        Request::LeaveRoom { .. } => {
            session.leave().await?;
            Ok(Reply::success())
        }
    }
}
