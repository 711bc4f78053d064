//! The per-peer session: one connection's view of the room it joined.
//!
//! Every operation validates against the room's store first, then calls
//! the media engine, then commits the new entity back to the room. The
//! room is never locked across an engine call, so a commit can fail if
//! the peer was removed in the meantime. Whatever the engine created for
//! a failed commit is closed before the error is returned.

use std::sync::Arc;

use huddle_engine::{
    Consumer, MediaEngine, Producer, Router, TransportOptions, WebRtcTransport,
};
use huddle_protocol::{
    ConsumerId, ConsumerParams, DtlsParameters, MediaKind, PeerId, ProducerId,
    ProducerSummary, RoomId, RtpCapabilities, RtpParameters, TransportDirection,
    TransportId, TransportParams,
};
use huddle_room::{JoinInfo, PeerSender, RoomError, RoomHandle, RoomManager};
use serde::{Deserialize, Serialize};

use crate::SessionError;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration shared by every session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Options for every WebRTC transport a session creates.
    pub transport: TransportOptions,
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not in a room.
    Connected,
    /// A peer of exactly one room.
    Joined,
    /// Terminal. Every operation fails with [`SessionError::Disconnected`].
    Disconnected,
}

enum Phase<E: MediaEngine> {
    Connected,
    Joined { room: RoomHandle<E> },
    Disconnected,
}

// ---------------------------------------------------------------------------
// PeerSession
// ---------------------------------------------------------------------------

/// Drives one peer through join, media negotiation, and leave.
///
/// Owned by the connection handler. Dropping a joined session removes the
/// peer from its room in the background.
pub struct PeerSession<E: MediaEngine> {
    peer_id: PeerId,
    rooms: Arc<RoomManager<E>>,
    config: SessionConfig,
    notifications: PeerSender,
    phase: Phase<E>,
}

impl<E: MediaEngine> PeerSession<E> {
    /// Creates a connected session. Room notifications for this peer are
    /// delivered to `notifications`.
    pub fn new(
        peer_id: PeerId,
        rooms: Arc<RoomManager<E>>,
        config: SessionConfig,
        notifications: PeerSender,
    ) -> Self {
        Self {
            peer_id,
            rooms,
            config,
            notifications,
            phase: Phase::Connected,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn state(&self) -> SessionState {
        match self.phase {
            Phase::Connected => SessionState::Connected,
            Phase::Joined { .. } => SessionState::Joined,
            Phase::Disconnected => SessionState::Disconnected,
        }
    }

    /// The room this session joined, if any.
    pub fn room_id(&self) -> Option<&RoomId> {
        match &self.phase {
            Phase::Joined { room } => Some(room.room_id()),
            _ => None,
        }
    }

    /// Fails unless the session is joined to `room_id`.
    ///
    /// # Errors
    /// [`SessionError::NotJoined`] before join, or a room-not-found error
    /// when `room_id` names a room other than the joined one.
    pub fn check_room(&self, room_id: &RoomId) -> Result<(), SessionError> {
        let room = self.joined_room()?;
        if room.room_id() != room_id {
            return Err(RoomError::RoomNotFound(room_id.clone()).into());
        }
        Ok(())
    }

    fn joined_room(&self) -> Result<&RoomHandle<E>, SessionError> {
        match &self.phase {
            Phase::Joined { room } => Ok(room),
            Phase::Connected => Err(SessionError::NotJoined),
            Phase::Disconnected => Err(SessionError::Disconnected),
        }
    }

    /// Joins `room_id`, creating the room if this is its first peer.
    ///
    /// Returns the router capabilities and the peers already present.
    pub async fn join(
        &mut self,
        room_id: RoomId,
        username: String,
    ) -> Result<JoinInfo, SessionError> {
        match &self.phase {
            Phase::Connected => {}
            Phase::Joined { room } => {
                return Err(SessionError::AlreadyJoined(room.room_id().clone()));
            }
            Phase::Disconnected => return Err(SessionError::Disconnected),
        }

        let (room, info) = self
            .rooms
            .join_room(&room_id, self.peer_id, &username, self.notifications.clone())
            .await?;
        tracing::info!(%room_id, peer_id = %self.peer_id, %username, "peer joined");
        self.phase = Phase::Joined { room };
        Ok(info)
    }

    /// Creates a WebRTC transport on the room's router.
    ///
    /// The direction is informational; both directions get the same kind
    /// of transport.
    pub async fn create_transport(
        &self,
        direction: TransportDirection,
    ) -> Result<TransportParams, SessionError> {
        let room = self.joined_room()?;
        let router = room.router(self.peer_id).await?;
        let transport = router
            .create_webrtc_transport(&self.config.transport)
            .await?;
        let params = transport.connection_params();

        if let Err(e) = room.add_transport(self.peer_id, transport.clone()).await {
            transport.close();
            return Err(e.into());
        }
        tracing::debug!(
            peer_id = %self.peer_id,
            transport_id = %params.id,
            %direction,
            "transport created"
        );
        Ok(params)
    }

    /// Completes the DTLS handshake parameters of one of this peer's
    /// transports.
    pub async fn connect_transport(
        &self,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), SessionError> {
        let room = self.joined_room()?;
        let transport = room.transport(self.peer_id, transport_id).await?;
        transport.connect(dtls_parameters).await?;
        Ok(())
    }

    /// Starts sending media on one of this peer's transports. Every other
    /// peer is told about the new producer.
    pub async fn produce(
        &self,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, SessionError> {
        let room = self.joined_room()?;
        let transport = room.transport(self.peer_id, transport_id.clone()).await?;
        let producer = transport.produce(kind, rtp_parameters).await?;
        let producer_id = producer.id().clone();

        if let Err(e) = room
            .add_producer(self.peer_id, transport_id, producer.clone())
            .await
        {
            producer.close();
            return Err(e.into());
        }
        tracing::debug!(peer_id = %self.peer_id, %producer_id, %kind, "producer created");
        Ok(producer_id)
    }

    /// Subscribes to another peer's producer. The consumer starts paused;
    /// call [`resume_consumer`](Self::resume_consumer) once the client is
    /// ready for media.
    pub async fn consume(
        &self,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerParams, SessionError> {
        let room = self.joined_room()?;
        let (router, transport) = room
            .prepare_consume(self.peer_id, transport_id.clone(), producer_id.clone())
            .await?;
        if !router.can_consume(&producer_id, &rtp_capabilities) {
            return Err(SessionError::IncompatibleCapabilities(producer_id));
        }

        let consumer = transport
            .consume(producer_id, rtp_capabilities, true)
            .await?;
        let params = ConsumerParams {
            id: consumer.id().clone(),
            producer_id: consumer.producer_id().clone(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        };

        if let Err(e) = room
            .add_consumer(self.peer_id, transport_id, consumer.clone())
            .await
        {
            consumer.close();
            return Err(e.into());
        }
        tracing::debug!(
            peer_id = %self.peer_id,
            consumer_id = %params.id,
            producer_id = %params.producer_id,
            "consumer created"
        );
        Ok(params)
    }

    /// Starts media flow on a paused consumer. Resuming twice is a no-op.
    pub async fn resume_consumer(
        &self,
        consumer_id: ConsumerId,
    ) -> Result<(), SessionError> {
        let room = self.joined_room()?;
        let (consumer, resumed) =
            room.consumer(self.peer_id, consumer_id.clone()).await?;
        if resumed {
            return Ok(());
        }
        consumer.resume().await?;
        room.mark_resumed(self.peer_id, consumer_id).await?;
        Ok(())
    }

    /// Lists every producer in the room except this peer's own.
    pub async fn list_producers(&self) -> Result<Vec<ProducerSummary>, SessionError> {
        let room = self.joined_room()?;
        Ok(room.producers(self.peer_id).await?)
    }

    /// Closes one of this peer's transports and everything bound to it.
    pub async fn close_transport(
        &self,
        transport_id: TransportId,
    ) -> Result<(), SessionError> {
        let room = self.joined_room()?;
        room.close_transport(self.peer_id, transport_id).await?;
        Ok(())
    }

    /// Leaves the room and returns to [`SessionState::Connected`]. The
    /// session may join again afterwards.
    ///
    /// A room or peer that is already gone counts as left. Any other
    /// failure keeps the session joined.
    pub async fn leave(&mut self) -> Result<(), SessionError> {
        let room_id = self.joined_room()?.room_id().clone();
        match self.rooms.leave_room(&room_id, self.peer_id).await {
            Ok(_) => {
                tracing::info!(%room_id, peer_id = %self.peer_id, "peer left");
            }
            Err(
                RoomError::RoomNotFound(_)
                | RoomError::PeerNotFound(_)
                | RoomError::Unavailable(_),
            ) => {
                tracing::debug!(%room_id, peer_id = %self.peer_id, "peer already gone from room");
            }
            Err(e) => return Err(e.into()),
        }
        self.phase = Phase::Connected;
        Ok(())
    }

    /// Ends the session, leaving the room if joined. Idempotent.
    pub async fn disconnect(&mut self) {
        let phase = std::mem::replace(&mut self.phase, Phase::Disconnected);
        if let Phase::Joined { room } = phase {
            let room_id = room.room_id().clone();
            match self.rooms.leave_room(&room_id, self.peer_id).await {
                Ok(remaining) => {
                    tracing::info!(%room_id, peer_id = %self.peer_id, remaining, "peer disconnected");
                }
                Err(e) => {
                    tracing::debug!(%room_id, peer_id = %self.peer_id, error = %e, "leave on disconnect failed");
                }
            }
        }
    }
}

impl<E: MediaEngine> Drop for PeerSession<E> {
    fn drop(&mut self) {
        let Phase::Joined { room } = &self.phase else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(peer_id = %self.peer_id, "session dropped outside a runtime, room not cleaned up");
            return;
        };

        let rooms = Arc::clone(&self.rooms);
        let room_id = room.room_id().clone();
        let peer_id = self.peer_id;
        runtime.spawn(async move {
            if let Err(e) = rooms.leave_room(&room_id, peer_id).await {
                tracing::debug!(%room_id, %peer_id, error = %e, "cleanup after drop failed");
            }
        });
    }
}

impl<E: MediaEngine> std::fmt::Debug for PeerSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("state", &self.state())
            .field("room_id", &self.room_id())
            .finish()
    }
}
