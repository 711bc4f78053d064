//! Room manager: creates, tracks, and tears down rooms by key.
//!
//! A room moves Absent → Active → Absent. It is spawned on the first join
//! for its key and removed as soon as its last peer leaves. Both edges are
//! taken under the map lock, which is never held across an engine call.

use std::collections::HashMap;

use huddle_engine::MediaEngine;
use huddle_protocol::{PeerId, PeerSummary, RoomId};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::room::spawn_room;
use crate::{JoinInfo, PeerSender, RoomConfig, RoomError, RoomHandle};

/// How many times a join retries when the room closes under it.
const JOIN_ATTEMPTS: usize = 3;

/// Read-only view of one room, for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub room_id: RoomId,
    pub exists: bool,
    pub peer_count: usize,
    pub peers: Vec<PeerSummary>,
}

/// Manages all active rooms.
///
/// Shared by every connection handler (wrap it in an `Arc`).
pub struct RoomManager<E: MediaEngine> {
    engine: E,
    config: RoomConfig,
    /// Active rooms, keyed by room key.
    rooms: Mutex<HashMap<RoomId, RoomHandle<E>>>,
}

impl<E: MediaEngine> RoomManager<E> {
    /// Creates a new, empty room manager.
    pub fn new(engine: E, config: RoomConfig) -> Self {
        Self {
            engine,
            config,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Returns the live room for `room_id`, spawning it if there is none.
    ///
    /// Lookup and spawn happen under one lock, so concurrent first joins
    /// get the same room and the engine sees a single router creation. A
    /// registered room whose actor has stopped is replaced.
    pub async fn get_or_create_room(&self, room_id: &RoomId) -> RoomHandle<E> {
        let mut rooms = self.rooms.lock().await;
        if let Some(handle) = rooms.get(room_id) {
            if !handle.is_closed() {
                return handle.clone();
            }
            tracing::debug!(%room_id, "replacing closed room");
        }

        let handle =
            spawn_room(room_id.clone(), self.engine.clone(), self.config.clone());
        rooms.insert(room_id.clone(), handle.clone());
        tracing::info!(%room_id, "room created");
        handle
    }

    /// Returns the live room for `room_id`, if any.
    pub async fn get_room(&self, room_id: &RoomId) -> Option<RoomHandle<E>> {
        let rooms = self.rooms.lock().await;
        rooms.get(room_id).filter(|handle| !handle.is_closed()).cloned()
    }

    /// Adds a peer to a room, creating the room if needed.
    ///
    /// If the room closes between lookup and join, the join is retried
    /// against a fresh room.
    ///
    /// # Errors
    /// [`RoomError::AlreadyInRoom`] if the peer is already there, or
    /// [`RoomError::Engine`] if the room's router could not be created.
    pub async fn join_room(
        &self,
        room_id: &RoomId,
        peer_id: PeerId,
        username: &str,
        sender: PeerSender,
    ) -> Result<(RoomHandle<E>, JoinInfo), RoomError> {
        for _ in 0..JOIN_ATTEMPTS {
            let handle = self.get_or_create_room(room_id).await;
            match handle.join(peer_id, username.to_owned(), sender.clone()).await {
                Ok(info) => return Ok((handle, info)),
                Err(RoomError::Unavailable(_)) => {
                    tracing::debug!(%room_id, %peer_id, "room closed under join, retrying");
                }
                Err(e) => {
                    if matches!(e, RoomError::Engine(_)) {
                        self.remove_room_if_empty(room_id).await;
                    }
                    return Err(e);
                }
            }
        }
        Err(RoomError::Unavailable(room_id.clone()))
    }

    /// Removes a peer from its room, tearing the room down if it is now
    /// empty. Returns the number of peers left.
    pub async fn leave_room(
        &self,
        room_id: &RoomId,
        peer_id: PeerId,
    ) -> Result<usize, RoomError> {
        let handle = self
            .get_room(room_id)
            .await
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;

        let remaining = handle.leave(peer_id).await?;
        if remaining == 0 {
            self.remove_room_if_empty(room_id).await;
        }
        Ok(remaining)
    }

    /// Closes and unregisters the room if it has no peers.
    ///
    /// The room itself decides: a join that reached it first keeps it
    /// alive. Returns `true` if the room is gone.
    pub async fn remove_room_if_empty(&self, room_id: &RoomId) -> bool {
        let Some(handle) = self.rooms.lock().await.get(room_id).cloned() else {
            return false;
        };

        let closed = match handle.try_close().await {
            Ok(closed) => closed,
            Err(RoomError::Unavailable(_)) => true,
            Err(_) => false,
        };
        if !closed {
            return false;
        }

        let mut rooms = self.rooms.lock().await;
        // Only drop the entry if nobody replaced it in the meantime.
        if rooms
            .get(room_id)
            .is_some_and(|current| current.same_room(&handle))
        {
            rooms.remove(room_id);
            tracing::info!(%room_id, "room removed");
        }
        true
    }

    /// Returns the status of a room. A room exists while it has peers; one
    /// that is absent, closing, or not yet joined reports `exists: false`.
    pub async fn room_status(&self, room_id: &RoomId) -> RoomStatus {
        let info = match self.get_room(room_id).await {
            Some(handle) => handle.info().await.ok(),
            None => None,
        };
        match info {
            Some(info) => RoomStatus {
                room_id: room_id.clone(),
                exists: info.peer_count > 0,
                peer_count: info.peer_count,
                peers: info.peers,
            },
            None => RoomStatus {
                room_id: room_id.clone(),
                exists: false,
                peer_count: 0,
                peers: Vec::new(),
            },
        }
    }

    /// Returns the number of live rooms.
    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.lock().await;
        rooms.values().filter(|handle| !handle.is_closed()).count()
    }

    /// Lists all live room keys.
    pub async fn room_ids(&self) -> Vec<RoomId> {
        let rooms = self.rooms.lock().await;
        rooms
            .iter()
            .filter(|(_, handle)| !handle.is_closed())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Shuts every room down and forgets them.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle<E>> = {
            let mut rooms = self.rooms.lock().await;
            rooms.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            let _ = handle.shutdown().await;
        }
        tracing::info!(rooms = handles.len(), "all rooms shut down");
    }
}
