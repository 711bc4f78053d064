//! The entity store of one room.
//!
//! [`PeerTable`] holds the peer → transport → producer/consumer graph and
//! enforces its invariants. It is plain data: the room actor owns it and
//! is the only one touching it, so it needs no locking.

use std::collections::{BTreeMap, HashMap, HashSet};

use huddle_engine::{Consumer, Producer, WebRtcTransport};
use huddle_protocol::{
    ConsumerId, Notification, PeerId, PeerSummary, ProducerId,
    ProducerSummary, Recipient, TransportId,
};
use tokio::sync::mpsc;

use crate::RoomError;

/// Channel the room uses to push notifications to one peer's connection.
pub type PeerSender = mpsc::UnboundedSender<Notification>;

struct Peer<T: WebRtcTransport> {
    username: String,
    sender: PeerSender,
    transports: HashMap<TransportId, T>,
    producers: HashMap<ProducerId, ProducerSlot<T::Producer>>,
    consumers: HashMap<ConsumerId, ConsumerSlot<T::Consumer>>,
}

struct ProducerSlot<P> {
    producer: P,
    transport_id: TransportId,
}

struct ConsumerSlot<C> {
    consumer: C,
    transport_id: TransportId,
    resumed: bool,
}

/// Engine objects removed from the store that still need closing.
pub struct Released<T: WebRtcTransport> {
    pub transports: Vec<T>,
    pub producers: Vec<T::Producer>,
    pub consumers: Vec<T::Consumer>,
}

impl<T: WebRtcTransport> Released<T> {
    fn new() -> Self {
        Self {
            transports: Vec::new(),
            producers: Vec::new(),
            consumers: Vec::new(),
        }
    }

    /// Closes consumers, then producers, then transports.
    pub fn close_all(&self) {
        self.consumers.iter().for_each(Consumer::close);
        self.producers.iter().for_each(Producer::close);
        self.transports.iter().for_each(WebRtcTransport::close);
    }

    /// Ids of the released producers.
    pub fn producer_ids(&self) -> Vec<ProducerId> {
        self.producers.iter().map(|p| p.id().clone()).collect()
    }
}

/// A peer taken out of the store by [`PeerTable::remove_peer`].
pub struct RemovedPeer<T: WebRtcTransport> {
    pub username: String,
    pub released: Released<T>,
}

/// Peers of one room and everything they own.
///
/// Peer-scoped lookups take the caller's id and only search that peer's
/// own mappings, so an id owned by someone else is reported as not found.
pub struct PeerTable<T: WebRtcTransport> {
    peers: BTreeMap<PeerId, Peer<T>>,
}

impl<T: WebRtcTransport> Default for PeerTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WebRtcTransport> PeerTable<T> {
    pub fn new() -> Self {
        Self {
            peers: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.peers.contains_key(&peer_id)
    }

    fn peer(&self, peer_id: PeerId) -> Result<&Peer<T>, RoomError> {
        self.peers
            .get(&peer_id)
            .ok_or(RoomError::PeerNotFound(peer_id))
    }

    fn peer_mut(&mut self, peer_id: PeerId) -> Result<&mut Peer<T>, RoomError> {
        self.peers
            .get_mut(&peer_id)
            .ok_or(RoomError::PeerNotFound(peer_id))
    }

    // -----------------------------------------------------------------
    // Peers
    // -----------------------------------------------------------------

    /// Registers a peer with no media.
    ///
    /// # Errors
    /// [`RoomError::InvalidState`] if the id is already present. The room
    /// turns that into `AlreadyInRoom`, which it knows the room id for.
    pub fn add_peer(
        &mut self,
        peer_id: PeerId,
        username: String,
        sender: PeerSender,
    ) -> Result<(), RoomError> {
        if self.peers.contains_key(&peer_id) {
            return Err(RoomError::InvalidState(format!(
                "peer {peer_id} already registered"
            )));
        }
        self.peers.insert(
            peer_id,
            Peer {
                username,
                sender,
                transports: HashMap::new(),
                producers: HashMap::new(),
                consumers: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Removes a peer and everything it owns, plus every consumer other
    /// peers hold on its producers.
    pub fn remove_peer(
        &mut self,
        peer_id: PeerId,
    ) -> Result<RemovedPeer<T>, RoomError> {
        let peer = self
            .peers
            .remove(&peer_id)
            .ok_or(RoomError::PeerNotFound(peer_id))?;

        let mut released = Released::new();
        let removed: HashSet<ProducerId> =
            peer.producers.keys().cloned().collect();
        released.transports.extend(peer.transports.into_values());
        released
            .producers
            .extend(peer.producers.into_values().map(|slot| slot.producer));
        released
            .consumers
            .extend(peer.consumers.into_values().map(|slot| slot.consumer));
        self.drain_consumers_of(&removed, &mut released.consumers);

        Ok(RemovedPeer {
            username: peer.username,
            released,
        })
    }

    /// Removes every consumer, in any peer, fed by one of `producers`.
    fn drain_consumers_of(
        &mut self,
        producers: &HashSet<ProducerId>,
        out: &mut Vec<T::Consumer>,
    ) {
        if producers.is_empty() {
            return;
        }
        for peer in self.peers.values_mut() {
            let doomed: Vec<ConsumerId> = peer
                .consumers
                .iter()
                .filter(|(_, slot)| producers.contains(slot.consumer.producer_id()))
                .map(|(id, _)| id.clone())
                .collect();
            for id in doomed {
                if let Some(slot) = peer.consumers.remove(&id) {
                    out.push(slot.consumer);
                }
            }
        }
    }

    /// `(id, username)` of every peer, ordered by id.
    pub fn roster(&self) -> Vec<PeerSummary> {
        self.peers
            .iter()
            .map(|(id, peer)| PeerSummary {
                id: *id,
                username: peer.username.clone(),
            })
            .collect()
    }

    /// The roster without `peer_id`.
    pub fn roster_except(&self, peer_id: PeerId) -> Vec<PeerSummary> {
        let mut roster = self.roster();
        roster.retain(|summary| summary.id != peer_id);
        roster
    }

    // -----------------------------------------------------------------
    // Transports
    // -----------------------------------------------------------------

    pub fn add_transport(
        &mut self,
        peer_id: PeerId,
        transport: T,
    ) -> Result<(), RoomError> {
        let peer = self.peer_mut(peer_id)?;
        let id = transport.id().clone();
        if peer.transports.contains_key(&id) {
            return Err(RoomError::InvalidState(format!(
                "transport {id} already exists"
            )));
        }
        peer.transports.insert(id, transport);
        Ok(())
    }

    pub fn transport(
        &self,
        peer_id: PeerId,
        transport_id: &TransportId,
    ) -> Result<&T, RoomError> {
        self.peer(peer_id)?
            .transports
            .get(transport_id)
            .ok_or_else(|| RoomError::TransportNotFound(transport_id.clone()))
    }

    /// Removes one transport, the producers and consumers bound to it,
    /// and every consumer fed by those producers.
    pub fn remove_transport(
        &mut self,
        peer_id: PeerId,
        transport_id: &TransportId,
    ) -> Result<Released<T>, RoomError> {
        let peer = self.peer_mut(peer_id)?;
        let transport = peer
            .transports
            .remove(transport_id)
            .ok_or_else(|| RoomError::TransportNotFound(transport_id.clone()))?;

        let mut released = Released::new();
        released.transports.push(transport);

        let producer_ids: Vec<ProducerId> = peer
            .producers
            .iter()
            .filter(|(_, slot)| &slot.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &producer_ids {
            if let Some(slot) = peer.producers.remove(id) {
                released.producers.push(slot.producer);
            }
        }

        let consumer_ids: Vec<ConsumerId> = peer
            .consumers
            .iter()
            .filter(|(_, slot)| &slot.transport_id == transport_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &consumer_ids {
            if let Some(slot) = peer.consumers.remove(id) {
                released.consumers.push(slot.consumer);
            }
        }

        let removed: HashSet<ProducerId> = producer_ids.into_iter().collect();
        self.drain_consumers_of(&removed, &mut released.consumers);
        Ok(released)
    }

    // -----------------------------------------------------------------
    // Producers
    // -----------------------------------------------------------------

    /// Stores a producer created on one of the peer's transports.
    pub fn add_producer(
        &mut self,
        peer_id: PeerId,
        transport_id: &TransportId,
        producer: T::Producer,
    ) -> Result<(), RoomError> {
        let peer = self.peer_mut(peer_id)?;
        if !peer.transports.contains_key(transport_id) {
            return Err(RoomError::TransportNotFound(transport_id.clone()));
        }
        let id = producer.id().clone();
        if peer.producers.contains_key(&id) {
            return Err(RoomError::InvalidState(format!(
                "producer {id} already exists"
            )));
        }
        peer.producers.insert(
            id,
            ProducerSlot {
                producer,
                transport_id: transport_id.clone(),
            },
        );
        Ok(())
    }

    pub fn producer(
        &self,
        peer_id: PeerId,
        producer_id: &ProducerId,
    ) -> Result<&T::Producer, RoomError> {
        self.peer(peer_id)?
            .producers
            .get(producer_id)
            .map(|slot| &slot.producer)
            .ok_or_else(|| RoomError::ProducerNotFound(producer_id.clone()))
    }

    /// Looks a producer up across every peer of the room.
    ///
    /// Returns the owner along with the producer.
    pub fn find_producer(
        &self,
        producer_id: &ProducerId,
    ) -> Result<(PeerId, &T::Producer), RoomError> {
        self.peers
            .iter()
            .find_map(|(id, peer)| {
                peer.producers
                    .get(producer_id)
                    .map(|slot| (*id, &slot.producer))
            })
            .ok_or_else(|| RoomError::ProducerNotFound(producer_id.clone()))
    }

    /// Number of producers across all peers.
    pub fn producer_count(&self) -> usize {
        self.peers.values().map(|peer| peer.producers.len()).sum()
    }

    /// Every producer of the room not owned by `peer_id`.
    pub fn producers_except(&self, peer_id: PeerId) -> Vec<ProducerSummary> {
        self.peers
            .iter()
            .filter(|(id, _)| **id != peer_id)
            .flat_map(|(id, peer)| {
                peer.producers.values().map(move |slot| ProducerSummary {
                    peer_id: *id,
                    producer_id: slot.producer.id().clone(),
                    kind: slot.producer.kind(),
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------
    // Consumers
    // -----------------------------------------------------------------

    /// Stores a consumer, provided its transport and its producer are
    /// both still live.
    pub fn add_consumer(
        &mut self,
        peer_id: PeerId,
        transport_id: &TransportId,
        consumer: T::Consumer,
    ) -> Result<(), RoomError> {
        self.find_producer(consumer.producer_id())?;

        let peer = self.peer_mut(peer_id)?;
        if !peer.transports.contains_key(transport_id) {
            return Err(RoomError::TransportNotFound(transport_id.clone()));
        }
        let id = consumer.id().clone();
        if peer.consumers.contains_key(&id) {
            return Err(RoomError::InvalidState(format!(
                "consumer {id} already exists"
            )));
        }
        peer.consumers.insert(
            id,
            ConsumerSlot {
                consumer,
                transport_id: transport_id.clone(),
                resumed: false,
            },
        );
        Ok(())
    }

    /// The consumer and whether it has been resumed.
    pub fn consumer(
        &self,
        peer_id: PeerId,
        consumer_id: &ConsumerId,
    ) -> Result<(&T::Consumer, bool), RoomError> {
        self.peer(peer_id)?
            .consumers
            .get(consumer_id)
            .map(|slot| (&slot.consumer, slot.resumed))
            .ok_or_else(|| RoomError::ConsumerNotFound(consumer_id.clone()))
    }

    pub fn mark_resumed(
        &mut self,
        peer_id: PeerId,
        consumer_id: &ConsumerId,
    ) -> Result<(), RoomError> {
        let slot = self
            .peer_mut(peer_id)?
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| RoomError::ConsumerNotFound(consumer_id.clone()))?;
        slot.resumed = true;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------

    /// Pushes `notification` to every peer `recipient` covers.
    ///
    /// A peer whose connection already went away is skipped.
    pub fn notify(&self, recipient: Recipient, notification: &Notification) {
        for (id, peer) in &self.peers {
            if recipient.includes(*id) {
                let _ = peer.sender.send(notification.clone());
            }
        }
    }

    /// Removes every peer, returning everything that must be closed.
    pub(crate) fn clear(&mut self) -> Released<T> {
        let mut released = Released::new();
        for peer in std::mem::take(&mut self.peers).into_values() {
            released.transports.extend(peer.transports.into_values());
            released
                .producers
                .extend(peer.producers.into_values().map(|slot| slot.producer));
            released
                .consumers
                .extend(peer.consumers.into_values().map(|slot| slot.consumer));
        }
        released
    }
}

// =========================================================================
// Tests
// =========================================================================
