//! Room actor: an isolated Tokio task that owns one room.
//!
//! Each room runs in its own task, communicating with the outside world
//! through an mpsc channel. The actor owns the room's router and its
//! [`PeerTable`]; every structural change to the room is a command, so
//! changes are serialized without locks.
//!
//! The actor never awaits the media engine except once, at startup, to
//! create the router. Callers snapshot what they need (router, transport,
//! consumer handles), talk to the engine themselves, and come back with a
//! commit command the actor re-validates.

use huddle_engine::{
    ConsumerOf, MediaEngine, Producer, ProducerOf, Router, RouterOf,
    TransportOf, WebRtcTransport,
};
use huddle_protocol::{
    ConsumerId, Notification, PeerId, PeerSummary, ProducerId,
    ProducerSummary, Recipient, RoomId, RtpCapabilities, TransportId,
};
use tokio::sync::{mpsc, oneshot};

use crate::store::{PeerSender, PeerTable};
use crate::{RoomConfig, RoomError};

type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

/// Commands sent to a room actor through its channel.
///
/// Every variant carries a reply channel; the caller sends the command
/// and waits on it.
pub(crate) enum RoomCommand<E: MediaEngine> {
    Join {
        peer_id: PeerId,
        username: String,
        sender: PeerSender,
        reply: Reply<JoinInfo>,
    },
    Leave {
        peer_id: PeerId,
        reply: Reply<usize>,
    },
    Router {
        peer_id: PeerId,
        reply: Reply<RouterOf<E>>,
    },
    AddTransport {
        peer_id: PeerId,
        transport: TransportOf<E>,
        reply: Reply<()>,
    },
    Transport {
        peer_id: PeerId,
        transport_id: TransportId,
        reply: Reply<TransportOf<E>>,
    },
    CloseTransport {
        peer_id: PeerId,
        transport_id: TransportId,
        reply: Reply<()>,
    },
    AddProducer {
        peer_id: PeerId,
        transport_id: TransportId,
        producer: ProducerOf<E>,
        reply: Reply<()>,
    },
    PrepareConsume {
        peer_id: PeerId,
        transport_id: TransportId,
        producer_id: ProducerId,
        reply: Reply<(RouterOf<E>, TransportOf<E>)>,
    },
    AddConsumer {
        peer_id: PeerId,
        transport_id: TransportId,
        consumer: ConsumerOf<E>,
        reply: Reply<()>,
    },
    Consumer {
        peer_id: PeerId,
        consumer_id: ConsumerId,
        reply: Reply<(ConsumerOf<E>, bool)>,
    },
    MarkResumed {
        peer_id: PeerId,
        consumer_id: ConsumerId,
        reply: Reply<()>,
    },
    Producers {
        peer_id: PeerId,
        reply: Reply<Vec<ProducerSummary>>,
    },
    Info {
        reply: oneshot::Sender<RoomInfo>,
    },
    /// Close the room if it has no peers. Replies whether it closed.
    TryClose {
        reply: oneshot::Sender<bool>,
    },
    /// Close the room unconditionally, releasing everything.
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl<E: MediaEngine> RoomCommand<E> {
    /// Answers the command with `error` without executing it.
    fn fail(self, error: impl Fn() -> RoomError) {
        match self {
            Self::Join { reply, .. } => {
                let _ = reply.send(Err(error()));
            }
            Self::Leave { reply, .. } => {
                let _ = reply.send(Err(error()));
            }
            Self::Router { reply, .. } => {
                let _ = reply.send(Err(error()));
            }
            Self::Transport { reply, .. } => {
                let _ = reply.send(Err(error()));
            }
            Self::PrepareConsume { reply, .. } => {
                let _ = reply.send(Err(error()));
            }
            Self::Consumer { reply, .. } => {
                let _ = reply.send(Err(error()));
            }
            Self::Producers { reply, .. } => {
                let _ = reply.send(Err(error()));
            }
            Self::AddTransport { reply, .. }
            | Self::CloseTransport { reply, .. }
            | Self::AddProducer { reply, .. }
            | Self::AddConsumer { reply, .. }
            | Self::MarkResumed { reply, .. } => {
                let _ = reply.send(Err(error()));
            }
            // A room that cannot serve commands is a room that is gone.
            Self::Info { .. } => {}
            Self::TryClose { reply } => {
                let _ = reply.send(true);
            }
            Self::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

/// What a peer learns when it joins.
#[derive(Debug, Clone)]
pub struct JoinInfo {
    /// The router's RTP capabilities.
    pub capabilities: RtpCapabilities,
    /// Peers that were already in the room.
    pub peers: Vec<PeerSummary>,
}

/// A snapshot of room metadata.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub peer_count: usize,
    pub peers: Vec<PeerSummary>,
    pub producer_count: usize,
}

/// Handle to a running room actor. Used to send commands to it.
///
/// This is cheap to clone: it's just an `mpsc::Sender` wrapper.
/// The `RoomManager` holds one of these per room, and every joined
/// session holds another.
pub struct RoomHandle<E: MediaEngine> {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand<E>>,
}

impl<E: MediaEngine> Clone for RoomHandle<E> {
    fn clone(&self) -> Self {
        Self {
            room_id: self.room_id.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<E: MediaEngine> std::fmt::Debug for RoomHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle")
            .field("room_id", &self.room_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<E: MediaEngine> RoomHandle<E> {
    /// Returns the room's key.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Returns `true` once the actor stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Returns `true` if both handles talk to the same actor.
    pub fn same_room(&self, other: &Self) -> bool {
        self.sender.same_channel(&other.sender)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand<E>,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }

    /// Adds a peer. Every other peer is told with `user-joined`.
    pub async fn join(
        &self,
        peer_id: PeerId,
        username: String,
        sender: PeerSender,
    ) -> Result<JoinInfo, RoomError> {
        self.request(|reply| RoomCommand::Join {
            peer_id,
            username,
            sender,
            reply,
        })
        .await?
    }

    /// Removes a peer and closes everything it owns. Returns how many
    /// peers remain.
    pub async fn leave(&self, peer_id: PeerId) -> Result<usize, RoomError> {
        self.request(|reply| RoomCommand::Leave { peer_id, reply })
            .await?
    }

    /// The room's router, for a peer of the room.
    pub async fn router(
        &self,
        peer_id: PeerId,
    ) -> Result<RouterOf<E>, RoomError> {
        self.request(|reply| RoomCommand::Router { peer_id, reply })
            .await?
    }

    pub async fn add_transport(
        &self,
        peer_id: PeerId,
        transport: TransportOf<E>,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::AddTransport {
            peer_id,
            transport,
            reply,
        })
        .await?
    }

    pub async fn transport(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
    ) -> Result<TransportOf<E>, RoomError> {
        self.request(|reply| RoomCommand::Transport {
            peer_id,
            transport_id,
            reply,
        })
        .await?
    }

    /// Closes one of the peer's transports with everything bound to it.
    pub async fn close_transport(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::CloseTransport {
            peer_id,
            transport_id,
            reply,
        })
        .await?
    }

    /// Stores a producer. Every other peer is told with `new-producer`.
    pub async fn add_producer(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
        producer: ProducerOf<E>,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::AddProducer {
            peer_id,
            transport_id,
            producer,
            reply,
        })
        .await?
    }

    /// Checks a consume request against the store and returns the router
    /// and the peer's transport to run it with.
    pub async fn prepare_consume(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
        producer_id: ProducerId,
    ) -> Result<(RouterOf<E>, TransportOf<E>), RoomError> {
        self.request(|reply| RoomCommand::PrepareConsume {
            peer_id,
            transport_id,
            producer_id,
            reply,
        })
        .await?
    }

    pub async fn add_consumer(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
        consumer: ConsumerOf<E>,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::AddConsumer {
            peer_id,
            transport_id,
            consumer,
            reply,
        })
        .await?
    }

    /// The peer's consumer and whether it was already resumed.
    pub async fn consumer(
        &self,
        peer_id: PeerId,
        consumer_id: ConsumerId,
    ) -> Result<(ConsumerOf<E>, bool), RoomError> {
        self.request(|reply| RoomCommand::Consumer {
            peer_id,
            consumer_id,
            reply,
        })
        .await?
    }

    pub async fn mark_resumed(
        &self,
        peer_id: PeerId,
        consumer_id: ConsumerId,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::MarkResumed {
            peer_id,
            consumer_id,
            reply,
        })
        .await?
    }

    /// Every producer in the room except the peer's own.
    pub async fn producers(
        &self,
        peer_id: PeerId,
    ) -> Result<Vec<ProducerSummary>, RoomError> {
        self.request(|reply| RoomCommand::Producers { peer_id, reply })
            .await?
    }

    /// Requests the current room info.
    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    /// Asks the room to close if it is empty. Returns whether the room
    /// is now closed.
    pub async fn try_close(&self) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::TryClose { reply }).await
    }

    /// Tells the room to release everything and stop.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Shutdown { reply }).await
    }
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor<E: MediaEngine> {
    room_id: RoomId,
    engine: E,
    config: RoomConfig,
    peers: PeerTable<TransportOf<E>>,
    receiver: mpsc::Receiver<RoomCommand<E>>,
}

impl<E: MediaEngine> RoomActor<E> {
    /// Creates the router, then processes commands until the room closes.
    async fn run(mut self) {
        let router = match self.engine.create_router(&self.config.router).await {
            Ok(router) => router,
            Err(e) => {
                tracing::error!(
                    room_id = %self.room_id,
                    error = %e,
                    "router creation failed"
                );
                self.receiver.close();
                while let Some(cmd) = self.receiver.recv().await {
                    cmd.fail(|| RoomError::Engine(e.clone()));
                }
                return;
            }
        };
        tracing::info!(
            room_id = %self.room_id,
            router_id = router.id(),
            "room actor started"
        );

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::Join {
                    peer_id,
                    username,
                    sender,
                    reply,
                } => {
                    let result = self.handle_join(&router, peer_id, username, sender);
                    let _ = reply.send(result);
                }
                RoomCommand::Leave { peer_id, reply } => {
                    let _ = reply.send(self.handle_leave(peer_id));
                }
                RoomCommand::Router { peer_id, reply } => {
                    let result = if self.peers.contains(peer_id) {
                        Ok(router.clone())
                    } else {
                        Err(RoomError::PeerNotFound(peer_id))
                    };
                    let _ = reply.send(result);
                }
                RoomCommand::AddTransport {
                    peer_id,
                    transport,
                    reply,
                } => {
                    let transport_id = transport.id().clone();
                    let result = self.peers.add_transport(peer_id, transport);
                    if result.is_ok() {
                        tracing::debug!(
                            room_id = %self.room_id,
                            %peer_id,
                            %transport_id,
                            "transport added"
                        );
                    }
                    let _ = reply.send(result);
                }
                RoomCommand::Transport {
                    peer_id,
                    transport_id,
                    reply,
                } => {
                    let result = self
                        .peers
                        .transport(peer_id, &transport_id)
                        .cloned();
                    let _ = reply.send(result);
                }
                RoomCommand::CloseTransport {
                    peer_id,
                    transport_id,
                    reply,
                } => {
                    let result = self.handle_close_transport(peer_id, &transport_id);
                    let _ = reply.send(result);
                }
                RoomCommand::AddProducer {
                    peer_id,
                    transport_id,
                    producer,
                    reply,
                } => {
                    let result =
                        self.handle_add_producer(peer_id, &transport_id, producer);
                    let _ = reply.send(result);
                }
                RoomCommand::PrepareConsume {
                    peer_id,
                    transport_id,
                    producer_id,
                    reply,
                } => {
                    let result = self
                        .prepare_consume(peer_id, &transport_id, &producer_id)
                        .map(|transport| (router.clone(), transport));
                    let _ = reply.send(result);
                }
                RoomCommand::AddConsumer {
                    peer_id,
                    transport_id,
                    consumer,
                    reply,
                } => {
                    let result =
                        self.peers.add_consumer(peer_id, &transport_id, consumer);
                    let _ = reply.send(result);
                }
                RoomCommand::Consumer {
                    peer_id,
                    consumer_id,
                    reply,
                } => {
                    let result = self
                        .peers
                        .consumer(peer_id, &consumer_id)
                        .map(|(consumer, resumed)| (consumer.clone(), resumed));
                    let _ = reply.send(result);
                }
                RoomCommand::MarkResumed {
                    peer_id,
                    consumer_id,
                    reply,
                } => {
                    let _ = reply.send(self.peers.mark_resumed(peer_id, &consumer_id));
                }
                RoomCommand::Producers { peer_id, reply } => {
                    let result = if self.peers.contains(peer_id) {
                        Ok(self.peers.producers_except(peer_id))
                    } else {
                        Err(RoomError::PeerNotFound(peer_id))
                    };
                    let _ = reply.send(result);
                }
                RoomCommand::Info { reply } => {
                    let _ = reply.send(self.info());
                }
                RoomCommand::TryClose { reply } => {
                    if self.peers.is_empty() {
                        self.receiver.close();
                        router.close();
                        tracing::info!(room_id = %self.room_id, "room closed");
                        let _ = reply.send(true);
                        break;
                    }
                    let _ = reply.send(false);
                }
                RoomCommand::Shutdown { reply } => {
                    self.receiver.close();
                    self.peers.clear().close_all();
                    router.close();
                    tracing::info!(room_id = %self.room_id, "room shut down");
                    let _ = reply.send(());
                    break;
                }
            }
        }

        // Commands queued before the channel closed still get an answer.
        while let Some(cmd) = self.receiver.recv().await {
            cmd.fail(|| RoomError::Unavailable(self.room_id.clone()));
        }
        tracing::info!(room_id = %self.room_id, "room actor stopped");
    }

    fn handle_join(
        &mut self,
        router: &RouterOf<E>,
        peer_id: PeerId,
        username: String,
        sender: PeerSender,
    ) -> Result<JoinInfo, RoomError> {
        if self.peers.contains(peer_id) {
            return Err(RoomError::AlreadyInRoom(peer_id, self.room_id.clone()));
        }
        self.peers.add_peer(peer_id, username.clone(), sender)?;
        tracing::info!(
            room_id = %self.room_id,
            %peer_id,
            %username,
            peers = self.peers.len(),
            "peer joined"
        );

        self.peers.notify(
            Recipient::AllExcept(peer_id),
            &Notification::UserJoined { peer_id, username },
        );

        Ok(JoinInfo {
            capabilities: router.rtp_capabilities(),
            peers: self.peers.roster_except(peer_id),
        })
    }

    fn handle_leave(&mut self, peer_id: PeerId) -> Result<usize, RoomError> {
        let removed = self.peers.remove_peer(peer_id)?;
        removed.released.close_all();
        tracing::info!(
            room_id = %self.room_id,
            %peer_id,
            peers = self.peers.len(),
            "peer left"
        );

        self.peers.notify(
            Recipient::All,
            &Notification::UserLeft {
                peer_id,
                username: removed.username,
            },
        );
        Ok(self.peers.len())
    }

    fn handle_close_transport(
        &mut self,
        peer_id: PeerId,
        transport_id: &TransportId,
    ) -> Result<(), RoomError> {
        let released = self.peers.remove_transport(peer_id, transport_id)?;
        released.close_all();
        tracing::debug!(
            room_id = %self.room_id,
            %peer_id,
            %transport_id,
            producers = released.producers.len(),
            consumers = released.consumers.len(),
            "transport closed"
        );

        for producer_id in released.producer_ids() {
            self.peers.notify(
                Recipient::AllExcept(peer_id),
                &Notification::ProducerClosed {
                    peer_id,
                    producer_id,
                },
            );
        }
        Ok(())
    }

    fn handle_add_producer(
        &mut self,
        peer_id: PeerId,
        transport_id: &TransportId,
        producer: ProducerOf<E>,
    ) -> Result<(), RoomError> {
        let producer_id = producer.id().clone();
        let kind = producer.kind();
        self.peers.add_producer(peer_id, transport_id, producer)?;
        tracing::debug!(
            room_id = %self.room_id,
            %peer_id,
            %producer_id,
            %kind,
            "producer added"
        );

        self.peers.notify(
            Recipient::AllExcept(peer_id),
            &Notification::NewProducer {
                peer_id,
                producer_id,
                kind,
            },
        );
        Ok(())
    }

    fn prepare_consume(
        &self,
        peer_id: PeerId,
        transport_id: &TransportId,
        producer_id: &ProducerId,
    ) -> Result<TransportOf<E>, RoomError> {
        if !self.peers.contains(peer_id) {
            return Err(RoomError::PeerNotFound(peer_id));
        }
        self.peers.find_producer(producer_id)?;
        self.peers.transport(peer_id, transport_id).cloned()
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id.clone(),
            peer_count: self.peers.len(),
            peers: self.peers.roster(),
            producer_count: self.peers.producer_count(),
        }
    }
}

/// Spawns a new room actor task and returns a handle to communicate with it.
///
/// `config.channel_size` controls backpressure: if the channel fills up,
/// senders wait (bounded channel).
pub(crate) fn spawn_room<E: MediaEngine>(
    room_id: RoomId,
    engine: E,
    config: RoomConfig,
) -> RoomHandle<E> {
    let (tx, rx) = mpsc::channel(config.channel_size.max(1));

    let actor = RoomActor {
        room_id: room_id.clone(),
        engine,
        config,
        peers: PeerTable::new(),
        receiver: rx,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
    }
}
