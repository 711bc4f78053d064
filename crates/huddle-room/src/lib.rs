//! Rooms for Huddle: the entity store and the room lifecycle.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns the
//! room's media router and the graph of peers, transports, producers and
//! consumers inside it.
//!
//! # Key types
//!
//! - [`RoomManager`]: creates rooms on first join, removes them when the
//!   last peer leaves
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`PeerTable`]: the per-room entity store the actor owns
//! - [`RoomConfig`]: router codecs and channel sizing

mod config;
mod error;
mod manager;
mod room;
mod store;

pub use config::{DEFAULT_CHANNEL_SIZE, RoomConfig};
pub use error::RoomError;
pub use manager::{RoomManager, RoomStatus};
pub use room::{JoinInfo, RoomHandle, RoomInfo};
pub use store::{PeerSender, PeerTable, Released, RemovedPeer};
