//! # Huddle
//!
//! Signaling and session orchestration for selective-forwarding WebRTC
//! rooms.
//!
//! Clients connect over WebSocket, join a room by key, and negotiate
//! transports, producers, and consumers through JSON requests. Huddle keeps
//! the room graph consistent and tells every peer about the others; the
//! media itself is handled by a [`MediaEngine`](huddle_engine::MediaEngine)
//! behind a small facade.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use huddle::prelude::*;
//!
//! # async fn run() -> Result<(), HuddleError> {
//! huddle::init_logging();
//! let server = HuddleServerBuilder::new()
//!     .bind("0.0.0.0:3000")
//!     .build(LoopbackEngine::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
pub mod dispatch;
mod error;
mod handler;
mod logging;
mod server;

pub use config::ServerConfig;
pub use error::HuddleError;
pub use logging::init_logging;
pub use server::{HuddleServer, HuddleServerBuilder};

pub mod prelude {
    pub use crate::{HuddleError, HuddleServer, HuddleServerBuilder, ServerConfig};
    pub use huddle_engine::{
        LoopbackEngine, MediaEngine, RouterConfig, TransportOptions,
    };
    pub use huddle_protocol::{
        ErrorKind, MediaKind, Notification, PeerId, Reply, Request,
        RequestEnvelope, RoomId, ServerMessage, TransportDirection,
    };
    pub use huddle_room::{RoomConfig, RoomManager, RoomStatus};
    pub use huddle_session::{PeerSession, SessionConfig, SessionError};
}
