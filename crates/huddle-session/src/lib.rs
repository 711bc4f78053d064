//! Peer sessions for Huddle.
//!
//! A [`PeerSession`] is the server's record of one signaling connection
//! and drives that peer through the room:
//!
//! ```text
//!   Connected ──(join)──→ Joined ──(disconnect)──→ Disconnected
//!       ↑                   │
//!       └──────(leave)──────┘
//! ```
//!
//! # How it fits in the stack
//!
//! ```text
//! Dispatcher (above)  ← maps requests to session operations
//!     ↕
//! Session Layer (this crate)  ← per-peer state machine, engine calls
//!     ↕
//! Room Layer (below)  ← room actors own the shared state
//! ```

mod error;
mod session;

pub use error::SessionError;
pub use session::{PeerSession, SessionConfig, SessionState};
