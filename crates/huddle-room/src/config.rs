//! Room configuration.

use huddle_engine::RouterConfig;
use serde::{Deserialize, Serialize};

/// Default command channel size for room actors.
pub const DEFAULT_CHANNEL_SIZE: usize = 64;

/// Configuration shared by every room a [`RoomManager`](crate::RoomManager)
/// creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Codecs of the router each room creates on startup.
    pub router: RouterConfig,

    /// Capacity of the room actor's command channel. Senders wait when it
    /// is full.
    pub channel_size: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            channel_size: DEFAULT_CHANNEL_SIZE,
        }
    }
}
