//! Server configuration.

use std::time::Duration;

use huddle_room::RoomConfig;
use huddle_session::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::HuddleError;

/// Default signaling address.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Everything a [`HuddleServer`](crate::HuddleServer) needs besides the
/// media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind: String,
    pub room: RoomConfig,
    pub session: SessionConfig,
    /// Close connections that send nothing for this long. `None` keeps
    /// them open indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_owned(),
            room: RoomConfig::default(),
            session: SessionConfig::default(),
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Builds a config from the defaults overridden by `HUDDLE_BIND`,
    /// `HUDDLE_ANNOUNCED_IP` and `HUDDLE_IDLE_TIMEOUT_SECS`.
    ///
    /// # Errors
    /// [`HuddleError::Config`] if a variable is set but unusable.
    pub fn from_env() -> Result<Self, HuddleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, HuddleError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("HUDDLE_BIND") {
            config.bind = bind;
        }
        if let Some(ip) = lookup("HUDDLE_ANNOUNCED_IP").filter(|ip| !ip.is_empty()) {
            config.session.transport.announced_ip = Some(ip);
        }
        if let Some(raw) = lookup("HUDDLE_IDLE_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                HuddleError::Config(format!(
                    "HUDDLE_IDLE_TIMEOUT_SECS must be a whole number of seconds, got {raw:?}"
                ))
            })?;
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }
}
