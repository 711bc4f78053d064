//! `HuddleServer` builder and server loop.
//!
//! This is the entry point for running a Huddle signaling server. It ties
//! together all the layers: transport → protocol → session → room → engine.

use std::sync::Arc;
use std::time::Duration;

use huddle_engine::MediaEngine;
use huddle_protocol::{Codec, JsonCodec};
use huddle_room::{RoomConfig, RoomManager};
use huddle_session::SessionConfig;
use huddle_transport::{Transport, WebSocketTransport};
use tokio::sync::watch;

use crate::handler::handle_connection;
use crate::{HuddleError, ServerConfig};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<E: MediaEngine, C: Codec> {
    pub(crate) rooms: Arc<RoomManager<E>>,
    pub(crate) session_config: SessionConfig,
    pub(crate) codec: C,
    pub(crate) idle_timeout: Option<Duration>,
    /// Flipped to `true` when the server stops; every handler closes.
    pub(crate) shutdown: watch::Sender<bool>,
}

/// Builder for configuring and starting a Huddle server.
///
/// # Example
///
/// ```rust,no_run
/// use huddle::prelude::*;
///
/// # async fn run() -> Result<(), HuddleError> {
/// let server = HuddleServerBuilder::new()
///     .bind("0.0.0.0:3000")
///     .build(LoopbackEngine::new())
///     .await?;
/// server.run().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct HuddleServerBuilder {
    config: ServerConfig,
}

impl HuddleServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_owned();
        self
    }

    /// Replaces the whole configuration, bind address included.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Closes connections that send nothing for `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = Some(timeout);
        self
    }

    /// Binds the listener and builds the server around `engine`.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<E: MediaEngine>(
        self,
        engine: E,
    ) -> Result<HuddleServer<E>, HuddleError> {
        let ServerConfig {
            bind,
            room,
            session,
            idle_timeout,
        } = self.config;

        let transport = WebSocketTransport::bind(&bind).await?;
        let (shutdown, _) = watch::channel(false);

        let state = Arc::new(ServerState {
            rooms: Arc::new(RoomManager::new(engine, room)),
            session_config: session,
            codec: JsonCodec,
            idle_timeout,
            shutdown,
        });

        Ok(HuddleServer { transport, state })
    }
}

/// A Huddle signaling server.
///
/// Built with [`HuddleServerBuilder`]; the engine passed to
/// [`build`](HuddleServerBuilder::build) fixes `E`. Call
/// [`run()`](Self::run) to start accepting connections.
pub struct HuddleServer<E: MediaEngine, C: Codec = JsonCodec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<E, C>>,
}

impl<E, C> HuddleServer<E, C>
where
    E: MediaEngine,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The room manager, for status queries while the server runs.
    pub fn rooms(&self) -> Arc<RoomManager<E>> {
        Arc::clone(&self.state.rooms)
    }

    /// Runs the server accept loop.
    ///
    /// Spawns a handler task per connection. Runs until the media engine's
    /// worker dies, then closes every connection, shuts every room down,
    /// and returns [`HuddleError::EngineDied`].
    pub async fn run(mut self) -> Result<(), HuddleError> {
        tracing::info!(addr = ?self.local_addr().ok(), "huddle server running");

        let engine = self.state.rooms.engine().clone();
        let worker_died = engine.worker_died();
        tokio::pin!(worker_died);

        loop {
            tokio::select! {
                () = &mut worker_died => {
                    tracing::error!("media engine worker died, shutting down");
                    self.state.shutdown.send_replace(true);
                    let _ = self.transport.shutdown().await;
                    self.state.rooms.shutdown().await;
                    return Err(HuddleError::EngineDied);
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use huddle_engine::LoopbackEngine;

    use super::*;

    #[tokio::test]
    async fn test_builder_build_takes_engine_type_from_argument() {
        let server = HuddleServerBuilder::new()
            .bind("127.0.0.1:0")
            .idle_timeout(Duration::from_secs(5))
            .build(LoopbackEngine::new())
            .await
            .unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.rooms().room_count().await, 0);
        assert_eq!(server.state.idle_timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_builder_bind_failure_is_transport_error() {
        let result = HuddleServerBuilder::new()
            .bind("not an address")
            .build(LoopbackEngine::new())
            .await;
        assert!(matches!(result, Err(HuddleError::Transport(_))));
    }
}
