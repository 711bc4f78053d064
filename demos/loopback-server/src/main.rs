//! Runs a Huddle signaling server on the loopback engine.
//!
//! Configure with `HUDDLE_BIND`, `HUDDLE_ANNOUNCED_IP`,
//! `HUDDLE_IDLE_TIMEOUT_SECS` and `RUST_LOG`.

use huddle::prelude::*;

#[tokio::main]
async fn main() -> Result<(), HuddleError> {
    huddle::init_logging();

    let config = ServerConfig::from_env()?;
    tracing::info!(bind = %config.bind, "starting loopback server");

    let server = HuddleServerBuilder::new()
        .config(config)
        .build(LoopbackEngine::new())
        .await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, exiting");
            Ok(())
        }
    }
}
