//! relay-server - live-stream chat relay.
//!
//! Discovers rooms on the supported platforms and multiplexes their chat
//! streams to local WebSocket subscribers.

use relay_server::api::server::{self, ApiServerConfig};
use relay_server::logging::init_logging;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    info!("starting relay-server v{}", env!("CARGO_PKG_VERSION"));

    let config = ApiServerConfig::from_env_or_default();
    server::run(config).await
}
