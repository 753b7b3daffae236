//! `lownet-node`: a UDP-broadcast stand-in for a LowNet device, wiring
//! [`lownet_core`] to a concrete transport and an interactive CLI.

mod cli;
mod config;
mod transport;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use lownet_core::keystore::{Keystore, SIGNING_PUBLIC_KEY_PEM};
use lownet_core::link::LinkCore;
use lownet_core::protocols::chat::ChatChannel;
use lownet_core::protocols::command::CommandChannel;
use lownet_core::protocols::crane::CraneChannel;
use lownet_core::protocols::ping::PingChannel;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use cli::Commands;
use config::NodeConfig;
use transport::UdpBroadcastRadio;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = NodeConfig::load()?;
    info!("lownet-node starting as {:#04x}", config.node.local_id);

    let radio = Arc::new(UdpBroadcastRadio::bind(
        &config.radio.bind_addr,
        &config.radio.broadcast_addr,
    )?);

    let core = LinkCore::new(config.node.local_id, Arc::clone(&radio) as Arc<dyn lownet_core::RadioTransport>);
    radio.spawn_receive_loop(Arc::clone(&core))?;

    let chat = ChatChannel::register(Arc::clone(&core))?;
    let ping = PingChannel::register(Arc::clone(&core))?;
    let crane = CraneChannel::register(Arc::clone(&core))?;

    let command = CommandChannel::register(Arc::clone(&core), Arc::clone(&ping), SIGNING_PUBLIC_KEY_PEM)?;

    let commands = Commands {
        core: Arc::clone(&core),
        chat,
        ping,
        crane,
        command,
        keystore: Mutex::new(Keystore::with_baseline()),
    };

    info!("type /help for a list of commands");
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await? {
        commands.dispatch(line.trim()).await;
    }

    Ok(())
}
