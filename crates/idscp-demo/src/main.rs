//! idscp-demo: two IDSCP2 peers in one process

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use idscp_core::drivers::NullDaps;
use idscp_core::{Idscp2Configuration, Idscp2Connection, RatRegistry};
use idscp_proto::IDSCP_PROTOCOL_VERSION;
use idscp_transport::{testing::LoopbackChannel, FramedChannel, SecureChannel};

#[derive(Parser)]
#[command(name = "idscp-demo")]
#[command(about = "Run an IDSCP2 handshake between two local peers and exchange data")]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of messages the client sends
    #[arg(short, long, default_value_t = 3)]
    messages: usize,

    /// Connect the peers over a local TCP socket instead of in-memory
    #[arg(long)]
    tcp: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => Idscp2Configuration::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Idscp2Configuration::default(),
    };

    info!(version = IDSCP_PROTOCOL_VERSION, tcp = args.tcp, "starting IDSCP2 demo");

    let (client_channel, server_channel) = if args.tcp {
        tcp_pair().await?
    } else {
        let (a, b) = LoopbackChannel::pair();
        let pair: (Arc<dyn SecureChannel>, Arc<dyn SecureChannel>) = (Arc::new(a), Arc::new(b));
        pair
    };

    let client = connect(client_channel, config.clone())?;
    let server = connect(server_channel, config)?;

    // Server echoes everything back.
    server.add_message_listener(|c: &Idscp2Connection, data: &Bytes| {
        info!(len = data.len(), "server received data");
        if let Err(e) = c.send(data.clone()) {
            tracing::warn!("echo failed: {}", e);
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.add_message_listener(move |_c: &Idscp2Connection, data: &Bytes| {
        let _ = tx.send(data.clone());
    });

    client.established().await.context("client handshake")?;
    server.established().await.context("server handshake")?;
    info!("both peers established");

    for i in 0..args.messages {
        let payload = Bytes::from(format!("hello #{}", i));
        client.send(payload.clone())?;
        let echo = rx.recv().await.context("echo channel closed")?;
        anyhow::ensure!(echo == payload, "unexpected echo");
        info!(message = %String::from_utf8_lossy(&echo), "client received echo");
    }

    client.close();
    let reason = server.closed().await;
    info!(
        initiator = ?reason.initiator,
        cause = %reason.cause,
        message = %reason.message,
        "server saw connection close"
    );

    Ok(())
}

fn connect(
    channel: Arc<dyn SecureChannel>,
    config: Idscp2Configuration,
) -> anyhow::Result<Idscp2Connection> {
    let connection = Idscp2Connection::spawn(
        channel,
        Arc::new(NullDaps::new()),
        RatRegistry::with_dummy_drivers(),
        config,
    )?;
    Ok(connection)
}

async fn tcp_pair() -> anyhow::Result<(Arc<dyn SecureChannel>, Arc<dyn SecureChannel>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let client = client?;
    let (server, peer) = accepted?;
    info!(%addr, %peer, "TCP peers connected");

    Ok((
        Arc::new(FramedChannel::new(client)),
        Arc::new(FramedChannel::new(server)),
    ))
}
