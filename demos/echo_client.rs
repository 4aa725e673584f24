use std::time::Duration;

use anyhow::anyhow;
use blockrpc::client::Client;
use blockrpc::config::{ClientConfig, TransportKind};
use blockrpc::events::ClientEvent;
use clap::Parser;
use clap_derive::Parser;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{info, Level};

/// Connects to a server, performs the handshake, sends a single request and prints the response.
#[derive(Parser)]
struct Args {
    host: String,
    port: u16,

    #[clap(long, default_value = "echo")]
    request: String,

    #[clap(long, default_value = "hello")]
    data: String,

    /// use WebSocket instead of plain TCP
    #[clap(long, default_value_t = false)]
    websocket: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let transport = if args.websocket { TransportKind::WebSocket } else { TransportKind::Tcp };
    let mut config = ClientConfig::new(transport);
    config.handshake = Some(b"echo_client".to_vec());

    let client = Client::with_defaults(config)?;
    let mut events = client.subscribe_events();

    if !client.connect(&args.host, args.port).await {
        return Err(anyhow!("could not connect to {}:{}", args.host, args.port));
    }

    loop {
        match timeout(Duration::from_secs(10), events.recv()).await?? {
            ClientEvent::Ready => break,
            ClientEvent::Disconnected(reason) => return Err(anyhow!("disconnected during handshake: {:?}", reason)),
            ClientEvent::Connected(_) => {}
        }
    }
    info!("handshake complete");

    let (sender, receiver) = oneshot::channel();
    client.request(&args.request, args.data.into_bytes(), move |response| {
        let _ = sender.send(response.clone());
    }).await;

    let response = receiver.await?;
    if response.is_error() {
        println!("error: {}", response.error);
    }
    else {
        println!("{}", String::from_utf8_lossy(&response.data));
    }

    client.disconnect().await;
    Ok(())
}
