//! wirepack Server Binary
//!
//! Accepts connections, answers Ping with Pong and logs Chat messages.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use wirepack::codec::Codec;
use wirepack::network::{Incoming, Packeter};
use wirepack::protocol::{register_builtin, Chat, Ping, Pong};
use wirepack::{Config, Protocol, Scheduler, Server};

/// wirepack Server
#[derive(Parser, Debug)]
#[command(name = "wirepack-server")]
#[command(about = "Binary message server")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Connections polled per worker thread
    #[arg(short, long, default_value = "64")]
    bucket: usize,

    /// Worker and sender tick in milliseconds
    #[arg(short, long, default_value = "10")]
    tick_ms: u64,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wirepack=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("wirepack Server v{}", wirepack::VERSION);
    tracing::info!("Listen address: {}", args.listen);

    if let Err(e) = run(args) {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

fn run(args: Args) -> wirepack::Result<()> {
    let config = Config::builder()
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .bucket_capacity(args.bucket)
        .tick_ms(args.tick_ms)
        .send_tick_ms(args.tick_ms)
        .build()?;

    let protocol = Protocol::new(Codec::with_primitives().strict_null_check(config.strict_null_check));
    register_builtin(&protocol)?;

    let scheduler = Scheduler::new(config, Arc::new(protocol));
    scheduler.start()?;

    let server = Server::bind(Arc::clone(&scheduler))?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, initiating shutdown...");
        shutdown.store(true, Ordering::Release);
    })
    .map_err(|e| wirepack::WireError::Config(format!("cannot install Ctrl+C handler: {}", e)))?;

    server.run(|packeter| {
        let responder = Arc::downgrade(packeter);
        packeter.received().subscribe(move |incoming: &Incoming| {
            if let Some(packeter) = responder.upgrade() {
                handle(&packeter, incoming);
            }
        });
        packeter.errors().subscribe(|e| tracing::debug!("Connection error: {}", e));
    })?;

    scheduler.stop();
    Ok(())
}

fn handle(packeter: &Packeter, incoming: &Incoming) {
    if let Some(ping) = incoming.downcast_ref::<Ping>() {
        if let Err(e) = packeter.send_packet(Pong { nonce: ping.nonce }) {
            tracing::warn!("Failed to queue Pong: {}", e);
        }
    } else if let Some(chat) = incoming.downcast_ref::<Chat>() {
        let room = chat.room.as_deref().unwrap_or("lobby");
        tracing::info!("[{}] {}: {}", room, chat.sender, chat.body);
    }
}
