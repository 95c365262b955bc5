//! wirepack CLI Client
//!
//! Command-line interface for talking to a wirepack server.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use crossbeam::channel;
use tracing_subscriber::{fmt, EnvFilter};
use wirepack::codec::Codec;
use wirepack::network::connect;
use wirepack::protocol::{register_builtin, Chat, Ping, Pong};
use wirepack::{Config, Protocol, Scheduler};

/// wirepack CLI
#[derive(Parser, Debug)]
#[command(name = "wirepack-cli")]
#[command(about = "CLI for a wirepack server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    server: String,

    /// Seconds to wait for a reply
    #[arg(short, long, default_value = "5")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the server and wait for the Pong
    Ping,

    /// Send a chat line
    Say {
        /// Sender name
        #[arg(short, long, default_value = "cli")]
        name: String,

        /// Optional room
        #[arg(short, long)]
        room: Option<String>,

        /// Text to send
        body: String,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> wirepack::Result<()> {
    let protocol = Protocol::new(Codec::with_primitives());
    register_builtin(&protocol)?;

    let scheduler = Scheduler::new(Config::default(), Arc::new(protocol));
    scheduler.start()?;
    let packeter = connect(&scheduler, args.server.as_str())?;
    let timeout = Duration::from_secs(args.timeout);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();

    match args.command {
        Commands::Ping => {
            let (tx, rx) = channel::bounded(1);
            packeter.request::<Ping, Pong>(Ping { nonce: now }, move |pong| {
                let _ = tx.send(pong.nonce);
            })?;
            match rx.recv_timeout(timeout) {
                Ok(nonce) if nonce == now => println!("PONG"),
                Ok(nonce) => println!("PONG (unexpected nonce {})", nonce),
                Err(_) => println!("No reply within {}s", args.timeout),
            }
        }
        Commands::Say { name, room, body } => {
            packeter.send_packet(Chat {
                sender: name,
                body,
                room,
                sent_at: now,
            })?;
            // Give the sender loop a chance to flush before closing
            let deadline = std::time::Instant::now() + timeout;
            while packeter.queued() > 0 && std::time::Instant::now() < deadline {
                std::thread::sleep(scheduler.config().send_tick());
            }
            std::thread::sleep(scheduler.config().send_tick() * 2);
            println!("OK");
        }
    }

    packeter.close();
    scheduler.stop();
    Ok(())
}
