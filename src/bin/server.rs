//! netfront Server Binary
//!
//! Starts a TCP + UDP front-end and logs every connection it hands out.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use netfront::network::ConnectionReceiver;
use netfront::{Connection, Hooks, Server, ServerConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// netfront Server
#[derive(Parser, Debug)]
#[command(name = "netfront-server")]
#[command(about = "Protocol-agnostic TCP/UDP connection front-end")]
#[command(version)]
struct Args {
    /// Interface to bind (all interfaces if omitted)
    #[arg(short, long)]
    bind: Option<String>,

    /// Port shared by TCP and UDP
    #[arg(short, long, default_value = "7000")]
    port: u16,

    /// Number of worker threads
    #[arg(short, long, default_value = "1")]
    workers: usize,

    /// Run workers as background threads
    #[arg(long)]
    background: bool,

    /// Echo bytes received on stream connections back to the peer
    #[arg(short, long)]
    echo: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,netfront=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("netfront Server v{}", netfront::VERSION);

    let hooks = Hooks::new().on_exception(|e| tracing::warn!("Worker error: {}", e));

    let mut builder = ServerConfig::builder()
        .port(args.port)
        .worker_threads(args.workers)
        .background(args.background)
        .hooks(hooks);
    if let Some(bind) = &args.bind {
        builder = builder.bind_addr(bind);
    }
    let config = builder.build();

    let server = match Server::start(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on {} (type `quit` or close stdin to stop)", server.local_addr());

    let echo = args.echo;
    let receiver: ConnectionReceiver = Arc::new(move |connection: Arc<Connection>| {
        handle_connection(connection, echo)
    });
    server.register_receiver(receiver);

    // Block until the operator asks us to stop
    for line in io::stdin().lock().lines() {
        match line {
            Ok(line) if line.trim() == "quit" => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    if let Err(e) = server.shutdown() {
        tracing::error!("Shutdown error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

fn handle_connection(connection: Arc<Connection>, echo: bool) {
    match &*connection {
        Connection::Datagram(datagram) => {
            tracing::info!(
                "{} ({} bytes): {}",
                connection,
                datagram.len(),
                String::from_utf8_lossy(datagram.data())
            );
        }
        Connection::Stream(stream) => {
            tracing::info!("{}", connection);
            if !echo {
                return;
            }

            let mut input = stream.input();
            let mut output = stream.output();
            let peer = stream.sender();

            // Receivers run on the dispatch thread; don't block it with the copy
            let spawned = thread::Builder::new()
                .name(format!("echo-{}", peer))
                .spawn(move || match io::copy(&mut input, &mut output) {
                    Ok(n) => tracing::debug!("Echoed {} bytes to {}", n, peer),
                    Err(e) => tracing::debug!("Echo to {} ended: {}", peer, e),
                });
            if let Err(e) = spawned {
                tracing::warn!("Could not start echo thread: {}", e);
            }
        }
    }
}
