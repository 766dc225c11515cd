//! netfront CLI Client
//!
//! Sends one TCP payload or one UDP datagram to a netfront server.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, UdpSocket};
use std::time::Duration;

use clap::{Parser, Subcommand};

/// netfront CLI
#[derive(Parser, Debug)]
#[command(name = "netfront-cli")]
#[command(about = "Send test traffic to a netfront server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    server: String,

    /// How long to wait for a reply (milliseconds, 0 = don't wait)
    #[arg(short, long, default_value = "1000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a TCP connection and send a payload
    Tcp {
        /// The payload to send
        payload: String,
    },

    /// Send a single UDP datagram
    Udp {
        /// The payload to send
        payload: String,
    },
}

fn main() {
    let args = Args::parse();
    let timeout = (args.timeout_ms > 0).then(|| Duration::from_millis(args.timeout_ms));

    let result = match &args.command {
        Commands::Tcp { payload } => send_tcp(&args.server, payload.as_bytes(), timeout),
        Commands::Udp { payload } => send_udp(&args.server, payload.as_bytes()),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn send_tcp(server: &str, payload: &[u8], timeout: Option<Duration>) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(server)?;
    stream.write_all(payload)?;
    stream.flush()?;
    println!("sent {} bytes over tcp to {}", payload.len(), server);

    let Some(timeout) = timeout else {
        return Ok(());
    };

    stream.set_read_timeout(Some(timeout))?;
    stream.shutdown(Shutdown::Write)?;

    let mut reply = Vec::new();
    match stream.read_to_end(&mut reply) {
        Ok(_) => {}
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut => {}
        Err(e) => return Err(e),
    }

    if !reply.is_empty() {
        println!("reply: {}", String::from_utf8_lossy(&reply));
    }
    Ok(())
}

fn send_udp(server: &str, payload: &[u8]) -> std::io::Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    let sent = socket.send_to(payload, server)?;
    println!("sent {} bytes over udp to {}", sent, server);
    Ok(())
}
