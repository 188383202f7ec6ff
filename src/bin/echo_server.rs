//! Minimal TCP echo server for local runs of echo-bench
//!
//! One thread per connection; every byte read is written straight back.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use clap::Parser;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Byte echo server
#[derive(Parser, Debug)]
#[command(name = "echo-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(short = 'b', long = "bind", default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value_t = 12345)]
    port: u16,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn serve(mut stream: TcpStream) -> io::Result<u64> {
    stream.set_nodelay(true)?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        stream.write_all(&buf[..n])?;
        total += n as u64;
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let listener = TcpListener::bind((args.bind.as_str(), args.port))?;
    info!("Listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                error!("accept failed: {}", e);
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        info!("Accepted {:?}", peer);
        thread::spawn(move || match serve(stream) {
            Ok(bytes) => debug!(?peer, bytes, "connection closed"),
            Err(e) => error!(?peer, "connection failed: {}", e),
        });
    }
    Ok(())
}
