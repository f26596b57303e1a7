//! Send metrics to a statsd daemon
//!
//! Each argument is sent as one datagram. With no arguments, each line
//! of stdin is sent instead.
//!
//! ```text
//! statsd-client 'hits:1|c' 'latency:320|ms' 'temp:+2|g'
//! printf 'a:1|c\nb:2|c\n' | statsd-client
//! ```
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | STATSD_HOST | 127.0.0.1:8125 | Daemon address |

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;

const DEFAULT_HOST: &str = "127.0.0.1:8125";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host = std::env::var("STATSD_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(&host).await?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut sent = 0usize;

    if args.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            socket.send(line.as_bytes()).await?;
            sent += 1;
        }
    } else {
        for metric in &args {
            socket.send(metric.as_bytes()).await?;
            sent += 1;
        }
    }

    eprintln!("sent {} datagram(s) to {}", sent, host);
    Ok(())
}
