//! Mock upstream feed server.
//!
//! Speaks just enough of the feed protocol to exercise the relay without
//! a live exchange: accepts WebSocket clients, logs their subscription
//! requests, then emits numbered ticker/book lines at a fixed interval.
//! Point the relay at it with
//! `--upstream-url ws://127.0.0.1:9101 --origin http://127.0.0.1`.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on for relay connections
    #[clap(short, long, default_value_t = 9101)]
    port: u16,

    /// Milliseconds between emitted feed lines
    #[clap(short, long, default_value_t = 50)]
    interval_ms: u64,

    /// Stop after this many lines per connection (0 = unlimited)
    #[clap(short, long, default_value_t = 0)]
    count: u64,

    /// Go silent (keep the socket open, send nothing) after this many
    /// lines, to exercise the relay's silence watchdog (0 = never)
    #[clap(short, long, default_value_t = 0)]
    stall_after: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let listener = TcpListener::bind(("127.0.0.1", args.port)).await?;
    println!("Feed simulator listening on ws://127.0.0.1:{}", args.port);

    loop {
        let (stream, peer) = listener.accept().await?;
        println!("Relay connected from {}", peer);
        let interval = Duration::from_millis(args.interval_ms);
        let count = args.count;
        let stall_after = args.stall_after;

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    println!("Handshake with {} failed: {}", peer, e);
                    return;
                }
            };
            let (mut write, mut read) = ws_stream.split();

            // Log whatever the relay sends (subscriptions, forwarded
            // client input) in the background.
            tokio::spawn(async move {
                while let Some(Ok(msg)) = read.next().await {
                    if let Message::Text(text) = msg {
                        println!("<- {}", text.as_str().trim_end());
                    }
                }
            });

            let mut seq: u64 = 0;
            loop {
                if count > 0 && seq >= count {
                    println!("Sent {} lines to {}, closing", seq, peer);
                    let _ = write.close().await;
                    return;
                }
                if stall_after > 0 && seq >= stall_after {
                    // Connection stays open but silent; the relay's
                    // watchdog should declare it dead.
                    sleep(Duration::from_secs(3600)).await;
                    continue;
                }

                let channel = if seq % 2 == 0 { "ticker" } else { "book" };
                let line = json!({
                    "seq": seq,
                    "channel": channel,
                    "pair": "XBT/EUR",
                    "ts": chrono::Utc::now().to_rfc3339(),
                })
                .to_string();

                if write.send(Message::Text(line.into())).await.is_err() {
                    println!("Relay {} went away after {} lines", peer, seq);
                    return;
                }
                seq += 1;
                sleep(interval).await;
            }
        });
    }
}
