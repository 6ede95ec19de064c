//! Downstream consumer for checking a running relay.
//!
//! Connects to the relay's TCP port, separates the replayed backlog from
//! live traffic by a short quiet gap, verifies that simulator sequence
//! numbers are strictly increasing across the whole stream, and prints
//! periodic rate summaries. Run against `server_relay` fed by
//! `test_feed_simulator`.

use clap::Parser;
use lib_common::ReplayCache;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

/// Lines of context kept for dumping around an order violation.
const CONTEXT_LINES: usize = 20;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[clap(short, long, default_value = "127.0.0.1:9010")]
    addr: String,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 10)]
    report_interval_secs: u64,

    /// Milliseconds of quiet that mark the end of the replay burst
    #[clap(short, long, default_value_t = 300)]
    gap_ms: u64,
}

fn parse_seq(line: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value.get("seq")?.as_u64()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!("Connecting to {}...", args.addr);
    let stream = TcpStream::connect(&args.addr).await?;
    let mut lines = BufReader::new(stream).lines();
    println!("Connected. Press Ctrl+C to stop.");

    let gap = Duration::from_millis(args.gap_ms);
    let report_every = Duration::from_secs(args.report_interval_secs);

    let mut replay_done = false;
    let mut replay_count: u64 = 0;
    let mut live_count: u64 = 0;
    let mut window_count: u64 = 0;
    let mut last_seq: Option<u64> = None;
    let mut order_violations: u64 = 0;
    let mut unparsed: u64 = 0;
    let mut last_report = Instant::now();
    let mut recent = ReplayCache::new(CONTEXT_LINES, u64::MAX);

    loop {
        match timeout(gap, lines.next_line()).await {
            Err(_) => {
                // Quiet gap: anything before this was the replayed backlog.
                if !replay_done {
                    replay_done = true;
                    println!("Replay burst complete: {} lines", replay_count);
                }
            }
            Ok(Ok(None)) => {
                println!("Relay closed the connection");
                break;
            }
            Ok(Err(e)) => {
                println!("Read error: {}", e);
                break;
            }
            Ok(Ok(Some(line))) => {
                if replay_done {
                    live_count += 1;
                } else {
                    replay_count += 1;
                }
                window_count += 1;
                recent.append(line.clone());

                match parse_seq(&line) {
                    Some(seq) => {
                        if let Some(prev) = last_seq {
                            if seq <= prev {
                                order_violations += 1;
                                println!("Out-of-order line: {} after {}. Recent context:", seq, prev);
                                for context_line in recent.snapshot() {
                                    println!("  {}", context_line);
                                }
                            }
                        }
                        last_seq = Some(seq);
                    }
                    None => unparsed += 1,
                }
            }
        }

        if last_report.elapsed() >= report_every {
            let rate = window_count as f64 / last_report.elapsed().as_secs_f64();
            println!("\n----- Summary -----");
            println!("Replayed: {} lines", replay_count);
            println!("Live: {} lines ({:.1} msg/s current)", live_count, rate);
            println!("Order violations: {}", order_violations);
            println!("Unparsed lines: {}", unparsed);
            println!("-------------------\n");
            window_count = 0;
            last_report = Instant::now();
        }
    }

    println!(
        "Done. replayed={} live={} order_violations={} unparsed={}",
        replay_count, live_count, order_violations, unparsed
    );
    Ok(())
}
