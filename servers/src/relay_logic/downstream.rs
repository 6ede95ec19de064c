use crate::relay_logic::config::Config;
use anyhow::{Context, Result};
use lib_common::core::relay_state::RelayState;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Serves successive single clients until the upstream is declared dead.
///
/// Accept waits are bounded so feed liveness is re-checked at least once
/// per accept timeout even with no client connected; prolonged silence on
/// every topic is treated exactly like an upstream error.
pub async fn run(config: Config, state: RelayState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind client listener on {addr}"))?;
    log::info!("Relay listening for clients on {}", addr);

    while !state.upstream_failed() {
        let stream = match timeout(config.accept_timeout, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                log::info!("New client connected from {}", peer);
                stream
            }
            Ok(Err(e)) => {
                log::warn!("Failed to accept client: {}", e);
                continue;
            }
            Err(_) => {
                // Use the accept timeout to check for feed activity.
                if state.silence() > config.silent_limit {
                    log::warn!("No feed activity for a long time - giving up on upstream");
                    state.mark_upstream_failed();
                }
                continue;
            }
        };

        serve_client(&config, &state, stream).await;
        log::info!("Client session ended");
    }

    Ok(())
}

/// One client session: replay the cache backlog, then pump lines both
/// ways until the client leaves or the upstream is judged dead.
async fn serve_client(config: &Config, state: &RelayState, stream: TcpStream) {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut writer = BufWriter::new(write_half);

    let (tx, mut forward_rx) = mpsc::unbounded_channel::<String>();
    let backlog = state.attach_client(tx);

    log::info!("Replaying {} cached messages to client", backlog.len());
    let mut client_alive = true;
    for entry in &backlog {
        if write_line(&mut writer, entry).await.is_err() {
            log::info!("Client lost during replay");
            client_alive = false;
            break;
        }
    }

    while client_alive {
        if state.upstream_failed() {
            log::warn!("Lost upstream connection - ending client session");
            break;
        }
        if state.silence() > config.silent_limit {
            log::warn!("No feed activity for a long time - ending client session");
            state.mark_upstream_failed();
            break;
        }

        tokio::select! {
            forwarded = forward_rx.recv() => {
                match forwarded {
                    Some(line) => {
                        if write_line(&mut writer, &line).await.is_err() {
                            log::info!("Client lost");
                            break;
                        }
                    }
                    None => break,
                }
            }
            read = timeout(config.read_timeout, lines.next_line()) => {
                match read {
                    // Idle read window; loop around for the liveness checks.
                    Err(_) => {}
                    Ok(Ok(Some(line))) => state.send_upstream(&line),
                    Ok(Ok(None)) => {
                        log::info!("Client disconnected");
                        break;
                    }
                    Ok(Err(e)) => {
                        log::info!("Client lost: {}", e);
                        break;
                    }
                }
            }
        }
    }

    state.detach_client();
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_write_line_terminates_and_flushes() {
        let mut sink = Cursor::new(Vec::new());
        write_line(&mut sink, "ticker update 1").await.expect("write");
        write_line(&mut sink, "ticker update 2").await.expect("write");
        assert_eq!(
            sink.into_inner(),
            b"ticker update 1\nticker update 2\n".to_vec()
        );
    }
}
