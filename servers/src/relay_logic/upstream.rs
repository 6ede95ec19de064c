use crate::relay_logic::config::Config;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use lib_common::core::relay_state::RelayState;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{
    connect_async,
    tungstenite::client::IntoClientRequest,
    tungstenite::protocol::Message as WsMessage,
};

/// Owns one outbound connection attempt for the lifetime of the run.
///
/// On open the session state is wiped and the configured subscription
/// requests are sent fire-and-forget. Every inbound text frame stamps the
/// liveness topics it mentions and is published to the cache and the
/// attached client. A close frame, read error, or end of stream sets the
/// shared failure flag and ends the task; reconnection policy belongs to
/// the caller, not here.
pub async fn run(config: Config, state: RelayState, mut shutdown: broadcast::Receiver<()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();
    state.set_upstream_tx(cmd_tx);

    log::info!("Attempting outgoing connection to {}", config.upstream_url);

    let mut request = match config.upstream_url.as_str().into_client_request() {
        Ok(request) => request,
        Err(e) => {
            log::error!("Invalid upstream URL {}: {}", config.upstream_url, e);
            state.mark_upstream_failed();
            return;
        }
    };
    match HeaderValue::from_str(&config.origin) {
        Ok(value) => {
            request.headers_mut().insert("Origin", value);
        }
        Err(e) => {
            log::error!("Invalid Origin header value {:?}: {}", config.origin, e);
            state.mark_upstream_failed();
            return;
        }
    }

    let ws_stream = match connect_async(request).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            log::error!("Failed to connect to upstream feed: {}", e);
            state.mark_upstream_failed();
            return;
        }
    };

    log::info!("Outgoing connection established");
    let (mut write, mut read) = ws_stream.split();

    // Fresh session: stale lines from a previous connection must not
    // leak into the replay buffer, and every topic starts "just seen".
    state.begin_session();

    log::info!("Subscribing to {} channels", config.subscriptions.len());
    for subscription in &config.subscriptions {
        if let Err(e) = write
            .send(WsMessage::Text(format!("{subscription}\n").into()))
            .await
        {
            log::error!("Failed to send subscription request: {}", e);
            state.mark_upstream_failed();
            return;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Upstream shutting down...");
                let _ = write.close().await;
                return;
            }
            Some(line) = cmd_rx.recv() => {
                // Client input forwarded upstream is best-effort; the
                // silence watchdog is the authority on link liveness.
                if let Err(e) = write.send(WsMessage::Text(format!("{line}\n").into())).await {
                    log::warn!("Failed to forward client input upstream: {}", e);
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_feed_line(&config, &state, text.as_str());
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                        // Keepalives carry no feed content and do not
                        // count as topic activity.
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        log::warn!("Upstream closed the connection");
                        state.mark_upstream_failed();
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("Websocket error: {}", e);
                        state.mark_upstream_failed();
                        return;
                    }
                    None => {
                        log::warn!("Upstream stream ended");
                        state.mark_upstream_failed();
                        return;
                    }
                }
            }
        }
    }
}

/// Records topic activity for every configured topic mentioned in the
/// line, then publishes it to the cache and the attached client.
fn handle_feed_line(config: &Config, state: &RelayState, text: &str) {
    let line = text.trim_end_matches(['\r', '\n']);
    for topic in &config.topics {
        if line.contains(topic.as_str()) {
            state.record_activity(topic);
        }
    }
    state.publish(line);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config(topics: &[&str]) -> Config {
        Config {
            port: 0,
            log_dir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
            upstream_url: "wss://feed.test/stream".to_string(),
            origin: "https://feed.test".to_string(),
            subscriptions: Vec::new(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            cache_capacity: 16,
            warm_up_threshold: 4,
            silent_limit: Duration::from_secs(1),
            accept_timeout: Duration::from_millis(100),
            read_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_feed_line_stamps_only_matching_topics() {
        let config = test_config(&["ticker", "depth"]);
        let state = RelayState::new(&config.topics, config.cache_capacity, config.warm_up_threshold);

        std::thread::sleep(Duration::from_millis(15));
        handle_feed_line(&config, &state, "ticker update 1");

        // "depth" was never stamped, so the oldest topic is still the
        // construction stamp.
        assert!(state.silence() >= Duration::from_millis(15));

        handle_feed_line(&config, &state, "depth snapshot 1");
        assert!(state.silence() < Duration::from_millis(15));
    }

    #[test]
    fn test_feed_line_is_published_without_trailing_newline() {
        let config = test_config(&["ticker"]);
        let state = RelayState::new(&config.topics, config.cache_capacity, config.warm_up_threshold);

        handle_feed_line(&config, &state, "ticker update 1\n");

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        assert_eq!(state.attach_client(tx), vec!["ticker update 1"]);
    }
}
