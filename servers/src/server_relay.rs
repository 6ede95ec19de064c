//! # Caching Feed Relay
//!
//! A single-client relay between one downstream line-oriented TCP
//! consumer and one upstream realtime WebSocket feed. It buffers the
//! most recent feed lines in a bounded replay cache, tracks per-topic
//! liveness, replays the cache to a newly attached client, then pumps
//! messages both ways until the client leaves or the upstream is judged
//! dead. The run ends on the first unrecovered upstream failure; the
//! exit code reports whether the session ever warmed up.

use anyhow::Result;
use lib_common::core::relay_state::RelayState;
use tokio::signal;

mod relay_logic;
use relay_logic::{config, downstream, logger, upstream};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();
    // Pick up a local .env before clap reads the environment
    let _ = dotenvy::dotenv();

    let config = config::load_config()?;
    logger::setup_logging(&config.log_dir, &config.log_level)?;

    let state = RelayState::new(&config.topics, config.cache_capacity, config.warm_up_threshold);
    log::info!("Relay ready");

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let upstream_handle = tokio::spawn(upstream::run(
        config.clone(),
        state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Serve clients in the foreground until the upstream fails or a
    // shutdown signal arrives.
    tokio::select! {
        res = downstream::run(config.clone(), state.clone()) => {
            if let Err(e) = res {
                log::error!("Client listener failed: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install signal handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Tear down the upstream connection and collect the task.
    let _ = shutdown_tx.send(());
    let _ = upstream_handle.await;

    let warmed_up = state.had_successful_run();
    log::info!("Relay run finished; warmed up: {}", warmed_up);
    std::process::exit(if warmed_up { 0 } else { 1 });
}
