//! tideline daemon: follows the chain and feeds the time series.
//!
//! Two long-lived tasks plus this driver: the chain follower performs the
//! blocking RPC and sends blocks over a rendezvous channel; the pipeline runs
//! demultiplexer, recorder, snapshotter and committer sequentially per block.
//! The driver owns shutdown (SIGINT via a quit watch) and the restart policy:
//! transient failures restart from the last committed height, protocol and
//! integrity violations terminate the process.

mod config;

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Router};
use config::Config;
use prometheus::TextEncoder;
use std::sync::Arc;
use std::time::Duration;
use tideline_chain::{Block, ChainError, Client, HttpRpc};
use tideline_event::Demux;
use tideline_timeseries::{Store, StoreError, Timeseries};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

/// Pause before re-polling once the chain reports no more data, and before
/// retrying after a transient failure.
const CATCHUP_SLEEP: Duration = Duration::from_secs(7);

/// Applies to every RPC request on the node endpoint.
const RPC_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().context("configuration")?;

    let store = Store::connect(&config.db_url, config.db_max_conn)
        .await
        .context("database connect")?;
    store.setup().await.context("database schema")?;

    let rpc = HttpRpc::new(config.node_url.clone(), RPC_TIMEOUT).context("RPC client")?;
    let client = Client::new(Arc::new(rpc));

    serve_metrics_endpoint(config.metrics_addr);

    let (quit_tx, quit_rx) = watch::channel(false);
    {
        let quit_tx = quit_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; shutting down");
                let _ = quit_tx.send(true);
            }
        });
    }

    loop {
        // Resume from the block log: rehydrated totals plus the next height.
        let (timeseries, offset) = match Timeseries::setup(store.clone()).await {
            Ok(resumed) => resumed,
            Err(e) if is_fatal(&e) => return Err(e).context("resume from block log"),
            Err(e) => {
                tracing::error!(reason = %e, "resume failed; retrying");
                sleep(CATCHUP_SLEEP).await;
                if *quit_rx.borrow() {
                    return Ok(());
                }
                continue;
            }
        };

        match run_pipeline(client.clone(), timeseries, offset, quit_rx.clone()).await? {
            PipelineEnd::Shutdown => return Ok(()),
            PipelineEnd::Retry => {
                sleep(CATCHUP_SLEEP).await;
                if *quit_rx.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

enum PipelineEnd {
    Shutdown,
    /// Transient failure: restart from the last committed height.
    Retry,
}

/// One pipeline run: spawn the follower, ingest blocks until quit or failure.
/// Fatal faults come back as `Err`; the caller exits non-zero.
async fn run_pipeline(
    client: Client,
    mut timeseries: Timeseries,
    offset: i64,
    quit_rx: watch::Receiver<bool>,
) -> Result<PipelineEnd> {
    let (block_tx, mut block_rx) = mpsc::channel(1);
    let follower = tokio::spawn(follow_chain(client, block_tx, offset, quit_rx.clone()));

    let mut demux = Demux::default();
    let mut quit = quit_rx.clone();
    let mut failure: Option<StoreError> = None;

    loop {
        tokio::select! {
            _ = quit.changed() => break,
            received = block_rx.recv() => match received {
                // Follower went away; its result says why.
                None => break,
                Some(block) => {
                    let height = block.height;
                    if let Err(e) = timeseries.ingest(&mut demux, &block).await {
                        tracing::error!(height, reason = %e, "block ingest failed");
                        failure = Some(e);
                        break;
                    }
                    tracing::debug!(height, "block committed");
                }
            }
        }
    }

    // Dropping the receiver stops the follower; collect its verdict before
    // deciding ours.
    drop(block_rx);
    let followed = follower.await.context("follower task")?;

    if let Err(e) = followed {
        return Err(e).context("chain follower");
    }
    match failure {
        Some(e) if is_fatal(&e) => Err(e).context("pipeline"),
        Some(_) => Ok(PipelineEnd::Retry),
        None if *quit_rx.borrow() => Ok(PipelineEnd::Shutdown),
        None => Ok(PipelineEnd::Retry),
    }
}

/// Drive [Client::follow], absorbing the retryable outcomes: `NoData` waits
/// for the chain to move, transient RPC failures back off and re-enter at the
/// cursor. Protocol violations surface as `Err` and stop ingestion for good.
async fn follow_chain(
    client: Client,
    out: mpsc::Sender<Block>,
    mut offset: i64,
    mut quit: watch::Receiver<bool>,
) -> Result<(), ChainError> {
    loop {
        let (next, cause) = client.follow(&out, offset, &mut quit).await;
        offset = next;
        match cause {
            ChainError::NoData => {
                tracing::debug!(height = offset, "in sync with chain");
            }
            ChainError::Rpc(e) => {
                tracing::warn!(reason = %e, height = offset, "node RPC failure; will retry");
            }
            ChainError::Quit | ChainError::Closed => return Ok(()),
            fatal @ ChainError::Protocol(_) => return Err(fatal),
        }
        tokio::select! {
            _ = quit.changed() => return Ok(()),
            _ = sleep(CATCHUP_SLEEP) => {}
        }
        if *quit.borrow() || out.is_closed() {
            return Ok(());
        }
    }
}

fn is_fatal(err: &StoreError) -> bool {
    match err {
        // Consistency faults need an operator; retrying would mask them.
        StoreError::Integrity { .. } | StoreError::State { .. } => true,
        StoreError::Db(_) | StoreError::BeyondLast => false,
    }
}

/// Prometheus text exposition on /metrics.
fn serve_metrics_endpoint(addr: std::net::SocketAddr) {
    async fn metrics() -> Result<String, (StatusCode, String)> {
        TextEncoder::new()
            .encode_to_string(&prometheus::gather())
            .map_err(|e| {
                tracing::error!(reason = %e, "metrics encoding failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "metrics encoding failed".to_owned(),
                )
            })
    }

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(metrics));
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(addr = %addr, "metrics endpoint up");
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(reason = %e, "metrics server stopped");
                }
            }
            Err(e) => tracing::error!(reason = %e, addr = %addr, "metrics bind failed"),
        }
    });
}
