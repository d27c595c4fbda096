//! Deckhand daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;
use tokio::sync::mpsc;

mod config;
mod coordinator;
mod error;
mod hooks;
mod nat;
mod proxy;
mod repo;
mod runtime;
#[cfg(test)]
mod test_server;
mod types;

use config::Config;
use coordinator::Coordinator;
use hooks::Hooks;
use proxy::{AqueductClient, Proxy, Reconciler};
use repo::{EtcdClient, Repo, StateRepository};
use runtime::{ContainerRuntime, DockerRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting Deckhand with config: {:?}", cfg);

    let namespace = cfg.namespace()?;
    info!("Using namespace {}", namespace.root());

    // Proxy control plane
    let proxy: Arc<dyn Proxy> = Arc::new(Reconciler::new(AqueductClient::new(&cfg.aqueduct_host)?));

    // Store-backed repository
    let store = Arc::new(EtcdClient::new(&cfg.etcd_hosts)?);
    let repo = Arc::new(
        StateRepository::new(store, namespace, proxy)
            .with_ttl(cfg.record_ttl)
            .with_backoff(cfg.watch_backoff()),
    );

    // Container Runtime (Docker)
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect(&cfg.docker_host, cfg.advertise_ip.clone())?);

    // Lifecycle event channel
    let (event_tx, event_rx) = mpsc::channel(cfg.event_buffer.max(1));

    // Watch the store before listening for events
    let repo_for_watch = Arc::clone(&repo);
    let watch_handle = tokio::spawn(async move {
        let root = repo_for_watch.namespace().root().to_string();
        repo_for_watch.watch(&root).await;
    });

    let runtime_for_monitor = Arc::clone(&runtime);
    let runtime_handle = tokio::spawn(async move {
        if let Err(e) = runtime_for_monitor.monitor(event_tx).await {
            error!("Container runtime failed: {}", e);
        }
    });

    let coordinator = Coordinator::new(runtime, repo, Hooks::new(cfg.handler_dir.clone()));
    let coordinator_handle = tokio::spawn(async move {
        coordinator.run(event_rx).await;
    });

    wait_for_shutdown().await;

    // Abort tasks; all state lives in the store, so nothing needs draining.
    runtime_handle.abort();
    coordinator_handle.abort();
    watch_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                error!("Unable to listen for SIGTERM: {}", err);
                wait_for_ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = wait_for_ctrl_c() => {}
            _ = term.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}
