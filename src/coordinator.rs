//! Event coordinator.
//!
//! Consumes lifecycle events from the runtime monitor, runs the matching
//! hooks and turns start/stop events into repository writes.  It never
//! talks to the proxy: the repository watch does that from the stored
//! record.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::hooks::Hooks;
use crate::repo::Repo;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerRecord, EventStatus, LifecycleEvent};

pub struct Coordinator {
    runtime: Arc<dyn ContainerRuntime>,
    repo: Arc<dyn Repo>,
    hooks: Hooks,
}

impl Coordinator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, repo: Arc<dyn Repo>, hooks: Hooks) -> Self {
        Self {
            runtime,
            repo,
            hooks,
        }
    }

    /// Processes events until the channel closes.
    pub async fn run(&self, mut event_rx: mpsc::Receiver<LifecycleEvent>) {
        while let Some(event) = event_rx.recv().await {
            self.handle(&event).await;
        }
        info!("Lifecycle event channel closed, coordinator stopping");
    }

    pub async fn handle(&self, event: &LifecycleEvent) {
        info!("Processing {} event for {}", event.status, event.id);
        self.hooks.run(event).await;

        match event.status {
            EventStatus::Start => {
                if let Some(record) = self.inspect(event).await {
                    if let Err(e) = self.repo.put(&record).await {
                        error!("Failed to store container {}: {}", record.id, e);
                    }
                }
            }
            EventStatus::Die | EventStatus::Destroy => {
                if let Some(record) = self.inspect(event).await {
                    self.repo.remove(&record).await;
                }
            }
            EventStatus::Kill | EventStatus::Other(_) => {
                debug!("No action for {} event", event.status);
            }
        }
    }

    async fn inspect(&self, event: &LifecycleEvent) -> Option<ContainerRecord> {
        match self.runtime.inspect(&event.id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => {
                warn!(
                    "Container {} not found, ignoring {} event",
                    event.id, event.status
                );
                None
            }
            Err(e) => {
                error!(
                    "Error inspecting container {}: {} - ignoring {} event",
                    event.id, e, event.status
                );
                None
            }
        }
    }
}
