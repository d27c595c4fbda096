use crate::error::RuntimeError;
use crate::types::{ContainerRecord, LifecycleEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod docker;
pub use docker::DockerRuntime;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start monitoring the runtime for container lifecycle events.
    /// Events should be sent to the provided channel.
    async fn monitor(&self, event_tx: mpsc::Sender<LifecycleEvent>) -> Result<(), RuntimeError>;

    /// Inspect a container.  `Ok(None)` when the container does not exist.
    async fn inspect(&self, id: &str) -> Result<Option<ContainerRecord>, RuntimeError>;
}
