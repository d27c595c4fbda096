//! State repository.
//!
//! Container records are persisted in the distributed store under a
//! per-role namespace.  A long-lived watch over that namespace feeds every
//! change to the proxy reconciler, so proxy state always follows the durable
//! record rather than the transient runtime event.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use log::{debug, info};

use crate::config::Mode;
use crate::error::StoreError;
use crate::proxy::Proxy;
use crate::types::ContainerRecord;

pub mod backoff;
pub mod etcd;
pub mod watch;

#[cfg(test)]
pub mod memory;

pub use backoff::ExponentialBackoff;
pub use etcd::EtcdClient;
pub use watch::Watcher;

/// Kind of change reported by a store watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Set,
    Delete,
}

/// One change notification from a store watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNotification {
    pub action: WatchAction,
    pub key: String,
    pub value: Option<String>,
    pub prev_value: Option<String>,
    /// Store modification index of this change.
    pub index: u64,
}

/// A key/value pair read from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub key: String,
    pub value: String,
}

/// Contents of a key subtree together with the store index it was read at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub values: Vec<StoredValue>,
    pub index: u64,
}

pub type WatchStream = BoxStream<'static, Result<WatchNotification, StoreError>>;

/// Primitives required from the distributed store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str, recursive: bool) -> Result<(), StoreError>;
    /// Reads every value below `prefix`.  A missing prefix is an empty snapshot.
    async fn snapshot(&self, prefix: &str) -> Result<Snapshot, StoreError>;
    /// Watches `prefix` for changes with an index of at least `from_index`;
    /// `0` means changes after the current index.
    async fn watch(&self, prefix: &str, from_index: u64, recursive: bool) -> Result<WatchStream, StoreError>;
}

/// Root key under which one deckhand instance keeps its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace(String);

impl Namespace {
    pub fn for_mode(mode: Mode, hostname: &str) -> Self {
        match mode {
            Mode::Master => Namespace("/masters".to_string()),
            Mode::Slave => Namespace(format!("/slaves/{}", hostname)),
        }
    }

    pub fn root(&self) -> &str {
        &self.0
    }

    pub fn key_for(&self, id: &str) -> String {
        format!("{}/{}", self.0, id)
    }
}

/// Where container records are stored.
#[async_trait]
pub trait Repo: Send + Sync {
    async fn put(&self, record: &ContainerRecord) -> Result<(), StoreError>;
    /// Removes the record; failures are not reported since a concurrent
    /// removal of the same key is expected.
    async fn remove(&self, record: &ContainerRecord);
    /// Watches `key` and everything below it, forever.
    async fn watch(&self, key: &str);
}

pub struct StateRepository<S> {
    store: Arc<S>,
    namespace: Namespace,
    proxy: Arc<dyn Proxy>,
    ttl: Option<u64>,
    backoff: ExponentialBackoff,
}

impl<S: Store + 'static> StateRepository<S> {
    pub fn new(store: Arc<S>, namespace: Namespace, proxy: Arc<dyn Proxy>) -> Self {
        Self {
            store,
            namespace,
            proxy,
            ttl: None,
            backoff: ExponentialBackoff::default(),
        }
    }

    /// Expire stored records after `ttl` seconds.
    pub fn with_ttl(mut self, ttl: Option<u64>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

#[async_trait]
impl<S: Store + 'static> Repo for StateRepository<S> {
    async fn put(&self, record: &ContainerRecord) -> Result<(), StoreError> {
        let value = serde_json::to_string(record)?;
        let key = self.namespace.key_for(&record.id);
        info!("Setting key {} for container {}", key, record.id);
        self.store.set(&key, &value, self.ttl).await
    }

    async fn remove(&self, record: &ContainerRecord) {
        let key = self.namespace.key_for(&record.id);
        info!("Removing key {} for container {}", key, record.id);
        if let Err(e) = self.store.delete(&key, true).await {
            debug!("Ignoring failed removal of {}: {}", key, e);
        }
    }

    async fn watch(&self, key: &str) {
        info!("Watching {}", key);
        Watcher::new(
            Arc::clone(&self.store),
            key,
            Arc::clone(&self.proxy),
            self.backoff.clone(),
        )
        .run()
        .await
    }
}
