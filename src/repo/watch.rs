//! Store watch loop.
//!
//! ```text
//! CONNECTING ──ok──▶ STREAMING ──stream error──▶ delivered anything? ──yes──▶ CONNECTING
//!     │                                                   │
//!     └──error──────────────────────────────────────────▶ no ──▶ BACKING_OFF ──▶ CONNECTING
//! ```
//!
//! One cycle runs to completion (the stream is drained or fails) before the
//! next connect, so reconnects never leave watch tasks behind.  Without a
//! resume index, connecting starts from a snapshot of the watched subtree.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::time::sleep;

use super::backoff::ExponentialBackoff;
use super::{Store, WatchAction, WatchNotification};
use crate::error::StoreError;
use crate::proxy::Proxy;
use crate::types::ContainerRecord;

pub struct Watcher<S> {
    store: Arc<S>,
    key: String,
    proxy: Arc<dyn Proxy>,
    backoff: ExponentialBackoff,
    /// Index to resume from; `None` forces a fresh snapshot.
    next_index: Option<u64>,
}

impl<S: Store> Watcher<S> {
    pub fn new(store: Arc<S>, key: &str, proxy: Arc<dyn Proxy>, backoff: ExponentialBackoff) -> Self {
        Self {
            store,
            key: key.to_string(),
            proxy,
            backoff,
            next_index: None,
        }
    }

    /// Watches forever.
    pub async fn run(mut self) {
        loop {
            if let Some(delay) = self.cycle().await {
                sleep(delay).await;
            }
        }
    }

    /// Runs one connect/stream cycle.  Returns the delay to back off for,
    /// or `None` to reconnect right away.
    pub async fn cycle(&mut self) -> Option<Duration> {
        let mut delivered = false;

        match self.connect_and_stream(&mut delivered).await {
            Ok(()) => debug!("Watch on {} ended, reconnecting", self.key),
            Err(StoreError::IndexCleared(index)) => {
                warn!(
                    "Watch index on {} was cleared (store at {}), resynchronising",
                    self.key, index
                );
                self.next_index = None;
            }
            Err(e) if delivered => {
                warn!("Watch on {} failed after delivering data: {}", self.key, e);
            }
            Err(e) => {
                let delay = self.backoff.next_backoff();
                warn!(
                    "Watch on {} failed: {}. Retrying in {:?}",
                    self.key, e, delay
                );
                return Some(delay);
            }
        }

        if delivered {
            None
        } else {
            // A stream that closes without data must not reconnect in a
            // tight loop.
            Some(self.backoff.next_backoff())
        }
    }

    async fn connect_and_stream(&mut self, delivered: &mut bool) -> Result<(), StoreError> {
        let from_index = match self.next_index {
            Some(index) => index,
            None => self.resync().await?,
        };

        let mut stream = self.store.watch(&self.key, from_index, true).await?;
        info!("Watching {} from index {}", self.key, from_index);

        while let Some(item) = stream.next().await {
            let notification = item?;
            *delivered = true;
            self.backoff.reset();
            self.next_index = Some(notification.index + 1);
            self.dispatch(&notification).await;
        }
        Ok(())
    }

    /// Replays the current contents of the watched subtree as updates and
    /// returns the index to watch from.
    async fn resync(&mut self) -> Result<u64, StoreError> {
        let snapshot = self.store.snapshot(&self.key).await?;
        info!(
            "Synchronising {} record(s) under {} at index {}",
            snapshot.values.len(),
            self.key,
            snapshot.index
        );
        for stored in &snapshot.values {
            if let Some(record) = decode(&stored.key, Some(stored.value.as_str())) {
                self.proxy.container_updated(&record).await;
            }
        }
        let next = snapshot.index + 1;
        self.next_index = Some(next);
        Ok(next)
    }

    async fn dispatch(&self, notification: &WatchNotification) {
        debug!(
            "Watch notification {:?} for {} at index {}",
            notification.action, notification.key, notification.index
        );
        match notification.action {
            WatchAction::Set => {
                if let Some(record) = decode(&notification.key, notification.value.as_deref()) {
                    self.proxy.container_updated(&record).await;
                }
            }
            WatchAction::Delete => {
                if let Some(record) = decode(&notification.key, notification.prev_value.as_deref()) {
                    self.proxy.container_removed(&record).await;
                }
            }
        }
    }
}

fn decode(key: &str, value: Option<&str>) -> Option<ContainerRecord> {
    let Some(value) = value else {
        warn!("No value for {}, skipping", key);
        return None;
    };
    match serde_json::from_str(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping undecodable record at {}: {}", key, e);
            None
        }
    }
}
