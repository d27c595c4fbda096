//! In-memory store with etcd-like indexes and watch history, for tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;

use super::{Snapshot, Store, StoredValue, WatchAction, WatchNotification, WatchStream};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    values: BTreeMap<String, String>,
    history: Vec<WatchNotification>,
    index: u64,
    touched: Vec<String>,
    unavailable: bool,
}

pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    changed: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::default(),
            changed,
        }
    }
}

impl MemoryStore {
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().values.get(key).cloned()
    }

    /// Every key or prefix passed to the store so far.
    pub fn touched_keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().touched.clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    fn touch(&self, key: &str) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.touched.push(key.to_string());
        if inner.unavailable {
            return Err(StoreError::Unavailable(1));
        }
        Ok(inner)
    }

    fn publish(&self, inner: &mut Inner, action: WatchAction, key: &str, value: Option<String>, prev_value: Option<String>) {
        inner.index += 1;
        let index = inner.index;
        inner.history.push(WatchNotification {
            action,
            key: key.to_string(),
            value,
            prev_value,
            index,
        });
        self.changed.send_replace(index);
    }
}

fn under(key: &str, prefix: &str) -> bool {
    key == prefix || key.starts_with(&format!("{}/", prefix.trim_end_matches('/')))
}

#[async_trait]
impl Store for MemoryStore {
    async fn set(&self, key: &str, value: &str, _ttl: Option<u64>) -> Result<(), StoreError> {
        let mut inner = self.touch(key)?;
        let prev = inner.values.insert(key.to_string(), value.to_string());
        self.publish(&mut inner, WatchAction::Set, key, Some(value.to_string()), prev);
        Ok(())
    }

    async fn delete(&self, key: &str, _recursive: bool) -> Result<(), StoreError> {
        let mut inner = self.touch(key)?;
        match inner.values.remove(key) {
            Some(prev) => {
                self.publish(&mut inner, WatchAction::Delete, key, None, Some(prev));
                Ok(())
            }
            None => Err(StoreError::KeyNotFound(key.to_string())),
        }
    }

    async fn snapshot(&self, prefix: &str) -> Result<Snapshot, StoreError> {
        let inner = self.touch(prefix)?;
        Ok(Snapshot {
            values: inner
                .values
                .iter()
                .filter(|(k, _)| under(k, prefix))
                .map(|(k, v)| StoredValue {
                    key: k.clone(),
                    value: v.clone(),
                })
                .collect(),
            index: inner.index,
        })
    }

    async fn watch(&self, prefix: &str, from_index: u64, _recursive: bool) -> Result<WatchStream, StoreError> {
        let start = {
            let inner = self.touch(prefix)?;
            if from_index == 0 {
                inner.index + 1
            } else {
                from_index
            }
        };
        let inner = Arc::clone(&self.inner);
        let changed = self.changed.subscribe();
        let prefix = prefix.to_string();

        let s = stream::unfold((start, changed), move |(next, mut changed)| {
            let inner = Arc::clone(&inner);
            let prefix = prefix.clone();
            async move {
                loop {
                    let found = {
                        let inner = inner.lock().unwrap();
                        inner
                            .history
                            .iter()
                            .find(|n| n.index >= next && under(&n.key, &prefix))
                            .cloned()
                    };
                    if let Some(n) = found {
                        let after = n.index + 1;
                        return Some((Ok(n), (after, changed)));
                    }
                    if changed.changed().await.is_err() {
                        return None;
                    }
                }
            }
        });
        Ok(s.boxed())
    }
}
