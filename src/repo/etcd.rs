//! etcd v2 keys API client.
//!
//! Requests go to the configured endpoints in order; the first one that
//! answers wins.  Watches are long-polls (`?wait=true`) chained by
//! `waitIndex`, exposed as a stream that ends after its first error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{Snapshot, Store, StoredValue, WatchAction, WatchNotification, WatchStream};
use crate::error::StoreError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const ERROR_KEY_NOT_FOUND: u64 = 100;
const ERROR_EVENT_INDEX_CLEARED: u64 = 401;

#[derive(Debug, Deserialize)]
struct Node {
    key: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(rename = "modifiedIndex", default)]
    modified_index: u64,
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    action: String,
    node: Option<Node>,
    #[serde(rename = "prevNode")]
    prev_node: Option<Node>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorCode")]
    error_code: u64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    index: u64,
}

/// Outcome of one long-poll.
enum Polled {
    Event(WatchNotification),
    /// An event we do not dispatch; watching resumes after `index`.
    Skipped(u64),
    /// The poll ended without an event.
    Idle,
}

#[derive(Clone)]
pub struct EtcdClient {
    client: Client,
    machines: Arc<[String]>,
}

impl EtcdClient {
    pub fn new(machines: &[String]) -> Result<Self, StoreError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        let machines: Vec<String> = machines
            .iter()
            .map(|m| m.trim().trim_end_matches('/').to_string())
            .filter(|m| !m.is_empty())
            .collect();
        Ok(Self {
            client,
            machines: machines.into(),
        })
    }

    fn keys_url(machine: &str, key: &str) -> String {
        format!("{}/v2/keys/{}", machine, key.trim_start_matches('/'))
    }

    /// Sends the request built by `build` to each machine until one answers.
    async fn send<F>(&self, build: F) -> Result<Response, StoreError>
    where
        F: Fn(&Client, &str) -> RequestBuilder + Send + Sync,
    {
        for machine in self.machines.iter() {
            match build(&self.client, machine).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!("etcd endpoint {} unreachable: {}", machine, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Unavailable(self.machines.len()))
    }

    async fn poll(&self, prefix: &str, wait_index: u64, recursive: bool) -> Result<Polled, StoreError> {
        let response = self
            .send(|client, machine| {
                let mut query = vec![("wait", "true".to_string())];
                if recursive {
                    query.push(("recursive", "true".to_string()));
                }
                if wait_index > 0 {
                    query.push(("waitIndex", wait_index.to_string()));
                }
                client.get(Self::keys_url(machine, prefix)).query(&query)
            })
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(decode_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Polled::Idle);
        }
        parse_event(&body)
    }
}

fn decode_error(status: StatusCode, body: &str) -> StoreError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) if err.error_code == ERROR_KEY_NOT_FOUND => {
            StoreError::KeyNotFound(err.cause.unwrap_or_default())
        }
        Ok(err) if err.error_code == ERROR_EVENT_INDEX_CLEARED => StoreError::IndexCleared(err.index),
        Ok(err) => StoreError::Api {
            code: err.error_code,
            message: err.message,
        },
        Err(_) => StoreError::Api {
            code: u64::from(status.as_u16()),
            message: body.to_string(),
        },
    }
}

fn parse_event(body: &str) -> Result<Polled, StoreError> {
    let response: KeysResponse = serde_json::from_str(body)?;
    let Some(node) = response.node else {
        return Ok(Polled::Idle);
    };
    let action = match response.action.as_str() {
        "set" | "create" | "update" | "compareAndSwap" => WatchAction::Set,
        "delete" | "expire" | "compareAndDelete" => WatchAction::Delete,
        other => {
            debug!("Ignoring etcd action {} on {}", other, node.key);
            return Ok(Polled::Skipped(node.modified_index));
        }
    };
    // Directory events carry no container record.
    if node.dir {
        return Ok(Polled::Skipped(node.modified_index));
    }
    Ok(Polled::Event(WatchNotification {
        action,
        key: node.key,
        value: node.value,
        prev_value: response.prev_node.and_then(|n| n.value),
        index: node.modified_index,
    }))
}

fn flatten(node: Node, out: &mut Vec<StoredValue>) {
    if node.dir {
        for child in node.nodes {
            flatten(child, out);
        }
    } else if let Some(value) = node.value {
        out.push(StoredValue {
            key: node.key,
            value,
        });
    }
}

fn parse_snapshot(body: &str, header_index: Option<u64>) -> Result<Snapshot, StoreError> {
    let response: KeysResponse = serde_json::from_str(body)?;
    let mut values = Vec::new();
    let mut max_index = 0;
    if let Some(node) = response.node {
        max_index = node.modified_index;
        flatten(node, &mut values);
    }
    Ok(Snapshot {
        values,
        index: header_index.unwrap_or(max_index),
    })
}

struct WatchState {
    client: EtcdClient,
    prefix: String,
    recursive: bool,
    next_index: u64,
    failed: bool,
}

#[async_trait]
impl Store for EtcdClient {
    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StoreError> {
        let mut form = vec![("value", value.to_string())];
        if let Some(ttl) = ttl {
            form.push(("ttl", ttl.to_string()));
        }
        let response = self
            .send(|client, machine| {
                client
                    .put(Self::keys_url(machine, key))
                    .form(&form)
                    .timeout(REQUEST_TIMEOUT)
            })
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(decode_error(status, &response.text().await?))
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<(), StoreError> {
        let response = self
            .send(|client, machine| {
                client
                    .delete(Self::keys_url(machine, key))
                    .query(&[("recursive", recursive)])
                    .timeout(REQUEST_TIMEOUT)
            })
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(decode_error(status, &response.text().await?))
    }

    async fn snapshot(&self, prefix: &str) -> Result<Snapshot, StoreError> {
        let response = self
            .send(|client, machine| {
                client
                    .get(Self::keys_url(machine, prefix))
                    .query(&[("recursive", "true")])
                    .timeout(REQUEST_TIMEOUT)
            })
            .await?;
        let status = response.status();
        let header_index = response
            .headers()
            .get("X-Etcd-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            if let Ok(err) = serde_json::from_str::<ErrorBody>(&body) {
                if err.error_code == ERROR_KEY_NOT_FOUND {
                    return Ok(Snapshot {
                        values: Vec::new(),
                        index: header_index.unwrap_or(err.index),
                    });
                }
            }
        }
        if !status.is_success() {
            return Err(decode_error(status, &body));
        }
        parse_snapshot(&body, header_index)
    }

    async fn watch(&self, prefix: &str, from_index: u64, recursive: bool) -> Result<WatchStream, StoreError> {
        let state = WatchState {
            client: self.clone(),
            prefix: prefix.to_string(),
            recursive,
            next_index: from_index,
            failed: false,
        };

        let s = stream::unfold(state, |mut st| async move {
            if st.failed {
                return None;
            }
            loop {
                match st.client.poll(&st.prefix, st.next_index, st.recursive).await {
                    Ok(Polled::Event(n)) => {
                        st.next_index = n.index + 1;
                        return Some((Ok(n), st));
                    }
                    Ok(Polled::Skipped(index)) => st.next_index = index + 1,
                    Ok(Polled::Idle) => continue,
                    Err(e) => {
                        st.failed = true;
                        return Some((Err(e), st));
                    }
                }
            }
        });
        Ok(s.boxed())
    }
}
