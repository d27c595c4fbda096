//! Data structures shared by the coordinator, repository and proxy layers.
//!
//! A [`ContainerRecord`] is what gets persisted in the store: it is
//! serialised with [`serde`](https://serde.rs/) as JSON and stored under
//! the namespace key of the host that observed the container.  Everything
//! the proxy layer derives (NAT records, backends, frontends) is computed
//! from it on the watch side.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single host-side publication of a container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Address the port is bound to on the host, often `0.0.0.0`.
    #[serde(default)]
    pub host_ip: String,
    /// Host port, kept as a string because that is how the runtime reports it.
    #[serde(default)]
    pub host_port: String,
}

/// The network topology of one container, as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub image: String,
    /// Address the proxy should use to reach this container's published ports.
    #[serde(default)]
    pub host_ip: String,
    /// `"<port>/<proto>"` → host bindings.
    #[serde(default)]
    pub ports: BTreeMap<String, Vec<PortBinding>>,
}

#[cfg(test)]
impl ContainerRecord {
    pub fn new(id: impl Into<String>, image: impl Into<String>, host_ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            host_ip: host_ip.into(),
            ports: BTreeMap::new(),
        }
    }

    /// Adds a host binding for `container_port` (e.g. `"80/tcp"`).
    pub fn publish(mut self, container_port: &str, host_ip: &str, host_port: u16) -> Self {
        self.ports
            .entry(container_port.to_string())
            .or_default()
            .push(PortBinding {
                host_ip: host_ip.to_string(),
                host_port: host_port.to_string(),
            });
        self
    }
}

/// Lifecycle status reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    Start,
    Die,
    Kill,
    Destroy,
    Other(String),
}

impl EventStatus {
    pub fn as_str(&self) -> &str {
        match self {
            EventStatus::Start => "start",
            EventStatus::Die => "die",
            EventStatus::Kill => "kill",
            EventStatus::Destroy => "destroy",
            EventStatus::Other(s) => s,
        }
    }
}

impl From<&str> for EventStatus {
    fn from(s: &str) -> Self {
        match s {
            "start" => EventStatus::Start,
            "die" => EventStatus::Die,
            "kill" => EventStatus::Kill,
            "destroy" => EventStatus::Destroy,
            other => EventStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container lifecycle event.  Events only carry an id; the full state
/// is obtained by inspecting the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub status: EventStatus,
    pub id: String,
}

impl LifecycleEvent {
    pub fn new(status: impl Into<EventStatus>, id: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            id: id.into(),
        }
    }
}
