//! Backend and frontend definitions derived from a container record.
//!
//! Identical image and front port across containers map to the same
//! backend key, so replicas of one image end up as members of one backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::nat::{self, NatRecord};
use crate::types::ContainerRecord;

pub const DEFAULT_BALANCE: &str = "roundrobin";

/// How the control plane manages an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    #[default]
    Static,
    Dynamic,
}

/// Proxying mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Tcp,
    Http,
}

/// A traffic target within a backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Member {
    pub host: String,
    pub port: u16,
}

impl From<&NatRecord> for Member {
    fn from(n: &NatRecord) -> Self {
        Member {
            host: n.backend_host.clone(),
            port: n.backend_port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    /// Assigned by the control plane; create-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Assigned by the control plane; create-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Kind,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_balance")]
    pub balance: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl Backend {
    /// Drops the identity fields the control plane rejects on update.
    pub fn clear_identity(&mut self) {
        self.key = None;
        self.id = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub bind: String,
    pub backend: String,
    #[serde(rename = "type", default)]
    pub kind: Kind,
    #[serde(default)]
    pub mode: Mode,
}

fn default_balance() -> String {
    DEFAULT_BALANCE.to_string()
}

/// The key shared by the backend and frontend of `image` on `front_port`.
pub fn end_key(image: &str, front_port: u16) -> String {
    format!("{}:{}", image, front_port)
}

/// Backends and frontends contributed by one container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProxyModel {
    pub backends: BTreeMap<String, Backend>,
    pub frontends: BTreeMap<String, Frontend>,
}

/// Builds the proxy model of `record`.
pub fn build(record: &ContainerRecord) -> ProxyModel {
    build_from_nats(&record.image, &nat::extract(record))
}

pub fn build_from_nats(image: &str, nats: &BTreeMap<u16, Vec<NatRecord>>) -> ProxyModel {
    let mut model = ProxyModel::default();

    for (&front_port, records) in nats {
        let key = end_key(image, front_port);

        let mut members: Vec<Member> = records.iter().map(Member::from).collect();
        members.sort();
        members.dedup();

        model.backends.insert(
            key.clone(),
            Backend {
                key: None,
                id: None,
                name: key.clone(),
                kind: Kind::Static,
                mode: Mode::Tcp,
                balance: default_balance(),
                members,
            },
        );
        model.frontends.insert(
            key.clone(),
            Frontend {
                key: None,
                id: None,
                bind: format!("*:{}", front_port),
                backend: key,
                kind: Kind::Static,
                mode: Mode::Tcp,
            },
        );
    }

    model
}
