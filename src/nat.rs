//! NAT extraction.
//!
//! Turns a container's published-port table into NAT records grouped by the
//! container-side ("front") port.  Runtime metadata is not always complete,
//! so malformed entries are skipped rather than failing the whole record.

use std::collections::BTreeMap;

use log::warn;

use crate::types::ContainerRecord;

/// One reachable `(host, port)` for a container-side port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NatRecord {
    pub front_port: u16,
    pub backend_host: String,
    pub backend_port: u16,
}

/// Parses the port number out of a `"<port>/<proto>"` key.
pub fn parse_front_port(port_key: &str) -> Option<u16> {
    let port = port_key.split('/').next()?;
    port.trim().parse().ok()
}

/// Extracts the NAT records of `record`, keyed by front port.
pub fn extract(record: &ContainerRecord) -> BTreeMap<u16, Vec<NatRecord>> {
    let mut nats: BTreeMap<u16, Vec<NatRecord>> = BTreeMap::new();

    for (port_key, bindings) in &record.ports {
        let Some(front_port) = parse_front_port(port_key) else {
            warn!(
                "Skipping malformed port '{}' on container {}",
                port_key, record.id
            );
            continue;
        };

        let entry = nats.entry(front_port).or_default();
        for binding in bindings {
            match binding.host_port.trim().parse::<u16>() {
                Ok(backend_port) => entry.push(NatRecord {
                    front_port,
                    backend_host: record.host_ip.clone(),
                    backend_port,
                }),
                Err(_) => warn!(
                    "Skipping malformed host port '{}' for {} on container {}",
                    binding.host_port, port_key, record.id
                ),
            }
        }
    }

    // A port that is exposed but not published has nothing to route to.
    nats.retain(|_, v| !v.is_empty());
    nats
}
