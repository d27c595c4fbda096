use super::ContainerRuntime;
use crate::error::RuntimeError;
use crate::types::{ContainerRecord, LifecycleEvent, PortBinding};
use async_trait::async_trait;
use bollard::errors::Error as DockerError;
use bollard::models::ContainerInspectResponse;
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

const CONNECT_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
    advertise_ip: Option<String>,
}

impl DockerRuntime {
    /// Connects to `docker_host` (`unix://`, `tcp://` or `http://`).  An
    /// empty host uses the local defaults.
    pub fn connect(docker_host: &str, advertise_ip: Option<String>) -> Result<Self, RuntimeError> {
        let docker = if docker_host.is_empty() {
            Docker::connect_with_local_defaults()?
        } else if let Some(path) = docker_host.strip_prefix("unix://") {
            Docker::connect_with_socket(path, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        } else {
            let addr = docker_host.replacen("tcp://", "http://", 1);
            Docker::connect_with_http(&addr, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)?
        };
        Ok(Self {
            docker,
            advertise_ip,
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn monitor(&self, event_tx: mpsc::Sender<LifecycleEvent>) -> Result<(), RuntimeError> {
        loop {
            // Every container event is forwarded so hooks can run for any
            // status; the coordinator decides which ones touch the store.
            let opts = EventsOptions::<String> {
                filters: [("type", ["container"].as_slice())]
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
                    .collect(),
                ..Default::default()
            };

            let mut stream = self.docker.events(Some(opts));

            info!("Listening for Docker events...");
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(event) => {
                        let Some(id) = event.actor.and_then(|a| a.id) else {
                            continue;
                        };
                        let Some(action) = event.action else {
                            continue;
                        };
                        debug!("Container event: {} for {}", action, id);

                        if event_tx
                            .send(LifecycleEvent::new(action.as_str(), id))
                            .await
                            .is_err()
                        {
                            error!("Lifecycle event channel closed");
                            return Err(RuntimeError::ChannelClosed);
                        }
                    }
                    Err(e) => {
                        error!("Error in Docker event stream: {}", e);
                        break; // Break inner loop to reconnect
                    }
                }
            }

            warn!("Docker event stream ended. Reconnecting in 2s...");
            sleep(Duration::from_secs(2)).await;
        }
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerRecord>, RuntimeError> {
        match self.docker.inspect_container(id, None).await {
            Ok(detail) => Ok(Some(to_record(id, &detail, self.advertise_ip.as_deref()))),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds the stored record from an inspect response.  The published host
/// is `advertise_ip` when set, otherwise the container's own address.
fn to_record(
    id: &str,
    detail: &ContainerInspectResponse,
    advertise_ip: Option<&str>,
) -> ContainerRecord {
    let image = detail
        .config
        .as_ref()
        .and_then(|c| c.image.clone())
        .or_else(|| detail.image.clone())
        .unwrap_or_default();

    let settings = detail.network_settings.as_ref();
    let host_ip = match advertise_ip {
        Some(ip) => ip.to_string(),
        None => settings
            .and_then(|s| s.ip_address.clone())
            .unwrap_or_default(),
    };

    let mut ports = BTreeMap::new();
    if let Some(map) = settings.and_then(|s| s.ports.as_ref()) {
        for (port, bindings) in map {
            let bindings = bindings
                .iter()
                .flatten()
                .map(|b| PortBinding {
                    host_ip: b.host_ip.clone().unwrap_or_default(),
                    host_port: b.host_port.clone().unwrap_or_default(),
                })
                .collect();
            ports.insert(port.clone(), bindings);
        }
    }

    ContainerRecord {
        id: detail.id.clone().unwrap_or_else(|| id.to_string()),
        image,
        host_ip,
        ports,
    }
}
