use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::repo::{ExponentialBackoff, Namespace};

/// Role of this instance; selects the store namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Master,
    Slave,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub mode: Mode,
    pub handler_dir: PathBuf,
    pub aqueduct_host: String,
    pub docker_host: String,
    #[serde(deserialize_with = "comma_separated")]
    pub etcd_hosts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_ttl: Option<u64>,
    pub watch_backoff_initial_ms: u64,
    pub watch_backoff_max_ms: u64,
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Slave,
            handler_dir: PathBuf::from("/tmp"),
            aqueduct_host: "http://localhost:10000".into(),
            docker_host: "unix:///var/run/docker.sock".into(),
            etcd_hosts: vec!["http://localhost:4001".into()],
            hostname: None,
            advertise_ip: None,
            record_ttl: None,
            watch_backoff_initial_ms: 500,
            watch_backoff_max_ms: 60_000,
            event_buffer: 128,
        }
    }
}

/// Accepts either a list or a single comma-separated string, so that
/// `DECKHAND_ETCD_HOSTS=http://a:4001,http://b:4001` works.
fn comma_separated<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Hosts {
        List(Vec<String>),
        Csv(String),
    }

    let hosts = match Hosts::deserialize(deserializer)? {
        Hosts::List(list) => list,
        Hosts::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };
    Ok(hosts
        .into_iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect())
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("deckhand.toml"))
                .merge(Json::file("deckhand.json"))
                .merge(Env::prefixed("DECKHAND_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        if config.etcd_hosts.is_empty() {
            anyhow::bail!("At least one etcd host is required");
        }
        if config.watch_backoff_initial_ms == 0 {
            anyhow::bail!("watch_backoff_initial_ms must be at least 1");
        }
        if config.watch_backoff_max_ms < config.watch_backoff_initial_ms {
            anyhow::bail!("watch_backoff_max_ms must not be below watch_backoff_initial_ms");
        }
        Ok(config)
    }

    /// Store namespace for this instance.  Only slaves need a hostname.
    pub fn namespace(&self) -> anyhow::Result<Namespace> {
        let hostname = match self.mode {
            Mode::Master => String::new(),
            Mode::Slave => self.hostname()?,
        };
        Ok(Namespace::for_mode(self.mode, &hostname))
    }

    /// Hostname used for the slave namespace: the configured one, then the
    /// kernel's, then `$HOSTNAME`, then `/etc/hostname`.
    pub fn hostname(&self) -> anyhow::Result<String> {
        if let Some(ref name) = self.hostname {
            return Ok(name.clone());
        }
        match nix::unistd::gethostname() {
            Ok(name) => {
                let name = name.to_string_lossy().trim().to_string();
                if !name.is_empty() {
                    return Ok(name);
                }
            }
            Err(e) => debug!("gethostname failed: {}", e),
        }
        if let Ok(name) = std::env::var("HOSTNAME") {
            if !name.trim().is_empty() {
                return Ok(name.trim().to_string());
            }
        }
        let name = std::fs::read_to_string("/etc/hostname")
            .map_err(|e| anyhow::anyhow!("Unable to determine hostname: {}", e))?;
        Ok(name.trim().to_string())
    }

    pub fn watch_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.watch_backoff_initial_ms),
            Duration::from_millis(self.watch_backoff_max_ms),
        )
    }
}
