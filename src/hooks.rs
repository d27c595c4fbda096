//! Shell hooks.
//!
//! For every lifecycle event, executables in the handler directory whose
//! file name starts with the event status (`start-notify`, `die.sh`, ...)
//! are run with the container id as their only argument.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use log::{debug, error, info, warn};
use tokio::process::Command;

use crate::types::LifecycleEvent;

pub struct Hooks {
    dir: PathBuf,
}

impl Hooks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Hooks for `status`, in lexical order.
    pub async fn find(&self, status: &str) -> anyhow::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("reading handler dir {}", self.dir.display()))?;

        let mut hooks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(status) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                continue;
            }
            if !is_executable(&metadata) {
                debug!("Ignoring non-executable {}", entry.path().display());
                continue;
            }
            hooks.push(entry.path());
        }
        hooks.sort();
        Ok(hooks)
    }

    /// Runs the hooks for `event`.  The first failing hook stops the rest.
    pub async fn run(&self, event: &LifecycleEvent) {
        let hooks = match self.find(event.status.as_str()).await {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!("Skipping hooks for {} event: {:#}", event.status, e);
                return;
            }
        };

        for hook in hooks {
            if let Err(e) = run_one(&hook, &event.id).await {
                error!(
                    "Hook {} failed for {}: {:#}. Skipping remaining hooks",
                    hook.display(),
                    event.id,
                    e
                );
                return;
            }
        }
    }
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_: &std::fs::Metadata) -> bool {
    true
}

async fn run_one(hook: &Path, id: &str) -> anyhow::Result<()> {
    info!("Running hook {} for {}", hook.display(), id);
    let output = Command::new(hook)
        .arg(id)
        .output()
        .await
        .with_context(|| format!("spawning {}", hook.display()))?;

    if !output.status.success() {
        bail!(
            "exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    info!(
        "Hook {} succeeded: {}",
        hook.display(),
        String::from_utf8_lossy(&output.stdout).trim()
    );
    Ok(())
}
