//! Default commit backend: a JSON state file plus an optional reload hook.
//!
//! The snapshot is rendered to `state.json` in the working directory with a
//! write-then-rename so the external proxy never observes a torn file. When
//! a reload command is configured it runs after every write; a non-zero exit
//! fails the commit and the coordinator retries.

use super::CommitBackend;
use crate::commit::service_unit::CommitSnapshot;
use crate::config::RouterConfig;
use crate::error::RouterError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct StateFileBackend {
    state_path: PathBuf,
    reload_command: Option<String>,
}

impl StateFileBackend {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            state_path: Path::new(&config.working_dir).join("state.json"),
            reload_command: config.reload_command.clone(),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn write_state(&self, snapshot: &CommitSnapshot) -> Result<(), RouterError> {
        let data = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| RouterError::Commit(format!("failed to render state: {}", e)))?;

        if let Some(parent) = self.state_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.state_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.state_path).await?;

        debug!(path = %self.state_path.display(), bytes = data.len(), "Wrote router state");
        Ok(())
    }

    async fn reload(&self) -> Result<(), RouterError> {
        let Some(command) = &self.reload_command else {
            return Ok(());
        };

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(RouterError::Commit(format!(
                "reload command exited with {}: {}",
                output.status,
                combined.trim()
            )));
        }

        debug!(command, "Reload command succeeded");
        Ok(())
    }
}

#[async_trait]
impl CommitBackend for StateFileBackend {
    async fn commit(&self, snapshot: &CommitSnapshot) -> Result<(), RouterError> {
        self.write_state(snapshot).await?;
        self.reload().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::commit::service_unit::Frontend;

    fn config_in(dir: &Path, reload_command: Option<&str>) -> RouterConfig {
        RouterConfig {
            working_dir: dir.display().to_string(),
            reload_command: reload_command.map(str::to_string),
            ..Default::default()
        }
    }

    fn snapshot_with_frontend() -> CommitSnapshot {
        let mut snapshot = CommitSnapshot::default();
        snapshot.frontends.insert(
            "web:frontend".to_string(),
            Frontend {
                key: "web:frontend".to_string(),
                host: "app.example.com".to_string(),
                ..Default::default()
            },
        );
        snapshot
    }

    #[tokio::test]
    async fn test_commit_writes_parseable_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StateFileBackend::new(&config_in(dir.path(), None));

        backend.commit(&snapshot_with_frontend()).await.unwrap();

        let data = tokio::fs::read(backend.state_path()).await.unwrap();
        let parsed: CommitSnapshot = serde_json::from_slice(&data).unwrap();
        assert_eq!(parsed.frontends["web:frontend"].host, "app.example.com");
    }

    #[tokio::test]
    async fn test_commit_overwrites_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StateFileBackend::new(&config_in(dir.path(), None));

        backend.commit(&snapshot_with_frontend()).await.unwrap();
        backend.commit(&CommitSnapshot::default()).await.unwrap();

        let data = tokio::fs::read(backend.state_path()).await.unwrap();
        let parsed: CommitSnapshot = serde_json::from_slice(&data).unwrap();
        assert!(parsed.frontends.is_empty());
    }

    #[tokio::test]
    async fn test_failing_reload_command_fails_commit() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StateFileBackend::new(&config_in(dir.path(), Some("echo broken; exit 1")));

        let err = backend
            .commit(&CommitSnapshot::default())
            .await
            .expect_err("non-zero reload must fail the commit");

        match err {
            RouterError::Commit(message) => assert!(message.contains("broken")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_reload_command_runs_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("reloaded");
        let command = format!("test -f state.json || true; touch {}", marker.display());
        let backend = StateFileBackend::new(&config_in(dir.path(), Some(&command)));

        backend.commit(&CommitSnapshot::default()).await.unwrap();

        assert!(marker.exists(), "reload command should have run");
    }
}
