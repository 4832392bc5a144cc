//! Background retraining jobs.
//!
//! The trainer is an external command. It is run with `--data_dir` and
//! `--checkpoint_dir` appended and is expected to leave a `metrics.json`
//! array in the checkpoint directory; each entry becomes a model metric.

use forgery_store::Store;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub const METRICS_FILE: &str = "metrics.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetrainStatus {
    #[serde(rename = "retraining_started")]
    Started,
    #[serde(rename = "retraining_already_running")]
    AlreadyRunning,
    #[serde(rename = "retraining_not_configured")]
    NotConfigured,
}

#[derive(Error, Debug)]
pub enum RetrainError {
    #[error("cannot parse training command: {0}")]
    InvalidCommand(String),
    #[error("failed to clear previous {METRICS_FILE}: {0}")]
    ClearMetrics(#[source] std::io::Error),
    #[error("failed to launch training command: {0}")]
    Launch(#[source] std::io::Error),
    #[error("training command exited with {0}")]
    Failed(std::process::ExitStatus),
    #[error("failed to read {METRICS_FILE}: {0}")]
    MetricsRead(#[source] std::io::Error),
    #[error("invalid {METRICS_FILE}: {0}")]
    MetricsParse(#[from] serde_json::Error),
    #[error("store: {0}")]
    Store(#[from] forgery_store::StoreError),
}

/// One entry of the trainer's `metrics.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrainedModel {
    name: String,
    version: String,
    accuracy: f64,
    f1_score: f64,
}

/// Runs at most one training job at a time.
#[derive(Clone)]
pub struct RetrainRunner {
    command: Option<String>,
    data_dir: PathBuf,
    checkpoint_dir: PathBuf,
    running: Arc<AtomicBool>,
    store: Store,
}

impl RetrainRunner {
    pub fn new(command: Option<String>, data_dir: PathBuf, checkpoint_dir: PathBuf, store: Store) -> Self {
        Self {
            command,
            data_dir,
            checkpoint_dir,
            running: Arc::new(AtomicBool::new(false)),
            store,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start a job in the background unless one is already running.
    ///
    /// The command is split with shell quoting rules; it is not run through a shell.
    pub fn start(&self) -> RetrainStatus {
        let Some(command) = self.command.clone() else {
            tracing::warn!("retrain requested but FORGERY_TRAIN_COMMAND is not set");
            return RetrainStatus::NotConfigured;
        };
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("retrain requested while a job is running");
            return RetrainStatus::AlreadyRunning;
        }

        let runner = self.clone();
        tokio::spawn(async move {
            match runner.run(&command).await {
                Ok(recorded) => tracing::info!(recorded, "retraining finished"),
                Err(e) => tracing::error!(error = %e, "retraining failed"),
            }
            runner.running.store(false, Ordering::Release);
        });
        RetrainStatus::Started
    }

    async fn run(&self, command: &str) -> Result<usize, RetrainError> {
        let argv = shlex::split(command)
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| RetrainError::InvalidCommand(command.to_string()))?;
        let (program, args) = argv.split_at(1);

        // Only metrics written by this run may be recorded.
        let metrics_path = self.checkpoint_dir.join(METRICS_FILE);
        match tokio::fs::remove_file(&metrics_path).await {
            Ok(()) => tracing::debug!(path = %metrics_path.display(), "removed previous metrics"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(RetrainError::ClearMetrics(e)),
        }
        tracing::info!(
            command,
            data_dir = %self.data_dir.display(),
            checkpoint_dir = %self.checkpoint_dir.display(),
            "retraining started"
        );

        let status = tokio::process::Command::new(&program[0])
            .args(args)
            .arg("--data_dir")
            .arg(&self.data_dir)
            .arg("--checkpoint_dir")
            .arg(&self.checkpoint_dir)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(RetrainError::Launch)?;
        if !status.success() {
            return Err(RetrainError::Failed(status));
        }

        let models = read_metrics(&self.checkpoint_dir).await?;
        let now = forgery_store::now_secs();
        for m in &models {
            self.store
                .create_model_metric(&m.name, &m.version, m.accuracy, m.f1_score, now)
                .await?;
        }
        Ok(models.len())
    }
}

async fn read_metrics(checkpoint_dir: &Path) -> Result<Vec<TrainedModel>, RetrainError> {
    let text = tokio::fs::read_to_string(checkpoint_dir.join(METRICS_FILE))
        .await
        .map_err(RetrainError::MetricsRead)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_idle(runner: &RetrainRunner) {
        for _ in 0..200 {
            if !runner.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("retrain job did not finish");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&RetrainStatus::Started).unwrap(), "\"retraining_started\"");
        assert_eq!(
            serde_json::to_string(&RetrainStatus::NotConfigured).unwrap(),
            "\"retraining_not_configured\""
        );
    }

    #[tokio::test]
    async fn test_not_configured() {
        let store = Store::open_in_memory().await.unwrap();
        let runner = RetrainRunner::new(None, "data".into(), "ckpt".into(), store);
        assert_eq!(runner.start(), RetrainStatus::NotConfigured);
        assert!(!runner.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_records_metrics_and_rejects_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("train.sh");
        // $4 is the checkpoint dir: --data_dir D --checkpoint_dir C
        std::fs::write(
            &script,
            "sleep 0.2\necho '[{\"name\":\"densenet121\",\"version\":\"v3\",\"accuracy\":0.94,\"f1Score\":0.92}]' > \"$4/metrics.json\"\n",
        )
        .unwrap();

        let store = Store::open_in_memory().await.unwrap();
        let runner = RetrainRunner::new(
            Some(format!("sh {}", script.display())),
            dir.path().join("dataset"),
            dir.path().to_path_buf(),
            store.clone(),
        );

        assert_eq!(runner.start(), RetrainStatus::Started);
        assert_eq!(runner.start(), RetrainStatus::AlreadyRunning);
        wait_idle(&runner).await;

        let metrics = store.get_model_metrics().await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "densenet121");
        assert_eq!(metrics[0].version, "v3");
        assert!((metrics[0].f1_score - 0.92).abs() < 1e-9);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_quoted_arguments_stay_whole() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("train.sh");
        // $1 is the quoted model name, $5 the checkpoint dir.
        std::fs::write(
            &script,
            "printf '[{\"name\":\"%s\",\"version\":\"v1\",\"accuracy\":0.9,\"f1Score\":0.8}]' \"$1\" > \"$5/metrics.json\"\n",
        )
        .unwrap();

        let store = Store::open_in_memory().await.unwrap();
        let runner = RetrainRunner::new(
            Some(format!("sh '{}' 'dense net'", script.display())),
            dir.path().join("dataset"),
            dir.path().to_path_buf(),
            store.clone(),
        );
        assert_eq!(runner.start(), RetrainStatus::Started);
        wait_idle(&runner).await;

        let metrics = store.get_model_metrics().await.unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "dense net");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_metrics_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(METRICS_FILE),
            r#"[{"name":"old","version":"v0","accuracy":0.5,"f1Score":0.5}]"#,
        )
        .unwrap();

        let store = Store::open_in_memory().await.unwrap();
        let runner = RetrainRunner::new(Some("true".into()), dir.path().into(), dir.path().into(), store.clone());
        assert_eq!(runner.start(), RetrainStatus::Started);
        wait_idle(&runner).await;

        assert!(store.get_model_metrics().await.unwrap().is_empty());
        assert!(!dir.path().join(METRICS_FILE).exists());
    }

    #[tokio::test]
    async fn test_unbalanced_quotes_fail_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let runner = RetrainRunner::new(None, dir.path().into(), dir.path().into(), store);
        let err = runner.run("python 'train.py").await.unwrap_err();
        assert!(matches!(err, RetrainError::InvalidCommand(_)));
        let err = runner.run("   ").await.unwrap_err();
        assert!(matches!(err, RetrainError::InvalidCommand(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_job_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().await.unwrap();
        let runner = RetrainRunner::new(Some("false".into()), dir.path().into(), dir.path().into(), store.clone());

        assert_eq!(runner.start(), RetrainStatus::Started);
        wait_idle(&runner).await;
        assert!(store.get_model_metrics().await.unwrap().is_empty());
        assert_eq!(runner.start(), RetrainStatus::Started);
        wait_idle(&runner).await;
    }
}
