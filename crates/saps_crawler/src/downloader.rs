//! Hand-off to the external image downloader and post-download step.

use async_trait::async_trait;
use saps_catalog::Task;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{CrawlerError, Result};

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch the task's input image onto the local volume.
    async fn download(&self, task: &Task) -> Result<()>;

    /// Post-download step (cloud masking and the like).
    async fn post_process(&self, task: &Task) -> Result<()>;
}

/// Runs configured commands, one per step.
///
/// Arguments may contain `{task_id}`, `{dataset}`, `{region}`, `{date}` and
/// `{export_path}`; the task id is also exported as `SAPS_TASK_ID`.
#[derive(Debug, Clone)]
pub struct CommandDownloader {
    download_command: Vec<String>,
    postprocess_command: Vec<String>,
    export_path: PathBuf,
}

impl CommandDownloader {
    pub fn new(download_command: Vec<String>, postprocess_command: Vec<String>, export_path: impl Into<PathBuf>) -> Result<Self> {
        if download_command.is_empty() {
            return Err(CrawlerError::FatalConfig("crawler.download_command is empty".into()));
        }
        Ok(Self {
            download_command,
            postprocess_command,
            export_path: export_path.into(),
        })
    }

    fn substitute(&self, arg: &str, task: &Task) -> String {
        arg.replace("{task_id}", &task.task_id)
            .replace("{dataset}", &task.dataset)
            .replace("{region}", &task.region)
            .replace("{date}", &task.image_date.format("%Y-%m-%d").to_string())
            .replace("{export_path}", &self.export_path.to_string_lossy())
    }

    async fn run(&self, step: &str, command: &[String], task: &Task) -> Result<()> {
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };
        let program = self.substitute(program, task);
        let args: Vec<String> = args.iter().map(|arg| self.substitute(arg, task)).collect();

        debug!(task_id = %task.task_id, step, command = %format!("{} {}", program, args.join(" ")), "Running");
        let output = Command::new(&program)
            .args(&args)
            .env("SAPS_TASK_ID", &task.task_id)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CrawlerError::download(&task.task_id, format!("{step}: cannot run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CrawlerError::download(
                &task.task_id,
                format!(
                    "{step} exited with {}: {}",
                    output
                        .status
                        .code()
                        .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    stderr.trim()
                ),
            ));
        }
        info!(task_id = %task.task_id, step, "Step complete");
        Ok(())
    }
}

#[async_trait]
impl Downloader for CommandDownloader {
    async fn download(&self, task: &Task) -> Result<()> {
        self.run("download", &self.download_command, task).await
    }

    async fn post_process(&self, task: &Task) -> Result<()> {
        self.run("postprocess", &self.postprocess_command, task).await
    }
}
