//! Domain types for the task catalog.
//!
//! These are the single source of truth for task, user, notification and
//! provenance records. The crawler and archiver exchange these types directly.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CatalogError;

/// Job id / federation member value meaning "not assigned".
pub const NONE: &str = "none";

/// Status text given to every new task.
pub const STATUS_AVAILABLE: &str = "available";

/// Status text marking a FAILED task whose artifacts were archived for debugging.
pub const STATUS_DEBUG_ARCHIVED: &str = "debug-archived";

/// Status text marking a FAILED task whose debug archive was attempted and
/// could not complete. Such tasks are not attempted again.
pub const STATUS_DEBUG_ARCHIVE_FAILED: &str = "debug-archive-failed";

// ============================================================================
// Task State Machine
// ============================================================================

/// Lifecycle state of a task.
///
/// `Created -> Selected -> Downloading -> Downloaded -> Preprocessing -> Ready
/// -> Running -> Finished -> Archiving -> Archived`, with `Failed` reachable
/// from any non-terminal state and `NotDownloaded` as the rollback target of
/// an interrupted download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Selected,
    NotDownloaded,
    Downloading,
    Downloaded,
    Preprocessing,
    Ready,
    Running,
    Finished,
    Archiving,
    Archived,
    Failed,
}

impl TaskState {
    pub const ALL: [TaskState; 12] = [
        Self::Created,
        Self::Selected,
        Self::NotDownloaded,
        Self::Downloading,
        Self::Downloaded,
        Self::Preprocessing,
        Self::Ready,
        Self::Running,
        Self::Finished,
        Self::Archiving,
        Self::Archived,
        Self::Failed,
    ];

    /// States from which the claim transition may start.
    pub const CLAIMABLE: [TaskState; 2] = [Self::Created, Self::NotDownloaded];

    /// States in which external executors are actively working on the task.
    pub const PROCESSING: [TaskState; 3] = [Self::Downloading, Self::Preprocessing, Self::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Selected => "selected",
            Self::NotDownloaded => "not_downloaded",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Preprocessing => "preprocessing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Archiving => "archiving",
            Self::Archived => "archived",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    pub fn is_claimable(&self) -> bool {
        Self::CLAIMABLE.contains(self)
    }

    /// `Archived` ends the lifecycle. `Failed` is only left through an
    /// explicit rollback.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CatalogError::invalid_argument(format!("Unknown task state: {s}")))
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Container image tag and content digest used for one processing phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseImage {
    pub tag: String,
    pub digest: String,
}

/// A satellite-image processing task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique, never reused
    pub task_id: String,
    pub dataset: String,
    pub region: String,
    /// Acquisition date of the image
    pub image_date: NaiveDate,
    pub state: TaskState,
    /// Submission id assigned by the external executor
    pub job_id: String,
    /// Site owning the physical download
    pub federation_member: String,
    /// Lower is more urgent
    pub priority: i32,
    pub user_email: String,
    pub input_downloading: PhaseImage,
    pub preprocessing: PhaseImage,
    pub processing: PhaseImage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: String,
    pub error: Option<String>,
}

impl Task {
    pub fn is_owned_by(&self, member: &str) -> bool {
        self.federation_member == member
    }
}

/// Input to [`Catalog::add_task`](crate::Catalog::add_task).
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task_id: String,
    pub dataset: String,
    pub region: String,
    pub image_date: Option<NaiveDate>,
    pub priority: i32,
    pub user_email: String,
    pub input_downloading: PhaseImage,
    pub preprocessing: PhaseImage,
    pub processing: PhaseImage,
}

impl NewTask {
    pub(crate) fn validate(&self) -> Result<NaiveDate, CatalogError> {
        if self.task_id.trim().is_empty() {
            return Err(CatalogError::validation("Task with empty id"));
        }
        if self.dataset.trim().is_empty() {
            return Err(CatalogError::validation("Task with empty dataset"));
        }
        if self.user_email.trim().is_empty() {
            return Err(CatalogError::validation("Task must have a user"));
        }
        self.image_date
            .ok_or_else(|| CatalogError::validation("Task must have a date"))
    }
}

/// Row limit for state-filtered queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Limit {
    #[default]
    Unlimited,
    At(u32),
}

impl Limit {
    /// SQLite treats a negative LIMIT as "no limit".
    pub(crate) fn as_sql(&self) -> i64 {
        match self {
            Self::Unlimited => -1,
            Self::At(n) => i64::from(*n),
        }
    }
}

/// Filter for previously archived results (reuse / deduplication).
#[derive(Debug, Clone)]
pub struct ArchivedTaskQuery {
    pub region: String,
    /// Inclusive
    pub start_date: NaiveDate,
    /// Inclusive
    pub end_date: NaiveDate,
    pub input_downloading_tag: String,
    pub preprocessing_tag: String,
    pub processing_tag: String,
}

/// Append-only audit record of one observed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTimestamp {
    pub task_id: String,
    pub state: TaskState,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Users & Notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub active: bool,
    pub notify: bool,
    pub admin: bool,
}

/// Pending "notify this user when the task reaches ARCHIVED" obligation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ward {
    pub submission_id: String,
    pub task_id: String,
    pub user_email: String,
}

/// NFS export advertised by a federation member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfsConfig {
    pub nfs_ip: String,
    pub nfs_ssh_port: String,
    pub nfs_port: String,
    pub federation_member: String,
}

// ============================================================================
// Provenance
// ============================================================================

/// Phase whose execution environment is being recorded.
///
/// Each variant owns its column group and the statement that updates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenancePhase {
    Input,
    Preprocessing,
    Output,
}

impl ProvenancePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Preprocessing => "preprocessing",
            Self::Output => "output",
        }
    }

    /// Upsert touching only this phase's columns.
    pub(crate) fn upsert_sql(&self) -> &'static str {
        match self {
            Self::Input => {
                r#"INSERT INTO provenance (task_id, input_metadata, input_operating_system, input_kernel_version)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(task_id) DO UPDATE SET
                    input_metadata = excluded.input_metadata,
                    input_operating_system = excluded.input_operating_system,
                    input_kernel_version = excluded.input_kernel_version"#
            }
            Self::Preprocessing => {
                r#"INSERT INTO provenance (task_id, preprocessing_metadata, preprocessing_operating_system, preprocessing_kernel_version)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(task_id) DO UPDATE SET
                    preprocessing_metadata = excluded.preprocessing_metadata,
                    preprocessing_operating_system = excluded.preprocessing_operating_system,
                    preprocessing_kernel_version = excluded.preprocessing_kernel_version"#
            }
            Self::Output => {
                r#"INSERT INTO provenance (task_id, output_metadata, output_operating_system, output_kernel_version)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(task_id) DO UPDATE SET
                    output_metadata = excluded.output_metadata,
                    output_operating_system = excluded.output_operating_system,
                    output_kernel_version = excluded.output_kernel_version"#
            }
        }
    }
}

impl std::fmt::Display for ProvenancePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProvenancePhase {
    type Err = CatalogError;

    /// Accepts the phase names and the component names that report them.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" | "inputdownloading" | "input_downloader" => Ok(Self::Input),
            "preprocessing" | "preprocessor" => Ok(Self::Preprocessing),
            "output" | "processing" | "worker" => Ok(Self::Output),
            other => Err(CatalogError::invalid_argument(format!(
                "Unknown provenance phase: {other:?}"
            ))),
        }
    }
}

/// Execution environment captured for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMetadata {
    pub metadata_path: Option<String>,
    pub operating_system: Option<String>,
    pub kernel_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub task_id: String,
    pub input: PhaseMetadata,
    pub preprocessing: PhaseMetadata,
    pub output: PhaseMetadata,
}
