//! Task CRUD and state-filtered queries.

use crate::error::{CatalogError, Result};
use crate::types::*;
use crate::Catalog;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

const TASK_COLUMNS: &str = "task_id, dataset, region, image_date, state, job_id, federation_member, \
     priority, user_email, input_downloading_tag, input_downloading_digest, preprocessing_tag, \
     preprocessing_digest, processing_tag, processing_digest, created_at, updated_at, status, error";

const TASK_ORDER: &str = "ORDER BY priority ASC, created_at ASC, task_id ASC";

/// `?, ?, ?` for an IN clause of `n` bindings.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl Catalog {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert a new task in `Created` state.
    ///
    /// Job id and federation member start as `"none"`. The empty provenance
    /// row is created in the same transaction.
    pub async fn add_task(&self, new: &NewTask) -> Result<Task> {
        let image_date = new.validate()?;
        let now = Self::now_millis();

        self.timed(async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(&format!(
                "INSERT INTO tasks ({TASK_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)"
            ))
            .bind(&new.task_id)
            .bind(&new.dataset)
            .bind(&new.region)
            .bind(image_date)
            .bind(TaskState::Created.as_str())
            .bind(NONE)
            .bind(NONE)
            .bind(new.priority)
            .bind(&new.user_email)
            .bind(&new.input_downloading.tag)
            .bind(&new.input_downloading.digest)
            .bind(&new.preprocessing.tag)
            .bind(&new.preprocessing.digest)
            .bind(&new.processing.tag)
            .bind(&new.processing.digest)
            .bind(now)
            .bind(now)
            .bind(STATUS_AVAILABLE)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, new))?;

            sqlx::query("INSERT INTO provenance (task_id) VALUES (?)")
                .bind(&new.task_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<_, CatalogError>(())
        })
        .await?;

        debug!(task_id = %new.task_id, "Task added");

        Ok(Task {
            task_id: new.task_id.clone(),
            dataset: new.dataset.clone(),
            region: new.region.clone(),
            image_date,
            state: TaskState::Created,
            job_id: NONE.to_string(),
            federation_member: NONE.to_string(),
            priority: new.priority,
            user_email: new.user_email.clone(),
            input_downloading: new.input_downloading.clone(),
            preprocessing: new.preprocessing.clone(),
            processing: new.processing.clone(),
            created_at: Self::millis_to_datetime(now),
            updated_at: Self::millis_to_datetime(now),
            status: STATUS_AVAILABLE.to_string(),
            error: None,
        })
    }

    /// Full update of the mutable fields, keyed by task id.
    pub async fn update_task(&self, task: &Task) -> Result<()> {
        let result = self
            .timed(
                sqlx::query(
                    r#"UPDATE tasks SET
                        state = ?,
                        job_id = ?,
                        federation_member = ?,
                        status = ?,
                        error = ?,
                        updated_at = ?
                    WHERE task_id = ?"#,
                )
                .bind(task.state.as_str())
                .bind(&task.job_id)
                .bind(&task.federation_member)
                .bind(&task.status)
                .bind(task.error.as_deref())
                .bind(Self::now_millis())
                .bind(&task.task_id)
                .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::not_found(format!("Task {}", task.task_id)));
        }
        debug!(task_id = %task.task_id, state = %task.state, "Task updated");
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let row = self
            .timed(
                sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?"))
                    .bind(task_id)
                    .fetch_optional(&self.pool),
            )
            .await?;

        row.as_ref().map(row_to_task).transpose()
    }

    pub async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        let rows = self
            .timed(
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at ASC, task_id ASC"
                ))
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter().map(row_to_task).collect()
    }

    /// Tasks in `state`, most urgent (lowest priority value) first.
    pub async fn get_tasks_in_state(&self, state: TaskState, limit: Limit) -> Result<Vec<Task>> {
        self.get_tasks_in_states(&[state], limit).await
    }

    pub async fn get_tasks_in_states(&self, states: &[TaskState], limit: Limit) -> Result<Vec<Task>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE state IN ({}) {TASK_ORDER} LIMIT ?",
            placeholders(states.len())
        );
        let mut query = sqlx::query(&sql);
        for state in states {
            query = query.bind(state.as_str());
        }
        let rows = self
            .timed(query.bind(limit.as_sql()).fetch_all(&self.pool))
            .await?;

        rows.iter().map(row_to_task).collect()
    }

    /// Tasks currently worked on by an external executor.
    pub async fn get_processing_tasks(&self) -> Result<Vec<Task>> {
        self.get_tasks_in_states(&TaskState::PROCESSING, Limit::Unlimited)
            .await
    }

    /// Previously archived results matching region, date range and all three tags.
    pub async fn get_archived_tasks(&self, query: &ArchivedTaskQuery) -> Result<Vec<Task>> {
        let rows = self
            .timed(
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE state = ? AND region = ? AND image_date BETWEEN ? AND ? \
                       AND input_downloading_tag = ? AND preprocessing_tag = ? AND processing_tag = ? \
                     {TASK_ORDER}"
                ))
                .bind(TaskState::Archived.as_str())
                .bind(&query.region)
                .bind(query.start_date)
                .bind(query.end_date)
                .bind(&query.input_downloading_tag)
                .bind(&query.preprocessing_tag)
                .bind(&query.processing_tag)
                .fetch_all(&self.pool),
            )
            .await?;

        rows.iter().map(row_to_task).collect()
    }

    pub async fn count_in_states(&self, states: &[TaskState]) -> Result<u64> {
        if states.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "SELECT COUNT(*) AS n FROM tasks WHERE state IN ({})",
            placeholders(states.len())
        );
        let mut query = sqlx::query(&sql);
        for state in states {
            query = query.bind(state.as_str());
        }
        let row = self.timed(query.fetch_one(&self.pool)).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }
}

fn map_insert_error(err: sqlx::Error, new: &NewTask) -> CatalogError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return CatalogError::validation(format!("Task {} already exists", new.task_id));
        }
        if db.is_foreign_key_violation() {
            return CatalogError::validation(format!("Unknown user {}", new.user_email));
        }
    }
    CatalogError::Sqlx(err)
}

pub(crate) fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let state_str: String = row.try_get("state")?;
    let state = TaskState::parse(&state_str)
        .ok_or_else(|| CatalogError::invalid_state(format!("Unknown task state: {}", state_str)))?;

    Ok(Task {
        task_id: row.try_get("task_id")?,
        dataset: row.try_get("dataset")?,
        region: row.try_get("region")?,
        image_date: row.try_get("image_date")?,
        state,
        job_id: row.try_get("job_id")?,
        federation_member: row.try_get("federation_member")?,
        priority: row.try_get("priority")?,
        user_email: row.try_get("user_email")?,
        input_downloading: PhaseImage {
            tag: row.try_get("input_downloading_tag")?,
            digest: row.try_get("input_downloading_digest")?,
        },
        preprocessing: PhaseImage {
            tag: row.try_get("preprocessing_tag")?,
            digest: row.try_get("preprocessing_digest")?,
        },
        processing: PhaseImage {
            tag: row.try_get("processing_tag")?,
            digest: row.try_get("processing_digest")?,
        },
        created_at: Catalog::millis_to_datetime(row.try_get("created_at")?),
        updated_at: Catalog::millis_to_datetime(row.try_get("updated_at")?),
        status: row.try_get("status")?,
        error: row.try_get("error")?,
    })
}
