//! ARCHIVING never outlives the archiver that entered it: a restart rolls
//! stale tasks back, and a failure after the state was taken undoes it.

use chrono::NaiveDate;
use saps_archiver::{Archiver, MemoryObjectStore, NotificationSink, PermanentStorage, StagePhase, StorageSettings};
use saps_catalog::{Catalog, NewTask, RetryExecutor, RetryPolicy, RetryingCatalog, TaskState, User};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Silent;

#[async_trait::async_trait]
impl NotificationSink for Silent {
    async fn notify(
        &self,
        _ward: &saps_catalog::Ward,
        _task: &saps_catalog::Task,
    ) -> Result<(), saps_archiver::ArchiverError> {
        Ok(())
    }
}

async fn setup(tmp: &TempDir) -> (Catalog, PathBuf, Archiver) {
    let staging = tmp.path().join("nfs");
    let catalog = Catalog::open_in(tmp.path().join("catalog.sqlite")).await.unwrap();
    catalog
        .add_user(&User {
            email: "u@saps".into(),
            name: "User".into(),
            password_hash: "hash".into(),
            active: true,
            notify: false,
            admin: false,
        })
        .await
        .unwrap();
    let mut task = catalog
        .add_task(&NewTask {
            task_id: "t1".into(),
            dataset: "landsat_8".into(),
            region: "215065".into(),
            image_date: NaiveDate::from_ymd_opt(2019, 6, 1),
            user_email: "u@saps".into(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    task.state = TaskState::Finished;
    catalog.update_task(&task).await.unwrap();

    let storage = PermanentStorage::new(
        StorageSettings {
            container: "saps".into(),
            tasks_root: "archiver".into(),
            debug_root: None,
            local_root: staging.clone(),
            upload_tries: 1,
            archive_tries: 1,
        },
        Arc::new(MemoryObjectStore::new()),
    )
    .await
    .unwrap();
    let retrying = RetryingCatalog::new(
        catalog.clone(),
        RetryExecutor::new(RetryPolicy {
            delay: Duration::from_millis(5),
            max_attempts: Some(3),
        }),
    );
    let archiver = Archiver::new(retrying, storage, Arc::new(Silent));
    (catalog, staging, archiver)
}

fn stage_all(root: &Path, task_id: &str) {
    for phase in StagePhase::ALL {
        let dir = root.join(task_id).join(phase.dir_name());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("data.bin"), b"data").unwrap();
    }
}

#[tokio::test]
async fn restart_returns_stale_archiving_to_finished() {
    let tmp = TempDir::new().unwrap();
    let (catalog, staging, archiver) = setup(&tmp).await;
    stage_all(&staging, "t1");

    // A previous archiver died right after taking the task
    catalog.begin_archiving("t1").await.unwrap();
    assert_eq!(archiver.sweep().await.unwrap().archived, 0);

    assert_eq!(archiver.recover().await.unwrap(), 1);
    let task = catalog.get_task("t1").await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Finished);
    assert!(task.error.unwrap().contains("rolled back on restart"));
    let states: Vec<_> = catalog
        .get_state_timestamps("t1")
        .await
        .unwrap()
        .into_iter()
        .map(|ts| ts.state)
        .collect();
    assert_eq!(states, [TaskState::Finished]);

    // Nothing left to recover; the next sweep finishes the job
    assert_eq!(archiver.recover().await.unwrap(), 0);
    assert_eq!(archiver.sweep().await.unwrap().archived, 1);
    let task = catalog.get_task("t1").await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Archived);
}

#[tokio::test]
async fn catalog_error_after_begin_rolls_back() {
    let tmp = TempDir::new().unwrap();
    let (catalog, staging, archiver) = setup(&tmp).await;
    stage_all(&staging, "t1");

    sqlx::query(
        "CREATE TRIGGER reject_archiving BEFORE INSERT ON state_timestamps \
         WHEN NEW.state = 'archiving' BEGIN SELECT RAISE(ABORT, 'audit unavailable'); END",
    )
    .execute(catalog.pool())
    .await
    .unwrap();

    assert!(archiver.sweep().await.is_err());
    let task = catalog.get_task("t1").await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Finished);
    assert!(task.error.unwrap().starts_with("Archive aborted"));
    assert!(staging.join("t1").exists());

    sqlx::query("DROP TRIGGER reject_archiving")
        .execute(catalog.pool())
        .await
        .unwrap();
    assert_eq!(archiver.sweep().await.unwrap().archived, 1);
    let task = catalog.get_task("t1").await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Archived);
}
