use chrono::{NaiveDate, TimeZone, Utc};
use saps_catalog::{
    ArchivedTaskQuery, Catalog, CatalogError, Limit, NewTask, NfsConfig, PhaseImage, ProvenancePhase, TaskState,
    User, Ward, NONE, STATUS_AVAILABLE,
};
use tempfile::TempDir;

async fn open(tmp: &TempDir) -> Catalog {
    let catalog = Catalog::open_in(tmp.path().join("catalog.sqlite")).await.unwrap();
    catalog
        .add_user(&User {
            email: "alice@saps".into(),
            name: "Alice".into(),
            password_hash: "5f4dcc3b".into(),
            active: true,
            notify: true,
            admin: false,
        })
        .await
        .unwrap();
    catalog
}

fn new_task(id: &str, priority: i32) -> NewTask {
    NewTask {
        task_id: id.into(),
        dataset: "landsat_8".into(),
        region: "215065".into(),
        image_date: NaiveDate::from_ymd_opt(2019, 6, 1),
        priority,
        user_email: "alice@saps".into(),
        input_downloading: PhaseImage {
            tag: "googleapis".into(),
            digest: "sha256:aaa".into(),
        },
        preprocessing: PhaseImage {
            tag: "default".into(),
            digest: "sha256:bbb".into(),
        },
        processing: PhaseImage {
            tag: "ufcg-sebal".into(),
            digest: "sha256:ccc".into(),
        },
    }
}

#[tokio::test]
async fn add_task_assigns_defaults() {
    let tmp = TempDir::new().unwrap();
    let catalog = open(&tmp).await;

    let task = catalog.add_task(&new_task("t1", 3)).await.unwrap();
    assert_eq!(task.state, TaskState::Created);
    assert_eq!(task.job_id, NONE);
    assert_eq!(task.federation_member, NONE);
    assert_eq!(task.status, STATUS_AVAILABLE);

    let stored = catalog.get_task("t1").await.unwrap().unwrap();
    assert_eq!(stored, task);
    assert!(catalog.get_provenance("t1").await.unwrap().is_some());
}

#[tokio::test]
async fn add_task_rejects_bad_input() {
    let tmp = TempDir::new().unwrap();
    let catalog = open(&tmp).await;

    let missing_dataset = NewTask {
        dataset: String::new(),
        ..new_task("t1", 0)
    };
    assert!(matches!(
        catalog.add_task(&missing_dataset).await,
        Err(CatalogError::Validation(_))
    ));

    let unknown_user = NewTask {
        user_email: "nobody@saps".into(),
        ..new_task("t2", 0)
    };
    assert!(matches!(
        catalog.add_task(&unknown_user).await,
        Err(CatalogError::Validation(_))
    ));

    catalog.add_task(&new_task("t3", 0)).await.unwrap();
    assert!(matches!(
        catalog.add_task(&new_task("t3", 0)).await,
        Err(CatalogError::Validation(_))
    ));

    assert_eq!(catalog.get_all_tasks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn tasks_in_state_ordered_by_priority_and_limited() {
    let tmp = TempDir::new().unwrap();
    let catalog = open(&tmp).await;

    for (id, priority) in [("low", 9), ("urgent", 0), ("mid", 4)] {
        catalog.add_task(&new_task(id, priority)).await.unwrap();
    }

    let all = catalog
        .get_tasks_in_state(TaskState::Created, Limit::Unlimited)
        .await
        .unwrap();
    let ids: Vec<_> = all.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, ["urgent", "mid", "low"]);

    let two = catalog
        .get_tasks_in_state(TaskState::Created, Limit::At(2))
        .await
        .unwrap();
    assert_eq!(two.len(), 2);

    assert!(catalog
        .get_tasks_in_state(TaskState::Running, Limit::Unlimited)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(catalog.count_in_states(&TaskState::CLAIMABLE).await.unwrap(), 3);
}

#[tokio::test]
async fn update_task_and_processing_query() {
    let tmp = TempDir::new().unwrap();
    let catalog = open(&tmp).await;
    catalog.add_task(&new_task("t1", 0)).await.unwrap();
    catalog.add_task(&new_task("t2", 0)).await.unwrap();

    let mut task = catalog.get_task("t1").await.unwrap().unwrap();
    task.state = TaskState::Running;
    task.job_id = "job-42".into();
    task.status = "running".into();
    catalog.update_task(&task).await.unwrap();

    let stored = catalog.get_task("t1").await.unwrap().unwrap();
    assert_eq!(stored.state, TaskState::Running);
    assert_eq!(stored.job_id, "job-42");

    let processing = catalog.get_processing_tasks().await.unwrap();
    assert_eq!(processing.len(), 1);
    assert_eq!(processing[0].task_id, "t1");

    task.task_id = "absent".into();
    assert!(matches!(
        catalog.update_task(&task).await,
        Err(CatalogError::NotFound(_))
    ));
}

#[tokio::test]
async fn archived_query_matches_tags_region_and_inclusive_dates() {
    let tmp = TempDir::new().unwrap();
    let catalog = open(&tmp).await;

    let mut inside = new_task("inside", 0);
    inside.image_date = NaiveDate::from_ymd_opt(2019, 1, 31);
    let mut other_tag = new_task("other-tag", 0);
    other_tag.processing.tag = "ufcg-sebal-v2".into();
    let mut outside = new_task("outside", 0);
    outside.image_date = NaiveDate::from_ymd_opt(2019, 2, 1);

    for new in [&inside, &other_tag, &outside] {
        let mut task = catalog.add_task(new).await.unwrap();
        task.state = TaskState::Archived;
        catalog.update_task(&task).await.unwrap();
    }
    // Same tags but not archived yet
    let mut pending = new_task("pending", 0);
    pending.image_date = NaiveDate::from_ymd_opt(2019, 1, 1);
    catalog.add_task(&pending).await.unwrap();

    let found = catalog
        .get_archived_tasks(&ArchivedTaskQuery {
            region: "215065".into(),
            start_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2019, 1, 31).unwrap(),
            input_downloading_tag: "googleapis".into(),
            preprocessing_tag: "default".into(),
            processing_tag: "ufcg-sebal".into(),
        })
        .await
        .unwrap();

    let ids: Vec<_> = found.iter().map(|t| t.task_id.as_str()).collect();
    assert_eq!(ids, ["inside"]);
}

#[tokio::test]
async fn state_timestamps_exact_match_removal() {
    let tmp = TempDir::new().unwrap();
    let catalog = open(&tmp).await;
    catalog.add_task(&new_task("t1", 0)).await.unwrap();

    let at = Utc.timestamp_millis_opt(1_600_000_000_123).unwrap();
    catalog
        .add_state_timestamp("t1", TaskState::Downloading, at)
        .await
        .unwrap();
    catalog
        .add_state_timestamp("t1", TaskState::Downloaded, at)
        .await
        .unwrap();

    // Mismatched state leaves the row in place
    assert_eq!(
        catalog
            .remove_state_timestamp("t1", TaskState::Archived, at)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        catalog
            .remove_state_timestamp("t1", TaskState::Downloading, at)
            .await
            .unwrap(),
        1
    );

    let remaining = catalog.get_state_timestamps("t1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].state, TaskState::Downloaded);
    assert_eq!(remaining[0].timestamp, at);
}

#[tokio::test]
async fn users_and_notification_wards() {
    let tmp = TempDir::new().unwrap();
    let catalog = open(&tmp).await;

    assert!(catalog.is_user_notifiable("alice@saps").await.unwrap());
    assert!(!catalog.is_user_notifiable("ghost@saps").await.unwrap());

    catalog.update_user_state("alice@saps", false).await.unwrap();
    assert!(!catalog.get_user("alice@saps").await.unwrap().unwrap().active);
    assert!(matches!(
        catalog.update_user_state("ghost@saps", true).await,
        Err(CatalogError::NotFound(_))
    ));

    let duplicate = catalog.get_user("alice@saps").await.unwrap().unwrap();
    assert!(matches!(
        catalog.add_user(&duplicate).await,
        Err(CatalogError::Validation(_))
    ));

    catalog
        .add_user_notification("sub-1", "t1", "alice@saps")
        .await
        .unwrap();
    catalog
        .add_user_notification("sub-1", "t1", "alice@saps")
        .await
        .unwrap();
    catalog
        .add_user_notification("sub-1", "t2", "alice@saps")
        .await
        .unwrap();

    let wards = catalog.get_users_to_notify().await.unwrap();
    assert_eq!(wards.len(), 2);

    let partial = Ward {
        submission_id: "sub-2".into(),
        ..wards[0].clone()
    };
    assert!(!catalog.remove_notification(&partial).await.unwrap());
    assert!(catalog.remove_notification(&wards[0]).await.unwrap());
    assert_eq!(catalog.get_users_to_notify().await.unwrap(), vec![wards[1].clone()]);
}

#[tokio::test]
async fn provenance_updates_only_its_phase() {
    let tmp = TempDir::new().unwrap();
    let catalog = open(&tmp).await;
    catalog.add_task(&new_task("t1", 0)).await.unwrap();

    catalog
        .update_provenance(ProvenancePhase::Input, "/nfs/t1/metadata/input.json", "Ubuntu 18.04", "4.15", "t1")
        .await
        .unwrap();
    let phase: ProvenancePhase = "worker".parse().unwrap();
    catalog
        .update_provenance(phase, "/nfs/t1/metadata/output.json", "Debian 10", "4.19", "t1")
        .await
        .unwrap();

    let provenance = catalog.get_provenance("t1").await.unwrap().unwrap();
    assert_eq!(provenance.input.operating_system.as_deref(), Some("Ubuntu 18.04"));
    assert_eq!(provenance.output.kernel_version.as_deref(), Some("4.19"));
    assert_eq!(provenance.preprocessing.metadata_path, None);

    assert!(matches!(
        catalog
            .update_provenance(ProvenancePhase::Preprocessing, "", "Debian", "4.19", "t1")
            .await,
        Err(CatalogError::InvalidArgument(_))
    ));
    assert!(matches!(
        catalog
            .update_provenance(ProvenancePhase::Input, "/m", "Debian", "4.19", "absent")
            .await,
        Err(CatalogError::NotFound(_))
    ));
}

#[tokio::test]
async fn deploy_config_upsert() {
    let tmp = TempDir::new().unwrap();
    let catalog = open(&tmp).await;

    let mut config = NfsConfig {
        nfs_ip: "10.0.0.5".into(),
        nfs_ssh_port: "22".into(),
        nfs_port: "2049".into(),
        federation_member: "site-a".into(),
    };
    catalog.add_deploy_config(&config).await.unwrap();
    config.nfs_ip = "10.0.0.6".into();
    catalog.add_deploy_config(&config).await.unwrap();

    assert_eq!(
        catalog.get_federation_nfs_config("site-a").await.unwrap(),
        Some(config)
    );
    assert!(catalog
        .get_federation_nfs_config("site-b")
        .await
        .unwrap()
        .is_none());
}
