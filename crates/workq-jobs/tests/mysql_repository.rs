//! MySqlJobRepository against a real MySQL server.
//!
//! Requires Docker; run with `cargo test -- --ignored`.

mod common;

use chrono::Utc;
use common::TestDatabase;
use workq_jobs::{
    JobId, JobMetadataRecord, JobOutcome, JobPayload, JobRecord, JobRepository, JobSettings,
    JobStatus,
};

fn queued_record(queue: &str) -> JobMetadataRecord {
    let mut payload = JobPayload::new();
    payload.insert("to".into(), serde_json::json!(["user@example.com"]));
    let record = JobRecord {
        job_type: "email".to_string(),
        payload,
        settings: JobSettings::on_queue(queue),
    };
    JobMetadataRecord::queued(JobId::new(), &record, Utc::now())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_insert_and_find_by_id() {
    let db = TestDatabase::new().await;
    let repo = db.repository();

    let record = queued_record("email");
    repo.insert(&record).await.expect("Failed to insert job");

    let found = repo
        .find_by_id(&record.job_id)
        .await
        .expect("Query failed")
        .expect("Job not found");
    assert_eq!(found.job_id, record.job_id);
    assert_eq!(found.queue_name, "email");
    assert_eq!(found.status, JobStatus::Queued);
    assert_eq!(found.max_attempts, 3);
    assert_eq!(found.payload, record.payload);
    assert!(found.result.is_none());

    assert!(repo.find_by_id(&JobId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_status_lifecycle() {
    let db = TestDatabase::new().await;
    let repo = db.repository();
    let record = queued_record("default");
    repo.insert(&record).await.unwrap();

    assert_eq!(repo.increment_attempts(&record.job_id).await.unwrap(), 1);
    assert_eq!(repo.increment_attempts(&record.job_id).await.unwrap(), 2);

    repo.update_status(&record.job_id, JobStatus::Failed, Some("smtp down"))
        .await
        .unwrap();
    let failed = repo.find_by_id(&record.job_id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.error_message.as_deref(), Some("smtp down"));
    assert!(failed.failed_at.is_some());

    let outcome = JobOutcome::success(serde_json::json!({"sent": 1}));
    repo.record_result(&record.job_id, &outcome).await.unwrap();
    repo.update_status(&record.job_id, JobStatus::Completed, None)
        .await
        .unwrap();
    let done = repo.find_by_id(&record.job_id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.processed_at.is_some());
    assert_eq!(done.result, Some(outcome));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_update_missing_job_is_not_found() {
    let db = TestDatabase::new().await;
    let err = db
        .repository()
        .update_status(&JobId::new(), JobStatus::Completed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, workq_jobs::JobError::NotFound(_)));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_transition_status_checks_current_state() {
    let db = TestDatabase::new().await;
    let repo = db.repository();
    let record = queued_record("default");
    repo.insert(&record).await.unwrap();

    let allowed = [JobStatus::Queued, JobStatus::Failed];
    assert!(repo
        .transition_status(&record.job_id, &allowed, JobStatus::Cancelled)
        .await
        .unwrap());
    assert!(!repo
        .transition_status(&record.job_id, &allowed, JobStatus::Cancelled)
        .await
        .unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_find_and_count_by_status() {
    let db = TestDatabase::new().await;
    let repo = db.repository();

    let a = queued_record("default");
    let b = queued_record("default");
    let c = queued_record("email");
    for record in [&a, &b, &c] {
        repo.insert(record).await.unwrap();
    }
    repo.update_status(&c.job_id, JobStatus::Processing, None)
        .await
        .unwrap();

    let queued = repo.find_by_status(JobStatus::Queued, 10).await.unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(
        repo.find_by_status(JobStatus::Queued, 1).await.unwrap().len(),
        1
    );

    let counts = repo.count_by_status().await.unwrap();
    assert_eq!(counts.get(JobStatus::Queued), 2);
    assert_eq!(counts.get(JobStatus::Processing), 1);
    assert_eq!(counts.total(), 3);

    repo.health_check().await.unwrap();
}
