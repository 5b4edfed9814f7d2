use std::time;

use match_uploader::counters::RunCounters;
use match_uploader::error::RunError;
use match_uploader::uploader::{BatchStatus, BatchUploader, UploadSettings, UploadState};
use tokio::time::Instant;

mod common;
use common::{records, retry_policy, Call, FakeService, Reply, JOB};

const USER_LIST: &str = "9876543210";

fn settings(batch_size: usize) -> UploadSettings {
    UploadSettings {
        batch_size,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_upload_retries_concurrent_modification() {
    // Batches 1 and 2 go through, batch 3 conflicts twice, the rest go through.
    let service = FakeService::new().with_replies([
        Reply::Accept,
        Reply::Accept,
        Reply::Conflict,
        Reply::Conflict,
    ]);
    let records = records(12_001);
    let mut counters = RunCounters::default();
    let uploader = BatchUploader::new(&service, retry_policy(), settings(2500));

    let start = Instant::now();
    let report = uploader
        .upload(USER_LIST, &records, &mut counters)
        .await
        .expect("upload succeeds");

    // Four inter-batch pauses of 500ms plus backoffs of 1s and 2s.
    assert_eq!(start.elapsed(), time::Duration::from_secs(5));

    assert_eq!(report.state, UploadState::Completed);
    assert!(report.is_success());
    assert_eq!(report.job.as_ref().map(ToString::to_string).as_deref(), Some(JOB));

    let sizes: Vec<usize> = report.batches.iter().map(|batch| batch.size).collect();
    assert_eq!(sizes, vec![2500, 2500, 2500, 2500, 1001]);
    let attempts: Vec<u32> = report.batches.iter().map(|batch| batch.attempts).collect();
    assert_eq!(attempts, vec![1, 1, 3, 1, 1]);
    assert!(report
        .batches
        .iter()
        .all(|batch| batch.status == BatchStatus::Succeeded));
    assert_eq!(report.batches_succeeded(), 5);

    assert_eq!(counters.batches_attempted, 5);
    assert_eq!(counters.batches_succeeded, 5);
    assert_eq!(counters.batches_failed, 0);
    assert_eq!(counters.retries, 2);

    assert_eq!(
        service.add_operation_sizes(),
        vec![2500, 2500, 2500, 2500, 2500, 2500, 1001]
    );
    let calls = service.calls();
    assert_eq!(calls.first(), Some(&Call::CreateJob(USER_LIST.to_owned())));
    assert_eq!(calls.last(), Some(&Call::RunJob));
    assert_eq!(service.count(|call| matches!(call, Call::RunJob)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batches_keep_record_order() {
    let service = FakeService::new();
    let records = records(7);
    let mut counters = RunCounters::default();

    BatchUploader::new(&service, retry_policy(), settings(3))
        .upload(USER_LIST, &records, &mut counters)
        .await
        .unwrap();

    let firsts: Vec<Option<String>> = service
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::AddOperations { first, .. } => Some(first),
            _ => None,
        })
        .collect();
    assert_eq!(
        firsts,
        vec![
            Some("C0".to_owned()),
            Some("C3".to_owned()),
            Some("C6".to_owned())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_terminal_batch_error_is_not_retried() {
    let service = FakeService::new().with_replies([Reply::Accept, Reply::Reject]);
    let records = records(3);
    let mut counters = RunCounters::default();

    let report = BatchUploader::new(&service, retry_policy(), settings(1))
        .upload(USER_LIST, &records, &mut counters)
        .await
        .unwrap();

    assert_eq!(service.add_operation_sizes().len(), 3);
    assert_eq!(report.batches[1].attempts, 1);
    assert!(matches!(report.batches[1].status, BatchStatus::Failed { .. }));
    assert!(report.batches[2].is_accepted());

    assert_eq!(report.state, UploadState::Completed);
    assert_eq!(counters.batches_succeeded, 2);
    assert_eq!(counters.batches_failed, 1);
    assert_eq!(counters.retries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_fails_after_retries_are_exhausted() {
    let service =
        FakeService::new().with_replies([Reply::Conflict, Reply::Conflict, Reply::Conflict]);
    let records = records(4);
    let mut counters = RunCounters::default();

    let report = BatchUploader::new(&service, retry_policy(), settings(2))
        .upload(USER_LIST, &records, &mut counters)
        .await
        .unwrap();

    assert_eq!(report.batches[0].attempts, 3);
    assert!(!report.batches[0].is_accepted());
    assert!(report.batches[1].is_accepted());
    assert_eq!(report.state, UploadState::Completed);
    assert_eq!(counters.retries, 2);
    assert_eq!(counters.batches_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_counts_as_accepted() {
    let service = FakeService::new().with_replies([Reply::Partial("2 operations failed")]);
    let records = records(2);
    let mut counters = RunCounters::default();

    let report = BatchUploader::new(&service, retry_policy(), settings(2500))
        .upload(USER_LIST, &records, &mut counters)
        .await
        .unwrap();

    assert_eq!(
        report.batches[0].status,
        BatchStatus::PartiallyFailed {
            message: "2 operations failed".to_owned()
        }
    );
    assert_eq!(report.batches[0].attempts, 1);
    assert_eq!(report.state, UploadState::Completed);
    assert_eq!(counters.batches_succeeded, 1);
    assert_eq!(counters.batches_partially_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_accepted_batch_fails_the_upload() {
    let service = FakeService::new().with_replies([Reply::Reject, Reply::Reject]);
    let records = records(2);
    let mut counters = RunCounters::default();

    let report = BatchUploader::new(&service, retry_policy(), settings(1))
        .upload(USER_LIST, &records, &mut counters)
        .await
        .unwrap();

    assert_eq!(report.state, UploadState::Failed);
    assert!(!report.is_success());
    assert_eq!(report.batches_succeeded(), 0);
    assert_eq!(service.count(|call| matches!(call, Call::RunJob)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_failure_keeps_batch_counters() {
    let service = FakeService {
        fail_run: true,
        ..Default::default()
    };
    let records = records(5);
    let mut counters = RunCounters::default();

    let error = BatchUploader::new(&service, retry_policy(), settings(2))
        .upload(USER_LIST, &records, &mut counters)
        .await
        .unwrap_err();

    match error {
        RunError::RunJob { job, .. } => assert_eq!(job, JOB),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(counters.batches_attempted, 3);
    assert_eq!(counters.batches_succeeded, 3);
}

#[tokio::test(start_paused = true)]
async fn test_create_failure_uploads_nothing() {
    let service = FakeService {
        fail_create: true,
        ..Default::default()
    };
    let records = records(5);
    let mut counters = RunCounters::default();

    let error = BatchUploader::new(&service, retry_policy(), settings(2))
        .upload(USER_LIST, &records, &mut counters)
        .await
        .unwrap_err();

    assert!(matches!(error, RunError::CreateJob(_)));
    assert_eq!(service.calls(), vec![Call::CreateJob(USER_LIST.to_owned())]);
    assert_eq!(counters.batches_attempted, 0);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_to_upload_creates_no_job() {
    let service = FakeService::new();
    let mut counters = RunCounters::default();

    let report = BatchUploader::new(&service, retry_policy(), settings(2500))
        .upload(USER_LIST, &[], &mut counters)
        .await
        .unwrap();

    assert_eq!(report.job, None);
    assert!(report.batches.is_empty());
    assert_eq!(report.state, UploadState::Completed);
    assert!(service.calls().is_empty());
}
