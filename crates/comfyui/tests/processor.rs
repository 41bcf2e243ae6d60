//! Dispatch tests for `MessageProcessor`.
//!
//! Messages are fed straight into the processor, without a socket, and
//! the recorded callbacks are checked against the notification table.

mod common;

use std::sync::Arc;

use comfyui_client::processor::MessageProcessor;
use comfyui_client::registry::JobRegistry;

use common::{FakeFetcher, JobCall, PanickingJob, RecordingJob, RecordingSession, SessionCall};

struct Harness {
    processor: MessageProcessor,
    jobs: Arc<JobRegistry>,
    session: Arc<RecordingSession>,
    fetcher: Arc<FakeFetcher>,
}

fn harness(fetcher: FakeFetcher) -> Harness {
    let jobs = Arc::new(JobRegistry::new());
    let (session, _rx) = RecordingSession::new();
    let fetcher = Arc::new(fetcher);
    let processor = MessageProcessor::new(Arc::clone(&jobs), session.clone(), fetcher.clone());
    Harness {
        processor,
        jobs,
        session,
        fetcher,
    }
}

// ---------------------------------------------------------------------------
// Test: full lifecycle of one prompt
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lifecycle_callbacks_arrive_in_order_and_binding_is_released() {
    let h = harness(FakeFetcher::default().with_file("f1.png", b"image-one"));
    let (job, _rx) = RecordingJob::new();
    h.jobs.bind("P".into(), job.clone()).await;

    for msg in [
        r#"{"type":"execution_start","data":{"prompt_id":"P"}}"#,
        r#"{"type":"progress","data":{"prompt_id":"P","value":1,"max":2}}"#,
        r#"{"type":"executed","data":{"prompt_id":"P","node":"9","output":{"images":[{"filename":"f1.png","type":"output","subfolder":""}]}}}"#,
        r#"{"type":"execution_success","data":{"prompt_id":"P","timestamp":1}}"#,
    ] {
        h.processor.handle_text(msg).await;
    }

    assert_eq!(
        job.calls(),
        vec![
            JobCall::Start,
            JobCall::Progress(1, 2),
            JobCall::Artifact("f1.png".into(), b"image-one".to_vec()),
            JobCall::Completed,
        ]
    );
    assert!(!h.jobs.contains("P").await);

    // A later notification for the same prompt finds no binding.
    h.processor
        .handle_text(r#"{"type":"execution_start","data":{"prompt_id":"P"}}"#)
        .await;
    assert_eq!(job.calls().len(), 4);
    assert!(h.session.errors().is_empty());
}

#[tokio::test]
async fn executing_reports_node_ids_but_not_null_nodes() {
    let h = harness(FakeFetcher::default());
    let (job, _rx) = RecordingJob::new();
    h.jobs.bind("P".into(), job.clone()).await;

    h.processor
        .handle_text(r#"{"type":"executing","data":{"prompt_id":"P","node":"3"}}"#)
        .await;
    h.processor
        .handle_text(r#"{"type":"executing","data":{"prompt_id":"P","node":null}}"#)
        .await;
    h.processor
        .handle_text(r#"{"type":"executing","data":{"prompt_id":"P","node":"null"}}"#)
        .await;

    assert_eq!(job.calls(), vec![JobCall::Node("3".into())]);
}

// ---------------------------------------------------------------------------
// Test: unknown or malformed prompt ids
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_prompt_ids_are_ignored_without_binding() {
    let h = harness(FakeFetcher::default().with_file("f1.png", b"x"));

    for msg in [
        r#"{"type":"execution_start","data":{"prompt_id":"ghost"}}"#,
        r#"{"type":"executing","data":{"prompt_id":"ghost","node":"1"}}"#,
        r#"{"type":"progress","data":{"prompt_id":"ghost","value":1,"max":2}}"#,
        r#"{"type":"executed","data":{"prompt_id":"ghost","output":{"images":[{"filename":"f1.png"}]}}}"#,
        r#"{"type":"execution_success","data":{"prompt_id":"ghost"}}"#,
    ] {
        h.processor.handle_text(msg).await;
    }

    assert!(h.jobs.is_empty().await);
    assert!(h.fetcher.requested().is_empty());
    assert!(h.session.errors().is_empty());
}

#[tokio::test]
async fn missing_or_mistyped_prompt_id_is_skipped() {
    let h = harness(FakeFetcher::default());
    let (job, _rx) = RecordingJob::new();
    h.jobs.bind("P".into(), job.clone()).await;

    h.processor
        .handle_text(r#"{"type":"execution_start","data":{}}"#)
        .await;
    h.processor
        .handle_text(r#"{"type":"progress","data":{"prompt_id":42,"value":1,"max":2}}"#)
        .await;

    assert!(job.calls().is_empty());
    assert!(h.session.errors().is_empty());
    assert!(h.jobs.contains("P").await);
}

#[tokio::test]
async fn execution_success_finds_prompt_id_outside_data() {
    let h = harness(FakeFetcher::default());
    let (job, _rx) = RecordingJob::new();
    h.jobs.bind("P".into(), job).await;

    h.processor
        .handle_text(r#"{"type":"execution_success","extra":{"prompt_id":"P"}}"#)
        .await;

    assert!(h.jobs.is_empty().await);
}

// ---------------------------------------------------------------------------
// Test: artifact download failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fetch_failure_goes_to_job_and_remaining_images_still_download() {
    let h = harness(FakeFetcher::default().with_file("good.png", b"ok"));
    let (job, _rx) = RecordingJob::new();
    h.jobs.bind("P".into(), job.clone()).await;

    h.processor
        .handle_text(
            r#"{"type":"executed","data":{"prompt_id":"P","output":{"images":[
                {"filename":"missing.png","type":"output","subfolder":""},
                {"filename":"good.png","type":"output","subfolder":""}
            ]}}}"#,
        )
        .await;

    let calls = job.calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(&calls[0], JobCall::Error(msg) if msg.contains("404")));
    assert_eq!(calls[1], JobCall::Artifact("good.png".into(), b"ok".to_vec()));
    assert_eq!(calls[2], JobCall::Completed);
    assert_eq!(h.fetcher.requested(), vec!["missing.png", "good.png"]);
    assert!(h.session.errors().is_empty());

    // The binding is still released by the terminal notification.
    h.processor
        .handle_text(r#"{"type":"execution_success","data":{"prompt_id":"P"}}"#)
        .await;
    assert!(h.jobs.is_empty().await);
}

#[tokio::test]
async fn executed_without_images_invokes_nothing() {
    let h = harness(FakeFetcher::default());
    let (job, _rx) = RecordingJob::new();
    h.jobs.bind("P".into(), job.clone()).await;

    h.processor
        .handle_text(r#"{"type":"executed","data":{"prompt_id":"P","node":"12","output":{"text":["hello"]}}}"#)
        .await;

    assert!(job.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Test: failures are contained to one message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_message_reports_session_error_and_next_message_is_processed() {
    let h = harness(FakeFetcher::default());
    let (job, _rx) = RecordingJob::new();
    h.jobs.bind("P".into(), job.clone()).await;

    h.processor.handle_text("{not json").await;
    h.processor
        .handle_text(r#"{"type":"execution_start","data":{"prompt_id":"P"}}"#)
        .await;

    let errors = h.session.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Malformed message"));
    assert_eq!(job.calls(), vec![JobCall::Start]);
}

#[tokio::test]
async fn panicking_callback_is_reported_and_processing_continues() {
    let h = harness(FakeFetcher::default());
    let (job, _rx) = RecordingJob::new();
    h.jobs.bind("bad".into(), Arc::new(PanickingJob)).await;
    h.jobs.bind("good".into(), job.clone()).await;

    h.processor
        .handle_text(r#"{"type":"execution_start","data":{"prompt_id":"bad"}}"#)
        .await;
    h.processor
        .handle_text(r#"{"type":"execution_start","data":{"prompt_id":"good"}}"#)
        .await;

    let errors = h.session.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("handler exploded"));
    assert_eq!(job.calls(), vec![JobCall::Start]);
}

#[tokio::test]
async fn unknown_types_and_binary_frames_are_ignored() {
    let h = harness(FakeFetcher::default());

    h.processor
        .handle_text(r#"{"type":"crystools.monitor","data":{"cpu":12}}"#)
        .await;
    h.processor.handle_text(r#"{"data":{}}"#).await;
    h.processor.handle_binary(&[0, 0, 0, 1, 0, 0, 0, 2, 0x89, b'P', b'N', b'G']);

    assert!(h.session.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Test: session-level status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reports_sid_and_queue_depth() {
    let h = harness(FakeFetcher::default());

    h.processor
        .handle_text(r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":2}},"sid":"abc"}}"#)
        .await;
    h.processor
        .handle_text(r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":0}}}}"#)
        .await;
    h.processor
        .handle_text(r#"{"type":"status","data":{"queue_remaining":-1}}"#)
        .await;

    assert_eq!(
        h.session.calls(),
        vec![
            SessionCall::Sid("abc".into()),
            SessionCall::Queue(2),
            SessionCall::Queue(0),
        ]
    );
}
