//! End-to-end task scenarios through the orchestrator facade.

mod common;

use std::sync::Arc;
use std::time::Duration;

use lingo_ai::DefaultEngineFactory;
use lingo_models::{ChunkStatus, EngineKind, ErrorKind, TaskInput, TaskKind, TaskState};
use lingo_queue::{CancelOutcome, DispatchError, QueueConfig};
use lingo_store::{MemoryGateway, PersistenceGateway};
use lingo_worker::{Orchestrator, WorkerConfig};

use common::{assert_monotonic_per_attempt, test_config, write_lesson, Script, ScriptedFactory};

const WAIT: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_two_chunk_task_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let video = write_lesson(&dir);
    let gateway = Arc::new(MemoryGateway::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        gateway.clone(),
        Arc::new(DefaultEngineFactory::default()),
    );
    orchestrator.start().await;

    let input = TaskInput::new("lesson", &video, 0.0, 600.0, "user-1")
        .with_chunk_duration(300.0)
        .with_engine(EngineKind::Sidecar);
    let chunks = input.chunks(TaskKind::ChunkTranscription);
    let task_id = orchestrator
        .submit_task(TaskKind::ChunkTranscription, input)
        .await
        .unwrap();

    let status = orchestrator.wait_for_terminal(&task_id, WAIT).await.unwrap();
    assert_eq!(status.state, TaskState::Success);
    assert_eq!(status.progress, 100.0);
    assert_eq!(status.attempt, 1);

    let result = status.result.unwrap();
    let mut stored_words = 0;
    for chunk in &chunks {
        assert_eq!(
            gateway.read_chunk_status(&chunk.chunk_id).await.unwrap(),
            ChunkStatus::Finalized
        );
        stored_words += gateway.vocabulary(&chunk.chunk_id).await.len() as u32;
    }
    assert!(stored_words > 0);
    assert_eq!(result.vocabulary_count, stored_words);
    assert_eq!(result.segments_count, 4);
    assert_eq!(result.translations_count, 4);
    assert_eq!(result.chunks_total, 2);
    assert_eq!(result.artifact_paths.len(), 2);

    let events = orchestrator.progress_events(&task_id).await;
    assert_monotonic_per_attempt(&events);
    assert_eq!(events.first().unwrap().state, TaskState::Pending);
    assert_eq!(events.last().unwrap().state, TaskState::Success);
    for index in [1, 2] {
        let stages: Vec<_> = events
            .iter()
            .filter(|e| e.chunk_index == Some(index))
            .collect();
        assert_eq!(stages.len(), 5);
        assert!(stages.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(stages.last().unwrap().stage, Some(ChunkStatus::Finalized));
    }

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_codec_fails_without_retry() {
    let gateway = Arc::new(MemoryGateway::new());
    let orchestrator = Orchestrator::new(
        test_config(),
        gateway.clone(),
        Arc::new(DefaultEngineFactory::default()),
    );
    orchestrator.start().await;

    let input = TaskInput::new("clip", "/media/clip.rmvb", 0.0, 60.0, "user-1")
        .with_engine(EngineKind::Sidecar);
    let chunk_id = input.chunks(TaskKind::ChunkTranscription)[0].chunk_id.clone();
    let task_id = orchestrator
        .submit_task(TaskKind::ChunkTranscription, input)
        .await
        .unwrap();

    let status = orchestrator.wait_for_terminal(&task_id, WAIT).await.unwrap();
    assert_eq!(status.state, TaskState::Failure);
    assert_eq!(status.attempt, 1);
    let error = status.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Permanent);
    assert!(error.message.contains("rmvb"));

    assert_eq!(
        gateway.read_chunk_status(&chunk_id).await.unwrap(),
        ChunkStatus::Failed
    );
    let states: Vec<_> = orchestrator
        .progress_events(&task_id)
        .await
        .iter()
        .map(|e| e.state)
        .collect();
    assert_eq!(
        states,
        vec![TaskState::Pending, TaskState::Started, TaskState::Failure]
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_cancel_while_pending() {
    let script = Arc::new(Script::default());
    let orchestrator = Orchestrator::new(
        test_config(),
        Arc::new(MemoryGateway::new()),
        Arc::new(ScriptedFactory(script.clone())),
    );

    let task_id = orchestrator
        .submit_task(TaskKind::ChunkTranscription, common::two_chunk_input("lecture"))
        .await
        .unwrap();
    let ack = orchestrator.cancel_task(&task_id).await.unwrap();
    assert_eq!(ack.outcome, CancelOutcome::Cancelled);

    orchestrator.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = orchestrator.get_status(&task_id).await.unwrap();
    assert_eq!(status.state, TaskState::Failure);
    assert_eq!(status.attempt, 0);
    assert_eq!(status.error.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(script.transcribe_calls(), 0);

    let events = orchestrator.progress_events(&task_id).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].state, TaskState::Pending);

    let again = orchestrator.cancel_task(&task_id).await.unwrap();
    assert_eq!(again.outcome, CancelOutcome::AlreadyTerminal);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_rejects_submission() {
    let config = WorkerConfig {
        queue: QueueConfig {
            capacity: 1,
            ..test_config().queue
        },
        ..test_config()
    };
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(MemoryGateway::new()),
        Arc::new(ScriptedFactory(Arc::new(Script::default()))),
    );

    let first = orchestrator
        .submit_task(TaskKind::BatchTranslation, common::two_chunk_input("a"))
        .await
        .unwrap();
    let err = orchestrator
        .submit_task(TaskKind::BatchTranslation, common::two_chunk_input("b"))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::QueueSaturated { capacity: 1 }));
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert_eq!(
        orchestrator.get_status(&first).await.unwrap().state,
        TaskState::Pending
    );
    assert_eq!(orchestrator.queue_len().await, 1);
}
