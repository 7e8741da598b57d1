//! Progress relay over Redis Pub/Sub.
//!
//! Run with: cargo test --test redis_relay -- --ignored

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lingo_models::{TaskInput, TaskKind, TaskState};
use lingo_queue::RedisProgressRelay;
use lingo_store::MemoryGateway;
use lingo_worker::Orchestrator;

use common::{test_config, Script, ScriptedFactory};

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_is_republished_to_redis() {
    dotenvy::dotenv().ok();
    let relay = RedisProgressRelay::from_env()
        .expect("Invalid REDIS_URL")
        .expect("REDIS_URL must be set");
    let listener = RedisProgressRelay::from_env().unwrap().unwrap();

    let orch = Orchestrator::with_progress_relay(
        test_config(),
        Arc::new(MemoryGateway::new()),
        Arc::new(ScriptedFactory(Arc::new(Script::default()))),
        relay,
    );
    let input = TaskInput::new("relayed", "/media/relayed.mp4", 0.0, 60.0, "user-1");
    let task_id = orch
        .submit_task(TaskKind::ChunkTranscription, input)
        .await
        .unwrap();

    let mut events = listener.subscribe(&task_id).await.unwrap();
    orch.start().await;

    let mut states = Vec::new();
    let received = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(event) = events.next().await {
            assert_eq!(event.task_id, task_id);
            states.push(event.state);
            if event.is_terminal() {
                break;
            }
        }
    })
    .await;

    assert!(received.is_ok(), "timed out waiting for relayed events");
    assert_eq!(states.first(), Some(&TaskState::Started));
    assert_eq!(states.last(), Some(&TaskState::Success));
    orch.shutdown().await;
}
