//! Integration tests against a live Redis instance.
//!
//! These exercise the queue engine, admission controller, worker registry and
//! streaming gateway end to end. They flush the database between tests, so
//! point REDIS_URL at a dedicated test instance and run serially:
//!
//! cargo test --test integration_test -- --ignored --test-threads=1

use std::time::Duration;

use futures::StreamExt;
use redis::AsyncCommands;

use face_search_queue::app_state::AppState;
use face_search_queue::config::AppConfig;
use face_search_queue::models::event::{DashboardEvent, JobEvent};
use face_search_queue::models::job::{FaceMatch, JobData, JobState};
use face_search_queue::services::admission::AdmissionError;
use face_search_queue::services::queue::QueueError;
use face_search_queue::services::store::{CoordinationStore, WORKERS_KEY};

fn test_config(rate_limit_window_secs: u64) -> AppConfig {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());
    envy::from_iter([
        ("REDIS_URL".to_string(), redis_url),
        (
            "RATE_LIMIT_WINDOW_SECS".to_string(),
            rate_limit_window_secs.to_string(),
        ),
        // Fast polling so stream tests finish quickly.
        ("POLL_INTERVAL_MS".to_string(), "50".to_string()),
        ("KEEPALIVE_MS".to_string(), "60000".to_string()),
    ])
    .expect("Failed to build test config")
}

async fn fresh_state(rate_limit_window_secs: u64) -> AppState {
    let config = test_config(rate_limit_window_secs);
    let store = CoordinationStore::new(&config.redis_url).expect("Failed to open store");
    let mut conn = store.connection().await.expect("Failed to connect");
    redis::cmd("FLUSHDB")
        .query_async::<()>(&mut conn)
        .await
        .expect("Failed to flush test database");
    AppState::new(config, store)
}

fn job_data(uid: &str) -> JobData {
    JobData {
        image: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        uid: uid.to_string(),
        stage: "search".to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

#[tokio::test]
#[ignore]
async fn test_priority_ordering_and_promote() {
    let state = fresh_state(0).await;

    let a = state.queue.add(job_data("a@test")).await.expect("enqueue a");
    let b = state.queue.add(job_data("b@test")).await.expect("enqueue b");
    let c = state.queue.add(job_data("c@test")).await.expect("enqueue c");
    state.queue.set_priority(&a.id, 5).await.expect("priority a");
    state.queue.set_priority(&b.id, 1).await.expect("priority b");
    state.queue.set_priority(&c.id, 3).await.expect("priority c");

    // Drain order follows priority ascending: 1, 3, 5.
    let first = state.queue.dequeue().await.expect("dequeue").expect("job");
    let second = state.queue.dequeue().await.expect("dequeue").expect("job");
    let third = state.queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(first.id, b.id);
    assert_eq!(second.id, c.id);
    assert_eq!(third.id, a.id);
    assert_eq!(first.state, JobState::Active);
    assert!(first.processed_at.is_some());

    // Promotion overrides priority entirely.
    let x = state.queue.add(job_data("x@test")).await.expect("enqueue x");
    let y = state.queue.add(job_data("y@test")).await.expect("enqueue y");
    state.queue.set_priority(&x.id, 1).await.expect("priority x");
    state.queue.set_priority(&y.id, 9).await.expect("priority y");
    state.queue.promote(&y.id).await.expect("promote y");
    let head = state.queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(head.id, y.id);
}

#[tokio::test]
#[ignore]
async fn test_transition_conflicts() {
    let state = fresh_state(0).await;

    let job = state.queue.add(job_data("t@test")).await.expect("enqueue");

    // Completing a waiting job is a conflict, not a silent accept.
    let err = state.queue.complete(&job.id, vec![]).await.unwrap_err();
    assert!(matches!(err, QueueError::Conflict { .. }));

    let active = state.queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(active.id, job.id);
    state.queue.complete(&job.id, vec![]).await.expect("complete");

    // Terminal jobs cannot be completed again or retried.
    let err = state.queue.complete(&job.id, vec![]).await.unwrap_err();
    assert!(matches!(err, QueueError::Conflict { .. }));
    let err = state.queue.retry(&job.id).await.unwrap_err();
    assert!(matches!(err, QueueError::Conflict { .. }));
}

#[tokio::test]
#[ignore]
async fn test_idempotent_removal() {
    let state = fresh_state(0).await;

    let job = state.queue.add(job_data("r@test")).await.expect("enqueue");
    state.queue.remove(&job.id).await.expect("first removal succeeds");
    let err = state.queue.remove(&job.id).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
    assert!(state.queue.get(&job.id).await.expect("get").is_none());
}

#[tokio::test]
#[ignore]
async fn test_pause_gates_dequeue() {
    let state = fresh_state(0).await;

    state.queue.add(job_data("p@test")).await.expect("enqueue");
    state.queue.pause().await.expect("pause");
    assert!(state.queue.is_paused().await.expect("is_paused"));
    assert!(state.queue.dequeue().await.expect("dequeue").is_none());
    // Insertion is unaffected while paused.
    state.queue.add(job_data("p2@test")).await.expect("enqueue while paused");
    assert_eq!(state.queue.count(JobState::Waiting).await.expect("count"), 2);

    state.queue.resume().await.expect("resume");
    assert!(state.queue.dequeue().await.expect("dequeue").is_some());
}

#[tokio::test]
#[ignore]
async fn test_exclusivity() {
    let state = fresh_state(0).await;

    let first = state
        .admission
        .admit("alice@test", "data:image/png;base64,AA==".to_string(), "search".to_string())
        .await
        .expect("first admission succeeds");

    let err = state
        .admission
        .admit("alice@test", "data:image/png;base64,BB==".to_string(), "search".to_string())
        .await
        .unwrap_err();
    match err {
        AdmissionError::AlreadyQueued { job_id, .. } => assert_eq!(job_id, first.id),
        other => panic!("expected AlreadyQueued, got {other:?}"),
    }

    // A different user is unaffected.
    state
        .admission
        .admit("bob@test", "data:image/png;base64,CC==".to_string(), "search".to_string())
        .await
        .expect("other user admits fine");
}

#[tokio::test]
#[ignore]
async fn test_rate_limiting() {
    let state = fresh_state(120).await;

    let job = state
        .admission
        .admit("carol@test", "data:image/png;base64,AA==".to_string(), "search".to_string())
        .await
        .expect("first admission succeeds");

    // Finish the job and clear the pointer so only the rate limit can reject.
    state.queue.dequeue().await.expect("dequeue").expect("job");
    state.queue.complete(&job.id, vec![]).await.expect("complete");
    state
        .admission
        .clear_active_job("carol@test")
        .await
        .expect("clear pointer");

    let err = state
        .admission
        .admit("carol@test", "data:image/png;base64,BB==".to_string(), "search".to_string())
        .await
        .unwrap_err();
    match err {
        AdmissionError::RateLimited { retry_after_secs } => {
            assert!(retry_after_secs > 0 && retry_after_secs <= 120);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn test_stale_pointer_cleanup() {
    let state = fresh_state(0).await;

    let job = state
        .admission
        .admit("dave@test", "data:image/png;base64,AA==".to_string(), "search".to_string())
        .await
        .expect("first admission succeeds");

    // Job finishes but nobody observed the terminal event; the pointer is stale.
    state.queue.dequeue().await.expect("dequeue").expect("job");
    state.queue.fail(&job.id, "no face detected").await.expect("fail");

    // Admission detects the terminal job behind the pointer and proceeds.
    let second = state
        .admission
        .admit("dave@test", "data:image/png;base64,BB==".to_string(), "search".to_string())
        .await
        .expect("stale pointer is cleaned up");
    assert_ne!(second.id, job.id);
}

#[tokio::test]
#[ignore]
async fn test_bulk_retry_isolation() {
    let state = fresh_state(0).await;

    let mut failed_ids = Vec::new();
    for uid in ["f1@test", "f2@test", "f3@test"] {
        let job = state.queue.add(job_data(uid)).await.expect("enqueue");
        state.queue.dequeue().await.expect("dequeue").expect("job");
        state.queue.fail(&job.id, "engine crash").await.expect("fail");
        failed_ids.push(job.id);
    }

    // The middle job disappears between listing and retrying.
    state.queue.remove(&failed_ids[1]).await.expect("remove");

    let mut retried = 0;
    let mut errors = 0;
    for id in &failed_ids {
        match state.queue.retry(id).await {
            Ok(_) => retried += 1,
            Err(_) => errors += 1,
        }
    }
    assert_eq!(retried, 2);
    assert_eq!(errors, 1);
    assert_eq!(state.queue.count(JobState::Waiting).await.expect("count"), 2);

    let survivor = state.queue.get(&failed_ids[0]).await.expect("get").expect("job");
    assert_eq!(survivor.state, JobState::Waiting);
    assert_eq!(survivor.attempts_made, 1);
    assert!(survivor.failed_reason.is_none());
}

#[tokio::test]
#[ignore]
async fn test_worker_registry() {
    let state = fresh_state(0).await;
    let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;

    let mut conn = state.store.connection().await.expect("connect");
    for (id, age) in [("w-online", 5.0), ("w-offline", 20.0), ("w-stale", 70.0)] {
        let record = serde_json::json!({
            "id": id,
            "hostname": "test-host",
            "last_heartbeat": now - age,
        });
        conn.hset::<_, _, _, ()>(WORKERS_KEY, id, record.to_string())
            .await
            .expect("write heartbeat");
    }

    state.workers.pause("w-online").await.expect("pause");

    let workers = state.workers.list().await.expect("list");
    assert_eq!(workers.len(), 3);
    // Online first, then offline ids ascending.
    assert_eq!(workers[0].record.id, "w-online");
    assert_eq!(workers[0].status.to_string(), "online");
    assert!(workers[0].paused);
    assert_eq!(workers[1].status.to_string(), "offline");
    assert_eq!(workers[2].status.to_string(), "offline");

    let cleaned = state.workers.clean_stale().await.expect("clean");
    assert_eq!(cleaned, 1);
    let remaining = state.workers.list().await.expect("list");
    assert!(remaining.iter().all(|w| w.record.id != "w-stale"));
}

#[tokio::test]
#[ignore]
async fn test_retention_clean_and_cap() {
    let state = fresh_state(0).await;

    for uid in ["c1@test", "c2@test", "c3@test"] {
        let job = state.queue.add(job_data(uid)).await.expect("enqueue");
        state.queue.dequeue().await.expect("dequeue").expect("job");
        state.queue.complete(&job.id, vec![]).await.expect("complete");
    }
    assert_eq!(state.queue.count(JobState::Completed).await.expect("count"), 3);

    // Cap keeps only the newest two.
    let removed = state.queue.enforce_completed_cap(2).await.expect("cap");
    assert_eq!(removed, 1);
    assert_eq!(state.queue.count(JobState::Completed).await.expect("count"), 2);

    // Age-zero clean purges the rest.
    let removed = state
        .queue
        .clean(JobState::Completed, 0, 1000)
        .await
        .expect("clean");
    assert_eq!(removed, 2);
    assert_eq!(state.queue.count(JobState::Completed).await.expect("count"), 0);
}

#[tokio::test]
#[ignore]
async fn test_stream_dedup_and_terminal_close() {
    let state = fresh_state(0).await;

    let job = state
        .admission
        .admit("eve@test", "data:image/png;base64,AA==".to_string(), "search".to_string())
        .await
        .expect("admit");

    // Position does not change, so several poll cycles emit one status event.
    let mut stream = state.streams.subscribe_job(job.id.clone());
    let first = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("first event arrives")
        .expect("stream open");
    assert!(matches!(first, JobEvent::Status(_)));

    let extra = tokio::time::timeout(Duration::from_millis(300), stream.next()).await;
    assert!(extra.is_err(), "no duplicate status for unchanged signature");

    // Terminal transition produces exactly one result event and ends the stream.
    state.queue.dequeue().await.expect("dequeue").expect("job");
    state
        .queue
        .complete(
            &job.id,
            vec![FaceMatch {
                id: "img_1".to_string(),
                score: 0.97,
            }],
        )
        .await
        .expect("complete");

    // A status event for the brief active phase may precede the result.
    loop {
        let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("terminal event arrives")
            .expect("stream open");
        match event {
            JobEvent::Status(_) => continue,
            JobEvent::Result(result) => {
                assert_eq!(result.result.len(), 1);
                assert_eq!(result.stage, "search");
                break;
            }
            other => panic!("expected result event, got {other:?}"),
        }
    }
    let end = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("stream closes");
    assert!(end.is_none());

    // The active-job pointer is cleared once the terminal event was observed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    state
        .admission
        .admit("eve@test", "data:image/png;base64,BB==".to_string(), "search".to_string())
        .await
        .expect("pointer cleared after terminal event");
}

#[tokio::test]
#[ignore]
async fn test_dashboard_stream_snapshot_and_updates() {
    let state = fresh_state(0).await;

    let mut stream = state.streams.subscribe_dashboard();

    // One full snapshot up front: counts, recent jobs, pause flag, workers.
    let first = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("initial event arrives")
        .expect("stream open");
    match first {
        DashboardEvent::Initial(payload) => {
            assert_eq!(payload["stats"]["waiting"], 0);
            assert!(payload["jobs"].is_object());
            assert_eq!(payload["isPaused"], false);
            assert!(payload["workers"].is_array());
        }
        other => panic!("expected initial snapshot, got {other:?}"),
    }

    // The update subscription is established after the snapshot; give it a
    // moment before mutating.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A queue mutation triggers a re-fetched queue snapshot.
    state.queue.add(job_data("dash@test")).await.expect("enqueue");
    let update = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("queue update arrives")
        .expect("stream open");
    match update {
        DashboardEvent::QueueUpdate(payload) => {
            assert_eq!(payload["stats"]["waiting"], 1);
            assert!(payload["jobs"]["waiting"].is_array());
        }
        other => panic!("expected queue update, got {other:?}"),
    }

    // Pausing passes the flag through without a full snapshot.
    state.queue.pause().await.expect("pause");
    let paused = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("pause update arrives")
        .expect("stream open");
    match paused {
        DashboardEvent::PauseUpdate(payload) => assert_eq!(payload["isPaused"], true),
        other => panic!("expected pause update, got {other:?}"),
    }

    // A worker change notification carries the refreshed worker list.
    state.workers.pause("dash-worker").await.expect("pause worker");
    let workers = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("workers update arrives")
        .expect("stream open");
    match workers {
        DashboardEvent::WorkersUpdate(payload) => assert!(payload["workers"].is_array()),
        other => panic!("expected workers update, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn test_end_to_end_scenario() {
    let state = fresh_state(0).await;

    // alice admits a job.
    let job = state
        .admission
        .admit("alice@test", "data:image/png;base64,AA==".to_string(), "search".to_string())
        .await
        .expect("admit");

    // A second admission while the first is live reports the existing job.
    let err = state
        .admission
        .admit("alice@test", "data:image/png;base64,BB==".to_string(), "search".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, AdmissionError::AlreadyQueued { job_id, .. } if job_id == job.id));

    // An external worker pulls and completes it.
    let pulled = state.queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(pulled.id, job.id);
    state
        .queue
        .complete(
            &job.id,
            vec![FaceMatch {
                id: "img_42".to_string(),
                score: 0.88,
            }],
        )
        .await
        .expect("complete");

    // A subscriber gets the single result event; the pointer clears.
    let mut stream = state.streams.subscribe_job(job.id.clone());
    let event = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("event arrives")
        .expect("stream open");
    assert!(matches!(event, JobEvent::Result(_)));
    assert!(tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("stream closes")
        .is_none());

    // With the pointer gone (and no rate limit in this config) a new
    // admission gets a fresh job id.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let next = state
        .admission
        .admit("alice@test", "data:image/png;base64,CC==".to_string(), "search".to_string())
        .await
        .expect("new admission succeeds");
    assert_ne!(next.id, job.id);
}
