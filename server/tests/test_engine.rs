//! Dispatch engine integration tests

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use iclockd::clock::ManualClock;
use iclockd::dispatch::engine::{DispatchEngine, DispatchOptions};
use iclockd::dispatch::fsm::CommandState;
use iclockd::protocol::commands::CmdType;

fn engine_with_clock() -> (DispatchEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = DispatchEngine::new(DispatchOptions::default(), clock.clone());
    (engine, clock)
}

#[tokio::test]
async fn test_enqueue_then_poll_delivers_exactly_once() {
    let (engine, _clock) = engine_with_clock();

    let id = engine
        .enqueue_command("SN123", CmdType::Data, String::new(), None)
        .await;
    assert_eq!(id, 1);

    let body = engine.poll("SN123", None).await;
    assert_eq!(body, "ID=1\tCMD=DATA\n");
    assert_eq!(
        engine.command_status("SN123", id).await,
        Some((CommandState::Sent, None))
    );

    // Second poll delivers nothing; the command is in flight
    assert_eq!(engine.poll("SN123", None).await, "");
}

#[tokio::test]
async fn test_reply_acknowledges_command() {
    let (engine, _clock) = engine_with_clock();

    let id = engine
        .enqueue_command("SN123", CmdType::Data, "QUERY ATTLOG".to_string(), None)
        .await;
    engine.poll("SN123", None).await;

    let summary = engine
        .submit_replies("SN123", &format!("ID={}&Return=0&CMD=DATA\n", id))
        .await;
    assert_eq!(summary.applied, 1);
    assert_eq!(
        engine.command_status("SN123", id).await,
        Some((CommandState::Acknowledged, Some(0)))
    );
}

#[tokio::test]
async fn test_nonzero_return_marks_device_error() {
    let (engine, _clock) = engine_with_clock();

    let id = engine
        .enqueue_command("SN123", CmdType::ClearLog, String::new(), None)
        .await;
    engine.poll("SN123", None).await;

    engine
        .submit_replies("SN123", &format!("ID={}&Return=-1021&CMD=CLEAR LOG\n", id))
        .await;
    assert_eq!(
        engine.command_status("SN123", id).await,
        Some((CommandState::DeviceReportedError, Some(-1021)))
    );
}

#[tokio::test]
async fn test_malformed_line_does_not_abort_batch() {
    let (engine, _clock) = engine_with_clock();

    let first = engine
        .enqueue_command("SN123", CmdType::Data, String::new(), None)
        .await;
    let second = engine
        .enqueue_command("SN123", CmdType::Check, String::new(), None)
        .await;
    engine.poll("SN123", None).await;

    let body = format!(
        "ID={}&Return=0&CMD=DATA\nthis is not a record\nID={}&Return=0&CMD=CHECK\n",
        first, second
    );
    let summary = engine.submit_replies("SN123", &body).await;

    assert_eq!(summary.applied, 2);
    assert_eq!(summary.malformed, 1);
    assert_eq!(
        engine.command_status("SN123", first).await,
        Some((CommandState::Acknowledged, Some(0)))
    );
    assert_eq!(
        engine.command_status("SN123", second).await,
        Some((CommandState::Acknowledged, Some(0)))
    );
}

#[tokio::test]
async fn test_unknown_id_is_ignored() {
    let (engine, _clock) = engine_with_clock();

    let summary = engine
        .submit_replies("SN123", "ID=999&Return=0&CMD=DATA\n")
        .await;
    assert_eq!(summary.unknown, 1);
    assert_eq!(summary.applied, 0);
}

#[tokio::test]
async fn test_duplicate_reply_is_idempotent() {
    let (engine, _clock) = engine_with_clock();
    let mut replies = engine.subscribe_replies();

    let id = engine
        .enqueue_command("SN123", CmdType::Data, String::new(), None)
        .await;
    engine.poll("SN123", None).await;

    let body = format!("ID={}&Return=0&CMD=DATA\n", id);
    let first = engine.submit_replies("SN123", &body).await;
    assert_eq!(first.applied, 1);

    // The accepted reply is published exactly once
    let event = replies.recv().await.unwrap();
    assert_eq!(event.device_sn, "SN123");
    assert_eq!(event.record.id, id.to_string());

    // Replaying the same body changes nothing and emits nothing
    let second = engine.submit_replies("SN123", &body).await;
    assert_eq!(second.applied, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(
        engine.command_status("SN123", id).await,
        Some((CommandState::Acknowledged, Some(0)))
    );
    assert!(replies.try_recv().is_err());
}

#[tokio::test]
async fn test_unanswered_command_is_reoffered_then_abandoned() {
    let (engine, clock) = engine_with_clock();

    let id = engine
        .enqueue_command("SN123", CmdType::Data, String::new(), None)
        .await;

    // Default policy: 3 attempts, 90s re-offer window, 600s TTL
    for attempt in 1..=3 {
        let body = engine.poll("SN123", None).await;
        assert!(
            body.contains(&format!("ID={}", id)),
            "attempt {} should deliver the command",
            attempt
        );

        clock.advance(Duration::seconds(91));
        let stats = engine.sweep().await;
        if attempt < 3 {
            assert_eq!(stats.reoffered, 1);
            assert_eq!(
                engine.command_status("SN123", id).await,
                Some((CommandState::Created, None))
            );
        } else {
            assert_eq!(stats.abandoned, 1);
        }
    }

    assert_eq!(
        engine.command_status("SN123", id).await,
        Some((CommandState::Abandoned, None))
    );
    // Never re-offered after abandonment
    assert_eq!(engine.poll("SN123", None).await, "");
}

#[tokio::test]
async fn test_command_times_out_past_deadline() {
    let (engine, clock) = engine_with_clock();

    let id = engine
        .enqueue_command(
            "SN123",
            CmdType::Data,
            String::new(),
            Some(StdDuration::from_secs(60)),
        )
        .await;
    engine.poll("SN123", None).await;

    clock.advance(Duration::seconds(61));
    let stats = engine.sweep().await;
    assert_eq!(stats.timed_out, 1);
    assert_eq!(
        engine.command_status("SN123", id).await,
        Some((CommandState::TimedOut, None))
    );
}

#[tokio::test]
async fn test_single_shot_verb_is_never_retried() {
    let (engine, clock) = engine_with_clock();

    let id = engine
        .enqueue_command("SN123", CmdType::Reboot, String::new(), None)
        .await;
    engine.poll("SN123", None).await;

    clock.advance(Duration::seconds(91));
    let stats = engine.sweep().await;
    assert_eq!(stats.abandoned, 1);
    assert_eq!(
        engine.command_status("SN123", id).await,
        Some((CommandState::Abandoned, None))
    );
}

#[tokio::test]
async fn test_concurrent_enqueues_get_distinct_ids() {
    let (engine, _clock) = engine_with_clock();
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..100 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .enqueue_command("SN123", CmdType::Data, String::new(), None)
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }

    ids.sort_unstable();
    let expected: Vec<u64> = (1..=100).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_queues_are_isolated_per_device() {
    let (engine, _clock) = engine_with_clock();

    let a = engine
        .enqueue_command("SN-A", CmdType::Data, String::new(), None)
        .await;
    let b = engine
        .enqueue_command("SN-B", CmdType::Reboot, String::new(), None)
        .await;

    // Ids are scoped per device
    assert_eq!(a, 1);
    assert_eq!(b, 1);

    assert_eq!(engine.poll("SN-A", None).await, "ID=1\tCMD=DATA\n");
    assert_eq!(engine.poll("SN-B", None).await, "ID=1\tCMD=REBOOT\n");
}

#[tokio::test]
async fn test_snapshot_restore_round_trip() {
    let (engine, clock) = engine_with_clock();

    let id = engine
        .enqueue_command("SN123", CmdType::Check, String::new(), None)
        .await;
    let snapshot = engine.snapshot().await;

    let restored = DispatchEngine::new(DispatchOptions::default(), clock.clone());
    restored.restore(snapshot).await;

    assert_eq!(
        restored.command_status("SN123", id).await,
        Some((CommandState::Created, None))
    );
    assert_eq!(restored.poll("SN123", None).await, "ID=1\tCMD=CHECK\n");
}
