mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{
    CallLog, build_runtime, build_runtime_with, drain_texts, recording_endpoint, recv_text,
    uppercase_endpoint,
};
use socket_runtime::{
    BackpressureMode, CloseCode, CloseReason, EndpointBuilder, EventKind, ExecutionMode,
    InvocationOutcome, Message, Reply, RuntimeConfig, RuntimeError,
};
use tokio_test::{assert_err, assert_ok};

fn basic_config_toml() -> &'static str {
    r#"
bind_addr = "0.0.0.0:9000"
send_queue_capacity = 4
concurrent_limit = 8

[backpressure]
policy = "drop"
max_drops = 2
"#
}

#[test]
fn test_config_parsing() {
    let config = assert_ok!(RuntimeConfig::from_str(basic_config_toml()));

    assert_eq!(config.bind_addr, "0.0.0.0:9000");
    assert_eq!(config.send_queue_capacity, 4);
    assert_eq!(config.concurrent_limit, 8);
    assert_eq!(config.inbound_queue_capacity, 256);
    assert_eq!(config.backpressure.mode, BackpressureMode::Drop);
    assert_eq!(config.backpressure.max_drops, 2);
}

#[tokio::test]
async fn test_broadcast_reaches_every_group_member() {
    let runtime = build_runtime(vec![uppercase_endpoint()]);
    let c1 = runtime.accept("/up/1").await.expect("accept c1");
    let c2 = runtime.accept("/up/2").await.expect("accept c2");
    let mut rx1 = c1.take_outbound().expect("rx1");
    let mut rx2 = c2.take_outbound().expect("rx2");

    let outcome = runtime
        .on_frame(&c1, Message::text("hello"))
        .expect("frame accepted")
        .outcome()
        .await;

    assert_eq!(outcome, InvocationOutcome::Completed);
    assert_eq!(recv_text(&mut rx1).await, "1:HELLO");
    assert_eq!(recv_text(&mut rx2).await, "1:HELLO");
}

#[tokio::test]
async fn test_serial_endpoint_preserves_order() {
    let log = CallLog::default();
    let runtime = build_runtime(vec![recording_endpoint(
        "/serial",
        ExecutionMode::Serial,
        log.clone(),
    )]);
    let connection = runtime.accept("/serial").await.expect("accept");
    let mut rx = connection.take_outbound().expect("rx");

    let invocations: Vec<_> = (0..20)
        .map(|i| {
            runtime
                .on_frame(&connection, Message::text(i.to_string()))
                .expect("frame accepted")
        })
        .collect();
    for invocation in invocations {
        assert!(invocation.outcome().await.is_completed());
    }

    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(log.entries(), expected);
    assert_eq!(drain_texts(&mut rx), expected);
}

#[tokio::test]
async fn test_concurrent_endpoint_completes_every_frame() {
    let log = CallLog::default();
    let runtime = build_runtime(vec![recording_endpoint(
        "/parallel",
        ExecutionMode::Concurrent,
        log.clone(),
    )]);
    let connection = runtime.accept("/parallel").await.expect("accept");
    let mut rx = connection.take_outbound().expect("rx");

    let invocations: Vec<_> = (0..20)
        .map(|i| {
            runtime
                .on_frame(&connection, Message::text(i.to_string()))
                .expect("frame accepted")
        })
        .collect();
    for invocation in invocations {
        assert!(invocation.outcome().await.is_completed());
    }

    let expected: BTreeSet<String> = (0..20).map(|i| i.to_string()).collect();
    let seen: BTreeSet<String> = log.entries().into_iter().collect();
    let delivered: BTreeSet<String> = drain_texts(&mut rx).into_iter().collect();
    assert_eq!(seen, expected);
    assert_eq!(delivered, expected);
}

#[tokio::test]
async fn test_remove_during_broadcast_is_safe() {
    let runtime = build_runtime(vec![uppercase_endpoint()]);
    let c1 = runtime.accept("/up/1").await.expect("accept c1");
    let c2 = runtime.accept("/up/2").await.expect("accept c2");
    let mut rx1 = c1.take_outbound().expect("rx1");
    let mut rx2 = c2.take_outbound().expect("rx2");

    let sent = Arc::new(AtomicUsize::new(0));
    let broadcaster = Arc::clone(runtime.broadcaster());
    let source = Arc::clone(&c1);
    let sent_in_task = Arc::clone(&sent);
    let sender = tokio::spawn(async move {
        for i in 0..50 {
            broadcaster.broadcast(&source, Message::text(i.to_string())).await;
            sent_in_task.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
        }
    });
    let reader = tokio::spawn(async move {
        let mut received = 0;
        while received < 50 {
            if rx1.recv().await.is_none() {
                break;
            }
            received += 1;
        }
        received
    });

    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    runtime.on_disconnect(&c2).await;
    let sent_before_close = sent.load(Ordering::SeqCst);

    sender.await.expect("broadcast task should finish");
    assert_eq!(reader.await.expect("reader task should finish"), 50);
    assert!(!c2.is_open());
    assert_eq!(runtime.registry().len(), 1);

    let indices: Vec<usize> = drain_texts(&mut rx2)
        .iter()
        .map(|text| text.parse().expect("payload index"))
        .collect();
    assert!(indices.len() <= sent_before_close);
    assert!(indices.iter().all(|&index| index < sent_before_close));
    assert!(sent_before_close < 50);

    let report = runtime
        .broadcaster()
        .broadcast(&c1, Message::text("after"))
        .await;
    assert_eq!(report.recipients, 1);
    assert!(drain_texts(&mut rx2).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_racing_frames_leaves_no_serial_lanes() {
    let runtime = build_runtime(vec![uppercase_endpoint()]);

    for i in 0..300 {
        let connection = runtime.accept(&format!("/up/{i}")).await.expect("accept");
        let _rx = connection.take_outbound().expect("rx");
        let frames = {
            let runtime = Arc::clone(&runtime);
            let connection = Arc::clone(&connection);
            tokio::spawn(async move {
                for n in 0..20 {
                    let _ = runtime.on_frame(&connection, Message::text(n.to_string()));
                    tokio::task::yield_now().await;
                }
            })
        };
        runtime.on_disconnect(&connection).await;
        frames.await.expect("frame task should finish");
    }

    for _ in 0..200 {
        if runtime.dispatcher().lane_count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(runtime.registry().len(), 0);
    assert_eq!(runtime.dispatcher().lane_count(), 0);
}

#[test]
fn test_duplicate_on_open_is_rejected() {
    let err = assert_err!(
        EndpointBuilder::new("/dup")
            .on_open(false, |_ctx| async { Ok(Reply::Empty) })
            .on_open(true, |_ctx| async { Ok(Reply::Empty) })
            .build()
    );

    match err {
        RuntimeError::DuplicateHandler { path, kind } => {
            assert_eq!(path, "/dup");
            assert_eq!(kind, EventKind::Open);
        }
        other => panic!("expected DuplicateHandler, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    let runtime = build_runtime(vec![uppercase_endpoint().on_close(move |_ctx| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })]);
    let c1 = runtime.accept("/up/1").await.expect("accept c1");
    let c2 = runtime.accept("/up/2").await.expect("accept c2");

    runtime.on_disconnect(&c1).await;
    runtime.on_disconnect(&c1).await;
    runtime
        .on_disconnect_with(&c1, CloseReason::going_away())
        .await;

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(c1.close_reason(), Some(CloseReason::normal()));
    assert_eq!(runtime.registry().len(), 1);
    let key = c2.group_key().expect("group key");
    assert_eq!(runtime.registry().group_len(key), 1);
}

#[tokio::test]
async fn test_handler_failure_closes_only_offending_connection() {
    let runtime = build_runtime(vec![EndpointBuilder::new("/strict/{id}").on_message(
        false,
        |_ctx, msg| async move {
            if msg.as_text() == Some("bad") {
                anyhow::bail!("bad input");
            }
            Ok(Reply::Single(msg))
        },
    )]);
    let c1 = runtime.accept("/strict/1").await.expect("accept c1");
    let c2 = runtime.accept("/strict/2").await.expect("accept c2");
    let mut rx2 = c2.take_outbound().expect("rx2");

    let outcome = runtime
        .on_frame(&c1, Message::text("bad"))
        .expect("frame accepted")
        .outcome()
        .await;
    assert!(matches!(outcome, InvocationOutcome::Failed(_)));
    assert_eq!(
        c1.close_reason().map(|reason| reason.code),
        Some(CloseCode::INTERNAL_ERROR)
    );

    let outcome = runtime
        .on_frame(&c2, Message::text("good"))
        .expect("frame accepted")
        .outcome()
        .await;
    assert!(outcome.is_completed());
    assert_eq!(recv_text(&mut rx2).await, "good");
}

#[tokio::test]
async fn test_slow_consumer_is_disconnected_under_drop_policy() {
    let config = RuntimeConfig::from_str(
        r#"
send_queue_capacity = 1

[backpressure]
policy = "drop"
max_drops = 1
"#,
    )
    .expect("config should parse");
    let runtime = build_runtime_with(config, vec![uppercase_endpoint()]);
    let fast = runtime.accept("/up/fast").await.expect("accept fast");
    let slow = runtime.accept("/up/slow").await.expect("accept slow");
    let mut fast_rx = fast.take_outbound().expect("fast rx");
    let _slow_rx = slow.take_outbound().expect("slow rx");

    for text in ["a", "b"] {
        runtime
            .on_frame(&fast, Message::text(text))
            .expect("frame accepted")
            .outcome()
            .await;
        assert_eq!(
            recv_text(&mut fast_rx).await,
            format!("fast:{}", text.to_uppercase())
        );
    }

    assert_eq!(
        slow.close_reason().map(|reason| reason.code),
        Some(CloseCode::POLICY_VIOLATION)
    );
    assert!(fast.is_open());
    assert_eq!(runtime.broadcaster().stats().forced_closes, 1);
}
