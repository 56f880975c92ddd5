// tests/integration/send_test.rs

//! Integration tests for sending
//! Tests: send_once, keep_send, stop_send, write failures, writes racing a close

use super::test_helpers::*;
use std::time::Duration;
use tcpbridge::core::scheduler::SendMode;
use tcpbridge::{EngineError, Event};
use tokio::time::Instant;

fn close_events(events: &[Event], id: u64) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::State(s) if s.connection_id == id && !s.connected))
        .count()
}

// ===== send_once =====

#[tokio::test]
async fn test_send_once_is_echoed_back() {
    let server = echo_server().await;
    let mut ctx = TestContext::new();
    let id = ctx.connect(server.addr).await;

    let result = ctx.engine.send_once(id, "ping").await.unwrap();
    assert_eq!(result.id, id);
    assert!(result.success);
    assert_eq!(result.message, "");

    let echoed = ctx.collect_data(id, 4).await;
    assert_eq!(echoed, b"ping");
}

#[tokio::test]
async fn test_send_once_writes_utf8_bytes() {
    let server = echo_server().await;
    let mut ctx = TestContext::new();
    let id = ctx.connect(server.addr).await;

    let payload = "grüße 👋";
    assert!(ctx.engine.send_once(id, payload).await.unwrap().success);

    let echoed = ctx.collect_data(id, payload.len()).await;
    assert_eq!(String::from_utf8(echoed).unwrap(), payload);
}

#[tokio::test]
async fn test_send_once_unknown_id_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx.engine.send_once(7, "ping").await.unwrap_err();
    assert_eq!(err, EngineError::NotFound(7));
}

#[tokio::test]
async fn test_sequential_sends_arrive_in_order() {
    let server = recording_server().await;
    let mut ctx = TestContext::new();
    let id = ctx.connect(server.addr).await;

    for i in 0..20 {
        let result = ctx.engine.send_once(id, &format!("{i},")).await.unwrap();
        assert!(result.success);
    }

    let expected: String = (0..20).map(|i| format!("{i},")).collect();
    assert!(wait_until(|| server.received_len() >= expected.len()).await);
    assert_eq!(server.received_text(), expected);
}

// ===== keep_send =====

#[tokio::test]
async fn test_keep_send_repeats_until_stopped() {
    let server = recording_server().await;
    let mut ctx = TestContext::new();
    let id = ctx.connect(server.addr).await;

    ctx.engine.keep_send(id, "hb", None).await.unwrap();
    assert!(wait_until(|| server.received_len() >= 3 * 2).await);

    ctx.engine.stop_send(id).await.unwrap();
    tokio::time::sleep(TEST_INTERVAL).await;
    let after_stop = server.received_len();
    tokio::time::sleep(TEST_INTERVAL * 4).await;
    assert_eq!(server.received_len(), after_stop);
    assert!(server.received_text().chars().all(|c| c == 'h' || c == 'b'));
}

#[tokio::test]
async fn test_keep_send_with_duration_stops_on_its_own() {
    let server = recording_server().await;
    let mut ctx = TestContext::new();
    let id = ctx.connect(server.addr).await;

    let duration = Duration::from_millis(500);
    ctx.engine.keep_send(id, "hb", Some(duration)).await.unwrap();

    tokio::time::sleep(duration + TEST_INTERVAL * 3).await;
    let writes = server.received_len() / 2;
    assert!(writes >= 1);
    // One immediate write plus at most one per interval.
    let max_writes = (duration.as_millis() / TEST_INTERVAL.as_millis()) as usize + 1;
    assert!(writes <= max_writes, "{} writes, expected at most {}", writes, max_writes);

    let settled = server.received_len();
    tokio::time::sleep(TEST_INTERVAL * 4).await;
    assert_eq!(server.received_len(), settled);

    // The task ended silently; the connection is still usable.
    let infos = ctx.engine.connections().await;
    assert!(!infos[0].keep_sending);
    assert!(ctx.engine.send_once(id, "x").await.unwrap().success);
}

#[tokio::test]
async fn test_keep_send_with_zero_duration_writes_once() {
    let server = recording_server().await;
    let mut ctx = TestContext::new();
    let id = ctx.connect(server.addr).await;

    ctx.engine
        .keep_send(id, "once", Some(Duration::ZERO))
        .await
        .unwrap();

    assert!(wait_until(|| server.received_len() >= 4).await);
    tokio::time::sleep(TEST_INTERVAL * 4).await;
    assert_eq!(server.received_text(), "once");

    // The single write ends the task without waiting for a tick.
    let infos = ctx.engine.connections().await;
    assert!(!infos[0].keep_sending);
}

#[tokio::test]
async fn test_send_mode_for_duration() {
    let now = Instant::now();
    assert_eq!(SendMode::for_duration(Some(Duration::ZERO), now), SendMode::OneShot);
    assert_eq!(SendMode::for_duration(None, now), SendMode::Repeating(None));
    assert_eq!(
        SendMode::for_duration(Some(Duration::from_secs(2)), now),
        SendMode::Repeating(Some(now + Duration::from_secs(2)))
    );
}

#[tokio::test]
async fn test_second_keep_send_replaces_the_first() {
    let server = recording_server().await;
    let mut ctx = TestContext::new();
    let id = ctx.connect(server.addr).await;

    ctx.engine.keep_send(id, "a", None).await.unwrap();
    assert!(wait_until(|| server.received_len() >= 1).await);
    ctx.engine.keep_send(id, "b", None).await.unwrap();

    assert!(wait_until(|| server.received_text().matches('b').count() >= 3).await);

    // Once the replacement starts writing, the old task never writes again.
    let text = server.received_text();
    let first_b = text.find('b').unwrap();
    assert!(text[..first_b].chars().all(|c| c == 'a'));
    assert!(text[first_b..].chars().all(|c| c == 'b'), "old task still writing: {}", text);

    let infos = ctx.engine.connections().await;
    assert_eq!(infos.len(), 1);
    assert!(infos[0].keep_sending);
}

#[tokio::test]
async fn test_keep_send_unknown_id_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx.engine.keep_send(3, "hb", None).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_keep_send_stops_when_connection_closes() {
    let server = recording_server().await;
    let mut ctx = TestContext::new();
    let id = ctx.connect(server.addr).await;

    ctx.engine.keep_send(id, "hb", None).await.unwrap();
    assert!(wait_until(|| server.received_len() >= 2).await);

    ctx.engine.disconnect(id).await.unwrap();
    // Let bytes already on the wire land before sampling.
    tokio::time::sleep(TEST_INTERVAL).await;
    let after_close = server.received_len();
    tokio::time::sleep(TEST_INTERVAL * 4).await;
    assert_eq!(server.received_len(), after_close);
}

// ===== stop_send =====

#[tokio::test]
async fn test_stop_send_is_idempotent() {
    let server = recording_server().await;
    let mut ctx = TestContext::new();
    let id = ctx.connect(server.addr).await;

    // No task yet.
    ctx.engine.stop_send(id).await.unwrap();

    ctx.engine.keep_send(id, "hb", None).await.unwrap();
    ctx.engine.stop_send(id).await.unwrap();
    ctx.engine.stop_send(id).await.unwrap();

    let infos = ctx.engine.connections().await;
    assert!(!infos[0].keep_sending);
    assert!(ctx.engine.registry().contains(id));
}

#[tokio::test]
async fn test_stop_send_unknown_id_is_a_no_op() {
    let ctx = TestContext::new();
    assert!(ctx.engine.stop_send(99).await.is_ok());
}

// ===== write failures =====

#[tokio::test]
async fn test_send_once_timeout_closes_the_connection() {
    let server = stalling_server(Duration::from_secs(30)).await;
    let mut config = test_engine_config();
    config.send_timeout = Duration::from_millis(200);
    let mut ctx = TestContext::with_config(config);
    let id = ctx.connect(server.addr).await;

    let result = ctx.engine.send_once(id, &oversized_payload()).await.unwrap();
    assert!(!result.success);
    assert!(result.message.contains("timed out"), "{}", result.message);

    let event = ctx.next_state(id).await;
    assert!(!event.connected);
    assert!(event.data.contains("write to"), "{}", event.data);
    assert!(event.data.contains("timed out"), "{}", event.data);
    assert!(!ctx.engine.registry().contains(id));

    let trailing = ctx.drain_for(Duration::from_millis(200)).await;
    assert_eq!(close_events(&trailing, id), 0);
    assert!(ctx.engine.send_once(id, "x").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_keep_send_write_failure_closes_the_connection() {
    let server = stalling_server(Duration::from_secs(30)).await;
    let mut config = test_engine_config();
    config.send_timeout = Duration::from_millis(200);
    let mut ctx = TestContext::with_config(config);
    let id = ctx.connect(server.addr).await;

    ctx.engine
        .keep_send(id, &oversized_payload(), None)
        .await
        .unwrap();

    let event = ctx.next_state(id).await;
    assert!(!event.connected);
    assert!(event.data.contains("write to"), "{}", event.data);
    assert!(!ctx.engine.registry().contains(id));

    let trailing = ctx.drain_for(Duration::from_millis(200)).await;
    assert_eq!(close_events(&trailing, id), 0);
    assert!(ctx.engine.connections().await.is_empty());
    assert!(ctx.engine.stop_send(id).await.is_ok());
    assert!(ctx.engine.keep_send(id, "hb", None).await.unwrap_err().is_not_found());
}

// ===== writes racing a close =====

#[tokio::test]
async fn test_disconnect_abandons_blocked_and_queued_writes() {
    let server = stalling_server(Duration::from_secs(1)).await;
    let mut config = test_engine_config();
    config.send_timeout = Duration::from_secs(5);
    config.close_grace = Duration::from_millis(100);
    let mut ctx = TestContext::with_config(config);
    let id = ctx.connect(server.addr).await;

    // The first write fills the socket buffers and holds the writer lock;
    // the second queues behind it.
    let engine = ctx.engine.clone();
    let blocked = tokio::spawn(async move { engine.send_once(id, &oversized_payload()).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    let engine = ctx.engine.clone();
    let queued = tokio::spawn(async move { engine.send_once(id, "late").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    ctx.engine.disconnect(id).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "disconnect took {:?}",
        started.elapsed()
    );
    assert!(!ctx.engine.registry().contains(id));

    let blocked = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("blocked write outlived the connection")
        .unwrap()
        .unwrap();
    assert!(!blocked.success);
    let queued = tokio::time::timeout(Duration::from_secs(1), queued)
        .await
        .expect("queued write outlived the connection")
        .unwrap();
    match queued {
        Ok(result) => assert!(!result.success),
        Err(e) => assert!(e.is_not_found()),
    }

    let events = ctx.drain_for(Duration::from_millis(200)).await;
    assert_eq!(close_events(&events, id), 1);

    // Once the server reads again it sees the partial first payload, then end
    // of stream; the queued write never reached the socket.
    assert!(wait_until(|| server.finished() == 1).await);
    let text = server.received_text();
    assert!(!text.contains("late"));
    assert!(text.len() < 64 << 20);
}

#[tokio::test]
async fn test_disconnect_with_zero_grace_during_blocked_write() {
    let server = stalling_server(Duration::from_secs(30)).await;
    let mut config = test_engine_config();
    config.send_timeout = Duration::from_secs(5);
    config.close_grace = Duration::ZERO;
    let mut ctx = TestContext::with_config(config);
    let id = ctx.connect(server.addr).await;

    let engine = ctx.engine.clone();
    let blocked = tokio::spawn(async move { engine.send_once(id, &oversized_payload()).await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    // No grace at all: the receive loop is aborted and the close completes
    // from the caller's side.
    let started = Instant::now();
    ctx.engine.disconnect(id).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!ctx.engine.registry().contains(id));

    let blocked = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("blocked write outlived the connection")
        .unwrap()
        .unwrap();
    assert!(!blocked.success);

    let events = ctx.drain_for(Duration::from_millis(300)).await;
    assert_eq!(close_events(&events, id), 1);
    assert_eq!(ctx.engine.connection_count(), 0);
}
