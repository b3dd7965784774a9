// tests/integration/timeout_test.rs

use super::test_helpers::{
    RecordingCallbacks, ScriptedClient, args, bulk, failure_kind, success, test_spec,
};
use spinel_bridge::ConnectionSpec;
use spinel_bridge::core::commands::RequestType;
use spinel_bridge::core::delivery::{Completions, DeliveryPool};
use spinel_bridge::core::connection::Lifecycle;
use spinel_bridge::core::pending::{PendingEntry, PendingTable};
use spinel_bridge::core::protocol::RespFrame;
use spinel_bridge::core::tasks::timeout_watchdog::TimeoutWatchdog;
use spinel_bridge::ErrorKind;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::time::Instant;

fn spec_with_timeout(timeout: Duration) -> ConnectionSpec {
    ConnectionSpec {
        request_timeout: timeout,
        ..test_spec()
    }
}

#[test]
fn test_unanswered_request_times_out() {
    let ctx = ScriptedClient::with_spec(spec_with_timeout(Duration::from_millis(50)));

    ctx.client
        .submit(1, RequestType::GetString, args(&["k"]))
        .unwrap();

    let delivered = ctx.callbacks.wait_for(1);
    assert_eq!(delivered.len(), 1);
    assert_eq!(failure_kind(&delivered[0].outcome), Some(ErrorKind::Timeout));
    assert_eq!(ctx.client.pending_requests(), 0);
}

#[test]
fn test_late_reply_after_timeout_is_discarded() {
    let ctx = ScriptedClient::with_spec(spec_with_timeout(Duration::from_millis(50)));

    ctx.client
        .submit(1, RequestType::GetString, args(&["k"]))
        .unwrap();
    ctx.link.wait_for_requests(1);
    ctx.callbacks.wait_for(1);

    ctx.link.reply(1, RespFrame::BulkString(bulk("late")));
    thread::sleep(Duration::from_millis(100));

    let delivered = ctx.callbacks.deliveries();
    assert_eq!(delivered.len(), 1);
    assert_eq!(failure_kind(&delivered[0].outcome), Some(ErrorKind::Timeout));
}

#[test]
fn test_stale_reply_cannot_complete_a_reused_token() {
    let ctx = ScriptedClient::with_spec(spec_with_timeout(Duration::from_millis(200)));

    ctx.client
        .submit(5, RequestType::GetString, args(&["k"]))
        .unwrap();
    let first = ctx.link.wait_for_requests(1)[0].clone();
    ctx.callbacks.wait_for(1);

    // Reuse the token after its timeout, then let the first reply arrive.
    ctx.client
        .submit(5, RequestType::GetString, args(&["k"]))
        .unwrap();
    let second = ctx.link.wait_for_requests(2)[1].clone();
    assert_ne!(first.request_id, second.request_id);

    ctx.link
        .reply_to(&first, RespFrame::BulkString(bulk("old")));
    ctx.link
        .reply_to(&second, RespFrame::BulkString(bulk("new")));

    let delivered = ctx.callbacks.wait_for(2);
    assert_eq!(delivered.len(), 2);
    assert_eq!(failure_kind(&delivered[0].outcome), Some(ErrorKind::Timeout));
    assert_eq!(delivered[1].outcome, success("new"));
}

#[test]
fn test_zero_request_timeout_disables_the_deadline() {
    let ctx = ScriptedClient::with_spec(spec_with_timeout(Duration::ZERO));

    ctx.client.submit(1, RequestType::Ping, vec![]).unwrap();
    ctx.link.wait_for_requests(1);
    thread::sleep(Duration::from_millis(300));
    assert!(ctx.callbacks.deliveries().is_empty());

    ctx.link
        .reply(1, RespFrame::SimpleString("PONG".to_string()));
    ctx.callbacks.wait_for(1);
    assert_eq!(ctx.callbacks.outcome_for(1), Some(success("PONG")));
}

fn entry(request_id: u64, deadline: Option<Instant>) -> PendingEntry {
    PendingEntry {
        request_id,
        kind: RequestType::Ping,
        submitted_at: Instant::now(),
        deadline,
    }
}

#[test]
fn test_watchdog_sweep_fails_only_expired_entries() {
    let callbacks = RecordingCallbacks::new();
    let pool = Arc::new(DeliveryPool::start(1, callbacks.clone()).unwrap());
    let table = Arc::new(PendingTable::new());
    let completions = Arc::new(Completions::new(
        Arc::clone(&table),
        Arc::clone(&pool),
        Arc::new(Lifecycle::new()),
    ));

    let now = Instant::now();
    table
        .register(1, entry(1, Some(now - Duration::from_millis(1))))
        .unwrap();
    table
        .register(2, entry(2, Some(now + Duration::from_secs(60))))
        .unwrap();
    table.register(3, entry(3, None)).unwrap();

    let watchdog = TimeoutWatchdog::new(completions, Duration::from_millis(250));
    assert_eq!(watchdog.period(), Duration::from_millis(25));
    assert_eq!(watchdog.sweep(now), 1);
    assert_eq!(watchdog.sweep(now), 0);

    pool.shutdown();
    let delivered = callbacks.deliveries();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].token, 1);
    assert_eq!(failure_kind(&delivered[0].outcome), Some(ErrorKind::Timeout));
    assert_eq!(table.len(), 2);
}

#[test]
fn test_watchdog_period_is_clamped() {
    let callbacks = RecordingCallbacks::new();
    let pool = Arc::new(DeliveryPool::start(1, callbacks).unwrap());
    let completions = Arc::new(Completions::new(
        Arc::new(PendingTable::new()),
        Arc::clone(&pool),
        Arc::new(Lifecycle::new()),
    ));

    let fast = TimeoutWatchdog::new(Arc::clone(&completions), Duration::from_millis(1));
    assert_eq!(fast.period(), Duration::from_millis(5));
    let slow = TimeoutWatchdog::new(completions, Duration::from_secs(30));
    assert_eq!(slow.period(), Duration::from_millis(100));
    pool.shutdown();
}
