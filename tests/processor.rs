//! Processor integration tests
//!
//! Exercises the batching, locking, timeout, and cleanup behavior with a mock
//! completion API and a recording delivery sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use relaybot::{Message, MessageProcessor, Reply};

mod common;
use common::{MockApi, RecordingSink, test_config};

fn processor(
    config: relaybot::Config,
    api: &Arc<MockApi>,
    sink: &Arc<RecordingSink>,
) -> MessageProcessor {
    MessageProcessor::new(&config, Arc::clone(api) as _, Arc::clone(sink) as _)
}

/// Submit a user message whose sender doubles as the conversation key
fn submit(processor: &MessageProcessor, conversation: &str, text: &str) {
    processor.submit(conversation, Message::user(conversation, conversation, text));
}

#[tokio::test]
async fn full_batch_flushes_immediately_in_order() {
    let mut config = test_config();
    config.message_batch_size = 3;
    config.batch_debounce = Duration::from_secs(10);

    let api = MockApi::replying("ok");
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    let started = Instant::now();
    submit(&processor, "c1", "m1");
    submit(&processor, "c1", "m2");
    submit(&processor, "c1", "m3");

    assert!(sink.wait_for(1, Duration::from_secs(3)).await);
    // Size trigger fired; the 10s debounce never elapsed
    assert!(started.elapsed() < Duration::from_secs(3));

    let calls = api.recorded();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].key, "c1");
    let (role, content) = calls[0].messages.last().unwrap();
    assert_eq!(role, "user");
    assert_eq!(content, "c1: m1\nc1: m2\nc1: m3");
    assert_eq!(calls[0].messages[0].0, "system");
}

#[tokio::test]
async fn partial_batch_flushes_after_debounce() {
    let mut config = test_config();
    config.message_batch_size = 5;
    config.batch_debounce = Duration::from_millis(100);

    let api = MockApi::replying("ok");
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    submit(&processor, "c1", "m1");
    submit(&processor, "c1", "m2");

    assert!(sink.wait_for(1, Duration::from_secs(3)).await);

    let calls = api.recorded();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].messages.last().unwrap().1, "c1: m1\nc1: m2");

    let replies = sink.all();
    assert_eq!(replies[0].1, Reply::Text("ok".to_string()));
}

#[tokio::test]
async fn one_flush_at_a_time_per_conversation() {
    let mut config = test_config();
    config.message_batch_size = 1;
    config.batch_debounce = Duration::from_millis(10);

    let api = MockApi::replying_after("ok", Duration::from_millis(120));
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    for i in 0..4 {
        submit(&processor, "c1", &format!("m{i}"));
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    assert!(sink.wait_for(4, Duration::from_secs(5)).await);
    assert_eq!(api.total_calls(), 4);
    assert_eq!(api.peak_for("c1"), 1);
}

#[tokio::test]
async fn conversations_flush_concurrently() {
    let mut config = test_config();
    config.message_batch_size = 1;
    config.batch_debounce = Duration::from_millis(10);

    let api = MockApi::replying_after("ok", Duration::from_millis(300));
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    submit(&processor, "c1", "hello");
    submit(&processor, "c2", "hello");

    assert!(sink.wait_for(2, Duration::from_secs(5)).await);
    assert!(api.global_peak() >= 2);
    assert_eq!(api.peak_for("c1"), 1);
    assert_eq!(api.peak_for("c2"), 1);
}

#[tokio::test]
async fn context_stays_within_bound() {
    let mut config = test_config();
    config.message_batch_size = 1;
    config.batch_debounce = Duration::from_millis(10);
    config.max_context_messages = 4;

    let api = MockApi::replying("ok");
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    for i in 0..6 {
        submit(&processor, "c1", &format!("m{i}"));
        assert!(sink.wait_for(i + 1, Duration::from_secs(3)).await);
    }

    // system prompt + bounded history + merged turn
    for call in api.recorded() {
        assert!(call.messages.len() <= 1 + 4 + 1);
    }
    assert_eq!(api.recorded().last().unwrap().messages.len(), 6);
}

#[tokio::test]
async fn clear_drops_pending_batch() {
    let mut config = test_config();
    config.message_batch_size = 5;
    config.batch_debounce = Duration::from_millis(300);

    let api = MockApi::replying("ok");
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    submit(&processor, "c1", "dropped-1");
    submit(&processor, "c1", "dropped-2");
    assert!(processor.clear("c1"));
    assert!(!processor.clear("c1"));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(api.total_calls(), 0);
    assert_eq!(sink.count(), 0);

    submit(&processor, "c1", "after");
    assert!(sink.wait_for(1, Duration::from_secs(3)).await);

    let calls = api.recorded();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].messages.last().unwrap().1, "c1: after");
}

#[tokio::test]
async fn timeout_delivers_error_and_releases_lock() {
    let mut config = test_config();
    config.message_batch_size = 1;
    config.batch_debounce = Duration::from_millis(10);
    config.processing_timeout = Duration::from_millis(150);

    let api = MockApi::slow_first(Duration::from_secs(10));
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    let started = Instant::now();
    submit(&processor, "c1", "m1");
    assert!(sink.wait_for(1, Duration::from_secs(3)).await);
    // Delivered at the timeout, not after the mock's 10s sleep
    assert!(started.elapsed() < Duration::from_secs(2));

    let replies = sink.all();
    assert!(matches!(&replies[0].1, Reply::Error(text) if text.contains("too long")));

    // Lock released: a new submit flushes successfully
    submit(&processor, "c1", "m2");
    assert!(sink.wait_for(2, Duration::from_secs(3)).await);
    assert_eq!(sink.all()[1].1, Reply::Text("recovered".to_string()));

    // The timed-out turn stayed in context; no assistant reply was recorded
    let roles: Vec<String> = api.recorded()[1]
        .messages
        .iter()
        .map(|(role, _)| role.clone())
        .collect();
    assert_eq!(roles, ["system", "user", "user"]);
}

#[tokio::test]
async fn api_failure_keeps_user_turn_without_retry() {
    let mut config = test_config();
    config.message_batch_size = 1;
    config.batch_debounce = Duration::from_millis(10);

    let api = MockApi::failing();
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    submit(&processor, "c1", "m1");
    assert!(sink.wait_for(1, Duration::from_secs(3)).await);
    assert!(matches!(&sink.all()[0].1, Reply::Error(text) if text.contains("trouble")));

    // Fail-fast: no automatic retry
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(api.total_calls(), 1);

    submit(&processor, "c1", "m2");
    assert!(sink.wait_for(2, Duration::from_secs(3)).await);

    let roles: Vec<String> = api.recorded()[1]
        .messages
        .iter()
        .map(|(role, _)| role.clone())
        .collect();
    assert_eq!(roles, ["system", "user", "user"]);
}

#[tokio::test]
async fn cleanup_evicts_idle_conversations_only() {
    let mut config = test_config();
    config.message_batch_size = 1;
    config.batch_debounce = Duration::from_millis(10);
    config.context_idle_ttl = Duration::from_millis(80);

    let api = MockApi::replying("ok");
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    submit(&processor, "idle", "hello");
    assert!(sink.wait_for(1, Duration::from_secs(3)).await);
    assert_eq!(processor.status().active_conversations, 1);

    tokio::time::sleep(Duration::from_millis(160)).await;
    submit(&processor, "fresh", "hello");
    assert!(sink.wait_for(2, Duration::from_secs(3)).await);

    processor.cleanup_idle();
    assert_eq!(processor.status().active_conversations, 1);
}

#[tokio::test]
async fn cleanup_skips_conversation_mid_flush() {
    let mut config = test_config();
    config.message_batch_size = 1;
    config.batch_debounce = Duration::from_millis(10);
    config.context_idle_ttl = Duration::from_millis(20);

    let api = MockApi::replying_after("ok", Duration::from_millis(400));
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    submit(&processor, "c1", "hello");
    tokio::time::sleep(Duration::from_millis(120)).await;

    // Flush is in-flight and the context is past the TTL; it must survive
    processor.cleanup_idle();
    assert_eq!(processor.status().active_conversations, 1);

    assert!(sink.wait_for(1, Duration::from_secs(3)).await);
    assert_eq!(sink.all()[0].1, Reply::Text("ok".to_string()));

    tokio::time::sleep(Duration::from_millis(60)).await;
    processor.cleanup_idle();
    assert_eq!(processor.status().active_conversations, 0);
}

#[tokio::test]
async fn outbound_calls_are_rate_limited_globally() {
    let mut config = test_config();
    config.message_batch_size = 1;
    config.batch_debounce = Duration::from_millis(10);
    config.rate_limit_delay = Duration::from_millis(120);

    let api = MockApi::replying("ok");
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    submit(&processor, "c1", "hello");
    submit(&processor, "c2", "hello");

    assert!(sink.wait_for(2, Duration::from_secs(5)).await);

    let times = api.call_times();
    assert_eq!(times.len(), 2);
    let spacing = times[1].duration_since(times[0]);
    assert!(spacing >= Duration::from_millis(100), "spacing was {spacing:?}");
}

#[tokio::test]
async fn status_reports_uptime_and_active_conversations() {
    let config = test_config();
    let api = MockApi::replying("ok");
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    submit(&processor, "c1", "hello");
    assert!(sink.wait_for(1, Duration::from_secs(3)).await);

    let status = processor.status();
    assert_eq!(status.active_conversations, 1);
    assert!(status.uptime > Duration::ZERO);
}

#[tokio::test]
async fn long_responses_are_truncated_before_delivery() {
    let mut config = test_config();
    config.message_batch_size = 1;
    config.batch_debounce = Duration::from_millis(10);
    config.max_response_length = 16;

    let api = MockApi::replying(&"x".repeat(100));
    let sink = RecordingSink::new();
    let processor = processor(config, &api, &sink);

    submit(&processor, "c1", "hello");
    assert!(sink.wait_for(1, Duration::from_secs(3)).await);

    let replies = sink.all();
    let Reply::Text(text) = &replies[0].1 else {
        panic!("expected a text reply");
    };
    assert_eq!(text.chars().count(), 16);
    assert!(text.ends_with("..."));
}
