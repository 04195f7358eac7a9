//! Message routing: bot answering, human handoff, channels and bulk intake

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use switchboard_routing_engine::config::ChannelPriority;
use switchboard_routing_engine::prelude::*;
use switchboard_routing_engine::routing::message_router::{REASON_BOT_RESPONSE_FAILED, REASON_LOW_CONFIDENCE};
use switchboard_routing_engine::work::MessageStatus;

use common::*;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    engine: RoutingEngine,
    transport: Arc<RecordingTransport>,
    bot: Arc<EchoBot>,
}

fn harness(config: RoutingConfig, transport: Arc<RecordingTransport>, intents: Arc<FixedIntent>, bot: Arc<EchoBot>) -> Harness {
    let engine = RoutingEngine::new(
        config,
        collaborators(ScriptedConnector::succeeding(), transport.clone(), intents, bot.clone()),
    )
    .expect("valid config");
    Harness { engine, transport, bot }
}

fn no_bot_config() -> RoutingConfig {
    let mut config = fast_config();
    config.messaging.bot.enabled = false;
    config
}

fn chat_agent(id: &str, max_load: u32) -> Agent {
    agent(id, max_load).with_skills(["web_chat"])
}

#[tokio::test]
#[serial]
async fn test_confident_intent_is_answered_by_bot() {
    let h = harness(fast_config(), RecordingTransport::new(), FixedIntent::confident(0.9), EchoBot::working());
    h.engine.update_agent_pool(vec![chat_agent("a1", 3)]);
    let mut events = h.engine.subscribe();

    let message = Message::new(ChannelKind::WebChat, Customer::new("c"), "Where is my invoice?");
    let message_id = message.id.clone();

    let admission = h.engine.message_router().route(message).await.unwrap();
    assert_eq!(
        admission,
        Admission::BotHandled {
            intent: "billing_question".to_string(),
            confidence: 0.9
        }
    );

    let completed = wait_for(&mut events, WAIT, |e| matches!(e, RoutingEvent::Completed { .. })).await;
    match completed.as_ref() {
        RoutingEvent::Completed { item_id, agent_id, .. } => {
            assert_eq!(*item_id, message_id);
            assert!(agent_id.is_none());
        }
        other => panic!("unexpected event {other:?}"),
    }

    assert_eq!(load_of(&h.engine, "a1"), 0);
    assert!(h.transport.delivered().is_empty());
    assert_eq!(h.transport.responses().len(), 1);
    assert!(h.engine.message_router().active_message(&message_id).is_none());

    let stats = h.engine.message_router().stats();
    assert_eq!(stats.bot_handled, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
#[serial]
async fn test_bot_failure_hands_off_to_human() {
    let h = harness(fast_config(), RecordingTransport::new(), FixedIntent::confident(0.9), EchoBot::broken());
    h.engine.update_agent_pool(vec![chat_agent("a1", 3)]);
    let mut events = h.engine.subscribe();

    let message = Message::new(ChannelKind::WebChat, Customer::new("c"), "help").with_priority(1);
    let message_id = message.id.clone();

    let admission = h.engine.message_router().route(message).await.unwrap();
    assert!(matches!(admission, Admission::Assigned { ref agent_id, .. } if agent_id.as_str() == "a1"));

    let active = h.engine.message_router().active_message(&message_id).unwrap();
    assert_eq!(active.priority, 5);
    assert_eq!(active.handoff_reason(), Some(REASON_BOT_RESPONSE_FAILED));
    assert_eq!(active.status, MessageStatus::Delivered);
    assert_eq!(load_of(&h.engine, "a1"), 1);

    // One attempt plus one retry
    assert_eq!(h.bot.calls.load(Ordering::SeqCst), 2);

    let handoff = wait_for(&mut events, WAIT, |e| matches!(e, RoutingEvent::HandoffRequested { .. })).await;
    match handoff.as_ref() {
        RoutingEvent::HandoffRequested { reason, priority, .. } => {
            assert_eq!(reason, REASON_BOT_RESPONSE_FAILED);
            assert_eq!(*priority, 5);
        }
        other => panic!("unexpected event {other:?}"),
    }

    let done = h.engine.message_router().complete_message(&message_id).unwrap();
    assert_eq!(done.status, MessageStatus::Completed);
    assert_eq!(load_of(&h.engine, "a1"), 0);
}

#[tokio::test]
#[serial]
async fn test_failed_reply_send_hands_off() {
    let h = harness(
        fast_config(),
        RecordingTransport::failing_responses(),
        FixedIntent::confident(0.95),
        EchoBot::working(),
    );
    h.engine.update_agent_pool(vec![chat_agent("a1", 3)]);

    let message = Message::new(ChannelKind::WebChat, Customer::new("c"), "help");
    let message_id = message.id.clone();
    h.engine.message_router().route(message).await.unwrap();

    let active = h.engine.message_router().active_message(&message_id).unwrap();
    assert_eq!(active.handoff_reason(), Some(REASON_BOT_RESPONSE_FAILED));
    assert_eq!(active.intent(), Some("billing_question"));
    assert_eq!(h.transport.delivered().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_low_confidence_skips_bot_reply() {
    let h = harness(fast_config(), RecordingTransport::new(), FixedIntent::confident(0.5), EchoBot::working());
    h.engine.update_agent_pool(vec![chat_agent("a1", 3)]);

    let message = Message::new(ChannelKind::WebChat, Customer::new("c"), "hmm");
    let message_id = message.id.clone();
    h.engine.message_router().route(message).await.unwrap();

    let active = h.engine.message_router().active_message(&message_id).unwrap();
    assert_eq!(active.handoff_reason(), Some(REASON_LOW_CONFIDENCE));
    assert_eq!(h.bot.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
#[serial]
async fn test_unusable_confidence_is_handed_off() {
    for confidence in [f64::NAN, f64::INFINITY, 1.5, -0.2] {
        let h = harness(
            fast_config(),
            RecordingTransport::new(),
            FixedIntent::confident(confidence),
            EchoBot::working(),
        );
        h.engine.update_agent_pool(vec![chat_agent("a1", 3)]);

        let message = Message::new(ChannelKind::WebChat, Customer::new("c"), "??");
        let message_id = message.id.clone();
        let admission = h.engine.message_router().route(message).await.unwrap();

        assert!(matches!(admission, Admission::Assigned { .. }), "confidence {confidence}");
        let active = h.engine.message_router().active_message(&message_id).unwrap();
        assert_eq!(active.handoff_reason(), Some(REASON_LOW_CONFIDENCE));
        assert_eq!(h.bot.calls(), 0, "confidence {confidence}");
        assert_eq!(h.engine.message_router().stats().bot_handled, 0);
        h.engine.shutdown();
    }
}

#[tokio::test]
#[serial]
async fn test_duplicate_rejected_while_bot_replies() {
    let h = harness(fast_config(), RecordingTransport::new(), FixedIntent::confident(0.9), EchoBot::gated());
    h.engine.update_agent_pool(vec![chat_agent("a1", 3)]);

    let message = Message::new(ChannelKind::WebChat, Customer::new("c"), "Where is my invoice?");
    let first = tokio::spawn({
        let router = h.engine.message_router().clone();
        let message = message.clone();
        async move { router.route(message).await }
    });

    tokio::time::timeout(WAIT, async {
        while h.bot.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("bot never called");

    let err = h.engine.message_router().route(message.clone()).await.unwrap_err();
    assert!(matches!(err, RoutingError::AlreadyQueued(_)), "{err}");

    h.bot.release();
    let admission = first.await.unwrap().unwrap();
    assert!(matches!(admission, Admission::BotHandled { .. }));
    assert_eq!(h.bot.calls(), 1);
    assert_eq!(h.transport.responses().len(), 1);
    assert!(h.transport.delivered().is_empty());
    assert_eq!(load_of(&h.engine, "a1"), 0);
}

#[tokio::test]
#[serial]
async fn test_handoff_disabled_fails_message() {
    let mut config = fast_config();
    config.messaging.handoff.enabled = false;
    let h = harness(config, RecordingTransport::new(), FixedIntent::confident(0.9), EchoBot::broken());
    h.engine.update_agent_pool(vec![chat_agent("a1", 3)]);
    let mut events = h.engine.subscribe();

    let message = Message::new(ChannelKind::WebChat, Customer::new("c"), "help");
    let err = h.engine.message_router().route(message).await.unwrap_err();
    assert!(matches!(err, RoutingError::BotFailure(_)));

    let failed = wait_for(&mut events, WAIT, |e| matches!(e, RoutingEvent::Failed { .. })).await;
    match failed.as_ref() {
        RoutingEvent::Failed { failure, .. } => assert_eq!(*failure, FailureKind::BotFailure),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(load_of(&h.engine, "a1"), 0);
}

#[tokio::test]
#[serial]
async fn test_unavailable_classifier_falls_back_to_agents() {
    let h = harness(fast_config(), RecordingTransport::new(), FixedIntent::unavailable(), EchoBot::working());
    h.engine.update_agent_pool(vec![chat_agent("a1", 3)]);

    let message = Message::new(ChannelKind::WebChat, Customer::new("c"), "help");
    let message_id = message.id.clone();
    let admission = h.engine.message_router().route(message).await.unwrap();
    assert!(matches!(admission, Admission::Assigned { .. }));

    let active = h.engine.message_router().active_message(&message_id).unwrap();
    assert!(active.handoff_reason().is_none());
    assert_eq!(active.priority, 0);
    assert_eq!(h.engine.message_router().stats().handoffs, 0);
}

#[tokio::test]
#[serial]
async fn test_ineligible_channel_and_urgent_messages_bypass_bot() {
    let h = harness(fast_config(), RecordingTransport::new(), FixedIntent::confident(0.99), EchoBot::working());
    h.engine
        .update_agent_pool(vec![agent("a1", 5).with_skills(["email", "web_chat"])]);

    let email = Message::new(ChannelKind::Email, Customer::new("c1"), "invoice attached");
    let admission = h.engine.message_router().route(email).await.unwrap();
    assert!(matches!(admission, Admission::Assigned { .. }));

    let urgent = Message::new(ChannelKind::WebChat, Customer::new("c2"), "outage!").with_priority(9);
    let admission = h.engine.message_router().route(urgent).await.unwrap();
    assert!(matches!(admission, Admission::Assigned { .. }));

    assert_eq!(h.bot.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.transport.delivered().len(), 2);
}

#[tokio::test]
#[serial]
async fn test_channel_skill_required() {
    let h = harness(no_bot_config(), RecordingTransport::new(), FixedIntent::confident(0.9), EchoBot::working());
    h.engine.update_agent_pool(vec![chat_agent("chat-only", 3)]);
    let mut events = h.engine.subscribe();

    let sms = Message::new(ChannelKind::Sms, Customer::new("c"), "hi");
    let sms_id = sms.id.clone();
    let admission = h.engine.message_router().route(sms).await.unwrap();
    assert!(matches!(admission, Admission::Queued { .. }));

    h.engine
        .update_agent_pool(vec![chat_agent("chat-only", 3), agent("texter", 3).with_skills(["sms"])]);

    let assigned = wait_for(&mut events, WAIT, |e| {
        matches!(e, RoutingEvent::Assigned { item_id, .. } if *item_id == sms_id)
    })
    .await;
    match assigned.as_ref() {
        RoutingEvent::Assigned { agent_id, .. } => assert_eq!(agent_id.as_str(), "texter"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn test_channel_priority_table_picks_queue() {
    let mut config = no_bot_config();
    config.messaging.channel_priority = vec![ChannelPriority {
        channel: ChannelKind::Email,
        queue: "email".to_string(),
        priority: 3,
    }];
    let h = harness(config, RecordingTransport::new(), FixedIntent::confident(0.9), EchoBot::working());

    let message = Message::new(ChannelKind::Email, Customer::new("c"), "hello");
    let admission = h.engine.message_router().route(message).await.unwrap();
    assert_eq!(
        admission,
        Admission::Queued {
            queue: "email".to_string(),
            position: 0,
            priority: 3
        }
    );
}

#[tokio::test]
#[serial]
async fn test_bulk_routing_keeps_input_order() {
    let h = harness(no_bot_config(), RecordingTransport::new(), FixedIntent::confident(0.9), EchoBot::working());
    h.engine.update_agent_pool(vec![chat_agent("a1", 3), chat_agent("a2", 3)]);

    let messages: Vec<Message> = (0..5)
        .map(|i| Message::new(ChannelKind::WebChat, Customer::new(format!("c{i}")), "bulk"))
        .collect();
    let ids: Vec<WorkItemId> = messages.iter().map(|m| m.id.clone()).collect();

    let outcomes = h.engine.message_router().route_bulk(messages).await.unwrap();
    let returned: Vec<WorkItemId> = outcomes.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(returned, ids);
    assert!(outcomes
        .iter()
        .all(|(_, outcome)| matches!(outcome, Ok(Admission::Assigned { .. }))));

    let stats = h.engine.stats();
    assert_eq!(stats.messages.active, 5);
    assert_eq!(stats.agents.total_load, 5);
}

#[tokio::test]
#[serial]
async fn test_bulk_batch_limit() {
    let mut config = no_bot_config();
    config.messaging.bulk.max_batch_size = 2;
    let h = harness(config, RecordingTransport::new(), FixedIntent::confident(0.9), EchoBot::working());

    let messages: Vec<Message> = (0..3)
        .map(|_| Message::new(ChannelKind::Sms, Customer::new("c"), "x"))
        .collect();
    let err = h.engine.message_router().route_bulk(messages).await.unwrap_err();
    assert!(matches!(err, RoutingError::InvalidInput(_)));
    assert_eq!(h.engine.message_router().stats().queued, 0);
}
