//! Shared fixtures for routing engine integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use switchboard_infra_common::logging::{setup_logging, LoggingConfig};
use switchboard_infra_common::Subscriber;
use switchboard_routing_engine::prelude::*;

/// Call connector that follows a script of outcomes, then a default
#[derive(Debug)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<bool>>,
    default: bool,
    pub attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn succeeding() -> Arc<Self> {
        Self::with_script(Vec::new(), true)
    }

    pub fn failing() -> Arc<Self> {
        Self::with_script(Vec::new(), false)
    }

    pub fn with_script(script: Vec<bool>, default: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallConnector for ScriptedConnector {
    async fn connect(&self, call: &Call, agent: &Agent) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let ok = self.script.lock().pop_front().unwrap_or(self.default);
        if ok {
            Ok(())
        } else {
            anyhow::bail!("agent {} did not pick up call {}", agent.id, call.id)
        }
    }
}

/// Message transport recording deliveries and bot replies
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub fail_responses: bool,
    pub fail_deliveries: bool,
    pub delivered: Mutex<Vec<(WorkItemId, AgentId)>>,
    pub responses: Mutex<Vec<(WorkItemId, String)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_responses() -> Arc<Self> {
        Arc::new(Self {
            fail_responses: true,
            ..Default::default()
        })
    }

    pub fn delivered(&self) -> Vec<(WorkItemId, AgentId)> {
        self.delivered.lock().clone()
    }

    pub fn responses(&self) -> Vec<(WorkItemId, String)> {
        self.responses.lock().clone()
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn deliver_to_agent(&self, message: &Message, agent: &Agent) -> anyhow::Result<()> {
        if self.fail_deliveries {
            anyhow::bail!("delivery to {} failed", agent.id);
        }
        self.delivered.lock().push((message.id.clone(), agent.id.clone()));
        Ok(())
    }

    async fn send_response(&self, message: &Message, reply: &BotReply) -> anyhow::Result<()> {
        if self.fail_responses {
            anyhow::bail!("channel rejected reply for {}", message.id);
        }
        self.responses.lock().push((message.id.clone(), reply.content.clone()));
        Ok(())
    }
}

/// Intent detector returning a fixed classification
#[derive(Debug)]
pub struct FixedIntent(pub Option<Intent>);

impl FixedIntent {
    pub fn confident(confidence: f64) -> Arc<Self> {
        Arc::new(Self(Some(Intent::new("billing_question", confidence))))
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self(None))
    }
}

#[async_trait]
impl IntentDetector for FixedIntent {
    async fn detect(&self, _message: &Message) -> anyhow::Result<Intent> {
        match &self.0 {
            Some(intent) => Ok(intent.clone()),
            None => anyhow::bail!("classifier offline"),
        }
    }
}

/// Bot responder that echoes the intent, or always fails. A gated bot holds
/// every reply until `release` is called.
#[derive(Debug)]
pub struct EchoBot {
    pub fail: bool,
    pub calls: AtomicUsize,
    gate: Option<Notify>,
}

impl EchoBot {
    pub fn working() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
            gate: Some(Notify::new()),
        })
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BotResponder for EchoBot {
    async fn respond(&self, _message: &Message, intent: &Intent) -> anyhow::Result<BotReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            anyhow::bail!("response model unavailable");
        }
        Ok(BotReply::text(format!("Here is help with {}", intent.name)))
    }
}

pub fn collaborators(
    connector: Arc<ScriptedConnector>,
    transport: Arc<RecordingTransport>,
    intents: Arc<FixedIntent>,
    bot: Arc<EchoBot>,
) -> Collaborators {
    Collaborators {
        call_connector: connector,
        message_transport: transport,
        intent_detector: intents,
        bot_responder: bot,
    }
}

static LOGGING: Once = Once::new();

/// Install the test subscriber once per test binary
pub fn init_logging() {
    LOGGING.call_once(|| {
        let level = std::env::var("SWITCHBOARD_TEST_LOG")
            .ok()
            .and_then(|l| switchboard_infra_common::logging::parse_log_level(&l).ok())
            .unwrap_or(tracing::Level::WARN);
        let config = LoggingConfig::new(level, "routing-engine-tests");
        setup_logging(&config).expect("logging setup");
        config.log_welcome(env!("CARGO_PKG_VERSION"));
    });
}

/// Config with short poll intervals so queue draining is fast in tests
pub fn fast_config() -> RoutingConfig {
    init_logging();
    let mut config = RoutingConfig::default();
    config.general.drain_poll_interval_ms = 10;
    config.general.timeout_sweep_interval_ms = 20;
    config
}

pub fn agent(id: &str, max_load: u32) -> Agent {
    Agent::new(id, id.to_uppercase(), max_load)
}

pub fn load_of(engine: &RoutingEngine, id: &str) -> u32 {
    engine
        .agent_pool()
        .get(&AgentId::from(id))
        .map(|a| a.current_load)
        .unwrap_or_default()
}

/// Wait for the first event matching `pred`, failing the test after `timeout`
pub async fn wait_for<F>(sub: &mut Subscriber<RoutingEvent>, timeout: Duration, pred: F) -> Arc<RoutingEvent>
where
    F: Fn(&RoutingEvent) -> bool,
{
    let found = tokio::time::timeout(timeout, async {
        loop {
            match sub.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event bus closed: {e}"),
            }
        }
    })
    .await;

    found.expect("timed out waiting for routing event")
}

/// Collect every event already published
pub fn drain(sub: &mut Subscriber<RoutingEvent>) -> Vec<Arc<RoutingEvent>> {
    sub.drain()
}
