//! End-to-end flows through the orchestrator with mock channels, a scripted
//! LLM, and a fake model endpoint.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;

use triage_daemon::approval::ActionStatus;
use triage_daemon::channels::ChannelRegistry;
use triage_daemon::config::ControlConfig;
use triage_daemon::contacts::{ContactStore, Direction, Importance};
use triage_daemon::error::{ChannelError, LlmError, StoreError, SwapError};
use triage_daemon::llm::{
    CompletionRequest, CompletionResponse, EndpointProbe, FinishReason, LlmProvider,
};
use triage_daemon::orchestrator::{Orchestrator, OrchestratorSettings, Shutdown};
use triage_daemon::pipeline::{
    ChannelAdapter, ChannelKind, Classifier, Drafter, InboundMessage, OutboundMessage,
};
use triage_daemon::swap::{ModelCatalog, ModelSwapController, Supervisor, SwapTimings};

const OPERATOR: &str = "+15550000001";
const APPROVAL_TIMEOUT: Duration = Duration::from_secs(3600);

const NO_REPLY_VERDICT: &str = r#"{"urgency":"low","classification":"newsletter","needs_response":false,"summary":"Weekly digest"}"#;
const REPLY_VERDICT: &str = r#"{"urgency":"high","classification":"work","needs_response":true,"summary":"Asks for the Q3 figures","suggested_action":"Send figures"}"#;
const DRAFT: &str = "Thank you for your message. I will confirm and follow up.";

// ── Mocks ───────────────────────────────────────────────────────────

struct MockChannel {
    kind: ChannelKind,
    available: AtomicBool,
    send_ok: AtomicBool,
    poll_fails: AtomicBool,
    inbox: Mutex<Vec<InboundMessage>>,
    sent: Mutex<Vec<OutboundMessage>>,
    drafts: Mutex<Vec<OutboundMessage>>,
}

impl MockChannel {
    fn new(kind: ChannelKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            available: AtomicBool::new(true),
            send_ok: AtomicBool::new(true),
            poll_fails: AtomicBool::new(false),
            inbox: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            drafts: Mutex::new(Vec::new()),
        })
    }

    fn sent_bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.body.clone()).collect()
    }

    fn last_body(&self) -> String {
        self.sent_bodies().pop().unwrap_or_default()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn poll(&self) -> Result<Vec<InboundMessage>, ChannelError> {
        if self.poll_fails.load(Ordering::SeqCst) {
            return Err(ChannelError::PollFailed {
                name: self.kind.to_string(),
                reason: "connection reset".into(),
            });
        }
        Ok(std::mem::take(&mut *self.inbox.lock().unwrap()))
    }

    async fn send(&self, message: &OutboundMessage) -> bool {
        if !self.send_ok.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(message.clone());
        true
    }

    async fn available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn save_draft(&self, message: &OutboundMessage) -> bool {
        self.drafts.lock().unwrap().push(message.clone());
        true
    }
}

/// Replies from a script, one entry per call; an exhausted script fails.
struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<usize>,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        *self.calls.lock().unwrap() += 1;
        match self.replies.lock().unwrap().pop_front() {
            Some(content) => Ok(CompletionResponse {
                content,
                input_tokens: 10,
                output_tokens: 10,
                finish_reason: FinishReason::Stop,
            }),
            None => Err(LlmError::RequestFailed {
                endpoint: "mock".into(),
                reason: "script exhausted".into(),
            }),
        }
    }
}

struct MockProbe {
    online: AtomicBool,
}

impl MockProbe {
    fn new(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
        })
    }
}

#[async_trait]
impl EndpointProbe for MockProbe {
    async fn is_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MockSupervisor {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Supervisor for MockSupervisor {
    async fn start(&self, unit: &str) -> Result<(), SwapError> {
        self.calls.lock().unwrap().push(format!("start {unit}"));
        Ok(())
    }

    async fn stop(&self, unit: &str) -> Result<(), SwapError> {
        self.calls.lock().unwrap().push(format!("stop {unit}"));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingContacts {
    interactions: Mutex<Vec<(Direction, String, String)>>,
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl ContactStore for RecordingContacts {
    async fn find_or_create_contact(
        &self,
        _sender: &str,
        _kind: ChannelKind,
    ) -> Result<i64, StoreError> {
        Ok(1)
    }

    async fn log_interaction(
        &self,
        _contact_id: i64,
        _kind: ChannelKind,
        direction: Direction,
        subject: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        self.interactions.lock().unwrap().push((
            direction,
            subject.to_string(),
            content.to_string(),
        ));
        Ok(())
    }

    async fn log_event(
        &self,
        content: &str,
        _importance: Importance,
        _tags: &[&str],
    ) -> Result<(), StoreError> {
        self.events.lock().unwrap().push(content.to_string());
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    orchestrator: Orchestrator,
    email: Arc<MockChannel>,
    signal: Arc<MockChannel>,
    llm: Arc<ScriptedLlm>,
    contacts: Arc<RecordingContacts>,
}

fn fast_timings() -> SwapTimings {
    SwapTimings {
        drain_poll: Duration::from_millis(5),
        drain_timeout: Duration::from_millis(30),
        drain_all_timeout: Duration::from_millis(30),
        ready_poll: Duration::from_millis(5),
        swap_timeout: Duration::from_millis(50),
    }
}

fn catalog() -> ModelCatalog {
    ModelCatalog::parse("triage:llama-triage:0:default,heavy:llama-heavy:0:on_demand").unwrap()
}

fn harness(script: &[&str]) -> Harness {
    harness_with_probe(script, MockProbe::new(true))
}

fn harness_with_probe(script: &[&str], probe: Arc<MockProbe>) -> Harness {
    let email = MockChannel::new(ChannelKind::Email);
    let signal = MockChannel::new(ChannelKind::Signal);
    let llm = ScriptedLlm::new(script);
    let contacts = Arc::new(RecordingContacts::default());

    let channels = ChannelRegistry::new()
        .with(email.clone())
        .with(signal.clone());
    let models = ModelSwapController::new(catalog(), "triage", probe, None)
        .with_timings(fast_timings());
    let settings = OrchestratorSettings {
        poll_interval: Duration::from_millis(10),
        approval_timeout: APPROVAL_TIMEOUT,
        approval_retention: Duration::from_secs(86_400),
        control: ControlConfig {
            channel: ChannelKind::Signal,
            operator: OPERATOR.to_string(),
            prefix: Some("/triage".to_string()),
        },
    };

    let orchestrator = Orchestrator::new(
        settings,
        channels,
        models,
        Classifier::new(llm.clone()),
        Drafter::new(llm.clone()),
    )
    .with_contacts(contacts.clone());

    Harness {
        orchestrator,
        email,
        signal,
        llm,
        contacts,
    }
}

fn email_from(sender: &str, subject: &str) -> InboundMessage {
    InboundMessage::new(
        ChannelKind::Email,
        sender,
        subject,
        "Hi, could you send over the Q3 figures?",
        format!("<{}@example.com>", subject.len()),
    )
}

fn operator(text: &str) -> InboundMessage {
    InboundMessage::new(ChannelKind::Signal, OPERATOR, "", text, "signal-1")
}

/// Queue one drafted reply to an email and return its action id.
async fn queue_one(h: &mut Harness) -> String {
    h.orchestrator
        .handle_message(email_from("alice@example.com", "Q3 figures"))
        .await;
    let id = h.orchestrator.queue().pending()[0].id.clone();
    h.signal.clear();
    id
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn no_response_needed_sends_one_plain_notification() {
    let mut h = harness(&[NO_REPLY_VERDICT]);

    h.orchestrator
        .handle_message(email_from("news@example.com", "Digest"))
        .await;

    let sent = h.signal.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, OPERATOR);
    assert_eq!(
        sent[0].body,
        "[email] news@example.com\nSubject: Digest\nUrgency: low\nType: newsletter\nSummary: Weekly digest"
    );
    assert_eq!(h.orchestrator.queue().len(), 0);
    assert_eq!(h.llm.calls(), 1);
}

#[tokio::test]
async fn needed_response_is_drafted_queued_and_previewed() {
    let mut h = harness(&[REPLY_VERDICT, DRAFT]);

    h.orchestrator
        .handle_message(email_from("alice@example.com", "Q3 figures"))
        .await;

    let pending = h.orchestrator.queue().pending();
    assert_eq!(pending.len(), 1);
    let action = pending[0];
    assert_eq!(action.status, ActionStatus::Pending);
    assert_eq!(action.outbound.recipient, "alice@example.com");
    assert_eq!(action.outbound.subject, "Re: Q3 figures");
    assert_eq!(action.outbound.body, DRAFT);

    let bodies = h.signal.sent_bodies();
    assert_eq!(bodies.len(), 1);
    let note = &bodies[0];
    assert!(note.contains(&format!("Draft response queued ({}):", action.id)));
    assert!(note.contains("---\nThank you for your message."));
    assert!(note.ends_with(&format!(
        "Reply /triage APPROVE {0} or /triage DENY {0}",
        action.id
    )));

    // Email replies are mirrored into the mailbox drafts folder.
    assert_eq!(h.email.drafts.lock().unwrap().len(), 1);

    let interactions = h.contacts.interactions.lock().unwrap();
    assert_eq!(interactions.len(), 1);
    assert_eq!(interactions[0].0, Direction::Inbound);
    assert!(interactions[0].2.starts_with("[work] Asks for the Q3 figures\n\n"));
}

#[tokio::test]
async fn approve_unknown_id_reports_not_found() {
    let mut h = harness(&[]);

    h.orchestrator
        .handle_message(operator("/triage APPROVE xyz999"))
        .await;

    assert_eq!(h.signal.sent_bodies(), vec!["No pending action with ID: xyz999"]);
    assert!(h.orchestrator.queue().is_empty());
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn failed_send_keeps_action_pending() {
    let mut h = harness(&[REPLY_VERDICT, DRAFT]);
    let id = queue_one(&mut h).await;
    h.email.send_ok.store(false, Ordering::SeqCst);

    h.orchestrator
        .handle_message(operator(&format!("/triage approve {}", id.to_uppercase())))
        .await;

    assert!(h.signal.last_body().contains("FAILED"));
    let action = h.orchestrator.queue().get(&id).unwrap();
    assert_eq!(action.status, ActionStatus::Pending);
    assert!(action.approved_at.is_none());
}

#[tokio::test]
async fn approve_sends_once_then_reports_final() {
    let mut h = harness(&[REPLY_VERDICT, DRAFT]);
    let id = queue_one(&mut h).await;

    h.orchestrator
        .handle_message(operator(&format!("/triage APPROVE {id}")))
        .await;
    assert_eq!(h.signal.last_body(), format!("Action {id} sent successfully."));
    assert_eq!(h.email.sent.lock().unwrap().len(), 1);
    assert_eq!(
        h.orchestrator.queue().get(&id).unwrap().status,
        ActionStatus::Approved
    );

    h.orchestrator
        .handle_message(operator(&format!("/triage APPROVE {id}")))
        .await;
    assert_eq!(h.signal.last_body(), format!("Action {id} is already approved"));
    assert_eq!(h.email.sent.lock().unwrap().len(), 1);

    let interactions = h.contacts.interactions.lock().unwrap();
    assert_eq!(interactions.last().unwrap().0, Direction::Outbound);
    let events = h.contacts.events.lock().unwrap();
    assert!(events.iter().any(|e| e.starts_with("Approved and sent reply_email to alice@example.com")));
}

#[tokio::test]
async fn deny_marks_action_denied() {
    let mut h = harness(&[REPLY_VERDICT, DRAFT]);
    let id = queue_one(&mut h).await;

    h.orchestrator
        .handle_message(operator(&format!("/triage DENY {id}")))
        .await;

    assert_eq!(h.signal.last_body(), format!("Action {id} denied."));
    assert_eq!(
        h.orchestrator.queue().get(&id).unwrap().status,
        ActionStatus::Denied
    );
    assert!(h.email.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn pending_action_expires_exactly_once() {
    let mut h = harness(&[REPLY_VERDICT, DRAFT]);
    let id = queue_one(&mut h).await;
    let created = h.orchestrator.queue().get(&id).unwrap().created_at;
    let timeout = TimeDelta::from_std(APPROVAL_TIMEOUT).unwrap();

    h.orchestrator
        .maintain(created + timeout - TimeDelta::seconds(1))
        .await;
    assert_eq!(
        h.orchestrator.queue().get(&id).unwrap().status,
        ActionStatus::Pending
    );
    assert!(h.signal.sent_bodies().is_empty());

    h.orchestrator
        .maintain(created + timeout + TimeDelta::seconds(1))
        .await;
    assert_eq!(
        h.orchestrator.queue().get(&id).unwrap().status,
        ActionStatus::Expired
    );

    h.orchestrator
        .maintain(created + timeout + TimeDelta::seconds(2))
        .await;
    let bodies = h.signal.sent_bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0],
        format!("Action {id} expired: Reply to alice@example.com: Q3 figures")
    );
}

#[tokio::test]
async fn swap_stops_active_then_starts_target() {
    // The endpoint never goes quiet: drain times out and the swap proceeds.
    let probe = MockProbe::new(true);
    let supervisor = Arc::new(MockSupervisor::default());
    let catalog = ModelCatalog::parse("a:unit-a:0:default,b:unit-b:0").unwrap();
    let mut controller = ModelSwapController::new(
        catalog,
        "a",
        probe,
        Some(supervisor.clone() as Arc<dyn Supervisor>),
    )
    .with_timings(fast_timings());

    controller.ensure("a").await.unwrap();
    supervisor.calls.lock().unwrap().clear();

    controller.ensure("b").await.unwrap();

    assert_eq!(controller.active(), Some("b"));
    assert_eq!(
        *supervisor.calls.lock().unwrap(),
        vec!["stop unit-a".to_string(), "start unit-b".to_string()]
    );
}

// ── Further flows ───────────────────────────────────────────────────

#[tokio::test]
async fn unparseable_classification_drops_message() {
    let mut h = harness(&["Sure! This looks like a work email."]);

    h.orchestrator
        .handle_message(email_from("bob@example.com", "Hello"))
        .await;

    assert!(h.signal.sent_bodies().is_empty());
    assert!(h.orchestrator.queue().is_empty());
    assert!(h.contacts.interactions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_draft_is_reported() {
    let mut h = harness(&[REPLY_VERDICT]);

    h.orchestrator
        .handle_message(email_from("alice@example.com", "Q3 figures"))
        .await;

    assert!(h.orchestrator.queue().is_empty());
    assert!(h.signal.last_body().ends_with("\n\n(Draft generation failed)"));
}

#[tokio::test]
async fn operator_chatter_without_prefix_is_ignored() {
    let mut h = harness(&[NO_REPLY_VERDICT]);

    h.orchestrator.handle_message(operator("STATUS")).await;
    h.orchestrator.handle_message(operator("lunch at 1?")).await;

    assert!(h.signal.sent_bodies().is_empty());
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn status_tasks_help_and_unknown() {
    let mut h = harness(&[REPLY_VERDICT, DRAFT]);
    let id = queue_one(&mut h).await;

    h.orchestrator.handle_message(operator("/triage status")).await;
    let status = h.signal.last_body();
    assert!(status.starts_with("Model: none (online)"));
    assert!(status.contains("email online, signal online"));
    assert!(status.ends_with("Pending actions: 1"));

    h.orchestrator.handle_message(operator("/triage TASKS")).await;
    assert_eq!(
        h.signal.last_body(),
        format!("Pending actions:\n  {id}: Reply to alice@example.com: Q3 figures (0m ago)")
    );

    h.orchestrator.handle_message(operator("/triage HELP")).await;
    let help = h.signal.last_body();
    assert!(help.contains("/triage SWAP <model> - swap LLM (triage|heavy)"));

    h.orchestrator.handle_message(operator("/triage DENY")).await;
    assert_eq!(
        h.signal.last_body(),
        "Unknown command: DENY\nSend /triage HELP for available commands."
    );

    h.orchestrator.handle_message(operator("/triage deny abc")).await;
    assert_eq!(h.signal.last_body(), "No pending action with ID: abc");
}

#[tokio::test]
async fn swap_command_reports_progress() {
    let mut h = harness(&[]);

    h.orchestrator.handle_message(operator("/triage SWAP huge")).await;
    assert_eq!(
        h.signal.last_body(),
        "Unknown model: huge. Available: triage, heavy"
    );

    h.signal.clear();
    h.orchestrator.handle_message(operator("/triage SWAP heavy")).await;
    assert_eq!(
        h.signal.sent_bodies(),
        vec!["Swapping to heavy...", "Model heavy is ready."]
    );
    assert_eq!(h.orchestrator.models().active(), Some("heavy"));
}

#[tokio::test]
async fn swap_command_reports_failure() {
    let probe = MockProbe::new(false);
    let mut h = harness_with_probe(&[], probe);

    h.orchestrator.handle_message(operator("/triage SWAP heavy")).await;

    let last = h.signal.last_body();
    assert!(last.starts_with("FAILED to start heavy:"), "{last}");
}

#[tokio::test]
async fn poll_cycle_contains_channel_failures() {
    let mut h = harness(&[NO_REPLY_VERDICT]);
    h.email.poll_fails.store(true, Ordering::SeqCst);
    h.signal.inbox.lock().unwrap().push(InboundMessage::new(
        ChannelKind::Signal,
        "+15550000002",
        "",
        "newsletter blast",
        "signal-2",
    ));

    h.orchestrator.poll_cycle().await;

    // Email failed, Signal was still processed.
    assert_eq!(h.llm.calls(), 1);
    assert_eq!(h.signal.sent_bodies().len(), 1);
}

#[tokio::test]
async fn unavailable_channel_is_not_polled() {
    let mut h = harness(&[NO_REPLY_VERDICT]);
    h.email.available.store(false, Ordering::SeqCst);
    h.email
        .inbox
        .lock()
        .unwrap()
        .push(email_from("carol@example.com", "Hi"));

    h.orchestrator.poll_cycle().await;

    assert_eq!(h.llm.calls(), 0);
    assert_eq!(h.email.inbox.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn run_announces_start_and_stop() {
    let h = harness(&[]);
    let signal = h.signal.clone();
    let contacts = h.contacts.clone();
    let (handle, shutdown) = Shutdown::channel();
    handle.trigger();

    tokio::time::timeout(Duration::from_secs(2), h.orchestrator.run(shutdown))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        signal.sent_bodies(),
        vec![
            "triage daemon started. Default model ready.",
            "triage daemon stopped."
        ]
    );
    let events = contacts.events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], "triage daemon stopped");
}

#[tokio::test]
async fn run_polls_until_shutdown() {
    let h = harness(&[NO_REPLY_VERDICT]);
    let signal = h.signal.clone();
    h.email
        .inbox
        .lock()
        .unwrap()
        .push(email_from("news@example.com", "Digest"));
    let (handle, shutdown) = Shutdown::channel();

    let task = tokio::spawn(h.orchestrator.run(shutdown));
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.trigger();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let bodies = signal.sent_bodies();
    assert_eq!(bodies.first().unwrap(), "triage daemon started. Default model ready.");
    assert!(bodies.iter().any(|b| b.starts_with("[email] news@example.com")));
    assert_eq!(bodies.last().unwrap(), "triage daemon stopped.");
}

#[tokio::test]
async fn startup_fails_when_default_model_is_unreachable() {
    let h = harness_with_probe(&[], MockProbe::new(false));
    let signal = h.signal.clone();
    let (_handle, shutdown) = Shutdown::channel();

    let result = h.orchestrator.run(shutdown).await;

    assert!(result.is_err());
    assert!(signal.sent_bodies().is_empty());
}
