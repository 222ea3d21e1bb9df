use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use agenthub::hub::protocol::Envelope;
use agenthub::hub::{AgentHub, AgentInfo, Capability, HubHandle, Payload};
use agenthub::llm::ModelEndpoint;
use agenthub::orchestrator::{Orchestrator, OrchestratorEvent, OrchestratorSettings};
use agenthub::safety::CommandFilter;

// ============================================================
// Test doubles
// ============================================================

type Responder = Box<dyn Fn(&str, usize) -> Vec<Payload> + Send + Sync>;

/// In-process stand-in for the hub. Records every broadcast command and
/// answers through `respond(command, call_index)`.
struct FakeHub {
    running: bool,
    agents: Vec<AgentInfo>,
    commands: Mutex<Vec<String>>,
    respond: Responder,
    progress: Vec<Payload>,
    task_results: Vec<Payload>,
}

impl FakeHub {
    fn new(agents: Vec<AgentInfo>) -> Self {
        Self {
            running: true,
            agents,
            commands: Mutex::new(Vec::new()),
            respond: Box::new(|_: &str, _: usize| {
                vec![payload(json!({"agentName": "web-1", "output": "ok", "exitCode": 0}))]
            }),
            progress: Vec::new(),
            task_results: Vec::new(),
        }
    }

    fn responding(
        mut self,
        respond: impl Fn(&str, usize) -> Vec<Payload> + Send + Sync + 'static,
    ) -> Self {
        self.respond = Box::new(respond);
        self
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl HubHandle for FakeHub {
    fn is_running(&self) -> bool {
        self.running
    }

    fn online_agents(&self) -> Vec<AgentInfo> {
        self.agents.clone()
    }

    fn has_smart_agents(&self, targets: &[String]) -> bool {
        self.agents
            .iter()
            .filter(|a| targets.is_empty() || targets.contains(&a.name))
            .any(|a| a.is_smart())
    }

    async fn broadcast(
        &self,
        command: &str,
        _targets: &[String],
        _timeout: Duration,
    ) -> Vec<Payload> {
        let index = {
            let mut commands = self.commands.lock().unwrap();
            commands.push(command.to_string());
            commands.len() - 1
        };
        (self.respond)(command, index)
    }

    async fn dispatch_task(
        &self,
        _task: &str,
        _targets: &[String],
        _timeout: Duration,
        on_progress: Option<UnboundedSender<Payload>>,
    ) -> Vec<Payload> {
        if let Some(tx) = on_progress {
            for progress in &self.progress {
                tx.send(progress.clone()).unwrap();
            }
        }
        tokio::task::yield_now().await;
        self.task_results.clone()
    }

    async fn sync_config(
        &self,
        _config: &Value,
        _targets: &[String],
        _timeout: Duration,
    ) -> Vec<Payload> {
        Vec::new()
    }
}

/// A smart agent attached to a real [`AgentHub`] through an in-memory channel.
struct LiveAgent {
    id: String,
    outbox: UnboundedReceiver<Envelope>,
}

impl LiveAgent {
    async fn join(hub: &AgentHub, name: &str) -> Self {
        let (tx, outbox) = unbounded_channel();
        let id = hub.accept(tx, None);
        let mut agent = Self { id, outbox };
        agent.send(
            hub,
            "auth",
            None,
            json!({"agentName": name, "secretKey": "s", "capabilities": ["task"]}),
        );
        assert_eq!(agent.next().await.payload()["success"], true);
        agent
    }

    fn send(&self, hub: &AgentHub, kind: &str, task_id: Option<&str>, payload: Value) {
        let mut frame = json!({"type": kind, "payload": payload, "timestamp": 0});
        if let Some(task_id) = task_id {
            frame["taskId"] = json!(task_id);
        }
        hub.handle_frame(&self.id, &frame.to_string());
    }

    async fn next(&mut self) -> Envelope {
        tokio::time::timeout(Duration::from_secs(2), self.outbox.recv())
            .await
            .expect("timed out waiting for an envelope")
            .expect("outbound channel closed")
    }
}

async fn next_event(events: &mut UnboundedReceiver<OrchestratorEvent>) -> OrchestratorEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

fn agent(name: &str, caps: &[Capability]) -> AgentInfo {
    AgentInfo {
        id: format!("conn-{name}"),
        name: name.to_string(),
        authenticated: true,
        capabilities: caps.iter().cloned().collect(),
        connected_at: Utc::now(),
        last_heartbeat: Utc::now(),
        version: None,
        peer: None,
    }
}

fn plain_agent(name: &str) -> AgentInfo {
    agent(name, &[Capability::Command])
}

fn openai_endpoint(server: &mockito::ServerGuard) -> ModelEndpoint {
    ModelEndpoint {
        api_key: "sk-test".into(),
        base_url: format!("{}/v1", server.url()),
        model: "gpt-4o".into(),
    }
}

fn chat_reply(content: &str) -> String {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
}

async fn mock_plan(server: &mut mockito::ServerGuard, plan: Value) -> mockito::Mock {
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(chat_reply(&plan.to_string()))
        .create_async()
        .await
}

async fn run(orchestrator: &Orchestrator<FakeHub>, targets: &[String]) -> Vec<OrchestratorEvent> {
    let (tx, mut rx) = unbounded_channel();
    orchestrator.run_task("keep the fleet healthy", targets, tx).await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn count(events: &[OrchestratorEvent], pred: impl Fn(&OrchestratorEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

fn last(events: &[OrchestratorEvent]) -> &OrchestratorEvent {
    events.last().expect("at least one event")
}

// ============================================================
// Validation
// ============================================================

#[tokio::test]
async fn test_missing_endpoint_is_a_terminal_error() {
    let hub = Arc::new(FakeHub::new(vec![plain_agent("web-1")]));
    let orchestrator = Orchestrator::new(hub.clone(), None, OrchestratorSettings::default());

    let events = run(&orchestrator, &[]).await;
    assert_eq!(
        events,
        vec![OrchestratorEvent::Error {
            message: "No model endpoint configured".into()
        }]
    );
    assert!(hub.commands().is_empty());
}

#[tokio::test]
async fn test_stopped_hub_is_a_terminal_error() {
    let server = mockito::Server::new_async().await;
    let mut fake = FakeHub::new(vec![plain_agent("web-1")]);
    fake.running = false;
    let orchestrator = Orchestrator::new(
        Arc::new(fake),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &[]).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        OrchestratorEvent::Error { message } if message.contains("not running")
    ));
}

#[tokio::test]
async fn test_unknown_targets_are_a_terminal_error() {
    let server = mockito::Server::new_async().await;
    let orchestrator = Orchestrator::new(
        Arc::new(FakeHub::new(vec![plain_agent("web-1")])),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &["db-9".to_string()]).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        OrchestratorEvent::Error { message } if message.contains("No online agents")
    ));
}

// ============================================================
// Iterative loop
// ============================================================

#[tokio::test]
async fn test_model_http_error_aborts_before_any_command() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(500)
        .with_body("upstream exploded")
        .expect(1)
        .create_async()
        .await;

    let hub = Arc::new(FakeHub::new(vec![plain_agent("web-1")]));
    let orchestrator = Orchestrator::new(
        hub.clone(),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &[]).await;
    assert_eq!(count(&events, |e| matches!(e, OrchestratorEvent::Error { .. })), 1);
    assert_eq!(count(&events, |e| matches!(e, OrchestratorEvent::CommandStart { .. })), 0);
    match last(&events) {
        OrchestratorEvent::Error { message } => {
            assert!(message.contains("500"));
            assert!(message.contains("upstream exploded"));
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert!(hub.commands().is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_complete_without_verification_succeeds_after_commands() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_plan(
        &mut server,
        json!({
            "reasoning": "restart the service and we are done",
            "commands": ["systemctl restart nginx", "systemctl is-active nginx"],
            "is_complete": true
        }),
    )
    .await;

    let hub = Arc::new(FakeHub::new(vec![plain_agent("web-1")]));
    let orchestrator = Orchestrator::new(
        hub.clone(),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &[]).await;
    assert_eq!(hub.commands(), vec!["systemctl restart nginx", "systemctl is-active nginx"]);
    assert_eq!(count(&events, |e| matches!(e, OrchestratorEvent::Verification { .. })), 0);
    assert_eq!(count(&events, |e| matches!(e, OrchestratorEvent::IterationStart { .. })), 1);
    assert!(matches!(last(&events), OrchestratorEvent::Complete { success: true, .. }));

    // command_output follows each command_start.
    let kinds: Vec<String> = events
        .iter()
        .map(|e| serde_json::to_value(e).unwrap()["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "start",
            "iteration_start",
            "reasoning",
            "command_start",
            "command_output",
            "command_start",
            "command_output",
            "complete"
        ]
    );
}

#[tokio::test]
async fn test_loop_stops_at_max_iterations() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(chat_reply(
            r#"{"reasoning":"still looking","commands":["uptime"],"is_complete":false}"#,
        ))
        .expect(20)
        .create_async()
        .await;

    let hub = Arc::new(FakeHub::new(vec![plain_agent("web-1")]));
    let orchestrator = Orchestrator::new(
        hub.clone(),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &[]).await;
    assert_eq!(count(&events, |e| matches!(e, OrchestratorEvent::IterationStart { .. })), 20);
    assert_eq!(hub.commands().len(), 20);
    assert_eq!(
        last(&events),
        &OrchestratorEvent::Complete {
            success: false,
            message: "max iterations reached".into()
        }
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_verification_keeps_iterating() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_plan(
        &mut server,
        json!({
            "reasoning": "fixed it",
            "commands": ["touch /srv/ready"],
            "is_complete": true,
            "verification_command": "test -f /srv/ready"
        }),
    )
    .await;

    // The first verification fails, the second passes.
    let hub = Arc::new(FakeHub::new(vec![plain_agent("web-1")]).responding(|command, index| {
        let exit = if command.starts_with("test") && index < 2 { 1 } else { 0 };
        vec![payload(json!({"agentName": "web-1", "output": "", "exitCode": exit}))]
    }));
    let orchestrator = Orchestrator::new(
        hub.clone(),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &[]).await;
    let verdicts: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::Verification { passed, .. } => Some(*passed),
            _ => None,
        })
        .collect();
    assert_eq!(verdicts, vec![false, true]);
    assert_eq!(count(&events, |e| matches!(e, OrchestratorEvent::IterationStart { .. })), 2);
    assert!(matches!(last(&events), OrchestratorEvent::Complete { success: true, .. }));
}

#[tokio::test]
async fn test_unparseable_reply_is_a_no_op_iteration() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(chat_reply("Let me think about this some more."))
        .create_async()
        .await;

    let hub = Arc::new(FakeHub::new(vec![plain_agent("web-1")]));
    let settings = OrchestratorSettings {
        max_iterations: 2,
        ..OrchestratorSettings::default()
    };
    let orchestrator = Orchestrator::new(hub.clone(), Some(openai_endpoint(&server)), settings);

    let events = run(&orchestrator, &[]).await;
    assert!(hub.commands().is_empty());
    assert!(events.iter().any(|e| matches!(
        e,
        OrchestratorEvent::Reasoning { reasoning, commands, is_complete: false, .. }
            if reasoning == "Let me think about this some more." && commands.is_empty()
    )));
    assert!(matches!(last(&events), OrchestratorEvent::Complete { success: false, .. }));
}

#[tokio::test]
async fn test_guard_blocks_dangerous_commands() {
    let mut server = mockito::Server::new_async().await;
    let _mock = mock_plan(
        &mut server,
        json!({"reasoning": "clean up", "commands": ["rm -rf /", "df -h"], "is_complete": true}),
    )
    .await;

    let hub = Arc::new(FakeHub::new(vec![plain_agent("web-1")]));
    let orchestrator = Orchestrator::new(
        hub.clone(),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    )
    .with_guard(Some(CommandFilter::from_defaults().unwrap()));

    let events = run(&orchestrator, &[]).await;
    assert_eq!(hub.commands(), vec!["df -h"], "blocked command never reaches the hub");

    let blocked = events
        .iter()
        .find_map(|e| match e {
            OrchestratorEvent::CommandOutput { command, results, .. } if command == "rm -rf /" => {
                Some(results)
            }
            _ => None,
        })
        .expect("blocked command still reports output");
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0]["agentName"], "hub");
    assert_eq!(blocked[0]["exitCode"], 126);
}

#[tokio::test]
async fn test_anthropic_endpoint_is_called_with_messages_api() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "sk-ant")
        .match_header("anthropic-version", "2023-06-01")
        .with_status(200)
        .with_body(
            json!({
                "content": [{
                    "type": "text",
                    "text": "```json\n{\"reasoning\":\"nothing to do\",\"commands\":[],\"is_complete\":true}\n```"
                }]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let endpoint = ModelEndpoint {
        api_key: "sk-ant".into(),
        base_url: server.url(),
        model: "claude-sonnet-4-5".into(),
    };
    let orchestrator = Orchestrator::new(
        Arc::new(FakeHub::new(vec![plain_agent("web-1")])),
        Some(endpoint),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &[]).await;
    assert_eq!(
        last(&events),
        &OrchestratorEvent::Complete {
            success: true,
            message: "nothing to do".into()
        }
    );
    mock.assert_async().await;
}

// ============================================================
// Smart-agent dispatch
// ============================================================

#[tokio::test]
async fn test_smart_agents_receive_the_whole_task() {
    let server = mockito::Server::new_async().await;
    let mut fake = FakeHub::new(vec![
        agent("smart-1", &[Capability::Command, Capability::Task]),
        agent("smart-2", &[Capability::Task]),
    ]);
    fake.progress = vec![payload(json!({"step": "download"})), payload(json!({"step": "install"}))];
    fake.task_results = vec![
        payload(json!({"agentName": "smart-1", "success": true})),
        payload(json!({"agentName": "smart-2", "summary": "done"})),
    ];
    let hub = Arc::new(fake);
    let orchestrator = Orchestrator::new(
        hub.clone(),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &[]).await;
    assert!(hub.commands().is_empty(), "smart path never broadcasts");

    let kinds: Vec<String> = events
        .iter()
        .map(|e| serde_json::to_value(e).unwrap()["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "start",
            "task_dispatched",
            "agent_progress",
            "agent_progress",
            "agent_complete",
            "agent_complete",
            "complete"
        ]
    );
    assert!(matches!(
        &events[2],
        OrchestratorEvent::AgentProgress { progress } if progress["step"] == "download"
    ));
    assert!(matches!(last(&events), OrchestratorEvent::Complete { success: true, .. }));
}

#[tokio::test]
async fn test_smart_dispatch_fails_when_any_agent_reports_failure() {
    let server = mockito::Server::new_async().await;
    let mut fake = FakeHub::new(vec![agent("smart-1", &[Capability::Task])]);
    fake.task_results = vec![payload(
        json!({"agentName": "smart-1", "success": false, "error": "disk full"}),
    )];
    let orchestrator = Orchestrator::new(
        Arc::new(fake),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &[]).await;
    assert!(matches!(last(&events), OrchestratorEvent::Complete { success: false, .. }));
}

#[tokio::test]
async fn test_plain_targets_skip_smart_dispatch() {
    let mut server = mockito::Server::new_async().await;
    let plan = json!({"reasoning": "ok", "commands": ["uptime"], "is_complete": true});
    let _mock = mock_plan(&mut server, plan).await;

    let hub = Arc::new(FakeHub::new(vec![
        agent("smart-1", &[Capability::Task]),
        plain_agent("web-1"),
    ]));
    let orchestrator = Orchestrator::new(
        hub.clone(),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let events = run(&orchestrator, &["web-1".to_string()]).await;
    assert_eq!(count(&events, |e| matches!(e, OrchestratorEvent::TaskDispatched { .. })), 0);
    assert_eq!(hub.commands(), vec!["uptime"]);
}

#[tokio::test]
async fn test_dropped_receiver_abandons_the_run() {
    let mut server = mockito::Server::new_async().await;
    let plan = json!({"reasoning": "r", "commands": ["uptime"], "is_complete": false});
    let _mock = mock_plan(&mut server, plan).await;

    let hub = Arc::new(FakeHub::new(vec![plain_agent("web-1")]));
    let orchestrator = Orchestrator::new(
        hub.clone(),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );

    let (tx, rx) = unbounded_channel();
    drop(rx);
    orchestrator.run_task("t", &[], tx).await;
    assert!(hub.commands().is_empty());
}

#[tokio::test]
async fn test_live_hub_relays_progress_while_dispatch_is_pending() {
    let server = mockito::Server::new_async().await;
    let hub = AgentHub::new("s");
    hub.set_running(true);
    let mut one = LiveAgent::join(&hub, "smart-1").await;
    let mut two = LiveAgent::join(&hub, "smart-2").await;

    let orchestrator = Orchestrator::new(
        Arc::new(hub.clone()),
        Some(openai_endpoint(&server)),
        OrchestratorSettings::default(),
    );
    let (run, mut events) = orchestrator.spawn("upgrade openssl".to_string(), Vec::new());

    assert!(matches!(next_event(&mut events).await, OrchestratorEvent::Start { .. }));
    assert!(matches!(
        next_event(&mut events).await,
        OrchestratorEvent::TaskDispatched { agents, .. } if agents.len() == 2
    ));

    let task = one.next().await;
    assert_eq!(task.kind(), "task");
    let task_id = task.task_id().unwrap().to_string();
    assert_eq!(two.next().await.task_id(), Some(task_id.as_str()));

    // Each progress event must surface before anything else is sent.
    one.send(&hub, "task_progress", Some(&task_id), json!({"agent": "smart-1", "step": 1}));
    match next_event(&mut events).await {
        OrchestratorEvent::AgentProgress { progress } => assert_eq!(progress["step"], 1),
        other => panic!("expected agent_progress, got {other:?}"),
    }
    two.send(&hub, "task_progress", Some(&task_id), json!({"agent": "smart-2", "step": 2}));
    match next_event(&mut events).await {
        OrchestratorEvent::AgentProgress { progress } => assert_eq!(progress["step"], 2),
        other => panic!("expected agent_progress, got {other:?}"),
    }
    assert_eq!(hub.pending_exchanges(), 1);

    one.send(&hub, "task_result", Some(&task_id), json!({"agentName": "smart-1", "success": true}));
    two.send(&hub, "task_result", Some(&task_id), json!({"agentName": "smart-2", "success": true}));

    for _ in 0..2 {
        assert!(matches!(next_event(&mut events).await, OrchestratorEvent::AgentComplete { .. }));
    }
    assert!(matches!(
        next_event(&mut events).await,
        OrchestratorEvent::Complete { success: true, .. }
    ));
    run.await.unwrap();
    assert!(events.recv().await.is_none());
    assert_eq!(hub.pending_exchanges(), 0);
}
