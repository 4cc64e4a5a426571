//! Connection-protocol tests: drive the per-connection handler directly
//! and assert on the pushed server messages and the persisted state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use teller_domain::config::ServerConfig;
use teller_domain::context::ExecutionLimits;
use teller_domain::message::{ContentBlock, Role};
use teller_domain::Result;
use teller_engine::Engine;
use teller_gateway::auth::OpenValidator;
use teller_gateway::protocol::{ClientMessage, ServerMessage};
use teller_gateway::{handle_client_message, AppState, ClientConn};
use teller_provider::scripted::ScriptedProvider;
use teller_provider::CompletionResponse;
use teller_sessions::{
    ConversationStore, InMemoryConversationStore, InMemoryPendingActionStore, PendingActionStore,
};
use teller_tools::{Tool, ToolInvocation, ToolOutput, ToolRegistry};

// ── Fixtures ─────────────────────────────────────────────────────────

struct BalanceTool;

#[async_trait::async_trait]
impl Tool for BalanceTool {
    fn name(&self) -> &str {
        "get_balance"
    }
    fn description(&self) -> &str {
        "Fetch the current account balance"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _invocation: ToolInvocation) -> Result<ToolOutput> {
        Ok(ToolOutput::ok(json!({"amount": "100"})))
    }
}

struct SendMoneyTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Tool for SendMoneyTool {
    fn name(&self) -> &str {
        "send_money"
    }
    fn description(&self) -> &str {
        "Transfer money to another user"
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recipient": {"type": "string"},
                "amount": {"type": "string"},
                "currency": {"type": "string"}
            },
            "required": ["recipient", "amount"]
        })
    }
    fn requires_confirmation(&self) -> bool {
        true
    }
    fn summary_template(&self) -> Option<&str> {
        Some("Send {{.amount}} {{.currency}} to {{.recipient}}")
    }
    async fn execute(&self, _invocation: ToolInvocation) -> Result<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::ok(json!({"success": true, "txHash": "0xfeed"})))
    }
}

struct Fixture {
    state: AppState,
    provider: Arc<ScriptedProvider>,
    conversations: Arc<InMemoryConversationStore>,
    pending: Arc<InMemoryPendingActionStore>,
    send_calls: Arc<AtomicUsize>,
}

fn fixture(scripts: Vec<CompletionResponse>) -> Fixture {
    // Log output for failing tests is opt-in via RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let provider = Arc::new(ScriptedProvider::new(scripts));
    let registry = Arc::new(ToolRegistry::new());
    let send_calls = Arc::new(AtomicUsize::new(0));
    registry.register(Arc::new(BalanceTool));
    registry.register(Arc::new(SendMoneyTool {
        calls: send_calls.clone(),
    }));

    let conversations = Arc::new(InMemoryConversationStore::new());
    let pending = Arc::new(InMemoryPendingActionStore::new());
    let engine = Arc::new(Engine::new(
        provider.clone(),
        registry,
        pending.clone(),
    ));

    let state = AppState {
        engine,
        conversations: conversations.clone(),
        pending: pending.clone(),
        auth: Arc::new(OpenValidator),
        limits: ExecutionLimits::default(),
        config: Arc::new(ServerConfig::default()),
    };

    Fixture {
        state,
        provider,
        conversations,
        pending,
        send_calls,
    }
}

fn channel() -> (
    mpsc::UnboundedSender<ServerMessage>,
    mpsc::UnboundedReceiver<ServerMessage>,
) {
    mpsc::unbounded_channel()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

fn tool_use(id: &str, name: &str, input: Value) -> ContentBlock {
    ContentBlock::ToolUse {
        id: id.into(),
        name: name.into(),
        input,
    }
}

async fn start_conversation(
    f: &Fixture,
    conn: &mut ClientConn,
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> String {
    handle_client_message(&f.state, conn, ClientMessage::NewConversation, tx).await;
    match drain(rx).as_slice() {
        [ServerMessage::ConversationStarted { conversation_id }] => conversation_id.clone(),
        other => panic!("expected conversation_started, got {other:?}"),
    }
}

// ── Session binding ──────────────────────────────────────────────────

#[tokio::test]
async fn message_without_session_is_an_error() {
    let f = fixture(vec![]);
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Message { content: "hi".into() },
        &tx,
    )
    .await;

    match drain(&mut rx).as_slice() {
        [ServerMessage::Error { content }] => assert!(content.contains("no active session")),
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(f.provider.call_count(), 0);
}

#[tokio::test]
async fn confirm_and_cancel_without_session_are_errors() {
    let f = fixture(vec![]);
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Confirm { action_id: "a1".into() },
        &tx,
    )
    .await;
    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Cancel { action_id: "a1".into() },
        &tx,
    )
    .await;

    let replies = drain(&mut rx);
    assert_eq!(replies.len(), 2);
    assert!(replies
        .iter()
        .all(|m| matches!(m, ServerMessage::Error { .. })));
}

// ── End-to-end: read-only single turn ────────────────────────────────

#[tokio::test]
async fn read_only_single_turn_pushes_text_and_complete() {
    let f = fixture(vec![
        ScriptedProvider::blocks_response(vec![tool_use("tu_1", "get_balance", json!({}))], 10, 5),
        ScriptedProvider::text_response("Your balance is 100.", 7, 3),
    ]);
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");
    let conversation_id = start_conversation(&f, &mut conn, &mut rx, &tx).await;

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Message {
            content: "What is my balance?".into(),
        },
        &tx,
    )
    .await;

    let replies = drain(&mut rx);
    // Streamed chunk(s), then the final text, then complete.
    let text = replies
        .iter()
        .find_map(|m| match m {
            ServerMessage::Text { content } => Some(content.clone()),
            _ => None,
        })
        .expect("text pushed");
    assert_eq!(text, "Your balance is 100.");
    match replies.last() {
        Some(ServerMessage::Complete { token_usage }) => {
            let usage = token_usage.expect("usage attached");
            assert!(usage.total_tokens > 0);
            assert_eq!(usage.total_tokens, 25);
        }
        other => panic!("expected trailing complete, got {other:?}"),
    }

    // Stored conversation: user, assistant(tool_use), user(tool_result),
    // assistant(text) — and the title comes from the first message.
    let stored = f.conversations.get(&conversation_id).await.unwrap();
    let roles: Vec<Role> = stored.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(stored.title.as_deref(), Some("What is my balance?"));
}

#[tokio::test]
async fn streaming_chunks_precede_final_text() {
    let f = fixture(vec![ScriptedProvider::text_response("Hello!", 2, 2)]);
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");
    start_conversation(&f, &mut conn, &mut rx, &tx).await;

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Message { content: "hi".into() },
        &tx,
    )
    .await;

    let replies = drain(&mut rx);
    assert!(matches!(
        replies.first(),
        Some(ServerMessage::TextChunk { content }) if content == "Hello!"
    ));
    assert!(matches!(replies.last(), Some(ServerMessage::Complete { .. })));
}

// ── End-to-end: write with confirmation ──────────────────────────────

fn send_money_scripts() -> Vec<CompletionResponse> {
    vec![ScriptedProvider::blocks_response(
        vec![tool_use(
            "tu_1",
            "send_money",
            json!({"recipient": "@alice", "amount": "50", "currency": "USD"}),
        )],
        12,
        8,
    )]
}

async fn run_to_confirm_request(
    f: &Fixture,
    conn: &mut ClientConn,
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> String {
    handle_client_message(
        &f.state,
        conn,
        ClientMessage::Message {
            content: "Send 50 USD to @alice".into(),
        },
        tx,
    )
    .await;
    let replies = drain(rx);
    match replies
        .iter()
        .find(|m| matches!(m, ServerMessage::ConfirmRequest { .. }))
    {
        Some(ServerMessage::ConfirmRequest {
            action_id,
            tool,
            summary,
            ..
        }) => {
            assert_eq!(tool, "send_money");
            assert_eq!(summary, "Send 50 USD to @alice");
            action_id.clone()
        }
        other => panic!("expected confirm_request, got {other:?}"),
    }
}

#[tokio::test]
async fn write_confirm_approve_executes_and_completes() {
    let f = fixture(send_money_scripts());
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");
    let conversation_id = start_conversation(&f, &mut conn, &mut rx, &tx).await;
    let action_id = run_to_confirm_request(&f, &mut conn, &mut rx, &tx).await;

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Confirm {
            action_id: action_id.clone(),
        },
        &tx,
    )
    .await;

    let replies = drain(&mut rx);
    match replies.as_slice() {
        [ServerMessage::Text { content }, ServerMessage::Complete { .. }] => {
            assert!(content.contains("Send 50 USD to @alice"));
            assert!(content.contains("0xfeed"));
        }
        other => panic!("expected text + complete, got {other:?}"),
    }
    assert_eq!(f.send_calls.load(Ordering::SeqCst), 1);

    // The action is gone and the conversation is whole: the tool_use got
    // its result and an assistant rendering follows.
    assert!(f.pending.get("u1", &action_id).await.is_err());
    let stored = f.conversations.get(&conversation_id).await.unwrap();
    let roles: Vec<Role> = stored.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    let result_block = &stored.messages[2].content.blocks()[0];
    match result_block {
        ContentBlock::ToolResult {
            tool_use_id,
            is_error,
            ..
        } => {
            assert_eq!(tool_use_id, "tu_1");
            assert!(!*is_error);
        }
        _ => panic!("expected tool_result"),
    }
}

#[tokio::test]
async fn confirm_after_release_yields_expired_apology() {
    let f = fixture(send_money_scripts());
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");
    start_conversation(&f, &mut conn, &mut rx, &tx).await;
    let action_id = run_to_confirm_request(&f, &mut conn, &mut rx, &tx).await;

    // Simulate TTL eviction between the prompt and the decision.
    f.pending.cancel("u1", &action_id).await.unwrap();

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Confirm {
            action_id: action_id.clone(),
        },
        &tx,
    )
    .await;

    let replies = drain(&mut rx);
    match replies.as_slice() {
        [ServerMessage::Text { content }, ServerMessage::Complete { .. }] => {
            assert_eq!(content, "That action expired. Would you like me to set it up again?");
        }
        other => panic!("expected text + complete, got {other:?}"),
    }
    assert_eq!(f.send_calls.load(Ordering::SeqCst), 0);

    // The dangling tool_use was closed out with an error result, so the
    // session can keep going.
    let session = conn.session.as_ref().unwrap();
    assert!(session.unanswered_tool_use().is_none());
    assert!(session.has_tool_result("tu_1"));
}

#[tokio::test]
async fn cancel_releases_and_synthesizes_error_result() {
    let f = fixture(send_money_scripts());
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");
    let conversation_id = start_conversation(&f, &mut conn, &mut rx, &tx).await;
    let action_id = run_to_confirm_request(&f, &mut conn, &mut rx, &tx).await;

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Cancel {
            action_id: action_id.clone(),
        },
        &tx,
    )
    .await;

    let replies = drain(&mut rx);
    assert!(matches!(
        replies.as_slice(),
        [ServerMessage::Text { .. }, ServerMessage::Complete { .. }]
    ));
    assert_eq!(f.send_calls.load(Ordering::SeqCst), 0);
    assert!(f.pending.get("u1", &action_id).await.is_err());

    let stored = f.conversations.get(&conversation_id).await.unwrap();
    let cancelled = stored
        .messages
        .iter()
        .flat_map(|m| m.content.blocks())
        .find_map(|b| match b {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => Some((content.clone(), *is_error)),
            _ => None,
        })
        .expect("synthesized result persisted");
    assert_eq!(cancelled.0, "Cancelled by user");
    assert!(cancelled.1);
}

#[tokio::test]
async fn duplicate_confirm_executes_tool_at_most_once() {
    let f = fixture(send_money_scripts());
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");
    start_conversation(&f, &mut conn, &mut rx, &tx).await;
    let action_id = run_to_confirm_request(&f, &mut conn, &mut rx, &tx).await;

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Confirm {
            action_id: action_id.clone(),
        },
        &tx,
    )
    .await;
    let first = drain(&mut rx);
    assert!(matches!(first.first(), Some(ServerMessage::Text { .. })));

    // The retry hits the claimed-or-expired path.
    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Confirm { action_id },
        &tx,
    )
    .await;
    let second = drain(&mut rx);
    match second.first() {
        Some(ServerMessage::Text { content }) => {
            assert!(content.contains("expired"));
        }
        other => panic!("expected apology text, got {other:?}"),
    }

    assert_eq!(f.send_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn message_while_awaiting_decision_errors_and_keeps_action_alive() {
    let f = fixture(send_money_scripts());
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");
    start_conversation(&f, &mut conn, &mut rx, &tx).await;
    let action_id = run_to_confirm_request(&f, &mut conn, &mut rx, &tx).await;

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::Message {
            content: "actually, what's my balance?".into(),
        },
        &tx,
    )
    .await;

    let replies = drain(&mut rx);
    assert!(replies
        .iter()
        .any(|m| matches!(m, ServerMessage::Error { .. })));
    // The pending action keeps aging and can still be decided.
    assert!(f.pending.get("u1", &action_id).await.is_ok());
}

// ── Resume ───────────────────────────────────────────────────────────

#[tokio::test]
async fn resume_replays_history_and_enforces_ownership() {
    let f = fixture(vec![]);
    let conversation = f.conversations.create("u1").await.unwrap();
    f.conversations
        .append(&conversation.id, teller_domain::message::Message::user("hi"))
        .await
        .unwrap();
    f.conversations
        .append(
            &conversation.id,
            teller_domain::message::Message::assistant("hello"),
        )
        .await
        .unwrap();

    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");
    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::ResumeConversation {
            conversation_id: conversation.id.clone(),
        },
        &tx,
    )
    .await;

    match drain(&mut rx).as_slice() {
        [ServerMessage::ConversationResumed {
            conversation_id,
            messages,
        }] => {
            assert_eq!(conversation_id, &conversation.id);
            assert_eq!(messages.len(), 2);
        }
        other => panic!("expected conversation_resumed, got {other:?}"),
    }

    // Another user cannot resume it.
    let mut other_conn = ClientConn::new("u2");
    handle_client_message(
        &f.state,
        &mut other_conn,
        ClientMessage::ResumeConversation {
            conversation_id: conversation.id.clone(),
        },
        &tx,
    )
    .await;
    match drain(&mut rx).as_slice() {
        [ServerMessage::Error { content }] => assert!(content.contains("not found")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn resume_unknown_conversation_is_an_error() {
    let f = fixture(vec![]);
    let (tx, mut rx) = channel();
    let mut conn = ClientConn::new("u1");

    handle_client_message(
        &f.state,
        &mut conn,
        ClientMessage::ResumeConversation {
            conversation_id: "missing".into(),
        },
        &tx,
    )
    .await;

    assert!(matches!(
        drain(&mut rx).as_slice(),
        [ServerMessage::Error { .. }]
    ));
}
