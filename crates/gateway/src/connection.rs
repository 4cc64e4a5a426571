//! Per-connection state machine.
//!
//! A connection is ACTIVE once a conversation is bound; a run that
//! suspends on a write tool moves it to AWAIT_DECISION until the user
//! confirms or cancels (or the action expires). The read loop serializes
//! messages, so no two runs ever share a session.

use std::sync::Arc;

use tokio::sync::mpsc;

use teller_domain::context::RequestContext;
use teller_domain::message::ContentBlock;
use teller_domain::pending::PendingAction;
use teller_domain::Result;
use teller_engine::engine::{RunInput, RunOutput};
use teller_engine::StreamSink;
use teller_sessions::Session;
use teller_tools::ToolOutput;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

const EXPIRED_APOLOGY: &str = "That action expired. Would you like me to set it up again?";
const CANCELLED_TEXT: &str = "Cancelled. Let me know if there's anything else.";

/// Per-connection state: the authenticated user, the bound session, the
/// pending action awaiting decision, and the persistence high-water mark.
pub struct ClientConn {
    pub user_id: String,
    pub session: Option<Session>,
    pub pending: Option<PendingAction>,
    /// Number of session messages already appended to the store.
    pub persisted: usize,
}

impl ClientConn {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session: None,
            pending: None,
            persisted: 0,
        }
    }
}

/// Forwards engine text deltas to the client as `text_chunk` messages.
struct ChunkSink {
    out: mpsc::UnboundedSender<ServerMessage>,
}

impl StreamSink for ChunkSink {
    fn emit(&self, chunk: &str, done: bool) {
        if !done && !chunk.is_empty() {
            let _ = self.out.send(ServerMessage::TextChunk {
                content: chunk.to_string(),
            });
        }
    }
}

/// Handle one client message, pushing replies onto the outbound channel.
pub async fn handle_client_message(
    state: &AppState,
    conn: &mut ClientConn,
    msg: ClientMessage,
    out: &mpsc::UnboundedSender<ServerMessage>,
) {
    match msg {
        ClientMessage::NewConversation => handle_new_conversation(state, conn, out).await,
        ClientMessage::ResumeConversation { conversation_id } => {
            handle_resume(state, conn, &conversation_id, out).await
        }
        ClientMessage::Message { content } => handle_message(state, conn, &content, out).await,
        ClientMessage::Confirm { action_id } => {
            handle_confirm(state, conn, &action_id, out).await
        }
        ClientMessage::Cancel { action_id } => handle_cancel(state, conn, &action_id, out).await,
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn handle_new_conversation(
    state: &AppState,
    conn: &mut ClientConn,
    out: &mpsc::UnboundedSender<ServerMessage>,
) {
    match state.conversations.create(&conn.user_id).await {
        Ok(conversation) => {
            conn.session = Some(Session::new(conn.user_id.clone(), conversation.id.clone()));
            conn.pending = None;
            conn.persisted = 0;
            push(out, ServerMessage::ConversationStarted {
                conversation_id: conversation.id,
            });
        }
        Err(e) => {
            tracing::error!(error = %e, "conversation create failed");
            push_error(out, "could not create conversation");
        }
    }
}

async fn handle_resume(
    state: &AppState,
    conn: &mut ClientConn,
    conversation_id: &str,
    out: &mpsc::UnboundedSender<ServerMessage>,
) {
    match state.conversations.get(conversation_id).await {
        Ok(conversation) if conversation.user_id == conn.user_id => {
            let session = Session::restore(&conversation);
            conn.persisted = conversation.messages.len();
            conn.session = Some(session);
            conn.pending = None;
            push(out, ServerMessage::ConversationResumed {
                conversation_id: conversation.id,
                messages: conversation.messages,
            });
        }
        _ => push_error(out, "conversation not found"),
    }
}

async fn handle_message(
    state: &AppState,
    conn: &mut ClientConn,
    content: &str,
    out: &mpsc::UnboundedSender<ServerMessage>,
) {
    let Some(session) = conn.session.as_mut() else {
        push_error(out, "no active session; send new_conversation first");
        return;
    };
    let is_first_message = conn.persisted == 0;

    let ctx = RequestContext::new(conn.user_id.clone(), session.id.clone())
        .with_conversation(session.conversation_id.clone())
        .with_limits(state.limits.clone());

    let mut input = RunInput::message(content);
    if state.config.streaming {
        input.stream = Some(Arc::new(ChunkSink { out: out.clone() }));
    }

    match state.engine.run(&ctx, session, input).await {
        RunOutput::Complete { text, usage, .. } => {
            push(out, ServerMessage::Text { content: text });
            push(out, ServerMessage::Complete {
                token_usage: Some(usage),
            });
        }
        RunOutput::ConfirmationNeeded { action, text, .. } => {
            push(out, ServerMessage::ConfirmRequest {
                action_id: action.id.clone(),
                tool: action.tool_name.clone(),
                summary: action.summary.clone(),
                expires_at: action.expires_at,
                content: (!text.is_empty()).then_some(text),
            });
            conn.pending = Some(action);
        }
        RunOutput::Error { error, .. } => {
            tracing::warn!(error = %error, user_id = %conn.user_id, "run failed");
            push_error(out, &error.to_string());
        }
    }

    persist_session(state, conn).await;
    if is_first_message {
        set_title_from(state, conn, content).await;
    }
}

async fn handle_confirm(
    state: &AppState,
    conn: &mut ClientConn,
    action_id: &str,
    out: &mpsc::UnboundedSender<ServerMessage>,
) {
    let Some(session) = conn.session.as_mut() else {
        push_error(out, "no active session; send new_conversation first");
        return;
    };

    match state.pending.confirm(&conn.user_id, action_id).await {
        Ok(action) => {
            let result = state.engine.execute_confirmed(&action).await;
            let (result_content, is_error, text) = render_confirmed(&action, &result);

            if !session.has_tool_result(&action.tool_use_id) {
                session.push_tool_results(vec![ContentBlock::tool_result(
                    action.tool_use_id.as_str(),
                    result_content.as_str(),
                    is_error,
                )]);
            }
            session.push_assistant_text(text.as_str());
            if conn.pending.as_ref().is_some_and(|p| p.id == action.id) {
                conn.pending = None;
            }

            push(out, ServerMessage::Text { content: text });
            push(out, ServerMessage::Complete { token_usage: None });
        }
        Err(_) => {
            // Missing, expired, or already claimed: apologize either way.
            if let Some(stale) = conn.pending.take_if(|p| p.id == action_id) {
                if !session.has_tool_result(&stale.tool_use_id) {
                    session.push_tool_results(vec![ContentBlock::tool_result(
                        stale.tool_use_id.as_str(),
                        "error: action expired",
                        true,
                    )]);
                }
            }
            session.push_assistant_text(EXPIRED_APOLOGY);
            push(out, ServerMessage::Text {
                content: EXPIRED_APOLOGY.to_string(),
            });
            push(out, ServerMessage::Complete { token_usage: None });
        }
    }

    persist_session(state, conn).await;
}

async fn handle_cancel(
    state: &AppState,
    conn: &mut ClientConn,
    action_id: &str,
    out: &mpsc::UnboundedSender<ServerMessage>,
) {
    let Some(session) = conn.session.as_mut() else {
        push_error(out, "no active session; send new_conversation first");
        return;
    };

    if let Err(e) = state.pending.cancel(&conn.user_id, action_id).await {
        tracing::debug!(error = %e, action_id, "cancel on missing action");
    }

    if let Some(stale) = conn.pending.take_if(|p| p.id == action_id) {
        if !session.has_tool_result(&stale.tool_use_id) {
            session.push_tool_results(vec![ContentBlock::tool_result(
                stale.tool_use_id.as_str(),
                "Cancelled by user",
                true,
            )]);
        }
    }
    session.push_assistant_text(CANCELLED_TEXT);

    push(out, ServerMessage::Text {
        content: CANCELLED_TEXT.to_string(),
    });
    push(out, ServerMessage::Complete { token_usage: None });

    persist_session(state, conn).await;
}

// ── Helpers ──────────────────────────────────────────────────────────

fn render_confirmed(
    action: &PendingAction,
    result: &Result<ToolOutput>,
) -> (String, bool, String) {
    match result {
        Ok(output) if output.success => (
            output.data.to_string(),
            false,
            format!("Done — {}. Result: {}", action.summary, output.data),
        ),
        Ok(output) => {
            let message = output
                .error
                .clone()
                .unwrap_or_else(|| "tool failed".to_string());
            (
                format!("error: {message}"),
                true,
                format!("Sorry, that didn't go through: {message}"),
            )
        }
        Err(e) => (
            format!("error: {e}"),
            true,
            format!("Sorry, that didn't go through: {e}"),
        ),
    }
}

/// Append session messages past the high-water mark to the store.
async fn persist_session(state: &AppState, conn: &mut ClientConn) {
    let Some(session) = &conn.session else { return };
    for message in &session.messages()[conn.persisted..] {
        if let Err(e) = state
            .conversations
            .append(&session.conversation_id, message.clone())
            .await
        {
            tracing::warn!(error = %e, conversation_id = %session.conversation_id, "persist failed");
            return;
        }
        conn.persisted += 1;
    }
}

/// Title an untitled conversation from its first user message.
async fn set_title_from(state: &AppState, conn: &ClientConn, content: &str) {
    let Some(session) = &conn.session else { return };
    let title: String = content.chars().take(60).collect();
    if title.is_empty() {
        return;
    }
    if let Err(e) = state
        .conversations
        .set_title(&session.conversation_id, &title)
        .await
    {
        tracing::debug!(error = %e, "set_title failed");
    }
}

fn push(out: &mpsc::UnboundedSender<ServerMessage>, msg: ServerMessage) {
    let _ = out.send(msg);
}

fn push_error(out: &mpsc::UnboundedSender<ServerMessage>, content: &str) {
    push(out, ServerMessage::Error {
        content: content.to_string(),
    });
}
