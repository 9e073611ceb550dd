//! User Channel Protocol: the bidirectional JSON frame stream between a
//! client (CLI REPL or other front end) and one session's turn execution.
//!
//! Grounded on the original reference implementation's `ws_models.py` for
//! the exact envelope shapes, and on the teacher's tagged-enum event idiom
//! (`#[serde(tag = "type")]`) for how they're encoded on the wire.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::model::OperationClassification;
use crate::orchestrator::{
    self, ApprovalRequest as OrchApprovalRequest, ApprovalResolver, ToolCallObserver, ToolContext, TurnOutcome,
};
use crate::proxy::{PendingApprovals, ProxyApprovalNotifier};
use crate::sandbox::DomainDecision;

/// Messages the client sends to the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    UserMessage { content: String },
    ApprovalResponse { tool_call_id: String, approved: bool },
    ProxyApprovalResponse { request_id: String, decision: DomainDecision },
}

/// Messages the server sends to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    TokenChunk { content: String },
    ToolCallInfo { tool: String, args: Value, detail: String },
    ApprovalRequest {
        tool_call_id: String,
        tool: String,
        args: Value,
        classification: OperationClassification,
        triggered_rules: Vec<String>,
        descriptions: Vec<String>,
    },
    ProxyApprovalRequest { request_id: String, domain: String, command: Option<String> },
    Done { content: String },
    CommandResult { command: String, data: Value },
    ErrorMessage { detail: String },
}

/// Registry of currently-connected sessions' outbound senders, so the
/// Egress Proxy can push an unsolicited `ProxyApprovalRequest` to whichever
/// channel owns a session, without holding a direct reference to it.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    senders: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<ServerMessage>>>>,
    proxy_waiters: Arc<Mutex<HashMap<String, oneshot::Sender<DomainDecision>>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, session_id: &str, sender: mpsc::UnboundedSender<ServerMessage>) {
        self.senders.lock().await.insert(session_id.to_string(), sender);
    }

    async fn unregister(&self, session_id: &str) {
        self.senders.lock().await.remove(session_id);
    }

    pub async fn resolve_proxy_approval(&self, request_id: &str, decision: DomainDecision) {
        if let Some(tx) = self.proxy_waiters.lock().await.remove(request_id) {
            let _ = tx.send(decision);
        }
    }
}

#[async_trait]
impl ProxyApprovalNotifier for ChannelRegistry {
    async fn notify_domain_approval(&self, session_id: &str, request_id: &str, domain: &str, command: Option<&str>) {
        let senders = self.senders.lock().await;
        if let Some(sender) = senders.get(session_id) {
            let _ = sender.send(ServerMessage::ProxyApprovalRequest {
                request_id: request_id.to_string(),
                domain: domain.to_string(),
                command: command.map(str::to_string),
            });
        }
        // If the session has no live connection, the proxy's own timeout
        // will resolve this as a denial — there is nobody to ask.
    }
}

/// Streams tool-call notices to the client, but only the `detail`
/// annotation when the session currently has verbose display enabled —
/// `verbose` is shared with the connection loop and refreshed every turn
/// from the session's persisted flag.
struct WsObserver {
    sender: mpsc::UnboundedSender<ServerMessage>,
    verbose: Arc<AtomicBool>,
}

#[async_trait]
impl ToolCallObserver for WsObserver {
    async fn on_tool_call(&self, tool: &str, args: &Value, detail: &str) {
        if !self.verbose.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.sender.send(ServerMessage::ToolCallInfo {
            tool: tool.to_string(),
            args: args.clone(),
            detail: detail.to_string(),
        });
    }
}

/// Collects approval responses from the client for one round of pending
/// tool calls, denying everything still outstanding if the client sends
/// anything other than a matching `ApprovalResponse` or disconnects.
struct WsApprovalResolver {
    incoming: Arc<Mutex<mpsc::UnboundedReceiver<ClientMessage>>>,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

#[async_trait]
impl ApprovalResolver for WsApprovalResolver {
    async fn request_approvals(&self, requests: Vec<OrchApprovalRequest>) -> HashMap<String, bool> {
        let mut pending: std::collections::HashSet<String> = requests.iter().map(|r| r.tool_call_id.clone()).collect();
        let mut decisions = HashMap::new();

        for request in &requests {
            let _ = self.sender.send(ServerMessage::ApprovalRequest {
                tool_call_id: request.tool_call_id.clone(),
                tool: request.tool.clone(),
                args: request.args.clone(),
                classification: request.classification.clone(),
                triggered_rules: request.triggered_rules.clone(),
                descriptions: request.descriptions.clone(),
            });
        }

        let mut incoming = self.incoming.lock().await;
        while !pending.is_empty() {
            match incoming.recv().await {
                Some(ClientMessage::ApprovalResponse { tool_call_id, approved }) if pending.remove(&tool_call_id) => {
                    decisions.insert(tool_call_id, approved);
                }
                Some(_) => {
                    // Any other message while approvals are outstanding
                    // interrupts the batch: deny everything still pending.
                    break;
                }
                None => break,
            }
        }

        for tool_call_id in pending {
            decisions.insert(tool_call_id, false);
        }
        decisions
    }
}

/// Drive one WebSocket connection for `session_id` until it closes.
///
/// `dispatch_command` handles recognized slash commands (`/help`, `/rules`,
/// …) and is supplied by the gateway layer, which has access to the rule
/// set, sandbox manager, and usage tracker needed to answer them.
///
/// `turn_lock` serializes this session's turns against every other
/// connection attached to it; it is acquired fresh for each turn (including
/// its approval round-trip) rather than held for the connection's whole
/// lifetime, so a second concurrent connection to the same session only
/// blocks for the duration of whichever turn is in flight. `pending_approvals`
/// is denied wholesale for this session on disconnect, so a mid-turn
/// dropout resolves any outstanding proxy approval immediately instead of
/// leaving it to time out.
#[allow(clippy::too_many_arguments)]
pub async fn run_connection<F, Fut>(
    socket: WebSocket,
    session_id: String,
    registry: ChannelRegistry,
    ctx: Arc<ToolContext>,
    initial_session_state: crate::model::SessionState,
    turn_lock: Arc<Mutex<()>>,
    pending_approvals: PendingApprovals,
    main_provider: Arc<dyn crate::ai::LLMProvider>,
    max_iterations: u32,
    mut dispatch_command: F,
) where
    F: FnMut(String, Vec<String>) -> Fut + Send,
    Fut: std::future::Future<Output = Option<Value>> + Send,
{
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<ClientMessage>();
    registry.register(&session_id, out_tx.clone()).await;

    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else { continue };
            if ws_sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let incoming = Arc::new(Mutex::new(in_rx));
    let resolver = WsApprovalResolver { incoming: Arc::clone(&incoming), sender: out_tx.clone() };
    let verbose = Arc::new(AtomicBool::new(initial_session_state.verbose));
    let observer = WsObserver { sender: out_tx.clone(), verbose: Arc::clone(&verbose) };

    loop {
        let raw = match ws_stream.next().await {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        };

        let parsed: Result<ClientMessage, _> = serde_json::from_str(&raw);
        let client_message = match parsed {
            Ok(m) => m,
            Err(e) => {
                let _ = out_tx.send(ServerMessage::ErrorMessage { detail: format!("malformed message: {e}") });
                continue;
            }
        };

        match client_message {
            ClientMessage::UserMessage { content } if content.starts_with('/') => {
                let mut parts = content.split_whitespace();
                let command = parts.next().unwrap_or("").trim_start_matches('/').to_string();
                let args: Vec<String> = parts.map(str::to_string).collect();

                if command == "quit" || command == "exit" {
                    break;
                }

                match dispatch_command(command.clone(), args).await {
                    Some(data) => {
                        if command == "verbose" {
                            if let Some(v) = data.get("verbose").and_then(Value::as_bool) {
                                verbose.store(v, Ordering::Relaxed);
                            }
                        }
                        let event = crate::model::HistoryEvent::Command { command: command.clone(), data: data.clone() };
                        let _ = append_history(&ctx, &session_id, event).await;
                        let _ = out_tx.send(ServerMessage::CommandResult { command, data });
                    }
                    None => {
                        let _ = out_tx.send(ServerMessage::ErrorMessage { detail: format!("unrecognized command: /{command}") });
                    }
                }
            }
            ClientMessage::UserMessage { content } => {
                // Hold the session's turn lock for exactly this turn,
                // including its approval round-trip, so a second connection
                // to the same session only waits for this turn to finish
                // rather than for this whole connection to close.
                let _turn_guard = turn_lock.lock().await;

                // Reload session state fresh rather than trusting the
                // snapshot taken at connection start: another connection, or
                // a `/disable`-style command on this one, may have changed
                // it since.
                let mut session_state = match ctx.sessions.resume_session(&session_id).await {
                    Ok(Some(s)) => s,
                    _ => {
                        let _ = out_tx.send(ServerMessage::ErrorMessage { detail: "session state is no longer available".to_string() });
                        continue;
                    }
                };
                verbose.store(session_state.verbose, Ordering::Relaxed);

                let system_prompt = orchestrator::build_system_prompt(&ctx, &session_state).await;
                let tools = orchestrator::builtin_tools();
                let history = load_history_as_messages(&ctx, &session_id).await;

                let outcome = orchestrator::run_agent_turn(
                    &ctx,
                    &main_provider,
                    &mut session_state,
                    &system_prompt,
                    &history,
                    &content,
                    tools,
                    &resolver,
                    &observer,
                    max_iterations,
                )
                .await;

                match outcome {
                    TurnOutcome::Done { content: reply, usage } => {
                        let _ = append_history(&ctx, &session_id, crate::model::HistoryEvent::User { content: content.clone() }).await;
                        let _ = append_history(&ctx, &session_id, crate::model::HistoryEvent::Assistant { content: reply.clone() }).await;
                        if let Ok(mut tracker) = ctx.sessions.load_usage(&session_id).await {
                            tracker.record(main_provider.provider_name(), "agent", usage);
                            let _ = ctx.sessions.save_usage(&session_id, &tracker).await;
                        }
                        session_state.last_active = chrono::Utc::now();
                        let _ = ctx.sessions.save_state(&session_state).await;
                        let _ = out_tx.send(ServerMessage::Done { content: reply });
                    }
                    TurnOutcome::Error(detail) => {
                        let _ = out_tx.send(ServerMessage::ErrorMessage { detail });
                    }
                }
            }
            other => {
                // Approval / proxy-approval responses arriving outside an
                // active wait are forwarded to whoever is waiting.
                if let ClientMessage::ProxyApprovalResponse { request_id, decision } = &other {
                    registry.resolve_proxy_approval(request_id, *decision).await;
                }
                let _ = in_tx.send(other);
            }
        }
    }

    registry.unregister(&session_id).await;
    pending_approvals.deny_session(&session_id).await;
    drop(out_tx);
    let _ = writer_task.await;
}

async fn append_history(ctx: &ToolContext, session_id: &str, event: crate::model::HistoryEvent) -> std::io::Result<()> {
    let mut history = ctx.sessions.load_history(session_id).await?;
    history.push(event);
    ctx.sessions.save_history(session_id, &history).await
}

/// Load a session's persisted transcript as model messages, dropping
/// `/command` events — they're not part of the agent's conversation.
async fn load_history_as_messages(ctx: &ToolContext, session_id: &str) -> Vec<crate::ai::Message> {
    let Ok(history) = ctx.sessions.load_history(session_id).await else {
        return Vec::new();
    };
    history
        .into_iter()
        .filter_map(|event| match event {
            crate::model::HistoryEvent::User { content } => Some(crate::ai::Message::user(content)),
            crate::model::HistoryEvent::Assistant { content } => Some(crate::ai::Message::assistant(content)),
            crate::model::HistoryEvent::Command { .. } => None,
        })
        .collect()
}
