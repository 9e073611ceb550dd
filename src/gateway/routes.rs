//! REST session CRUD plus the WebSocket chat upgrade route.
//!
//! Grounded on the original reference implementation's REST surface:
//! `POST/GET /sessions`, `GET/DELETE /sessions/{id}`,
//! `GET /sessions/{id}/history?limit=N`, and `GET /chat/{session_id}`
//! (closing with code 4004 if the session doesn't exist).

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::channel;

use super::daemon::AppState;

pub fn router(state: AppState) -> Router {
    let token = state.token.clone();

    let protected = Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/history", get(get_history))
        .route_layer(middleware::from_fn_with_state(token, super::auth::require_bearer_token));

    Router::new()
        .route("/chat/{session_id}", get(chat_ws))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    channel_ref: String,
}

async fn create_session(State(state): State<AppState>, Json(req): Json<CreateSessionRequest>) -> Response {
    let channel_type = req.channel_type.as_deref().unwrap_or("api");
    match state.sessions.create_session(channel_type, &req.channel_ref).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_sessions(State(state): State<AppState>) -> Response {
    match state.sessions.list_sessions().await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.load_state(&id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let _ = state.sandbox.cleanup_session(&id).await;
    match state.sessions.delete_session(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_history(State(state): State<AppState>, Path(id): Path<String>, Query(query): Query<HistoryQuery>) -> Response {
    match state.sessions.load_history(&id).await {
        Ok(history) => {
            let limited = match query.limit {
                Some(limit) if history.len() > limit => history[history.len() - limit..].to_vec(),
                _ => history,
            };
            Json(limited).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct WsAuthQuery {
    token: Option<String>,
}

async fn chat_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WsAuthQuery>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let header_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if !super::auth::verify_ws_token(&state.token, query.token.as_deref(), header_token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let session_state = match state.sessions.resume_session(&session_id).await {
        Ok(Some(s)) => s,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        // `attach` only registers this connection against the session's
        // shared turn lock; the lock itself is acquired per turn inside
        // `run_connection`, not held for the whole connection.
        let turn_lock = state.session_locks.attach(&session_id).await;

        let ctx = Arc::new(state.tool_context(&session_id));
        let registry = state.channel_registry.clone();
        let pending_approvals = state.pending_approvals.clone();
        let main_provider = Arc::clone(&state.main_provider);
        let max_iterations = state.config.agent.max_iterations;
        let state_for_commands = state.clone();
        let session_id_for_commands = session_id.clone();

        channel::run_connection(
            socket,
            session_id.clone(),
            registry,
            ctx,
            session_state,
            turn_lock,
            pending_approvals,
            main_provider,
            max_iterations,
            move |command, args| {
                let state = state_for_commands.clone();
                let session_id = session_id_for_commands.clone();
                async move { dispatch_slash_command(&state, &session_id, &command, &args).await }
            },
        )
        .await;

        state.session_locks.detach(&session_id).await;
    })
    .into_response()
}

/// Handle one of the non-`quit`/`exit` slash commands. Returns `None` for
/// anything unrecognized.
async fn dispatch_slash_command(state: &AppState, session_id: &str, command: &str, args: &[String]) -> Option<Value> {
    match command {
        "help" => Some(json!({
            "commands": ["help", "rules", "disable", "enable", "session", "skills", "memory", "usage", "verbose", "quit", "exit"]
        })),
        "rules" => {
            let rules: Vec<Value> = state
                .rules
                .iter()
                .map(|r| {
                    let trigger = truncate(&r.trigger, 50);
                    json!({"id": r.id, "trigger": trigger, "mode": r.mode})
                })
                .collect();
            Some(json!({"rules": rules}))
        }
        "disable" => {
            let rule_id = args.first()?;
            let mut session = state.sessions.load_state(session_id).await.ok()??;
            session.disable_rule(rule_id);
            state.sessions.save_state(&session).await.ok()?;
            Some(json!({"disabled": rule_id}))
        }
        "enable" => {
            let rule_id = args.first()?;
            let mut session = state.sessions.load_state(session_id).await.ok()??;
            session.enable_rule(rule_id);
            state.sessions.save_state(&session).await.ok()?;
            Some(json!({"enabled": rule_id}))
        }
        "session" => {
            let session = state.sessions.load_state(session_id).await.ok()??;
            Some(json!({"session": session}))
        }
        "skills" => {
            let skills = state.skills.scan().await.ok()?;
            Some(json!({"skills": skills}))
        }
        "memory" => {
            let files = state.memory.list_files().await.ok()?;
            Some(json!({"files": files}))
        }
        "usage" => {
            let usage = state.sessions.load_usage(session_id).await.ok()?;
            Some(json!({"usage": usage}))
        }
        "verbose" => {
            let mut session = state.sessions.load_state(session_id).await.ok()??;
            let verbose = session.toggle_verbose();
            state.sessions.save_state(&session).await.ok()?;
            Some(json!({"verbose": verbose}))
        }
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max.saturating_sub(3)).collect();
        t.push_str("...");
        t
    }
}
