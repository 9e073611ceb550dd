//! Carapace CLI — interactive REPL client for the chat WebSocket, plus
//! thin session-management subcommands over the REST API.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser, Debug)]
#[command(
    name = "carapace",
    about = "Carapace agent gateway CLI",
    version,
    long_about = "Client for the carapace-server gateway.\n\
                  Run without a subcommand to enter the interactive REPL."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Gateway host:port. Defaults to CARAPACE_SERVER_HOST/CARAPACE_SERVER_PORT or 127.0.0.1:8420.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Resume an existing session id instead of creating a new one.
    #[arg(long, global = true)]
    session: Option<String>,

    /// Print raw server JSON frames instead of formatted chat output.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List known sessions.
    Sessions,
    /// Create a new session and print its id.
    New,
    /// Show a session's transcript.
    History {
        session_id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a session and tear down its sandbox.
    Delete { session_id: String },
}

struct GatewayClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl GatewayClient {
    fn new(host: String, token: String) -> Self {
        Self { base_url: format!("http://{host}"), token, client: reqwest::Client::new() }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn list_sessions(&self) -> reqwest::Result<Value> {
        self.client
            .get(format!("{}/sessions", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .json::<Value>()
            .await
    }

    async fn create_session(&self) -> reqwest::Result<Value> {
        self.client
            .post(format!("{}/sessions", self.base_url))
            .header("Authorization", self.auth_header())
            .json(&json!({ "channel_ref": "cli" }))
            .send()
            .await?
            .json::<Value>()
            .await
    }

    async fn history(&self, session_id: &str, limit: Option<usize>) -> reqwest::Result<Value> {
        let mut url = format!("{}/sessions/{session_id}/history", self.base_url);
        if let Some(limit) = limit {
            url.push_str(&format!("?limit={limit}"));
        }
        self.client.get(url).header("Authorization", self.auth_header()).send().await?.json::<Value>().await
    }

    async fn delete_session(&self, session_id: &str) -> reqwest::Result<()> {
        self.client
            .delete(format!("{}/sessions/{session_id}", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        Ok(())
    }

    fn ws_url(&self, session_id: &str) -> String {
        format!("{}/chat/{session_id}?token={}", self.base_url.replacen("http://", "ws://", 1), self.token)
    }
}

fn default_host() -> String {
    let host = std::env::var("CARAPACE_SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("CARAPACE_SERVER_PORT").unwrap_or_else(|_| "8787".to_string());
    format!("{host}:{port}")
}

fn data_dir() -> PathBuf {
    std::env::var("CARAPACE_DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./data"))
}

fn read_token() -> Option<String> {
    let path = data_dir().join("server.token");
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn print_value(value: &Value, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    } else {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}

fn print_err(msg: &str) {
    eprintln!("\x1b[31merror\x1b[0m: {msg}");
}

async fn require_client(host: &Option<String>) -> Option<GatewayClient> {
    let Some(token) = read_token() else {
        print_err("no server.token found — is carapace-server running with the same CARAPACE_DATA_DIR?");
        return None;
    };
    let host = host.clone().unwrap_or_else(default_host);
    Some(GatewayClient::new(host, token))
}

async fn dispatch(command: &Commands, host: &Option<String>, json_mode: bool) {
    let Some(client) = require_client(host).await else { return };
    match command {
        Commands::Sessions => match client.list_sessions().await {
            Ok(v) => print_value(&v, json_mode),
            Err(e) => print_err(&format!("sessions: {e}")),
        },
        Commands::New => match client.create_session().await {
            Ok(v) => print_value(&v, json_mode),
            Err(e) => print_err(&format!("new: {e}")),
        },
        Commands::History { session_id, limit } => match client.history(session_id, *limit).await {
            Ok(v) => print_value(&v, json_mode),
            Err(e) => print_err(&format!("history: {e}")),
        },
        Commands::Delete { session_id } => match client.delete_session(session_id).await {
            Ok(()) => println!("deleted {session_id}"),
            Err(e) => print_err(&format!("delete: {e}")),
        },
    }
}

/// Interactive REPL: resolve or create a session, connect its chat
/// WebSocket, and forward stdin lines as `user_message` frames while
/// printing streamed server frames.
async fn run_repl(host: Option<String>, session: Option<String>, json_mode: bool) {
    let Some(client) = require_client(&host).await else { return };

    let session_id = match session {
        Some(id) => id,
        None => match client.create_session().await {
            Ok(v) => match v.get("session_id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => {
                    print_err("gateway did not return a session_id");
                    return;
                }
            },
            Err(e) => {
                print_err(&format!("could not create session: {e}"));
                return;
            }
        },
    };

    let is_tty = io::stdin().is_terminal();
    if is_tty {
        println!("carapace session {session_id}. Type /help for commands, /quit to exit.");
    }

    let ws_url = client.ws_url(&session_id);
    let (stream, _) = match connect_async(&ws_url).await {
        Ok(pair) => pair,
        Err(e) => {
            print_err(&format!("websocket connect failed: {e}"));
            return;
        }
    };
    let (mut write, mut read) = stream.split();

    let reader_task = tokio::spawn(async move {
        while let Some(Ok(Message::Text(text))) = read.next().await {
            let value: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
            if json_mode {
                print_value(&value, true);
                continue;
            }
            render_frame(&value);
        }
    });

    let stdin = io::stdin();
    loop {
        if is_tty {
            print!("> ");
            io::stdout().flush().unwrap_or_default();
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                print_err(&format!("read error: {e}"));
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let frame = json!({ "type": "user_message", "content": trimmed }).to_string();
        if write.send(Message::Text(frame)).await.is_err() {
            break;
        }
        if trimmed == "/quit" || trimmed == "/exit" {
            break;
        }
    }

    let _ = write.close().await;
    reader_task.abort();
}

fn render_frame(value: &Value) {
    match value.get("type").and_then(Value::as_str) {
        Some("token_chunk") => {
            if let Some(content) = value.get("content").and_then(Value::as_str) {
                print!("{content}");
                io::stdout().flush().unwrap_or_default();
            }
        }
        Some("done") => {
            if let Some(content) = value.get("content").and_then(Value::as_str) {
                println!("{content}");
            }
        }
        Some("tool_call_info") => {
            if let Some(detail) = value.get("detail").and_then(Value::as_str) {
                println!("[tool] {detail}");
            }
        }
        Some("approval_request") => {
            println!("[approval needed] {value}");
        }
        Some("proxy_approval_request") => {
            println!("[network approval needed] {value}");
        }
        Some("error_message") => {
            if let Some(detail) = value.get("detail").and_then(Value::as_str) {
                print_err(detail);
            }
        }
        Some("command_result") => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
        }
        _ => println!("{value}"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match &cli.command {
        Some(command) => dispatch(command, &cli.host, cli.json).await,
        None => run_repl(cli.host, cli.session, cli.json).await,
    }
}
