//! Built-in agent tools: filesystem access, shell execution, memory, and
//! skill management — each required to pass the Operation Gate before it
//! takes effect.
//!
//! Grounded on the original reference implementation's `create_agent` tool
//! definitions: `read`/`write`/`edit`/`apply_patch` are confined to the
//! session's data directory; `exec`/`bash` run inside the session's sandbox
//! container; `read_memory`/`write_memory` delegate to the memory store
//! (only the write is gated); `list_skills`/`activate_skill` delegate to the
//! skill catalog and sandbox manager.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::ai::LLMProvider;
use crate::gate::{self, Evaluator, GateVerdict};
use crate::memory::MemoryStore;
use crate::model::{OperationClassification, Rule, SessionState};
use crate::sandbox::{SandboxManager, SkillRegistry};
use crate::session::SessionStore;

/// Everything a tool call needs: its owning session, and handles to every
/// subsystem a tool might touch.
pub struct ToolContext {
    pub session_id: String,
    pub data_dir: PathBuf,
    pub classifier_provider: Arc<dyn LLMProvider>,
    pub evaluator: Arc<Evaluator>,
    pub rules: Arc<Vec<Rule>>,
    pub sandbox: Arc<SandboxManager>,
    pub skills: Arc<SkillRegistry>,
    pub memory: Arc<MemoryStore>,
    pub sessions: Arc<SessionStore>,
}

/// What happened when a tool call was dispatched.
pub enum ToolOutcome {
    /// The tool ran and produced a result string for the model to read.
    Completed(String),
    /// A `mode = block` rule's effect applied; the call never ran.
    Blocked { classification: OperationClassification, descriptions: Vec<String> },
    /// A `mode = approve` rule's effect applied and this call was not
    /// pre-approved; the caller must surface an approval request and retry
    /// with `approved = true` once the user answers.
    NeedsApproval { classification: OperationClassification, triggered_rules: Vec<String>, descriptions: Vec<String>, detail: String },
}

/// Gate `tool_name(args)` for `session_state`, unless `approved` (i.e. this
/// is a resume after the user already approved it), then dispatch to the
/// tool's implementation.
///
/// Gating mutates `session_state.activated_rules` in place whenever a
/// rule's trigger becomes newly met (see [`crate::gate::check_rules`]) and
/// persists it immediately, regardless of whether this particular call
/// ends up blocked, needing approval, or running straight through —
/// activation records that the trigger condition became true, not that
/// this specific operation succeeded.
pub async fn execute_tool(
    ctx: &ToolContext,
    session_state: &mut SessionState,
    tool_name: &str,
    args: &Value,
    approved: bool,
) -> Result<ToolOutcome, String> {
    if !approved {
        let verdict = gate_call(ctx, session_state, tool_name, args).await.map_err(|e| e.to_string())?;
        if !verdict.check.newly_activated_rules.is_empty() {
            ctx.sessions.save_state(session_state).await.map_err(|e| e.to_string())?;
        }
        if verdict.is_blocked() {
            return Ok(ToolOutcome::Blocked {
                classification: verdict.classification,
                descriptions: verdict.check.descriptions,
            });
        }
        if verdict.needs_approval() {
            let detail = gate::format_call_detail(tool_name, args);
            return Ok(ToolOutcome::NeedsApproval {
                classification: verdict.classification,
                triggered_rules: verdict.check.triggered_rules,
                descriptions: verdict.check.descriptions,
                detail,
            });
        }
    }

    let output = dispatch(ctx, tool_name, args).await?;
    Ok(ToolOutcome::Completed(output))
}

async fn gate_call(
    ctx: &ToolContext,
    session_state: &mut SessionState,
    tool_name: &str,
    args: &Value,
) -> Result<GateVerdict, crate::error::GateError> {
    gate::gate(&ctx.classifier_provider, &ctx.evaluator, &ctx.rules, session_state, tool_name, args, "").await
}

async fn dispatch(ctx: &ToolContext, tool_name: &str, args: &Value) -> Result<String, String> {
    match tool_name {
        "list_skills" => list_skills(ctx).await,
        "activate_skill" => activate_skill(ctx, args).await,
        "read" => read_file(ctx, args).await,
        "write" => write_file(ctx, args).await,
        "edit" => edit_file(ctx, args).await,
        "apply_patch" => apply_patch(ctx, args).await,
        "exec" | "bash" => exec_command(ctx, args).await,
        "read_memory" => read_memory(ctx, args).await,
        "write_memory" => write_memory(ctx, args).await,
        other => Err(format!("unknown tool '{other}'")),
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key).and_then(|v| v.as_str()).ok_or_else(|| format!("missing required argument '{key}'"))
}

async fn list_skills(ctx: &ToolContext) -> Result<String, String> {
    let skills = ctx.skills.scan().await.map_err(|e| e.to_string())?;
    if skills.is_empty() {
        return Ok("No skills are currently installed.".to_string());
    }
    let lines: Vec<String> = skills.iter().map(|s| format!("- {}: {}", s.name, s.description)).collect();
    Ok(lines.join("\n"))
}

async fn activate_skill(ctx: &ToolContext, args: &Value) -> Result<String, String> {
    let name = arg_str(args, "name")?;
    ctx.sandbox.activate_skill(&ctx.session_id, name).await.map_err(|e| e.to_string())?;
    ctx.skills.full_instructions(name).await.map_err(|e| e.to_string())
}

fn resolve_in_workspace(ctx: &ToolContext, relative: &str) -> Result<PathBuf, String> {
    SessionStore::resolve_confined(&ctx.data_dir, relative)
}

async fn read_file(ctx: &ToolContext, args: &Value) -> Result<String, String> {
    let path = resolve_in_workspace(ctx, arg_str(args, "path")?)?;
    tokio::fs::read_to_string(&path).await.map_err(|e| format!("could not read file: {e}"))
}

async fn write_file(ctx: &ToolContext, args: &Value) -> Result<String, String> {
    let path = resolve_in_workspace(ctx, arg_str(args, "path")?)?;
    let content = arg_str(args, "content")?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
    }
    tokio::fs::write(&path, content).await.map_err(|e| format!("could not write file: {e}"))?;
    Ok(format!("Wrote {} bytes.", content.len()))
}

/// Replace exactly one occurrence of `old_string` with `new_string`,
/// returning a unified diff-style summary. Errors if the occurrence count
/// is not exactly one, mirroring the original tool's strictness.
async fn edit_file(ctx: &ToolContext, args: &Value) -> Result<String, String> {
    let path = resolve_in_workspace(ctx, arg_str(args, "path")?)?;
    let old_string = arg_str(args, "old_string")?;
    let new_string = arg_str(args, "new_string")?;

    let content = tokio::fs::read_to_string(&path).await.map_err(|e| format!("could not read file: {e}"))?;
    let occurrences = content.matches(old_string).count();
    if occurrences != 1 {
        return Err(format!(
            "expected exactly one occurrence of old_string, found {occurrences}"
        ));
    }

    let updated = content.replacen(old_string, new_string, 1);
    tokio::fs::write(&path, &updated).await.map_err(|e| format!("could not write file: {e}"))?;
    Ok(format!("Replaced 1 occurrence in {}.", path.display()))
}

/// Apply a unified diff patch to a file by rewriting it wholesale. The
/// "patch" here is the full new file content, matching a common
/// `apply_patch`-style tool contract where the model supplies the complete
/// replacement text rather than a literal diff to parse.
async fn apply_patch(ctx: &ToolContext, args: &Value) -> Result<String, String> {
    let path = resolve_in_workspace(ctx, arg_str(args, "path")?)?;
    let content = arg_str(args, "content")?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
    }
    tokio::fs::write(&path, content).await.map_err(|e| format!("could not apply patch: {e}"))?;
    Ok(format!("Applied patch to {}.", path.display()))
}

async fn exec_command(ctx: &ToolContext, args: &Value) -> Result<String, String> {
    let command = arg_str(args, "command")?;
    let timeout_secs = args.get("timeout").and_then(|v| v.as_u64()).unwrap_or(30);

    let result = ctx
        .sandbox
        .exec_command(&ctx.session_id, vec!["sh".to_string(), "-c".to_string(), command.to_string()], timeout_secs)
        .await
        .map_err(|e| e.to_string())?;

    Ok(result.output)
}

async fn read_memory(ctx: &ToolContext, args: &Value) -> Result<String, String> {
    match args.get("query").and_then(|v| v.as_str()) {
        Some(query) => {
            let matches = ctx.memory.search(query).await?;
            if matches.is_empty() {
                return Ok("No matches.".to_string());
            }
            Ok(matches.into_iter().map(|(file, line)| format!("{file}: {line}")).collect::<Vec<_>>().join("\n"))
        }
        None => {
            let path = arg_str(args, "path")?;
            ctx.memory.read(path).await
        }
    }
}

async fn write_memory(ctx: &ToolContext, args: &Value) -> Result<String, String> {
    let path = arg_str(args, "path")?;
    let content = arg_str(args, "content")?;
    ctx.memory.write(path, content).await?;
    Ok(format!("Wrote {} bytes to memory/{path}.", content.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_in_workspace_rejects_escape() {
        let path_err = SessionStore::resolve_confined(std::path::Path::new("/data"), "../etc/passwd");
        assert!(path_err.is_err());
    }
}
