//! System prompt composition and the built-in tool catalog handed to the
//! model on every turn.
//!
//! Grounded on the original reference implementation's `build_system_prompt`
//! (AGENTS.md → SOUL.md → USER.md → skill catalog → session info, joined by
//! `"\n\n---\n\n"`) and `create_agent`'s tool definitions.

use serde_json::json;

use crate::ai::ToolSpec;
use crate::model::SessionState;

use super::tools::ToolContext;

/// Compose the system prompt: workspace identity files, then the skill
/// catalog, then a short session info block. Missing workspace files are
/// skipped silently (bootstrap/seeding of default content is out of scope).
pub async fn build_system_prompt(ctx: &ToolContext, session_state: &SessionState) -> String {
    let mut sections = Vec::new();

    for name in ["AGENTS.md", "SOUL.md", "USER.md"] {
        let path = ctx.data_dir.join(name);
        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            sections.push(content);
        }
    }

    if let Ok(skills) = ctx.skills.scan().await {
        if !skills.is_empty() {
            let mut catalog = String::from("Available skills:\n");
            for skill in &skills {
                catalog.push_str(&format!("- {}: {}\n", skill.name, skill.description));
            }
            sections.push(catalog);
        }
    }

    sections.push(format!(
        "Session: {} (channel: {}, started: {})",
        session_state.session_id, session_state.channel_type, session_state.created_at
    ));

    sections.join("\n\n---\n\n")
}

/// The fixed catalog of built-in tools offered to the model every turn.
pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "list_skills".to_string(),
            description: "List the names and short descriptions of installed skills.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: "activate_skill".to_string(),
            description: "Activate a skill by name, copying it into the session workspace and loading its full instructions.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: "read".to_string(),
            description: "Read a file from the session workspace.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: "write".to_string(),
            description: "Write (overwriting) a file in the session workspace.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"]
            }),
        },
        ToolSpec {
            name: "edit".to_string(),
            description: "Replace exactly one occurrence of old_string with new_string in a file.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "old_string": {"type": "string"},
                    "new_string": {"type": "string"}
                },
                "required": ["path", "old_string", "new_string"]
            }),
        },
        ToolSpec {
            name: "apply_patch".to_string(),
            description: "Replace a file's full contents with the given content.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"]
            }),
        },
        ToolSpec {
            name: "exec".to_string(),
            description: "Run a shell command inside the session's sandbox container.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"command": {"type": "string"}, "timeout": {"type": "integer"}},
                "required": ["command"]
            }),
        },
        ToolSpec {
            name: "bash".to_string(),
            description: "Alias for exec.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"command": {"type": "string"}, "timeout": {"type": "integer"}},
                "required": ["command"]
            }),
        },
        ToolSpec {
            name: "read_memory".to_string(),
            description: "Read a memory file, or search memory by substring query.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "query": {"type": "string"}}
            }),
        },
        ToolSpec {
            name: "write_memory".to_string(),
            description: "Write a memory file.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tools_cover_every_gated_operation() {
        let names: Vec<&str> = builtin_tools().iter().map(|t| t.name.as_str()).collect();
        for expected in ["read", "write", "edit", "apply_patch", "exec", "bash", "read_memory", "write_memory", "list_skills", "activate_skill"] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }
}
