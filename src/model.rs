//! Shared data types for rules, classification, session state, and usage.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a [`Rule`] is enforced once its effect applies to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMode {
    Approve,
    Block,
}

/// A natural-language trigger/effect predicate evaluated by the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub trigger: String,
    pub effect: String,
    #[serde(default = "default_rule_mode")]
    pub mode: RuleMode,
    #[serde(default)]
    pub description: String,
}

fn default_rule_mode() -> RuleMode {
    RuleMode::Approve
}

impl Rule {
    /// `true` if this rule's trigger is the literal (case-insensitive) token `always`.
    pub fn trigger_is_always(&self) -> bool {
        self.trigger.trim().eq_ignore_ascii_case("always")
    }
}

/// Top-level file shape for `rules.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Coarse category an operation falls into, as decided by the Classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    ReadLocal,
    WriteLocal,
    ReadExternal,
    WriteExternal,
    ReadSensitive,
    WriteSensitive,
    Execute,
    CredentialAccess,
    MemoryRead,
    MemoryWrite,
    SkillModify,
}

/// The Classifier's output for one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationClassification {
    pub operation_type: OperationType,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

/// Result of running the Rule Engine over one classification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleCheckResult {
    pub needs_approval: bool,
    pub blocked: bool,
    pub triggered_rules: Vec<String>,
    pub newly_activated_rules: Vec<String>,
    pub descriptions: Vec<String>,
}

/// Per-session durable state: rule activation, credential/operation approvals.
///
/// Invariants (enforced by the gate and session store, never violated):
/// `activated_rules ∩ disabled_rules = ∅`; `activated_rules` only grows
/// within a session (no auto-deactivation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default = "default_channel_type")]
    pub channel_type: String,
    #[serde(default)]
    pub channel_ref: String,
    #[serde(default)]
    pub activated_rules: Vec<String>,
    #[serde(default)]
    pub disabled_rules: Vec<String>,
    #[serde(default)]
    pub approved_credentials: Vec<String>,
    #[serde(default)]
    pub approved_operations: Vec<String>,
    /// Whether this session's channel should receive a `ToolCallInfo`
    /// annotation for every tool call, not just ones needing approval.
    #[serde(default)]
    pub verbose: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

fn default_channel_type() -> String {
    "cli".to_string()
}

impl SessionState {
    pub fn new(session_id: String, channel_type: String, channel_ref: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            channel_type,
            channel_ref,
            activated_rules: Vec::new(),
            disabled_rules: Vec::new(),
            approved_credentials: Vec::new(),
            approved_operations: Vec::new(),
            verbose: false,
            created_at: now,
            last_active: now,
        }
    }

    /// Flip the verbose display flag, returning its new value.
    pub fn toggle_verbose(&mut self) -> bool {
        self.verbose = !self.verbose;
        self.verbose
    }

    /// Activate `rule_id` for the remainder of this session, idempotently.
    pub fn activate_rule(&mut self, rule_id: &str) {
        if !self.activated_rules.iter().any(|r| r == rule_id) {
            self.activated_rules.push(rule_id.to_string());
        }
    }

    pub fn disable_rule(&mut self, rule_id: &str) {
        if !self.disabled_rules.iter().any(|r| r == rule_id) {
            self.disabled_rules.push(rule_id.to_string());
        }
    }

    pub fn enable_rule(&mut self, rule_id: &str) {
        self.disabled_rules.retain(|r| r != rule_id);
    }
}

/// Additive per-model/per-category token counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub requests: u64,
}

impl UsageCounters {
    pub fn add(&mut self, other: &UsageCounters) {
        self.input += other.input;
        self.output += other.output;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
        self.requests += other.requests;
    }
}

/// Durable, additive usage accounting for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageTracker {
    pub models: HashMap<String, UsageCounters>,
    pub categories: HashMap<String, UsageCounters>,
}

impl UsageTracker {
    pub fn record(&mut self, model: &str, category: &str, counters: UsageCounters) {
        self.models.entry(model.to_string()).or_default().add(&counters);
        self.categories.entry(category.to_string()).or_default().add(&counters);
    }

    pub fn total_input(&self) -> u64 {
        self.models.values().map(|c| c.input).sum()
    }

    pub fn total_output(&self) -> u64 {
        self.models.values().map(|c| c.output).sum()
    }
}

/// One entry in a skill catalog scan (frontmatter only; progressive disclosure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub path: std::path::PathBuf,
}

/// One conversational event persisted to a session's `events.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum HistoryEvent {
    User { content: String },
    Assistant { content: String },
    Command {
        command: String,
        data: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_always_case_insensitive() {
        let r = Rule {
            id: "r1".into(),
            trigger: " ALWAYS ".into(),
            effect: "x".into(),
            mode: RuleMode::Approve,
            description: String::new(),
        };
        assert!(r.trigger_is_always());
    }

    #[test]
    fn activate_rule_is_idempotent() {
        let mut s = SessionState::new("abc123456789".into(), "cli".into(), "".into());
        s.activate_rule("r1");
        s.activate_rule("r1");
        assert_eq!(s.activated_rules, vec!["r1".to_string()]);
    }

    #[test]
    fn usage_tracker_accumulates() {
        let mut t = UsageTracker::default();
        t.record("gpt-4o", "agent", UsageCounters { input: 10, output: 5, ..Default::default() });
        t.record("gpt-4o", "agent", UsageCounters { input: 3, output: 1, ..Default::default() });
        assert_eq!(t.total_input(), 13);
        assert_eq!(t.total_output(), 6);
    }
}
