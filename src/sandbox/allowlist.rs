//! Per-session domain allowlist: the state the Egress Proxy consults (via a
//! read-only snapshot) to decide whether to let a CONNECT/HTTP request through.
//!
//! Owned exclusively by the Sandbox Manager. The proxy never mutates this
//! directly — it asks the manager to authorize a domain, and the manager
//! updates the relevant bucket based on the user's decision.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// The user's answer to a domain approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainDecision {
    AllowOnce,
    AllowAllOnce,
    Allow15Min,
    AllowAll15Min,
    Deny,
}

/// A domain approval request awaiting a user decision, tracked by the
/// Sandbox Manager while the Egress Proxy blocks the connection open.
#[derive(Debug, Clone)]
pub struct DomainApprovalPending {
    pub request_id: String,
    pub session_id: String,
    pub domain: String,
    /// `None` for a CONNECT (HTTPS) request; `Some(method)` for plain HTTP.
    pub command: Option<String>,
}

/// The three allowlist buckets tracked per session.
///
/// - `permanent`: domains/patterns approved for the life of the session.
/// - `timed`: domains approved for 15 minutes from the approval instant.
/// - `exec_temp`: domains approved only for the duration of one `exec`
///   command (cleared when that command's slot is released).
#[derive(Debug, Default)]
pub struct DomainAllowlist {
    permanent: Vec<String>,
    timed: HashMap<String, Instant>,
    exec_temp: Vec<String>,
}

const TIMED_APPROVAL_DURATION: Duration = Duration::from_secs(15 * 60);

impl DomainAllowlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a [`DomainDecision`] for `domain`, updating the relevant bucket.
    pub fn apply_decision(&mut self, domain: &str, decision: DomainDecision) {
        match decision {
            DomainDecision::AllowOnce => self.exec_temp.push(domain.to_string()),
            DomainDecision::AllowAllOnce => self.exec_temp.push("*".to_string()),
            DomainDecision::Allow15Min => {
                self.timed.insert(domain.to_string(), Instant::now() + TIMED_APPROVAL_DURATION);
            }
            DomainDecision::AllowAll15Min => {
                self.timed.insert("*".to_string(), Instant::now() + TIMED_APPROVAL_DURATION);
            }
            DomainDecision::Deny => {}
        }
    }

    /// Clear the `exec_temp` bucket, called when an `exec` command's slot is released.
    pub fn clear_exec_temp(&mut self) {
        self.exec_temp.clear();
    }

    /// Drop expired entries from the `timed` bucket.
    pub fn sweep_expired(&mut self) {
        let now = Instant::now();
        self.timed.retain(|_, expiry| *expiry > now);
    }

    /// `true` if `domain` is currently allowed by any bucket.
    pub fn is_allowed(&self, domain: &str) -> bool {
        let now = Instant::now();

        if self.permanent.iter().any(|pattern| domain_matches(domain, pattern)) {
            return true;
        }
        if self.exec_temp.iter().any(|pattern| domain_matches(domain, pattern)) {
            return true;
        }
        self.timed.iter().any(|(pattern, expiry)| *expiry > now && domain_matches(domain, pattern))
    }

    pub fn permanent_patterns(&self) -> &[String] {
        &self.permanent
    }

    pub fn add_permanent(&mut self, pattern: &str) {
        if !self.permanent.iter().any(|p| p == pattern) {
            self.permanent.push(pattern.to_string());
        }
    }
}

/// Match `domain` against `pattern`.
///
/// Exact matches are case-insensitive. A pattern of the form `*.example.com`
/// matches any strict subdomain (`api.example.com`, `a.b.example.com`) but
/// NOT the bare domain `example.com` itself. A bare `*` matches everything.
pub fn domain_matches(domain: &str, pattern: &str) -> bool {
    let domain = domain.to_lowercase();
    let pattern = pattern.to_lowercase();

    if pattern == "*" {
        return true;
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        return domain.ends_with(suffix) && domain.len() > suffix.len() && domain.as_bytes()[domain.len() - suffix.len() - 1] == b'.';
    }

    domain == pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_case_insensitive() {
        assert!(domain_matches("Github.com", "github.com"));
    }

    #[test]
    fn wildcard_matches_strict_subdomains_only() {
        assert!(domain_matches("api.github.com", "*.github.com"));
        assert!(domain_matches("a.b.github.com", "*.github.com"));
        assert!(!domain_matches("github.com", "*.github.com"));
        assert!(!domain_matches("evil.com", "*.github.com"));
    }

    #[test]
    fn bare_star_matches_anything() {
        assert!(domain_matches("anything.example", "*"));
    }

    #[test]
    fn allow_once_is_exec_temp_scoped() {
        let mut allowlist = DomainAllowlist::new();
        allowlist.apply_decision("example.com", DomainDecision::AllowOnce);
        assert!(allowlist.is_allowed("example.com"));
        allowlist.clear_exec_temp();
        assert!(!allowlist.is_allowed("example.com"));
    }

    #[test]
    fn allow_15min_persists_across_exec_temp_clear() {
        let mut allowlist = DomainAllowlist::new();
        allowlist.apply_decision("example.com", DomainDecision::Allow15Min);
        allowlist.clear_exec_temp();
        assert!(allowlist.is_allowed("example.com"));
    }

    #[test]
    fn deny_grants_nothing() {
        let mut allowlist = DomainAllowlist::new();
        allowlist.apply_decision("example.com", DomainDecision::Deny);
        assert!(!allowlist.is_allowed("example.com"));
    }
}
