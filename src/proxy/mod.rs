//! Authorizing Egress Proxy: HTTP/CONNECT forward proxy gating sandboxed
//! containers' outbound network access against a per-session allowlist.

mod pending;
mod server;

pub use pending::PendingApprovals;
pub use server::{ProxyApprovalNotifier, ProxyServer};
