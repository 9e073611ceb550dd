//! A mock credential broker.
//!
//! Grounded on the original reference implementation's
//! `MockCredentialBroker` — credential issuance/approval is explicitly
//! mocked, since a real broker integration is out of scope here.

use std::collections::HashSet;

use tokio::sync::Mutex;

pub struct MockCredentialBroker {
    approved: Mutex<HashSet<String>>,
}

impl Default for MockCredentialBroker {
    fn default() -> Self {
        Self { approved: Mutex::new(HashSet::new()) }
    }
}

impl MockCredentialBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a placeholder credential value for `name`. Never a real secret.
    pub async fn get(&self, name: &str) -> String {
        format!("mock-credential:{name}")
    }

    pub async fn is_approved(&self, name: &str) -> bool {
        self.approved.lock().await.contains(name)
    }

    pub async fn approve(&self, name: &str) {
        self.approved.lock().await.insert(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unapproved_by_default() {
        let broker = MockCredentialBroker::new();
        assert!(!broker.is_approved("aws").await);
        broker.approve("aws").await;
        assert!(broker.is_approved("aws").await);
    }
}
