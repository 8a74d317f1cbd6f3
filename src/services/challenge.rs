//! Dynamic challenge password store

use async_trait::async_trait;

/// One-time challenge passwords handed out to enrolling clients
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Create and remember a new challenge
    async fn scep_challenge(&self) -> anyhow::Result<String>;

    /// Whether `challenge` is a live entry; a successful match consumes it
    async fn has_challenge(&self, challenge: &str) -> anyhow::Result<bool>;
}
