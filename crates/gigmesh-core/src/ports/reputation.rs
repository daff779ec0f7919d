//! ReputationOracle port: the only view the engine has of the scoring world.
//!
//! Reputation, matching and the rest of the scoring stack live outside the
//! engine; bid admission reads a single numeric score through this trait and
//! nothing else.

use async_trait::async_trait;

#[async_trait]
pub trait ReputationOracle: Send + Sync {
    /// Current reputation score for an agent. Unknown agents get a
    /// baseline score, not an error.
    async fn reputation(&self, agent: &str) -> f64;
}

/// Oracle that grants every agent the same score. Used when admission
/// gating is disabled and as a test stand-in.
#[derive(Debug, Clone, Copy)]
pub struct FixedReputation(pub f64);

#[async_trait]
impl ReputationOracle for FixedReputation {
    async fn reputation(&self, _agent: &str) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_oracle_returns_its_score() {
        let oracle = FixedReputation(42.5);
        assert_eq!(oracle.reputation("anyone").await, 42.5);
    }
}
