//! Short-lived memoization of market analyses.

use super::score::OpportunityScore;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Market id -> (analyzed at, score). Entries expire lazily on lookup.
pub struct OpportunityCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, OpportunityScore)>>,
}

impl OpportunityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached score for `market_id`, if younger than the TTL.
    pub async fn get(&self, market_id: &str) -> Option<OpportunityScore> {
        let entries = self.entries.read().await;
        entries
            .get(market_id)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, score)| score.clone())
    }

    pub async fn insert(&self, score: OpportunityScore) {
        self.entries
            .write()
            .await
            .insert(score.market_id.clone(), (Instant::now(), score));
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
