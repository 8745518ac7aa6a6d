use async_trait::async_trait;

use crate::db::models::{MatchPairing, MatchSnapshot};
use crate::error::FeedOutcome;

/// Trait every live-data source must implement.
#[async_trait]
pub trait MatchFeed: Send + Sync {
    /// Live matches already paired with an exchange market.
    async fn fetch_pairings(&self) -> FeedOutcome<Vec<MatchPairing>>;

    /// Current minute, score and goal timeline of one match.
    async fn fetch_match(&self, match_id: &str) -> FeedOutcome<MatchSnapshot>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
