use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::db::models::{MarketSnapshot, PlacementRequest};
use crate::error::{ExchangeError, FeedOutcome};

/// The betting exchange as seen by the engine.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Best prices and liquidity for the selection we lay, plus the opposing
    /// selection's best back price.
    async fn market_snapshot(
        &self,
        market_id: &str,
        selection_id: i64,
    ) -> FeedOutcome<MarketSnapshot>;

    async fn available_balance(&self) -> Result<Decimal, ExchangeError>;

    /// Submit one lay order; returns the exchange's bet id.
    async fn place_lay(&self, request: &PlacementRequest) -> Result<String, ExchangeError>;
}
