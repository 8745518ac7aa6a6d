//! Minute-75 entry decision.
//!
//! Every check must pass within one cycle. Most failures only defer the entry
//! to the next cycle of the same minute; a score that left the targets, a
//! missing stake row or insufficient funds end the match for us.

use rust_decimal::Decimal;

use crate::config::EngineSettings;
use crate::db::models::{MarketSnapshot, MatchState, PlacementRequest, StakeConfig};
use crate::error::{FeedOutcome, StakeError};

use super::ladder::Ladder;
use super::qualification::ENTRY_MINUTE;
use super::record::MatchRecord;
use super::stake::plan_stake;

pub const SCORE_MOVED_OUT: &str = "score moved out of target";
pub const NO_CONFIGURATION: &str = "no configuration for this score";
pub const INSUFFICIENT_FUNDS: &str = "insufficient funds";

/// Why a cycle did not place.
#[derive(Debug, Clone, PartialEq)]
pub enum Gate {
    /// Retry on the next cycle
    Wait(String),
    /// Terminal for this match
    Skip(String),
}

/// Prices that passed the market checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub best_back: Decimal,
    pub best_lay: Decimal,
    pub ladder: Ladder,
    pub spread_ticks: u32,
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    max_spread_ticks: u32,
    price_offset_ticks: i32,
}

impl DecisionEngine {
    pub fn new(settings: &EngineSettings) -> Self {
        DecisionEngine {
            max_spread_ticks: settings.max_spread_ticks,
            price_offset_ticks: settings.price_offset_ticks,
        }
    }

    pub fn in_entry_window(record: &MatchRecord) -> bool {
        record.state == MatchState::ReadyForBet && !record.placed && record.minute == ENTRY_MINUTE
    }

    /// Score and configuration checks, before touching the market.
    pub fn pre_check(
        &self,
        record: &MatchRecord,
        stake: Option<&StakeConfig>,
    ) -> Result<(), Gate> {
        if !record.score_on_target() {
            let started_on_target = record
                .entry
                .first_score
                .is_some_and(|s| record.targets().contains(&s));
            return Err(if started_on_target {
                Gate::Skip(SCORE_MOVED_OUT.to_string())
            } else {
                Gate::Wait(format!("score {} not a target", record.score))
            });
        }
        if stake.is_none() {
            return Err(Gate::Skip(NO_CONFIGURATION.to_string()));
        }
        Ok(())
    }

    /// Open market, opposing price, spread and liquidity, all from one snapshot.
    pub fn market_check(
        &self,
        stake: &StakeConfig,
        market: &FeedOutcome<MarketSnapshot>,
    ) -> Result<Quote, String> {
        let market = match market {
            FeedOutcome::Data(m) => m,
            FeedOutcome::Empty => return Err("no market data".to_string()),
            FeedOutcome::Unreachable(reason) => {
                return Err(format!("market feed unreachable: {}", reason))
            }
        };
        if !market.open {
            return Err("market closed".to_string());
        }
        let opposing = market
            .opposing_back
            .ok_or_else(|| "opposing back price unavailable".to_string())?;
        if opposing < stake.reference_odds {
            return Err(format!(
                "opposing back {} below reference odds {}",
                opposing, stake.reference_odds
            ));
        }
        let (Some(best_back), Some(best_lay)) = (market.best_back, market.best_lay) else {
            return Err("no back/lay prices".to_string());
        };
        let spread_ticks = market.ladder.ticks_between(best_back, best_lay);
        if spread_ticks > self.max_spread_ticks {
            return Err(format!(
                "spread {} ticks exceeds max {}",
                spread_ticks, self.max_spread_ticks
            ));
        }
        if market.lay_size_at_best <= Decimal::ZERO || market.total_lay_size <= Decimal::ZERO {
            return Err("no lay liquidity".to_string());
        }
        Ok(Quote {
            best_back,
            best_lay,
            ladder: market.ladder,
            spread_ticks,
        })
    }

    /// Price and size the single lay order.
    pub fn plan(
        &self,
        record: &MatchRecord,
        quote: &Quote,
        stake: &StakeConfig,
        balance: Decimal,
    ) -> Result<PlacementRequest, Gate> {
        let price = quote
            .ladder
            .offset_price(quote.best_lay, self.price_offset_ticks)
            .ok_or_else(|| {
                Gate::Wait(format!(
                    "best lay {} + {} ticks leaves the ladder",
                    quote.best_lay, self.price_offset_ticks
                ))
            })?;
        let plan = plan_stake(balance, stake.stake_percent, price).map_err(|e| match e {
            StakeError::InsufficientFunds { .. } => Gate::Skip(INSUFFICIENT_FUNDS.to_string()),
            StakeError::InvalidPrice(_) => Gate::Wait(e.to_string()),
        })?;
        Ok(PlacementRequest {
            match_id: record.match_id.clone(),
            market_id: record.market_id.clone(),
            selection_id: record.selection_id,
            price: plan.price,
            size: plan.stake,
            liability: plan.liability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::record::tests::{pairing, targets};
    use crate::db::models::Score;
    use rust_decimal_macros::dec;

    fn engine() -> DecisionEngine {
        DecisionEngine::new(&EngineSettings::default())
    }

    fn stake() -> StakeConfig {
        StakeConfig {
            stake_percent: dec!(5),
            reference_odds: dec!(1.50),
            targets: targets(&["1-0", "1-1"]),
        }
    }

    fn market() -> MarketSnapshot {
        MarketSnapshot {
            best_back: Some(dec!(3.10)),
            best_lay: Some(dec!(3.15)),
            lay_size_at_best: dec!(120),
            total_lay_size: dec!(900),
            ladder: Ladder::Classic,
            open: true,
            opposing_back: Some(dec!(1.60)),
        }
    }

    fn ready_record(score: Score) -> MatchRecord {
        let mut rec = MatchRecord::new(pairing("m1"), targets(&["1-0", "1-1"]), false);
        rec.state = MatchState::ReadyForBet;
        rec.minute = 75;
        rec.score = score;
        rec.entry.observe(score);
        rec
    }

    #[test]
    fn test_all_checks_pass() {
        let engine = engine();
        let rec = ready_record(Score::new(1, 0));
        let stake = stake();
        engine.pre_check(&rec, Some(&stake)).unwrap();
        let quote = engine
            .market_check(&stake, &FeedOutcome::Data(market()))
            .unwrap();
        assert_eq!(quote.spread_ticks, 1);

        // 3.15 + 2 ticks = 3.25; 300 * 5% = 15 liability; 15 / 2.25 = 6.666..
        let req = engine.plan(&rec, &quote, &stake, dec!(300)).unwrap();
        assert_eq!(req.price, dec!(3.25));
        assert_eq!(req.liability, dec!(15.00));
        assert_eq!(req.size, dec!(6.67));
        assert_eq!(req.market_id, "1.m1");
    }

    #[test]
    fn test_five_tick_spread_fails() {
        let engine = engine();
        let mut m = market();
        m.best_back = Some(dec!(1.95));
        m.best_lay = Some(dec!(2.00));
        let err = engine
            .market_check(&stake(), &FeedOutcome::Data(m))
            .unwrap_err();
        assert_eq!(err, "spread 5 ticks exceeds max 4");
    }

    #[test]
    fn test_missing_configuration_is_terminal() {
        let rec = ready_record(Score::new(1, 1));
        assert_eq!(
            engine().pre_check(&rec, None),
            Err(Gate::Skip(NO_CONFIGURATION.to_string()))
        );
    }

    #[test]
    fn test_score_moved_out_is_terminal() {
        let mut rec = ready_record(Score::new(1, 0));
        rec.score = Score::new(2, 0);
        assert_eq!(
            engine().pre_check(&rec, Some(&stake())),
            Err(Gate::Skip(SCORE_MOVED_OUT.to_string()))
        );
    }

    #[test]
    fn test_off_target_from_the_start_waits() {
        let rec = ready_record(Score::new(2, 0));
        assert!(matches!(
            engine().pre_check(&rec, Some(&stake())),
            Err(Gate::Wait(_))
        ));
    }

    #[test]
    fn test_market_failures_are_retryable() {
        let engine = engine();
        let stake = stake();

        let mut closed = market();
        closed.open = false;
        assert_eq!(
            engine.market_check(&stake, &FeedOutcome::Data(closed)),
            Err("market closed".to_string())
        );

        let mut cheap = market();
        cheap.opposing_back = Some(dec!(1.40));
        assert!(engine
            .market_check(&stake, &FeedOutcome::Data(cheap))
            .unwrap_err()
            .contains("below reference odds"));

        let mut dry = market();
        dry.lay_size_at_best = Decimal::ZERO;
        assert_eq!(
            engine.market_check(&stake, &FeedOutcome::Data(dry)),
            Err("no lay liquidity".to_string())
        );

        assert!(engine
            .market_check(&stake, &FeedOutcome::Unreachable("timeout".into()))
            .is_err());
    }

    #[test]
    fn test_reference_odds_inclusive() {
        let mut m = market();
        m.opposing_back = Some(dec!(1.50));
        assert!(engine().market_check(&stake(), &FeedOutcome::Data(m)).is_ok());
    }

    #[test]
    fn test_insufficient_funds_is_terminal() {
        let engine = engine();
        let rec = ready_record(Score::new(1, 0));
        let quote = engine
            .market_check(&stake(), &FeedOutcome::Data(market()))
            .unwrap();
        assert_eq!(
            engine.plan(&rec, &quote, &stake(), Decimal::ZERO),
            Err(Gate::Skip(INSUFFICIENT_FUNDS.to_string()))
        );
    }

    #[test]
    fn test_entry_window_is_exactly_seventy_five() {
        let mut rec = ready_record(Score::new(1, 0));
        assert!(DecisionEngine::in_entry_window(&rec));
        rec.minute = 76;
        assert!(!DecisionEngine::in_entry_window(&rec));
        rec.minute = 75;
        rec.placed = true;
        assert!(!DecisionEngine::in_entry_window(&rec));
    }
}
