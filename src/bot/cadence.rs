use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::db::models::MatchState;

use super::qualification::{ENTRY_MINUTE, WINDOW_END, WINDOW_START};
use super::record::MatchRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Default,
    /// At least one live match is inside minutes 60–75
    Intensive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketMode {
    Normal,
    /// A qualified match is about to reach the entry minute
    Fast,
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedMode::Default => f.write_str("DEFAULT"),
            FeedMode::Intensive => f.write_str("INTENSIVE"),
        }
    }
}

impl fmt::Display for MarketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketMode::Normal => f.write_str("NORMAL"),
            MarketMode::Fast => f.write_str("FAST"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CadenceSettings {
    pub feed_default: Duration,
    pub feed_intensive: Duration,
    pub market_normal: Duration,
    pub market_fast: Duration,
}

impl Default for CadenceSettings {
    fn default() -> Self {
        CadenceSettings {
            feed_default: Duration::from_secs(60),
            feed_intensive: Duration::from_secs(10),
            market_normal: Duration::from_secs(10),
            market_fast: Duration::from_secs(2),
        }
    }
}

/// Picks polling intervals from the aggregate state of the registry.
#[derive(Debug, Clone)]
pub struct CadenceController {
    settings: CadenceSettings,
    feed_mode: FeedMode,
    market_mode: MarketMode,
    last_feed_refresh: Option<DateTime<Utc>>,
}

impl CadenceController {
    pub fn new(settings: CadenceSettings) -> Self {
        CadenceController {
            settings,
            feed_mode: FeedMode::Default,
            market_mode: MarketMode::Normal,
            last_feed_refresh: None,
        }
    }

    pub fn feed_mode(&self) -> FeedMode {
        self.feed_mode
    }

    pub fn market_mode(&self) -> MarketMode {
        self.market_mode
    }

    /// Re-evaluate both modes. When the feed was unreachable this cycle the
    /// absence of live matches proves nothing, so modes only move up.
    pub fn observe<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a MatchRecord>,
        feed_reachable: bool,
    ) {
        let mut intensive = false;
        let mut fast = false;
        for record in records {
            if record.state.is_terminal() {
                continue;
            }
            if (WINDOW_START..=ENTRY_MINUTE).contains(&record.minute) {
                intensive = true;
            }
            if matches!(record.state, MatchState::Qualified | MatchState::ReadyForBet)
                && (WINDOW_END..=ENTRY_MINUTE).contains(&record.minute)
            {
                fast = true;
            }
        }

        let feed_mode = match (intensive, feed_reachable) {
            (true, _) => FeedMode::Intensive,
            (false, true) => FeedMode::Default,
            (false, false) => self.feed_mode,
        };
        let market_mode = match (fast, feed_reachable) {
            (true, _) => MarketMode::Fast,
            (false, true) => MarketMode::Normal,
            (false, false) => self.market_mode,
        };
        if feed_mode != self.feed_mode {
            info!("Feed refresh mode {} -> {}", self.feed_mode, feed_mode);
            self.feed_mode = feed_mode;
        }
        if market_mode != self.market_mode {
            info!("Market refresh mode {} -> {}", self.market_mode, market_mode);
            self.market_mode = market_mode;
        }
    }

    pub fn feed_interval(&self) -> Duration {
        match self.feed_mode {
            FeedMode::Default => self.settings.feed_default,
            FeedMode::Intensive => self.settings.feed_intensive,
        }
    }

    pub fn market_interval(&self) -> Duration {
        match self.market_mode {
            MarketMode::Normal => self.settings.market_normal,
            MarketMode::Fast => self.settings.market_fast,
        }
    }

    /// How long the scheduler should sleep before the next cycle.
    pub fn next_interval(&self) -> Duration {
        self.feed_interval().min(self.market_interval())
    }

    pub fn feed_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_feed_refresh {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map_or(false, |elapsed| elapsed >= self.feed_interval()),
        }
    }

    pub fn mark_feed_refreshed(&mut self, now: DateTime<Utc>) {
        self.last_feed_refresh = Some(now);
    }
}
