use clap::Parser;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

use crate::bot::cadence::CadenceSettings;

/// Live football lay bot: goal-window qualification, minute-75 entry
#[derive(Parser, Debug, Clone)]
#[command(name = "goal-window-bot", version, about)]
pub struct Config {
    /// Run in dry-run mode (no real orders placed)
    #[arg(long, env = "DRY_RUN", default_value = "false")]
    pub dry_run: bool,

    /// Balance reported to the engine in dry-run mode
    #[arg(long, env = "INITIAL_BALANCE", default_value = "100.0")]
    pub initial_balance: f64,

    /// Dashboard listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "0.0.0.0:8080")]
    pub dashboard_addr: String,

    /// SQLite event journal path
    #[arg(long, env = "DATABASE_PATH", default_value = "goal-window.db")]
    pub database_path: String,

    /// Live-data gateway base URL (pairings and match snapshots)
    #[arg(long, env = "FEED_API_URL", default_value = "http://127.0.0.1:9100")]
    pub feed_api_url: String,

    /// Live-data gateway API key
    #[arg(long, env = "FEED_API_KEY")]
    pub feed_api_key: Option<String>,

    /// Exchange gateway base URL (market books, funds, orders)
    #[arg(long, env = "EXCHANGE_API_URL", default_value = "http://127.0.0.1:9200")]
    pub exchange_api_url: String,

    /// Exchange gateway API key (required for live trading)
    #[arg(long, env = "EXCHANGE_API_KEY")]
    pub exchange_api_key: Option<String>,

    /// JSON stake table: targets, stake percent and reference odds per competition
    #[arg(long, env = "STAKE_TABLE_PATH", default_value = "stake_table.json")]
    pub stake_table_path: String,

    /// Competitions where 0-0 at minute 60 qualifies (comma separated)
    #[arg(long, env = "ZERO_ZERO_EXCEPTIONS", value_delimiter = ',')]
    pub zero_zero_exceptions: Vec<String>,

    /// Grace period before an unreachable match is discarded, in seconds
    #[arg(long, env = "DISCARD_DELAY_SECS", default_value = "240")]
    pub discard_delay_secs: u64,

    /// Maximum back/lay spread in ticks at entry
    #[arg(long, env = "MAX_SPREAD_TICKS", default_value = "4")]
    pub max_spread_ticks: u32,

    /// Ticks added to the best lay price for the order
    #[arg(long, env = "PRICE_OFFSET_TICKS", default_value = "2")]
    pub price_offset_ticks: i32,

    /// Live-data refresh interval outside the goal window, in seconds
    #[arg(long, env = "FEED_INTERVAL_SECS", default_value = "60")]
    pub feed_interval_secs: u64,

    /// Live-data refresh interval while any match is in minutes 60–75
    #[arg(long, env = "FEED_INTENSIVE_INTERVAL_SECS", default_value = "10")]
    pub feed_intensive_interval_secs: u64,

    /// Market refresh interval, in seconds
    #[arg(long, env = "MARKET_INTERVAL_SECS", default_value = "10")]
    pub market_interval_secs: u64,

    /// Market refresh interval around the entry minute, in seconds
    #[arg(long, env = "MARKET_FAST_INTERVAL_SECS", default_value = "2")]
    pub market_fast_interval_secs: u64,

    /// Warn when an active match has not been refreshed for this long, in seconds
    #[arg(long, env = "STALE_AFTER_SECS", default_value = "120")]
    pub stale_after_secs: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.dry_run && self.exchange_api_key.is_none() {
            anyhow::bail!(
                "EXCHANGE_API_KEY is required in live trading mode. Use --dry-run for simulation."
            );
        }
        if self.initial_balance <= 0.0 {
            anyhow::bail!("initial_balance must be positive");
        }
        if self.discard_delay_secs == 0 {
            anyhow::bail!("discard_delay_secs must be positive");
        }
        if !(180..=300).contains(&self.discard_delay_secs) {
            warn!(
                "discard_delay_secs={} is outside the recommended 180–300s range",
                self.discard_delay_secs
            );
        }
        if self.max_spread_ticks == 0 {
            anyhow::bail!("max_spread_ticks must be at least 1");
        }
        if !(0..=10).contains(&self.price_offset_ticks) {
            anyhow::bail!("price_offset_ticks must be between 0 and 10");
        }
        if self.feed_intensive_interval_secs == 0 || self.market_fast_interval_secs == 0 {
            anyhow::bail!("polling intervals must be positive");
        }
        if self.feed_intensive_interval_secs > self.feed_interval_secs {
            anyhow::bail!("feed_intensive_interval_secs must not exceed feed_interval_secs");
        }
        if self.market_fast_interval_secs > self.market_interval_secs {
            anyhow::bail!("market_fast_interval_secs must not exceed market_interval_secs");
        }
        Ok(())
    }

    /// Read-only rules handed to the engine.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            zero_zero_exceptions: self
                .zero_zero_exceptions
                .iter()
                .map(|c| normalize_competition(c))
                .filter(|c| !c.is_empty())
                .collect(),
            discard_delay: chrono::Duration::seconds(self.discard_delay_secs as i64),
            max_spread_ticks: self.max_spread_ticks,
            price_offset_ticks: self.price_offset_ticks,
            cadence: CadenceSettings {
                feed_default: Duration::from_secs(self.feed_interval_secs),
                feed_intensive: Duration::from_secs(self.feed_intensive_interval_secs),
                market_normal: Duration::from_secs(self.market_interval_secs),
                market_fast: Duration::from_secs(self.market_fast_interval_secs),
            },
            stale_after: chrono::Duration::seconds(self.stale_after_secs as i64),
        }
    }
}

/// Competition names compare trimmed, lowercased, with single spaces.
pub fn normalize_competition(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub zero_zero_exceptions: HashSet<String>,
    pub discard_delay: chrono::Duration,
    pub max_spread_ticks: u32,
    pub price_offset_ticks: i32,
    pub cadence: CadenceSettings,
    pub stale_after: chrono::Duration,
}

impl EngineSettings {
    pub fn has_zero_zero_exception(&self, competition: &str) -> bool {
        self.zero_zero_exceptions
            .contains(&normalize_competition(competition))
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            zero_zero_exceptions: HashSet::new(),
            discard_delay: chrono::Duration::minutes(4),
            max_spread_ticks: 4,
            price_offset_ticks: 2,
            cadence: CadenceSettings::default(),
            stale_after: chrono::Duration::seconds(120),
        }
    }
}
