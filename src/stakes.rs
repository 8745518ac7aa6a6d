use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use crate::config::normalize_competition;
use crate::db::models::{Score, StakeConfig, TargetSet};
use crate::error::StakeTableError;

/// Source of per-competition targets and entry parameters.
pub trait StakeLookup: Send + Sync {
    /// Target scores for a competition; `None` if it is not configured.
    fn targets(&self, competition: &str) -> Option<TargetSet>;

    /// Entry parameters for a competition at a given score.
    fn lookup(&self, competition: &str, score: Score) -> Option<StakeConfig>;
}

#[derive(Debug, Deserialize)]
struct RawTable {
    competitions: Vec<RawCompetition>,
}

#[derive(Debug, Deserialize)]
struct RawCompetition {
    name: String,
    results: Vec<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    score: Score,
    stake_percent: Decimal,
    reference_odds: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Row {
    stake_percent: Decimal,
    reference_odds: Decimal,
}

/// Stake table loaded once at startup from JSON.
///
/// ```json
/// {"competitions": [{"name": "Serie A", "results": [
///     {"score": "1-0", "stake_percent": 5, "reference_odds": 1.5}
/// ]}]}
/// ```
#[derive(Debug, Clone, Default)]
pub struct StakeTable {
    competitions: HashMap<String, BTreeMap<Score, Row>>,
}

impl StakeTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stake table {}", path.display()))?;
        let table = Self::from_json(&raw)
            .with_context(|| format!("Invalid stake table {}", path.display()))?;
        info!(
            "Stake table loaded: {} competitions from {}",
            table.competitions.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn from_json(raw: &str) -> Result<Self, StakeTableError> {
        let parsed: RawTable = serde_json::from_str(raw)?;
        let mut competitions = HashMap::new();
        for comp in parsed.competitions {
            let key = normalize_competition(&comp.name);
            if key.is_empty() {
                return Err(StakeTableError::InvalidRow {
                    competition: comp.name,
                    reason: "empty competition name".into(),
                });
            }
            if comp.results.is_empty() {
                return Err(StakeTableError::InvalidRow {
                    competition: comp.name,
                    reason: "no result rows".into(),
                });
            }
            let mut rows = BTreeMap::new();
            for r in comp.results {
                if r.stake_percent <= Decimal::ZERO || r.stake_percent > Decimal::ONE_HUNDRED {
                    return Err(StakeTableError::InvalidRow {
                        competition: comp.name,
                        reason: format!("{}: stake_percent {} out of (0, 100]", r.score, r.stake_percent),
                    });
                }
                if r.reference_odds <= Decimal::ONE {
                    return Err(StakeTableError::InvalidRow {
                        competition: comp.name,
                        reason: format!("{}: reference_odds {} must exceed 1", r.score, r.reference_odds),
                    });
                }
                let row = Row {
                    stake_percent: r.stake_percent,
                    reference_odds: r.reference_odds,
                };
                if rows.insert(r.score, row).is_some() {
                    return Err(StakeTableError::InvalidRow {
                        competition: comp.name,
                        reason: format!("duplicate score {}", r.score),
                    });
                }
            }
            competitions.insert(key, rows);
        }
        Ok(StakeTable { competitions })
    }
}

impl StakeLookup for StakeTable {
    fn targets(&self, competition: &str) -> Option<TargetSet> {
        self.competitions
            .get(&normalize_competition(competition))
            .map(|rows| rows.keys().copied().collect())
    }

    fn lookup(&self, competition: &str, score: Score) -> Option<StakeConfig> {
        let rows = self.competitions.get(&normalize_competition(competition))?;
        let row = rows.get(&score)?;
        Some(StakeConfig {
            stake_percent: row.stake_percent,
            reference_odds: row.reference_odds,
            targets: rows.keys().copied().collect(),
        })
    }
}
