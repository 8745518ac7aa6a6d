use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::bot::ladder::Ladder;
use crate::error::ScoreParseError;

/// A football scoreline, rendered as "HOME-AWAY".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub const NIL_NIL: Score = Score { home: 0, away: 0 };

    pub fn new(home: u32, away: u32) -> Self {
        Score { home, away }
    }

    /// Score after one more goal by `side`.
    pub fn after_goal(self, side: Side) -> Score {
        match side {
            Side::Home => Score::new(self.home + 1, self.away),
            Side::Away => Score::new(self.home, self.away + 1),
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

impl FromStr for Score {
    type Err = ScoreParseError;

    /// Accepts "1-0", "1:0" and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (home, away) = s
            .trim()
            .split_once(|c| c == '-' || c == ':')
            .ok_or_else(|| ScoreParseError(s.to_string()))?;
        let home = home
            .trim()
            .parse()
            .map_err(|_| ScoreParseError(s.to_string()))?;
        let away = away
            .trim()
            .parse()
            .map_err(|_| ScoreParseError(s.to_string()))?;
        Ok(Score { home, away })
    }
}

impl TryFrom<String> for Score {
    type Error = ScoreParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Score> for String {
    fn from(score: Score) -> Self {
        score.to_string()
    }
}

/// Scorelines a competition accepts for entry. Fixed once a match is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetSet(BTreeSet<Score>);

impl TargetSet {
    pub fn contains(&self, score: &Score) -> bool {
        self.0.contains(score)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Score> {
        self.0.iter()
    }
}

impl FromIterator<Score> for TargetSet {
    fn from_iter<I: IntoIterator<Item = Score>>(iter: I) -> Self {
        TargetSet(iter.into_iter().collect())
    }
}

impl fmt::Display for TargetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Score::to_string).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => f.write_str("home"),
            Side::Away => f.write_str("away"),
        }
    }
}

/// A goal as reported by the live-data feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalEvent {
    pub minute: u32,
    pub side: Side,
    /// Retroactively cancelled (VAR). Only ever flips false -> true.
    #[serde(default)]
    pub cancelled: bool,
    /// Feed-assigned identifier, when the provider has one.
    #[serde(default)]
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    NotStarted,
    InProgress,
    HalfTime,
    Finished,
}

/// Raw match state as fetched from the live-data feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub match_id: String,
    pub minute: u32,
    pub score: Score,
    #[serde(default)]
    pub goals: Vec<GoalEvent>,
    pub status: GameStatus,
}

/// A live-feed match paired with its exchange market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPairing {
    pub match_id: String,
    pub market_id: String,
    /// Selection we lay (e.g. "Over 2.5 Goals")
    pub selection_id: i64,
    pub name: String,
    pub competition: String,
}

/// Best-offer view of the lay selection, plus the opposing selection's back price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub best_back: Option<Decimal>,
    pub best_lay: Option<Decimal>,
    /// Size available at the best lay price
    #[serde(default)]
    pub lay_size_at_best: Decimal,
    /// Sum of all lay-side levels
    #[serde(default)]
    pub total_lay_size: Decimal,
    #[serde(default)]
    pub ladder: Ladder,
    pub open: bool,
    /// Best back price of the opposing selection (e.g. "Under 2.5 Goals")
    #[serde(default)]
    pub opposing_back: Option<Decimal>,
}

/// Per competition + score entry configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakeConfig {
    /// Liability as a percentage of available balance
    pub stake_percent: Decimal,
    /// Minimum opposing back price
    pub reference_odds: Decimal,
    pub targets: TargetSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    Waiting,
    Tracking,
    Qualified,
    Disqualified,
    ReadyForBet,
    BetPlaced,
    Skipped,
    Expired,
    Finished,
}

impl MatchState {
    pub const ALL: [MatchState; 9] = [
        MatchState::Waiting,
        MatchState::Tracking,
        MatchState::Qualified,
        MatchState::Disqualified,
        MatchState::ReadyForBet,
        MatchState::BetPlaced,
        MatchState::Skipped,
        MatchState::Expired,
        MatchState::Finished,
    ];

    pub fn parse(raw: &str) -> Option<MatchState> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::Waiting => "WAITING",
            MatchState::Tracking => "TRACKING",
            MatchState::Qualified => "QUALIFIED",
            MatchState::Disqualified => "DISQUALIFIED",
            MatchState::ReadyForBet => "READY_FOR_BET",
            MatchState::BetPlaced => "BET_PLACED",
            MatchState::Skipped => "SKIPPED",
            MatchState::Expired => "EXPIRED",
            MatchState::Finished => "FINISHED",
        }
    }

    /// The lifecycle transition table.
    pub fn can_transition_to(self, next: MatchState) -> bool {
        use MatchState::*;
        match self {
            Waiting => matches!(next, Tracking | Finished),
            Tracking => matches!(next, Qualified | Disqualified | Finished),
            Qualified => matches!(next, ReadyForBet | Tracking | Disqualified | Finished),
            ReadyForBet => matches!(
                next,
                BetPlaced | Skipped | Expired | Disqualified | Finished
            ),
            BetPlaced | Skipped | Expired => next == Finished,
            Disqualified | Finished => false,
        }
    }

    /// Terminal states are evicted from the registry at the end of a cycle.
    /// `BetPlaced` stays until the match is settled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MatchState::Disqualified
                | MatchState::Skipped
                | MatchState::Expired
                | MatchState::Finished
        )
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Emitted events ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub match_id: String,
    pub old_state: MatchState,
    pub new_state: MatchState,
    pub reason: String,
    pub minute: u32,
    pub score: Score,
    pub at: DateTime<Utc>,
}

/// A single lay order. At most one is ever built per match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub match_id: String,
    pub market_id: String,
    pub selection_id: i64,
    pub price: Decimal,
    pub size: Decimal,
    pub liability: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedBet {
    pub request: PlacementRequest,
    pub bet_id: String,
    pub placed_at: DateTime<Utc>,
}

/// Why a match was skipped, expired or ignored, with the inputs that led there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub match_id: String,
    pub minute: u32,
    pub reason: String,
    pub inputs: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged(StateChange),
    Placed(PlacedBet),
    Audit(AuditRecord),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_parses_both_separators() {
        assert_eq!("2-1".parse::<Score>().unwrap(), Score::new(2, 1));
        assert_eq!(" 0 : 3 ".parse::<Score>().unwrap(), Score::new(0, 3));
        assert!("2".parse::<Score>().is_err());
        assert!("a-b".parse::<Score>().is_err());
    }

    #[test]
    fn test_score_serializes_as_string() {
        let json = serde_json::to_string(&Score::new(1, 1)).unwrap();
        assert_eq!(json, r#""1-1""#);
        let back: Score = serde_json::from_str(r#""1:2""#).unwrap();
        assert_eq!(back, Score::new(1, 2));
    }

    #[test]
    fn test_transition_table_guards_terminal_states() {
        assert!(MatchState::Waiting.can_transition_to(MatchState::Tracking));
        assert!(MatchState::Qualified.can_transition_to(MatchState::Tracking));
        assert!(!MatchState::Waiting.can_transition_to(MatchState::Qualified));
        assert!(!MatchState::Tracking.can_transition_to(MatchState::ReadyForBet));
        assert!(!MatchState::Disqualified.can_transition_to(MatchState::Tracking));
        assert!(!MatchState::BetPlaced.can_transition_to(MatchState::Skipped));
        assert!(MatchState::BetPlaced.can_transition_to(MatchState::Finished));
    }

    #[test]
    fn test_snapshot_defaults_missing_goal_fields() {
        let raw = r#"{
            "match_id": "m1",
            "minute": 61,
            "score": "1-0",
            "goals": [{"minute": 61, "side": "home"}],
            "status": "in_progress"
        }"#;
        let snap: MatchSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snap.goals.len(), 1);
        assert!(!snap.goals[0].cancelled);
        assert_eq!(snap.goals[0].source_id, None);
        assert_eq!(snap.status, GameStatus::InProgress);
    }
}
