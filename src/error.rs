use rust_decimal::Decimal;
use thiserror::Error;

use crate::db::models::MatchState;

/// Result of polling an upstream feed.
///
/// `Empty` means the feed answered but had nothing for us, which is a valid
/// signal. `Unreachable` is an outage and must never be read as "no events".
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome<T> {
    Data(T),
    Empty,
    Unreachable(String),
}

/// Errors raised while applying a snapshot to a match record.
#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    #[error("match {match_id}: minute went backwards ({last} -> {received}), snapshot rejected")]
    DataRegression {
        match_id: String,
        last: u32,
        received: u32,
    },

    #[error("snapshot for {received} applied to match {expected}")]
    WrongMatch { expected: String, received: String },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: MatchState, to: MatchState },
}

/// Errors from the exchange gateway.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange unreachable: {0}")]
    Unreachable(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum StakeError {
    #[error("insufficient funds: liability {liability} exceeds balance {balance}")]
    InsufficientFunds { liability: Decimal, balance: Decimal },

    #[error("price {0} cannot carry a lay stake")]
    InvalidPrice(Decimal),
}

#[derive(Debug, Error)]
pub enum StakeTableError {
    #[error("failed to parse stake table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("competition '{competition}': {reason}")]
    InvalidRow { competition: String, reason: String },
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid score '{0}', expected HOME-AWAY")]
pub struct ScoreParseError(pub String);
