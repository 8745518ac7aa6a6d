//! Goal-window qualification.
//!
//! A match qualifies when an uncancelled goal lands in minutes 60–74, or when
//! its competition allows the 0-0 exception and the score is 0-0 as the window
//! opens. Qualified matches are considered for entry at minute 75.

use std::fmt;

use crate::db::models::{Score, Side};

use super::record::MatchRecord;

pub const WINDOW_START: u32 = 60;
pub const WINDOW_END: u32 = 74;
pub const ENTRY_MINUTE: u32 = 75;

pub const NO_QUALIFYING_GOAL: &str = "no qualifying goal, no exception";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualifyReason {
    ZeroZeroException,
    GoalInWindow { minute: u32, side: Side },
}

impl fmt::Display for QualifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualifyReason::ZeroZeroException => f.write_str("zero-zero exception"),
            QualifyReason::GoalInWindow { minute, side } => {
                write!(f, "goal in window ({}' {})", minute, side)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Qualification {
    Qualified(QualifyReason),
    Disqualified(&'static str),
    Undetermined,
}

/// Rule 1 (exception) or rule 2 (goal in window), if either holds.
fn qualifying_reason(record: &MatchRecord) -> Option<QualifyReason> {
    if record.zero_zero_exception() && record.window_open_score == Some(Score::NIL_NIL) {
        return Some(QualifyReason::ZeroZeroException);
    }
    record
        .goals
        .first_valid_in(WINDOW_START..=WINDOW_END)
        .map(|g| QualifyReason::GoalInWindow {
            minute: g.minute,
            side: g.side,
        })
}

pub fn evaluate(record: &MatchRecord) -> Qualification {
    if let Some(reason) = qualifying_reason(record) {
        return Qualification::Qualified(reason);
    }
    if record.minute > WINDOW_END {
        return Qualification::Disqualified(NO_QUALIFYING_GOAL);
    }
    Qualification::Undetermined
}

/// The two scores one more goal can produce.
pub fn reachable_scores(score: Score) -> [Score; 2] {
    [score.after_goal(Side::Home), score.after_goal(Side::Away)]
}

/// True when no target can still be hit.
///
/// Without a qualifying event the match needs one more goal, so only the
/// reachable scores count; once qualified the current score counts too.
pub fn is_unreachable(record: &MatchRecord) -> bool {
    let targets = record.targets();
    let current_counts = qualifying_reason(record).is_some() && targets.contains(&record.score);
    if current_counts {
        return false;
    }
    !reachable_scores(record.score)
        .iter()
        .any(|s| targets.contains(s))
}
