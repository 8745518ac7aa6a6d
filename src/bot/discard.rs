use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::models::Score;

use super::qualification::{evaluate, is_unreachable, Qualification};
use super::record::MatchRecord;

pub const CANNOT_REACH_TARGET: &str = "cannot reach target";

/// A match provisionally flagged as unable to reach any target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscardCandidate {
    pub since: DateTime<Utc>,
    pub since_minute: u32,
    pub reason: String,
    pub score: Score,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiscardReview {
    /// Not a candidate, nothing to do
    Idle,
    Flagged,
    Pending,
    Cleared,
    /// Grace period over; disqualify with this reason
    Finalize(String),
}

/// Holds impossibility findings for a grace period so a late VAR correction
/// can still rescue the match.
#[derive(Debug, Clone)]
pub struct DiscardDelay {
    delay: Duration,
}

impl DiscardDelay {
    pub fn new(delay: Duration) -> Self {
        DiscardDelay { delay }
    }

    /// First impossibility check, run once as the goal window opens.
    pub fn open(&self, record: &mut MatchRecord, now: DateTime<Utc>) -> DiscardReview {
        record.reachability_checked = true;
        if !is_unreachable(record) {
            return DiscardReview::Idle;
        }
        info!(
            "Match {} ({}): {} at {}' with {} (targets {}), discard in {}s unless corrected",
            record.name,
            record.match_id,
            CANNOT_REACH_TARGET,
            record.minute,
            record.score,
            record.targets(),
            self.delay.num_seconds()
        );
        record.discard = Some(DiscardCandidate {
            since: now,
            since_minute: record.minute,
            reason: CANNOT_REACH_TARGET.to_string(),
            score: record.score,
        });
        DiscardReview::Flagged
    }

    /// Follow-up on an existing candidate.
    pub fn review(&self, record: &mut MatchRecord, now: DateTime<Utc>) -> DiscardReview {
        let Some(since) = record.discard.as_ref().map(|c| c.since) else {
            return DiscardReview::Idle;
        };
        if matches!(evaluate(record), Qualification::Qualified(_)) {
            info!("Match {}: discard candidate cleared, match qualified", record.match_id);
            record.discard = None;
            return DiscardReview::Cleared;
        }
        if !is_unreachable(record) {
            info!(
                "Match {}: discard candidate cleared, target reachable again at {}",
                record.match_id, record.score
            );
            record.discard = None;
            return DiscardReview::Cleared;
        }
        if now - since >= self.delay {
            let reason = record
                .discard
                .as_ref()
                .map_or_else(|| CANNOT_REACH_TARGET.to_string(), |c| c.reason.clone());
            return DiscardReview::Finalize(reason);
        }
        DiscardReview::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::record::tests::{goal, pairing, targets};
    use crate::db::models::Side;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn candidate_record() -> MatchRecord {
        let mut rec = MatchRecord::new(pairing("m1"), targets(&["0-0", "1-1", "0-2"]), false);
        rec.minute = 60;
        rec.score = Score::new(1, 1);
        rec.window_open_score = Some(rec.score);
        rec
    }

    #[test]
    fn test_flags_unreachable_match() {
        let delay = DiscardDelay::new(Duration::minutes(4));
        let mut rec = candidate_record();
        assert_eq!(delay.open(&mut rec, t0()), DiscardReview::Flagged);
        let cand = rec.discard.as_ref().unwrap();
        assert_eq!(cand.reason, CANNOT_REACH_TARGET);
        assert_eq!(cand.score, Score::new(1, 1));
        assert_eq!(cand.since_minute, 60);
        assert!(rec.reachability_checked);
    }

    #[test]
    fn test_finalizes_after_delay() {
        let delay = DiscardDelay::new(Duration::minutes(4));
        let mut rec = candidate_record();
        delay.open(&mut rec, t0());

        rec.minute = 62;
        assert_eq!(
            delay.review(&mut rec, t0() + Duration::minutes(2)),
            DiscardReview::Pending
        );
        rec.minute = 64;
        assert_eq!(
            delay.review(&mut rec, t0() + Duration::minutes(4)),
            DiscardReview::Finalize(CANNOT_REACH_TARGET.to_string())
        );
    }

    #[test]
    fn test_correction_restores_reachability() {
        let delay = DiscardDelay::new(Duration::minutes(4));
        let mut rec = candidate_record();
        rec.goals.merge(&[goal(30, Side::Home), goal(55, Side::Away)]);
        delay.open(&mut rec, t0());

        // VAR takes the home goal back: 0-1, and 0-2 is one goal away
        let mut cancelled = goal(30, Side::Home);
        cancelled.cancelled = true;
        rec.goals.merge(&[cancelled]);
        rec.score = Score::new(0, 1);
        rec.minute = 62;

        assert_eq!(
            delay.review(&mut rec, t0() + Duration::minutes(2)),
            DiscardReview::Cleared
        );
        assert!(rec.discard.is_none());
    }

    #[test]
    fn test_reachable_match_not_flagged() {
        let delay = DiscardDelay::new(Duration::minutes(4));
        let mut rec = candidate_record();
        rec.score = Score::new(0, 1);
        assert_eq!(delay.open(&mut rec, t0()), DiscardReview::Idle);
        assert!(rec.discard.is_none());
        assert_eq!(delay.review(&mut rec, t0()), DiscardReview::Idle);
    }
}
