use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::config::EngineSettings;
use crate::db::models::{GameStatus, MatchSnapshot, MatchState, StateChange};
use crate::error::TrackerError;

use super::discard::{DiscardDelay, DiscardReview};
use super::qualification::{evaluate, Qualification, ENTRY_MINUTE, WINDOW_END, WINDOW_START};
use super::record::MatchRecord;

pub const CONDITIONS_NEVER_MET: &str = "conditions never simultaneously true";
pub const ENTRY_WINDOW_MISSED: &str = "entry window missed";
pub const ENTRY_FEED_STALE: &str = "entry window missed, feed stale at minute 75";

/// A minute-75 reading older than this can no longer be trusted to be minute 75.
const ENTRY_MINUTE_SECS: i64 = 60;

/// Applies live snapshots to match records and walks the lifecycle.
#[derive(Debug, Clone)]
pub struct Tracker {
    discard: DiscardDelay,
    stale_after: Duration,
}

impl Tracker {
    pub fn new(settings: &EngineSettings) -> Self {
        Tracker {
            discard: DiscardDelay::new(settings.discard_delay),
            stale_after: settings.stale_after,
        }
    }

    /// Apply one snapshot. Idempotent: re-applying the same snapshot changes
    /// nothing and emits no transitions.
    pub fn update(
        &self,
        record: &mut MatchRecord,
        snapshot: &MatchSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Vec<StateChange>, TrackerError> {
        if snapshot.match_id != record.match_id {
            return Err(TrackerError::WrongMatch {
                expected: record.match_id.clone(),
                received: snapshot.match_id.clone(),
            });
        }
        let mut changes = Vec::new();
        if record.state.is_terminal() {
            return Ok(changes);
        }
        if record.last_seen.is_some() && snapshot.minute < record.minute {
            return Err(TrackerError::DataRegression {
                match_id: record.match_id.clone(),
                last: record.minute,
                received: snapshot.minute,
            });
        }

        let merge = record.goals.merge(&snapshot.goals);
        for key in &merge.added {
            info!(
                "Match {}: goal {}' {} recorded",
                record.match_id, key.minute, key.side
            );
        }
        for key in &merge.newly_cancelled {
            if record.placed {
                warn!(
                    "Match {}: goal {}' {} cancelled after placement, ignored",
                    record.match_id, key.minute, key.side
                );
            } else {
                info!(
                    "Match {}: goal {}' {} cancelled (VAR), re-evaluating",
                    record.match_id, key.minute, key.side
                );
            }
        }

        record.minute = snapshot.minute;
        record.score = snapshot.score;
        record.last_seen = Some(now);
        record.stale_warned = false;

        if snapshot.status == GameStatus::Finished {
            self.finish(record, now, &mut changes)?;
            return Ok(changes);
        }
        if !record.placed {
            self.progress(record, !merge.newly_cancelled.is_empty(), now, &mut changes)?;
        }
        Ok(changes)
    }

    /// Time-only pass for a record that got no fresh snapshot this cycle.
    pub fn refresh(
        &self,
        record: &mut MatchRecord,
        now: DateTime<Utc>,
    ) -> Result<Vec<StateChange>, TrackerError> {
        let mut changes = Vec::new();
        if record.state.is_terminal() {
            return Ok(changes);
        }
        if let Some(seen) = record.last_seen {
            if !record.stale_warned && now - seen >= self.stale_after {
                warn!(
                    "Match {} ({}): no update for {}s at {}' {}",
                    record.name,
                    record.match_id,
                    (now - seen).num_seconds(),
                    record.minute,
                    record.state
                );
                record.stale_warned = true;
            }
            if record.state == MatchState::ReadyForBet
                && !record.placed
                && now - seen > Duration::seconds(ENTRY_MINUTE_SECS)
            {
                warn!(
                    "Match {} ({}): last seen at {}' {}s ago, entry window closed",
                    record.name,
                    record.match_id,
                    record.minute,
                    (now - seen).num_seconds()
                );
                changes.push(record.transition(MatchState::Expired, ENTRY_FEED_STALE, now)?);
                return Ok(changes);
            }
        }
        if record.state == MatchState::Tracking && record.discard.is_some() {
            if let DiscardReview::Finalize(reason) = self.discard.review(record, now) {
                record.discard = None;
                changes.push(record.transition(MatchState::Disqualified, reason, now)?);
            }
        }
        Ok(changes)
    }

    fn progress(
        &self,
        record: &mut MatchRecord,
        corrected: bool,
        now: DateTime<Utc>,
        changes: &mut Vec<StateChange>,
    ) -> Result<(), TrackerError> {
        if record.state == MatchState::Waiting {
            if record.minute < WINDOW_START {
                return Ok(());
            }
            if record.minute <= WINDOW_END {
                record.window_open_score = Some(record.score);
            }
            changes.push(record.transition(MatchState::Tracking, "goal window open", now)?);
        }

        if corrected && matches!(record.state, MatchState::Qualified | MatchState::ReadyForBet) {
            match evaluate(record) {
                Qualification::Qualified(_) => {}
                Qualification::Undetermined => {
                    // Back to square one: the impossibility check runs again
                    record.reachability_checked = false;
                    changes.push(record.transition(
                        MatchState::Tracking,
                        "qualifying goal cancelled",
                        now,
                    )?);
                }
                Qualification::Disqualified(reason) => {
                    changes.push(record.transition(MatchState::Disqualified, reason, now)?);
                    return Ok(());
                }
            }
        }

        if record.state == MatchState::Tracking {
            match evaluate(record) {
                Qualification::Qualified(reason) => {
                    if record.discard.take().is_some() {
                        info!("Match {}: discard candidate cleared", record.match_id);
                    }
                    changes.push(record.transition(
                        MatchState::Qualified,
                        reason.to_string(),
                        now,
                    )?);
                }
                Qualification::Disqualified(reason) => {
                    record.discard = None;
                    changes.push(record.transition(MatchState::Disqualified, reason, now)?);
                    return Ok(());
                }
                Qualification::Undetermined => {
                    let review = if record.reachability_checked {
                        self.discard.review(record, now)
                    } else {
                        self.discard.open(record, now)
                    };
                    if let DiscardReview::Finalize(reason) = review {
                        record.discard = None;
                        changes.push(record.transition(MatchState::Disqualified, reason, now)?);
                        return Ok(());
                    }
                }
            }
        }

        if record.state == MatchState::Qualified && record.minute >= ENTRY_MINUTE {
            changes.push(record.transition(
                MatchState::ReadyForBet,
                "entry minute reached",
                now,
            )?);
        }

        if record.state == MatchState::ReadyForBet && record.minute > ENTRY_MINUTE {
            changes.push(self.expire(record, now)?);
        }
        Ok(())
    }

    fn expire(
        &self,
        record: &mut MatchRecord,
        now: DateTime<Utc>,
    ) -> Result<StateChange, TrackerError> {
        let reason = if record.entry.cycles > 0 {
            CONDITIONS_NEVER_MET
        } else {
            ENTRY_WINDOW_MISSED
        };
        record.transition(MatchState::Expired, reason, now)
    }

    fn finish(
        &self,
        record: &mut MatchRecord,
        now: DateTime<Utc>,
        changes: &mut Vec<StateChange>,
    ) -> Result<(), TrackerError> {
        if record.state == MatchState::ReadyForBet && !record.placed {
            changes.push(self.expire(record, now)?);
        }
        if record.state.can_transition_to(MatchState::Finished) {
            record.discard = None;
            changes.push(record.transition(MatchState::Finished, "match finished", now)?);
        }
        Ok(())
    }
}
