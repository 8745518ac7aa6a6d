use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::info;

use crate::db::models::{
    GoalEvent, MatchPairing, MatchState, Score, Side, StateChange, TargetSet,
};
use crate::error::TrackerError;

use super::discard::DiscardCandidate;
use super::qualification::{WINDOW_END, WINDOW_START};

/// Identity of a goal inside a match. Ordered by minute first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GoalKey {
    pub minute: u32,
    pub side: Side,
    pub source_id: Option<String>,
}

impl GoalKey {
    fn of(goal: &GoalEvent) -> Self {
        GoalKey {
            minute: goal.minute,
            side: goal.side,
            source_id: goal.source_id.clone(),
        }
    }
}

/// What changed when a snapshot's goal list was merged in.
#[derive(Debug, Default, PartialEq)]
pub struct GoalMerge {
    pub added: Vec<GoalKey>,
    pub newly_cancelled: Vec<GoalKey>,
}

/// Append-only set of goal events. Cancellation is the only mutation.
#[derive(Debug, Clone, Default)]
pub struct GoalLog {
    events: BTreeMap<GoalKey, GoalEvent>,
}

impl GoalLog {
    pub fn merge(&mut self, incoming: &[GoalEvent]) -> GoalMerge {
        let mut merge = GoalMerge::default();
        for goal in incoming {
            let key = GoalKey::of(goal);
            match self.events.get_mut(&key) {
                Some(known) => {
                    if goal.cancelled && !known.cancelled {
                        known.cancelled = true;
                        merge.newly_cancelled.push(key);
                    }
                    // An un-cancelled report for a cancelled goal is ignored;
                    // a re-awarded goal arrives as a new event.
                }
                None => {
                    self.events.insert(key.clone(), goal.clone());
                    merge.added.push(key);
                }
            }
        }
        merge
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoalEvent> {
        self.events.values()
    }

    pub fn valid(&self) -> impl Iterator<Item = &GoalEvent> {
        self.events.values().filter(|g| !g.cancelled)
    }

    /// Earliest uncancelled goal whose minute falls in `window`.
    pub fn first_valid_in(&self, window: RangeInclusive<u32>) -> Option<&GoalEvent> {
        self.valid().find(|g| window.contains(&g.minute))
    }

    pub fn latest_valid(&self) -> Option<&GoalEvent> {
        self.valid().last()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Bookkeeping for the minute-75 decision cycles.
#[derive(Debug, Clone, Default)]
pub struct EntryProgress {
    /// Score seen on the first decision cycle
    pub first_score: Option<Score>,
    pub cycles: u32,
    pub last_skip: Option<String>,
}

impl EntryProgress {
    pub fn observe(&mut self, score: Score) {
        self.first_score.get_or_insert(score);
        self.cycles += 1;
    }
}

/// Everything we know about one tracked match.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub match_id: String,
    pub market_id: String,
    pub selection_id: i64,
    pub name: String,
    pub competition: String,
    targets: TargetSet,
    zero_zero_exception: bool,

    pub minute: u32,
    pub score: Score,
    pub goals: GoalLog,
    pub state: MatchState,
    pub reason: String,
    /// Score when the goal window opened (first snapshot at minute >= 60)
    pub window_open_score: Option<Score>,
    pub reachability_checked: bool,
    pub discard: Option<DiscardCandidate>,
    pub placed: bool,
    pub entry: EntryProgress,
    pub last_seen: Option<DateTime<Utc>>,
    pub stale_warned: bool,
}

impl MatchRecord {
    pub fn new(pairing: MatchPairing, targets: TargetSet, zero_zero_exception: bool) -> Self {
        MatchRecord {
            match_id: pairing.match_id,
            market_id: pairing.market_id,
            selection_id: pairing.selection_id,
            name: pairing.name,
            competition: pairing.competition,
            targets,
            zero_zero_exception,
            minute: 0,
            score: Score::NIL_NIL,
            goals: GoalLog::default(),
            state: MatchState::Waiting,
            reason: String::new(),
            window_open_score: None,
            reachability_checked: false,
            discard: None,
            placed: false,
            entry: EntryProgress::default(),
            last_seen: None,
            stale_warned: false,
        }
    }

    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    pub fn zero_zero_exception(&self) -> bool {
        self.zero_zero_exception
    }

    pub fn score_on_target(&self) -> bool {
        self.targets.contains(&self.score)
    }

    /// Display flag: the current score is a target and was reached inside the
    /// goal window (or is a targeted 0-0 right at minute 60).
    pub fn is_target(&self) -> bool {
        if !self.score_on_target() {
            return false;
        }
        let reached_in_window = self
            .goals
            .latest_valid()
            .is_some_and(|g| (WINDOW_START..=WINDOW_END).contains(&g.minute));
        let nil_nil_at_open = self.score == Score::NIL_NIL && self.minute == WINDOW_START;
        reached_in_window || nil_nil_at_open
    }

    /// Apply a lifecycle transition, enforcing the transition table.
    pub fn transition(
        &mut self,
        to: MatchState,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<StateChange, TrackerError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(TrackerError::InvalidTransition { from, to });
        }
        let reason = reason.into();
        self.state = to;
        self.reason = reason.clone();
        info!(
            "Match {} ({}): {} -> {} at {}' {} – {}",
            self.name, self.match_id, from, to, self.minute, self.score, reason
        );
        Ok(StateChange {
            match_id: self.match_id.clone(),
            old_state: from,
            new_state: to,
            reason,
            minute: self.minute,
            score: self.score,
            at,
        })
    }

    pub fn status(&self) -> MatchStatus {
        MatchStatus {
            match_id: self.match_id.clone(),
            name: self.name.clone(),
            competition: self.competition.clone(),
            minute: self.minute,
            score: self.score,
            state: self.state,
            reason: self.reason.clone(),
            target: self.is_target(),
            targets: self.targets.clone(),
            goals: self.goals.iter().cloned().collect(),
            discard_candidate: self.discard.clone(),
            placed: self.placed,
            last_seen: self.last_seen,
        }
    }
}

/// Read-only view published to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct MatchStatus {
    pub match_id: String,
    pub name: String,
    pub competition: String,
    pub minute: u32,
    pub score: Score,
    pub state: MatchState,
    pub reason: String,
    pub target: bool,
    pub targets: TargetSet,
    pub goals: Vec<GoalEvent>,
    pub discard_candidate: Option<DiscardCandidate>,
    pub placed: bool,
    pub last_seen: Option<DateTime<Utc>>,
}
