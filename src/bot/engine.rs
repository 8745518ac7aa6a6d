use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::EngineSettings;
use crate::db::models::{
    AuditRecord, EngineEvent, MatchPairing, MatchSnapshot, MatchState, PlacedBet, StateChange,
};
use crate::error::FeedOutcome;
use crate::exchange::Exchange;
use crate::live_scores::MatchFeed;
use crate::stakes::StakeLookup;

use super::cadence::CadenceController;
use super::clock::Clock;
use super::decision::{DecisionEngine, Gate};
use super::record::{MatchRecord, MatchStatus};
use super::tracker::Tracker;

pub const COMPETITION_NOT_CONFIGURED: &str = "competition not configured";

/// How long a retired match id stays blocked from re-registration.
const RETIRED_TTL_HOURS: i64 = 12;

/// The core bot engine. Owns the match registry; one `run_cycle` call is one
/// polling cycle, and cycles never overlap.
pub struct BotEngine {
    settings: EngineSettings,
    feed: Arc<dyn MatchFeed>,
    exchange: Arc<dyn Exchange>,
    stakes: Arc<dyn StakeLookup>,
    clock: Arc<dyn Clock>,
    registry: BTreeMap<String, MatchRecord>,
    /// Matches that reached a terminal state or were never registered, with
    /// the time they were retired. A pairing that drops out of the listing and
    /// comes back is still blocked until the entry ages out.
    retired: HashMap<String, DateTime<Utc>>,
    cadence: CadenceController,
    tracker: Tracker,
    decision: DecisionEngine,
}

impl BotEngine {
    pub fn new(
        settings: EngineSettings,
        feed: Arc<dyn MatchFeed>,
        exchange: Arc<dyn Exchange>,
        stakes: Arc<dyn StakeLookup>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        BotEngine {
            cadence: CadenceController::new(settings.cadence),
            tracker: Tracker::new(&settings),
            decision: DecisionEngine::new(&settings),
            settings,
            feed,
            exchange,
            stakes,
            clock,
            registry: BTreeMap::new(),
            retired: HashMap::new(),
        }
    }

    /// Start tracking a newly paired match. Targets and the exception flag
    /// are resolved here, once.
    pub fn register(&mut self, pairing: MatchPairing, now: DateTime<Utc>) -> Option<AuditRecord> {
        if self.registry.contains_key(&pairing.match_id) || self.retired.contains_key(&pairing.match_id)
        {
            return None;
        }
        let Some(targets) = self
            .stakes
            .targets(&pairing.competition)
            .filter(|t| !t.is_empty())
        else {
            warn!(
                "Match {} ({}): {} '{}', not tracked",
                pairing.name, pairing.match_id, COMPETITION_NOT_CONFIGURED, pairing.competition
            );
            self.retired.insert(pairing.match_id.clone(), now);
            return Some(AuditRecord {
                match_id: pairing.match_id.clone(),
                minute: 0,
                reason: COMPETITION_NOT_CONFIGURED.to_string(),
                inputs: json!({ "pairing": pairing }),
                at: now,
            });
        };
        let exception = self.settings.has_zero_zero_exception(&pairing.competition);
        info!(
            "Tracking {} ({}) in {}: targets {}{}",
            pairing.name,
            pairing.match_id,
            pairing.competition,
            targets,
            if exception { ", 0-0 exception" } else { "" }
        );
        let record = MatchRecord::new(pairing, targets, exception);
        self.registry.insert(record.match_id.clone(), record);
        None
    }

    /// One polling cycle: refresh when due, update every record once, run the
    /// entry decision for matches at minute 75, then evict finished records.
    pub async fn run_cycle(&mut self) -> Vec<EngineEvent> {
        let now = self.clock.now();
        let mut events = Vec::new();
        let mut feed_reachable = true;
        let mut fresh: HashMap<String, MatchSnapshot> = HashMap::new();

        if self.cadence.feed_due(now) {
            feed_reachable = self.refresh_feed(now, &mut fresh, &mut events).await;
            if feed_reachable {
                self.cadence.mark_feed_refreshed(now);
            }
        }

        let ids: Vec<String> = self.registry.keys().cloned().collect();
        for id in &ids {
            self.apply(id, fresh.remove(id), now, &mut events);
        }

        for id in &ids {
            let ready = self
                .registry
                .get(id)
                .is_some_and(DecisionEngine::in_entry_window);
            if ready {
                self.decide(id, now, &mut events).await;
            }
        }

        self.cadence.observe(self.registry.values(), feed_reachable);
        self.evict(now);
        events
    }

    pub fn next_interval(&self) -> Duration {
        self.cadence.next_interval()
    }

    pub fn statuses(&self) -> Vec<MatchStatus> {
        self.registry.values().map(MatchRecord::status).collect()
    }

    /// Pull pairings and snapshots. Returns false when the feed was down.
    async fn refresh_feed(
        &mut self,
        now: DateTime<Utc>,
        fresh: &mut HashMap<String, MatchSnapshot>,
        events: &mut Vec<EngineEvent>,
    ) -> bool {
        match self.feed.fetch_pairings().await {
            FeedOutcome::Data(pairings) => {
                let ttl = chrono::Duration::hours(RETIRED_TTL_HOURS);
                self.retired.retain(|_, retired_at| now - *retired_at < ttl);
                for pairing in pairings {
                    if let Some(audit) = self.register(pairing, now) {
                        events.push(EngineEvent::Audit(audit));
                    }
                }
            }
            FeedOutcome::Empty => debug!("No live pairings"),
            FeedOutcome::Unreachable(e) => {
                warn!("{} unreachable (pairings): {}", self.feed.name(), e);
                return false;
            }
        }

        let ids: Vec<String> = self.registry.keys().cloned().collect();
        for id in ids {
            match self.feed.fetch_match(&id).await {
                FeedOutcome::Data(snapshot) => {
                    fresh.insert(id, snapshot);
                }
                FeedOutcome::Empty => debug!("Match {}: no snapshot this cycle", id),
                FeedOutcome::Unreachable(e) => {
                    warn!("{} unreachable (match {}): {}", self.feed.name(), id, e);
                    return false;
                }
            }
        }
        true
    }

    fn apply(
        &mut self,
        id: &str,
        snapshot: Option<MatchSnapshot>,
        now: DateTime<Utc>,
        events: &mut Vec<EngineEvent>,
    ) {
        let Some(record) = self.registry.get_mut(id) else {
            return;
        };
        let result = match &snapshot {
            Some(s) => self.tracker.update(record, s, now),
            None => self.tracker.refresh(record, now),
        };
        match result {
            Ok(changes) => {
                for change in changes {
                    if change.new_state == MatchState::Expired {
                        events.push(EngineEvent::Audit(expiry_audit(record, &change)));
                    }
                    events.push(EngineEvent::StateChanged(change));
                }
            }
            Err(e) => {
                warn!("{}", e);
                events.push(EngineEvent::Audit(AuditRecord {
                    match_id: record.match_id.clone(),
                    minute: record.minute,
                    reason: e.to_string(),
                    inputs: json!({ "snapshot": snapshot, "state": record.state }),
                    at: now,
                }));
            }
        }
    }

    async fn decide(&mut self, id: &str, now: DateTime<Utc>, events: &mut Vec<EngineEvent>) {
        let exchange = Arc::clone(&self.exchange);
        let Some(record) = self.registry.get_mut(id) else {
            return;
        };
        record.entry.observe(record.score);

        let stake = self.stakes.lookup(&record.competition, record.score);
        match self.decision.pre_check(record, stake.as_ref()) {
            Ok(()) => {}
            Err(Gate::Wait(reason)) => {
                debug!("Match {}: entry deferred, {}", record.match_id, reason);
                record.entry.last_skip = Some(reason);
                return;
            }
            Err(Gate::Skip(reason)) => {
                let inputs = json!({ "score": record.score, "targets": record.targets(), "stake": stake });
                skip(record, reason, inputs, now, events);
                return;
            }
        }
        let Some(stake) = stake else {
            return;
        };

        let market = exchange
            .market_snapshot(&record.market_id, record.selection_id)
            .await;
        let quote = match self.decision.market_check(&stake, &market) {
            Ok(q) => q,
            Err(reason) => {
                debug!("Match {}: entry deferred, {}", record.match_id, reason);
                record.entry.last_skip = Some(reason);
                return;
            }
        };

        let balance = match exchange.available_balance().await {
            Ok(b) => b,
            Err(e) => {
                warn!("Match {}: balance unavailable: {}", record.match_id, e);
                record.entry.last_skip = Some(format!("balance unavailable: {}", e));
                return;
            }
        };

        let request = match self.decision.plan(record, &quote, &stake, balance) {
            Ok(r) => r,
            Err(Gate::Wait(reason)) => {
                debug!("Match {}: entry deferred, {}", record.match_id, reason);
                record.entry.last_skip = Some(reason);
                return;
            }
            Err(Gate::Skip(reason)) => {
                let inputs = json!({ "balance": balance, "stake": stake, "best_lay": quote.best_lay });
                skip(record, reason, inputs, now, events);
                return;
            }
        };

        if record.placed {
            return;
        }
        match exchange.place_lay(&request).await {
            Ok(bet_id) => {
                record.placed = true;
                info!(
                    "Match {} ({}): LAY {} @ {} size {} liability {} (bet {})",
                    record.name,
                    record.match_id,
                    record.score,
                    request.price,
                    request.size,
                    request.liability,
                    bet_id
                );
                match record.transition(MatchState::BetPlaced, format!("bet {}", bet_id), now) {
                    Ok(change) => events.push(EngineEvent::StateChanged(change)),
                    Err(e) => error!("{}", e),
                }
                events.push(EngineEvent::Placed(PlacedBet {
                    request,
                    bet_id,
                    placed_at: now,
                }));
            }
            Err(e) => {
                let inputs = json!({ "request": request, "market": market_inputs(&market) });
                skip(record, format!("placement failed: {}", e), inputs, now, events);
            }
        }
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let done: Vec<String> = self
            .registry
            .iter()
            .filter(|(_, r)| r.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in done {
            if let Some(record) = self.registry.remove(&id) {
                debug!("Match {} evicted ({})", id, record.state);
            }
            self.retired.insert(id, now);
        }
    }
}

fn market_inputs(market: &FeedOutcome<crate::db::models::MarketSnapshot>) -> serde_json::Value {
    match market {
        FeedOutcome::Data(m) => json!(m),
        FeedOutcome::Empty => json!("empty"),
        FeedOutcome::Unreachable(e) => json!({ "unreachable": e }),
    }
}

fn skip(
    record: &mut MatchRecord,
    reason: String,
    inputs: serde_json::Value,
    now: DateTime<Utc>,
    events: &mut Vec<EngineEvent>,
) {
    warn!("Match {} ({}): SKIPPED, {}", record.name, record.match_id, reason);
    match record.transition(MatchState::Skipped, reason.clone(), now) {
        Ok(change) => events.push(EngineEvent::StateChanged(change)),
        Err(e) => {
            error!("{}", e);
            return;
        }
    }
    events.push(EngineEvent::Audit(AuditRecord {
        match_id: record.match_id.clone(),
        minute: record.minute,
        reason,
        inputs,
        at: now,
    }));
}

fn expiry_audit(record: &MatchRecord, change: &StateChange) -> AuditRecord {
    AuditRecord {
        match_id: record.match_id.clone(),
        minute: change.minute,
        reason: change.reason.clone(),
        inputs: json!({
            "score": change.score,
            "entry_cycles": record.entry.cycles,
            "last_skip": record.entry.last_skip,
        }),
        at: change.at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::clock::ManualClock;
    use crate::bot::ladder::Ladder;
    use crate::bot::record::tests::{goal, pairing};
    use crate::bot::tracker::{CONDITIONS_NEVER_MET, ENTRY_FEED_STALE, ENTRY_WINDOW_MISSED};
    use crate::db::models::{GameStatus, GoalEvent, MarketSnapshot, PlacementRequest, Side};
    use crate::error::ExchangeError;
    use crate::stakes::StakeTable;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeFeed {
        pairings: Mutex<FeedOutcome<Vec<MatchPairing>>>,
        snapshots: Mutex<HashMap<String, MatchSnapshot>>,
    }

    impl FakeFeed {
        fn new(pairings: Vec<MatchPairing>) -> Self {
            FakeFeed {
                pairings: Mutex::new(FeedOutcome::Data(pairings)),
                snapshots: Mutex::new(HashMap::new()),
            }
        }

        fn set(&self, id: &str, minute: u32, score: &str, goals: Vec<GoalEvent>) {
            self.snapshots.lock().unwrap().insert(
                id.to_string(),
                MatchSnapshot {
                    match_id: id.to_string(),
                    minute,
                    score: score.parse().unwrap(),
                    goals,
                    status: GameStatus::InProgress,
                },
            );
        }
    }

    #[async_trait]
    impl MatchFeed for FakeFeed {
        async fn fetch_pairings(&self) -> FeedOutcome<Vec<MatchPairing>> {
            self.pairings.lock().unwrap().clone()
        }

        async fn fetch_match(&self, match_id: &str) -> FeedOutcome<MatchSnapshot> {
            match self.snapshots.lock().unwrap().get(match_id) {
                Some(s) => FeedOutcome::Data(s.clone()),
                None => FeedOutcome::Empty,
            }
        }

        fn name(&self) -> &str {
            "fake feed"
        }
    }

    struct FakeExchange {
        market: Mutex<FeedOutcome<MarketSnapshot>>,
        balance: Decimal,
        reject: AtomicBool,
        attempts: Mutex<Vec<PlacementRequest>>,
        placed: Mutex<Vec<PlacementRequest>>,
    }

    impl FakeExchange {
        fn new() -> Self {
            FakeExchange {
                market: Mutex::new(FeedOutcome::Data(MarketSnapshot {
                    best_back: Some(dec!(3.10)),
                    best_lay: Some(dec!(3.15)),
                    lay_size_at_best: dec!(120),
                    total_lay_size: dec!(900),
                    ladder: Ladder::Classic,
                    open: true,
                    opposing_back: Some(dec!(1.60)),
                })),
                balance: dec!(300),
                reject: AtomicBool::new(false),
                attempts: Mutex::new(Vec::new()),
                placed: Mutex::new(Vec::new()),
            }
        }

        fn placed(&self) -> usize {
            self.placed.lock().unwrap().len()
        }

        fn attempts(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }

        fn set_market(&self, update: impl FnOnce(&mut MarketSnapshot)) {
            if let FeedOutcome::Data(m) = &mut *self.market.lock().unwrap() {
                update(m);
            }
        }
    }

    #[async_trait]
    impl Exchange for FakeExchange {
        async fn market_snapshot(&self, _: &str, _: i64) -> FeedOutcome<MarketSnapshot> {
            self.market.lock().unwrap().clone()
        }

        async fn available_balance(&self) -> Result<Decimal, ExchangeError> {
            Ok(self.balance)
        }

        async fn place_lay(&self, request: &PlacementRequest) -> Result<String, ExchangeError> {
            self.attempts.lock().unwrap().push(request.clone());
            if self.reject.load(Ordering::SeqCst) {
                return Err(ExchangeError::Rejected("MARKET_SUSPENDED".into()));
            }
            let mut placed = self.placed.lock().unwrap();
            placed.push(request.clone());
            Ok(format!("bet-{}", placed.len()))
        }
    }

    const TABLE: &str = r#"{"competitions": [{"name": "Serie A", "results": [
        {"score": "1-0", "stake_percent": "5", "reference_odds": "1.50"},
        {"score": "1-1", "stake_percent": "5", "reference_odds": "1.50"}
    ]}]}"#;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    struct Harness {
        feed: Arc<FakeFeed>,
        exchange: Arc<FakeExchange>,
        clock: Arc<ManualClock>,
        engine: BotEngine,
    }

    fn harness(pairings: Vec<MatchPairing>, exchange: FakeExchange) -> Harness {
        let feed = Arc::new(FakeFeed::new(pairings));
        let exchange = Arc::new(exchange);
        let clock = Arc::new(ManualClock::new(t0()));
        let stakes = Arc::new(StakeTable::from_json(TABLE).unwrap());
        let engine = BotEngine::new(
            EngineSettings::default(),
            feed.clone(),
            exchange.clone(),
            stakes,
            clock.clone(),
        );
        Harness {
            feed,
            exchange,
            clock,
            engine,
        }
    }

    fn new_states(events: &[EngineEvent]) -> Vec<MatchState> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::StateChanged(c) => Some(c.new_state),
                _ => None,
            })
            .collect()
    }

    fn placements(events: &[EngineEvent]) -> Vec<&PlacedBet> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Placed(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn audits(events: &[EngineEvent]) -> Vec<&AuditRecord> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Audit(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_places_exactly_once_at_seventy_five() {
        let mut h = harness(vec![pairing("m1")], FakeExchange::new());

        h.feed.set("m1", 55, "0-0", vec![]);
        let events = h.engine.run_cycle().await;
        assert!(events.is_empty());
        assert_eq!(h.engine.statuses()[0].state, MatchState::Waiting);

        h.feed.set("m1", 68, "1-0", vec![goal(68, Side::Home)]);
        h.clock.advance(ChronoDuration::seconds(60));
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events), vec![MatchState::Tracking, MatchState::Qualified]);
        assert_eq!(h.engine.next_interval(), std::time::Duration::from_secs(10));

        h.feed.set("m1", 75, "1-0", vec![goal(68, Side::Home)]);
        h.clock.advance(ChronoDuration::seconds(10));
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events), vec![MatchState::ReadyForBet, MatchState::BetPlaced]);
        let placed = placements(&events);
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].request.price, dec!(3.25));
        assert_eq!(placed[0].request.liability, dec!(15.00));
        assert_eq!(placed[0].request.size, dec!(6.67));

        // Same minute, more cycles: nothing new
        for _ in 0..3 {
            h.clock.advance(ChronoDuration::seconds(10));
            let events = h.engine.run_cycle().await;
            assert!(placements(&events).is_empty());
        }
        assert_eq!(h.exchange.placed(), 1);
        assert!(h.engine.statuses()[0].placed);
    }

    #[tokio::test]
    async fn test_never_places_past_seventy_five() {
        let exchange = FakeExchange::new();
        exchange.set_market(|m| m.open = false);
        let mut h = harness(vec![pairing("m1")], exchange);

        h.feed.set("m1", 70, "1-0", vec![goal(70, Side::Home)]);
        h.engine.run_cycle().await;

        h.feed.set("m1", 75, "1-0", vec![goal(70, Side::Home)]);
        h.clock.advance(ChronoDuration::seconds(10));
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events), vec![MatchState::ReadyForBet]);

        h.feed.set("m1", 76, "1-0", vec![goal(70, Side::Home)]);
        h.clock.advance(ChronoDuration::seconds(10));
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events), vec![MatchState::Expired]);
        assert_eq!(audits(&events)[0].reason, CONDITIONS_NEVER_MET);
        assert_eq!(h.exchange.placed(), 0);

        // Evicted and not re-registered while the pairing is still listed
        assert!(h.engine.statuses().is_empty());
        h.clock.advance(ChronoDuration::seconds(60));
        h.engine.run_cycle().await;
        assert!(h.engine.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_first_seen_late_expires_without_placing() {
        let mut h = harness(vec![pairing("m1")], FakeExchange::new());
        h.feed.set("m1", 77, "1-0", vec![goal(66, Side::Home)]);
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events).last(), Some(&MatchState::Expired));
        assert_eq!(audits(&events)[0].reason, ENTRY_WINDOW_MISSED);
        assert_eq!(h.exchange.placed(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_competition_is_audited() {
        let mut p = pairing("m2");
        p.competition = "Bundesliga".into();
        let mut h = harness(vec![p], FakeExchange::new());
        let events = h.engine.run_cycle().await;
        let audit = audits(&events);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].reason, COMPETITION_NOT_CONFIGURED);
        assert!(h.engine.statuses().is_empty());

        h.clock.advance(ChronoDuration::seconds(60));
        let events = h.engine.run_cycle().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_placement_failure_skips() {
        let exchange = FakeExchange::new();
        exchange.reject.store(true, Ordering::SeqCst);
        let mut h = harness(vec![pairing("m1")], exchange);
        h.feed.set("m1", 75, "1-1", vec![goal(20, Side::Home), goal(64, Side::Away)]);
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events).last(), Some(&MatchState::Skipped));
        assert!(audits(&events)[0].reason.starts_with("placement failed"));
        assert!(placements(&events).is_empty());
        assert!(h.engine.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_regression_is_rejected_and_audited() {
        let mut h = harness(vec![pairing("m1")], FakeExchange::new());
        h.feed.set("m1", 64, "0-0", vec![]);
        h.engine.run_cycle().await;

        h.feed.set("m1", 61, "0-0", vec![]);
        h.clock.advance(ChronoDuration::seconds(10));
        let events = h.engine.run_cycle().await;
        assert!(new_states(&events).is_empty());
        assert!(audits(&events)[0].reason.contains("minute went backwards"));
        assert_eq!(h.engine.statuses()[0].minute, 64);
    }

    #[tokio::test]
    async fn test_unreachable_feed_keeps_intensive_cadence() {
        let mut h = harness(vec![pairing("m1")], FakeExchange::new());
        h.feed.set("m1", 62, "0-0", vec![]);
        h.engine.run_cycle().await;
        assert_eq!(h.engine.next_interval(), std::time::Duration::from_secs(10));

        *h.feed.pairings.lock().unwrap() = FeedOutcome::Unreachable("timeout".into());
        h.clock.advance(ChronoDuration::seconds(10));
        h.engine.run_cycle().await;
        assert_eq!(h.engine.next_interval(), std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_relisted_match_stays_retired() {
        let exchange = FakeExchange::new();
        exchange.reject.store(true, Ordering::SeqCst);
        let mut h = harness(vec![pairing("m1")], exchange);
        let goals = vec![goal(20, Side::Home), goal(64, Side::Away)];
        h.feed.set("m1", 75, "1-1", goals.clone());
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events).last(), Some(&MatchState::Skipped));
        assert_eq!(h.exchange.attempts(), 1);

        // The listing drops m1 for one refresh, then brings it back
        *h.feed.pairings.lock().unwrap() = FeedOutcome::Data(vec![pairing("m2")]);
        h.clock.advance(ChronoDuration::seconds(60));
        h.engine.run_cycle().await;

        h.exchange.reject.store(false, Ordering::SeqCst);
        *h.feed.pairings.lock().unwrap() = FeedOutcome::Data(vec![pairing("m1"), pairing("m2")]);
        for _ in 0..3 {
            h.clock.advance(ChronoDuration::seconds(60));
            let events = h.engine.run_cycle().await;
            assert!(events.iter().all(|e| match e {
                EngineEvent::StateChanged(c) => c.match_id != "m1",
                EngineEvent::Placed(_) => false,
                EngineEvent::Audit(a) => a.match_id != "m1",
            }));
        }
        assert_eq!(h.exchange.attempts(), 1);
        assert_eq!(h.exchange.placed(), 0);
        let ids: Vec<String> = h.engine.statuses().into_iter().map(|s| s.match_id).collect();
        assert_eq!(ids, vec!["m2".to_string()]);
    }

    #[tokio::test]
    async fn test_no_placement_on_stale_entry_minute() {
        let exchange = FakeExchange::new();
        exchange.set_market(|m| m.open = false);
        let mut h = harness(vec![pairing("m1")], exchange);
        h.feed.set("m1", 75, "1-0", vec![goal(70, Side::Home)]);
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events).last(), Some(&MatchState::ReadyForBet));

        *h.feed.pairings.lock().unwrap() = FeedOutcome::Unreachable("timeout".into());
        let mut expired = false;
        for step in 1..=31 {
            h.clock.advance(ChronoDuration::seconds(10));
            if step == 7 {
                h.exchange.set_market(|m| m.open = true);
            }
            let events = h.engine.run_cycle().await;
            assert!(placements(&events).is_empty());
            if new_states(&events).contains(&MatchState::Expired) {
                assert_eq!(step, 7);
                assert_eq!(audits(&events)[0].reason, ENTRY_FEED_STALE);
                expired = true;
            }
        }
        assert!(expired);
        assert_eq!(h.exchange.attempts(), 0);
        assert!(h.engine.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_wide_spread_waits_until_expiry() {
        let exchange = FakeExchange::new();
        exchange.set_market(|m| {
            m.best_back = Some(dec!(1.95));
            m.best_lay = Some(dec!(2.00));
        });
        let mut h = harness(vec![pairing("m1")], exchange);
        let goals = vec![goal(66, Side::Home)];
        h.feed.set("m1", 75, "1-0", goals.clone());
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events), vec![
            MatchState::Tracking,
            MatchState::Qualified,
            MatchState::ReadyForBet
        ]);

        // Spread stays at 5 ticks for the rest of the minute
        for _ in 0..4 {
            h.clock.advance(ChronoDuration::seconds(10));
            let events = h.engine.run_cycle().await;
            assert!(events.is_empty());
        }

        h.feed.set("m1", 76, "1-0", goals);
        h.clock.advance(ChronoDuration::seconds(10));
        let events = h.engine.run_cycle().await;
        assert_eq!(new_states(&events), vec![MatchState::Expired]);
        assert_eq!(audits(&events)[0].reason, CONDITIONS_NEVER_MET);
        assert_eq!(h.exchange.attempts(), 0);
    }
}
