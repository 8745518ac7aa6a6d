use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::db::models::{GameStatus, GoalEvent, MatchPairing, MatchSnapshot, Score, Side};
use crate::error::FeedOutcome;
use crate::gateway::{build_client, get_json, int_field};

use super::provider::MatchFeed;

/// Live-data feed behind the JSON gateway.
///
/// `GET {base}/pairings` lists live matches already paired with a market;
/// `GET {base}/matches/{id}` returns one match in the live-score provider's
/// shape (`time`, `status`, `scores.score`, `goals`).
pub struct HttpMatchFeed {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpMatchFeed {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self> {
        Ok(HttpMatchFeed {
            http: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        })
    }
}

#[async_trait]
impl MatchFeed for HttpMatchFeed {
    fn name(&self) -> &str {
        "live-data gateway"
    }

    async fn fetch_pairings(&self) -> FeedOutcome<Vec<MatchPairing>> {
        let url = format!("{}/pairings", self.base_url);
        match get_json(&self.http, &url, self.api_key.as_deref()).await {
            FeedOutcome::Data(raw) => parse_pairings(&raw),
            FeedOutcome::Empty => FeedOutcome::Empty,
            FeedOutcome::Unreachable(e) => FeedOutcome::Unreachable(e),
        }
    }

    async fn fetch_match(&self, match_id: &str) -> FeedOutcome<MatchSnapshot> {
        let url = format!("{}/matches/{}", self.base_url, match_id);
        match get_json(&self.http, &url, self.api_key.as_deref()).await {
            FeedOutcome::Data(raw) => match parse_match(&raw, match_id) {
                Some(snapshot) => FeedOutcome::Data(snapshot),
                None => FeedOutcome::Empty,
            },
            FeedOutcome::Empty => FeedOutcome::Empty,
            FeedOutcome::Unreachable(e) => FeedOutcome::Unreachable(e),
        }
    }
}

fn id_field(v: &serde_json::Value) -> Option<String> {
    v.as_str()
        .map(str::to_string)
        .or_else(|| v.as_i64().map(|n| n.to_string()))
}

fn parse_pairings(raw: &serde_json::Value) -> FeedOutcome<Vec<MatchPairing>> {
    let Some(items) = raw["pairings"].as_array() else {
        return FeedOutcome::Empty;
    };
    let pairings: Vec<MatchPairing> = items
        .iter()
        .filter_map(|p| {
            Some(MatchPairing {
                match_id: id_field(&p["match_id"])?,
                market_id: id_field(&p["market_id"])?,
                selection_id: int_field(&p["selection_id"])?,
                name: p["name"].as_str().unwrap_or("unknown").to_string(),
                competition: p["competition"].as_str()?.to_string(),
            })
        })
        .collect();
    if pairings.len() < items.len() {
        debug!("Dropped {} malformed pairing(s)", items.len() - pairings.len());
    }
    FeedOutcome::Data(pairings)
}

fn status_from_str(status: &str, time: &str) -> GameStatus {
    let status = status.to_uppercase();
    let time = time.trim().to_uppercase();
    if status.contains("FINISHED") || matches!(time.as_str(), "FT" | "AET" | "AP") {
        GameStatus::Finished
    } else if status.contains("HALF TIME") || time == "HT" {
        GameStatus::HalfTime
    } else if status.contains("NOT STARTED") || status.contains("SCHEDULED") {
        GameStatus::NotStarted
    } else {
        GameStatus::InProgress
    }
}

/// "67", "45+2" (stoppage time counts as the base minute), "HT".
fn parse_minute(time: &str, status: GameStatus) -> u32 {
    let base = time.split('+').next().unwrap_or("").trim();
    match base.parse::<u32>() {
        Ok(m) => m,
        Err(_) => match status {
            GameStatus::HalfTime => 45,
            GameStatus::Finished => 90,
            _ => 0,
        },
    }
}

/// "0 - 1" as sent by the provider.
fn parse_score(raw: &serde_json::Value) -> Option<Score> {
    raw["scores"]["score"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| {
            let home = int_field(&raw["home_score"])?;
            let away = int_field(&raw["away_score"])?;
            Some(Score::new(home.try_into().ok()?, away.try_into().ok()?))
        })
}

fn parse_goal(g: &serde_json::Value) -> Option<GoalEvent> {
    let minute = g["minute"]
        .as_u64()
        .map(|m| m as u32)
        .or_else(|| g["minute"].as_str().map(|s| parse_minute(s, GameStatus::InProgress)))?;
    let team = g["team"].as_str().or_else(|| g["home_away"].as_str())?;
    let side = match team.to_lowercase().as_str() {
        t if t.contains("home") || t == "h" => Side::Home,
        t if t.contains("away") || t == "a" => Side::Away,
        _ => return None,
    };
    let cancelled = match &g["cancelled"] {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => {
            matches!(s.to_lowercase().as_str(), "true" | "yes" | "1" | "cancelled")
        }
        _ => false,
    };
    Some(GoalEvent {
        minute,
        side,
        cancelled,
        source_id: id_field(&g["id"]),
    })
}

fn parse_match(raw: &serde_json::Value, requested_id: &str) -> Option<MatchSnapshot> {
    if !raw.is_object() {
        return None;
    }
    let time = raw["time"]
        .as_str()
        .map(str::to_string)
        .or_else(|| raw["time"].as_u64().map(|m| m.to_string()))
        .unwrap_or_default();
    let status = status_from_str(raw["status"].as_str().unwrap_or(""), &time);
    let goals = raw["goals"]
        .as_array()
        .map(|gs| gs.iter().filter_map(parse_goal).collect())
        .unwrap_or_default();
    Some(MatchSnapshot {
        match_id: id_field(&raw["id"]).unwrap_or_else(|| requested_id.to_string()),
        minute: parse_minute(&time, status),
        score: parse_score(raw)?,
        goals,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_match_payload() {
        let raw = json!({
            "id": 2231,
            "time": "68",
            "status": "IN PLAY",
            "scores": {"score": "1 - 0"},
            "goals": [
                {"id": "g1", "minute": "68", "team": "home"},
                {"id": "g0", "minute": 12, "team": "away", "cancelled": "true"}
            ]
        });
        let snap = parse_match(&raw, "2231").unwrap();
        assert_eq!(snap.match_id, "2231");
        assert_eq!(snap.minute, 68);
        assert_eq!(snap.score, Score::new(1, 0));
        assert_eq!(snap.status, GameStatus::InProgress);
        assert_eq!(snap.goals.len(), 2);
        assert_eq!(snap.goals[0].source_id.as_deref(), Some("g1"));
        assert!(snap.goals[1].cancelled);
        assert_eq!(snap.goals[1].side, Side::Away);
    }

    #[test]
    fn test_stoppage_time_and_breaks() {
        assert_eq!(parse_minute("45+2", GameStatus::InProgress), 45);
        assert_eq!(parse_minute("HT", GameStatus::HalfTime), 45);
        assert_eq!(status_from_str("", "FT"), GameStatus::Finished);
        assert_eq!(status_from_str("HALF TIME BREAK", "HT"), GameStatus::HalfTime);
        assert_eq!(status_from_str("NOT STARTED", ""), GameStatus::NotStarted);
        assert_eq!(status_from_str("IN PLAY", "75"), GameStatus::InProgress);
    }

    #[test]
    fn test_match_without_score_is_empty() {
        let raw = json!({"id": "1", "time": "10"});
        assert!(parse_match(&raw, "1").is_none());
    }

    #[test]
    fn test_parse_pairings() {
        let raw = json!({"pairings": [
            {"match_id": 2231, "market_id": "1.2345", "selection_id": "47973",
             "name": "Roma v Lazio", "competition": "Serie A"},
            {"match_id": 9, "market_id": "1.9"}
        ]});
        let FeedOutcome::Data(pairings) = parse_pairings(&raw) else {
            panic!("expected data");
        };
        assert_eq!(pairings.len(), 1);
        assert_eq!(pairings[0].match_id, "2231");
        assert_eq!(pairings[0].selection_id, 47973);

        assert_eq!(parse_pairings(&json!({})), FeedOutcome::Empty);
    }
}
