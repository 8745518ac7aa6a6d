use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::bot::ladder::Ladder;
use crate::db::models::{MarketSnapshot, PlacementRequest};
use crate::error::{ExchangeError, FeedOutcome};
use crate::gateway::{build_client, get_json, int_field, with_key};

use super::provider::Exchange;

/// Client for the exchange gateway (Betfair-style market books, account
/// funds and order placement).
///
/// In dry-run mode market books are still read from the gateway, but funds
/// come from a local balance and orders never leave the process.
pub struct ExchangeClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    dry_run: bool,
    /// Simulated funds in dry-run mode
    paper_balance: Mutex<Decimal>,
    paper_bets: AtomicU64,
}

impl ExchangeClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        dry_run: bool,
        initial_balance: Decimal,
    ) -> Result<Self> {
        Ok(ExchangeClient {
            http: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            dry_run,
            paper_balance: Mutex::new(initial_balance),
            paper_bets: AtomicU64::new(0),
        })
    }

    fn place_paper(&self, request: &PlacementRequest) -> Result<String, ExchangeError> {
        let mut balance = self
            .paper_balance
            .lock()
            .map_err(|_| ExchangeError::Rejected("paper balance poisoned".into()))?;
        if request.liability > *balance {
            return Err(ExchangeError::Rejected(format!(
                "INSUFFICIENT_FUNDS: liability {} > balance {}",
                request.liability, *balance
            )));
        }
        *balance -= request.liability;
        let n = self.paper_bets.fetch_add(1, Ordering::Relaxed) + 1;
        let bet_id = format!("DRY-{}-{}", request.match_id, n);
        info!(
            "[DRY RUN] Lay {} @ {} size {} (liability {}), paper balance now {}",
            request.market_id, request.price, request.size, request.liability, *balance
        );
        Ok(bet_id)
    }
}

#[async_trait]
impl Exchange for ExchangeClient {
    async fn market_snapshot(
        &self,
        market_id: &str,
        selection_id: i64,
    ) -> FeedOutcome<MarketSnapshot> {
        let url = format!("{}/markets/{}/book", self.base_url, market_id);
        match get_json(&self.http, &url, self.api_key.as_deref()).await {
            FeedOutcome::Data(raw) => match parse_market_book(&raw, selection_id) {
                Some(book) => FeedOutcome::Data(book),
                None => FeedOutcome::Empty,
            },
            FeedOutcome::Empty => FeedOutcome::Empty,
            FeedOutcome::Unreachable(e) => FeedOutcome::Unreachable(e),
        }
    }

    async fn available_balance(&self) -> Result<Decimal, ExchangeError> {
        if self.dry_run {
            let balance = self
                .paper_balance
                .lock()
                .map_err(|_| ExchangeError::Rejected("paper balance poisoned".into()))?;
            return Ok(*balance);
        }
        let url = format!("{}/funds", self.base_url);
        match get_json(&self.http, &url, self.api_key.as_deref()).await {
            FeedOutcome::Data(raw) => decimal_field(&raw["availableToBetBalance"])
                .ok_or_else(|| ExchangeError::Rejected("funds response without balance".into())),
            FeedOutcome::Empty => Err(ExchangeError::Rejected("no account funds".into())),
            FeedOutcome::Unreachable(e) => Err(ExchangeError::Unreachable(e)),
        }
    }

    async fn place_lay(&self, request: &PlacementRequest) -> Result<String, ExchangeError> {
        if self.dry_run {
            return self.place_paper(request);
        }
        info!(
            "Placing lay: market={}, selection={}, price={}, size={}, liability={}",
            request.market_id, request.selection_id, request.price, request.size, request.liability
        );
        let order = serde_json::json!({
            "marketId": request.market_id,
            "customerRef": request.match_id,
            "instructions": [{
                "selectionId": request.selection_id,
                "handicap": 0,
                "side": "LAY",
                "orderType": "LIMIT",
                "limitOrder": {
                    "size": request.size.to_string(),
                    "price": request.price.to_string(),
                    "persistenceType": "LAPSE",
                },
            }],
        });
        let url = format!("{}/orders", self.base_url);
        let resp = with_key(self.http.post(&url), self.api_key.as_deref())
            .json(&order)
            .send()
            .await?;

        if resp.status().is_server_error() {
            return Err(ExchangeError::Unreachable(format!("HTTP {}", resp.status())));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExchangeError::Rejected(format!("{}: {}", status, body)));
        }
        let result: serde_json::Value = resp.json().await?;
        let bet_id = parse_place_report(&result)?;
        info!("Lay placed, bet id={}", bet_id);
        Ok(bet_id)
    }
}

fn decimal_field(v: &serde_json::Value) -> Option<Decimal> {
    match v {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn best_level(levels: &serde_json::Value) -> Option<(Decimal, Decimal)> {
    let first = levels.as_array()?.first()?;
    Some((
        decimal_field(&first["price"])?,
        decimal_field(&first["size"]).unwrap_or(Decimal::ZERO),
    ))
}

fn parse_ladder(raw: &serde_json::Value) -> Ladder {
    match raw["priceLadderDefinition"]["type"].as_str() {
        Some("FINEST") => Ladder::Finest,
        Some("CLASSIC") | None => Ladder::Classic,
        Some(other) => {
            warn!("Unknown price ladder '{}', using CLASSIC", other);
            Ladder::Classic
        }
    }
}

/// Book for `selection_id`; the first other runner is the opposing side.
fn parse_market_book(raw: &serde_json::Value, selection_id: i64) -> Option<MarketSnapshot> {
    let runners = raw["runners"].as_array()?;
    let runner = runners
        .iter()
        .find(|r| int_field(&r["selectionId"]) == Some(selection_id))?;
    let opposing_back = runners
        .iter()
        .find(|r| int_field(&r["selectionId"]) != Some(selection_id))
        .and_then(|r| best_level(&r["ex"]["availableToBack"]))
        .map(|(price, _)| price);

    let best_back = best_level(&runner["ex"]["availableToBack"]);
    let best_lay = best_level(&runner["ex"]["availableToLay"]);
    let total_lay_size = runner["ex"]["availableToLay"]
        .as_array()
        .map(|levels| {
            levels
                .iter()
                .filter_map(|l| decimal_field(&l["size"]))
                .sum::<Decimal>()
        })
        .unwrap_or(Decimal::ZERO);

    Some(MarketSnapshot {
        best_back: best_back.map(|(p, _)| p),
        best_lay: best_lay.map(|(p, _)| p),
        lay_size_at_best: best_lay.map_or(Decimal::ZERO, |(_, s)| s),
        total_lay_size,
        ladder: parse_ladder(raw),
        open: raw["status"].as_str() == Some("OPEN") && raw["inplay"].as_bool() != Some(false),
        opposing_back,
    })
}

fn parse_place_report(result: &serde_json::Value) -> Result<String, ExchangeError> {
    if let Some(code) = result["errorCode"].as_str() {
        return Err(ExchangeError::Rejected(code.to_string()));
    }
    let report = &result["instructionReports"][0];
    match report["status"].as_str() {
        Some("SUCCESS") => report["betId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExchangeError::Rejected("success report without bet id".into())),
        _ => Err(ExchangeError::Rejected(
            report["errorCode"]
                .as_str()
                .or_else(|| result["status"].as_str())
                .unwrap_or("UNKNOWN")
                .to_string(),
        )),
    }
}
