use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use crate::bot::record::MatchStatus;
use crate::db::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub dry_run: bool,
    /// Latest registry snapshot published by the engine after each cycle
    pub statuses: watch::Receiver<Vec<MatchStatus>>,
}

#[derive(Debug, Deserialize)]
struct Limit {
    limit: Option<i64>,
}

impl Limit {
    fn get(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 500)
    }
}

/// Build the Axum router for the dashboard.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/matches", get(matches_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/state-changes", get(state_changes_handler))
        .route("/api/matches/:id/history", get(history_handler))
        .route("/api/placements", get(placements_handler))
        .route("/api/audit", get(audit_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Serve the dashboard HTML page, injecting the dry_run flag.
async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let html = DASHBOARD_HTML.replace(
        r#"<body>"#,
        &format!(r#"<body data-dryrun="{}">"#, state.dry_run),
    );
    Html(html)
}

/// GET /api/matches
async fn matches_handler(State(state): State<Arc<AppState>>) -> Json<Vec<MatchStatus>> {
    Json(state.statuses.borrow().clone())
}

/// GET /api/stats
async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .get_stats()
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/state-changes?limit=50
async fn state_changes_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<Limit>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .list_state_changes(q.get())
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/matches/:id/history
async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .match_history(&match_id)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/placements?limit=50
async fn placements_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<Limit>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .list_placements(q.get())
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /api/audit?limit=50
async fn audit_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<Limit>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .list_audit_records(q.get())
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Embedded single-file dashboard (HTML + CSS + JS)
const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Goal Window Bot</title>
<style>
  :root {
    --bg: #0f1117;
    --card: #1a1d27;
    --border: #2a2d3a;
    --accent: #6c63ff;
    --green: #00c896;
    --red: #ff4f6a;
    --amber: #ff9800;
    --text: #e0e0e0;
    --muted: #8888aa;
  }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { background: var(--bg); color: var(--text); font-family: 'Segoe UI', system-ui, sans-serif; }
  header { display: flex; align-items: center; gap: 1rem; padding: 1rem 2rem; border-bottom: 1px solid var(--border); }
  header h1 { font-size: 1.4rem; font-weight: 700; }
  .badge { padding: .2rem .6rem; border-radius: 4px; font-size: .75rem; font-weight: 700; text-transform: uppercase; }
  .badge.dryrun { background: var(--amber); color: #000; }
  .badge.live { background: var(--green); color: #000; }
  main { padding: 1.5rem 2rem; display: grid; gap: 1.5rem; }
  .stats-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(160px, 1fr)); gap: 1rem; }
  .stat-card { background: var(--card); border: 1px solid var(--border); border-radius: 10px; padding: 1.2rem; }
  .stat-card .label { color: var(--muted); font-size: .8rem; text-transform: uppercase; margin-bottom: .4rem; }
  .stat-card .value { font-size: 1.7rem; font-weight: 700; }
  .panel { background: var(--card); border: 1px solid var(--border); border-radius: 10px; overflow: hidden; }
  .panel-header { padding: .9rem 1.2rem; border-bottom: 1px solid var(--border); font-weight: 600; }
  table { width: 100%; border-collapse: collapse; }
  th { padding: .7rem 1rem; text-align: left; font-size: .75rem; text-transform: uppercase; color: var(--muted); border-bottom: 1px solid var(--border); }
  td { padding: .65rem 1rem; font-size: .88rem; border-bottom: 1px solid #1e2130; }
  .pill { display: inline-block; padding: .15rem .55rem; border-radius: 20px; font-size: .75rem; font-weight: 600; background: rgba(108,99,255,.2); color: var(--accent); }
  .pill.QUALIFIED, .pill.READY_FOR_BET, .pill.BET_PLACED { background: rgba(0,200,150,.15); color: var(--green); }
  .pill.DISQUALIFIED, .pill.SKIPPED, .pill.EXPIRED { background: rgba(255,79,106,.15); color: var(--red); }
  .target { color: var(--green); font-weight: 700; }
  .cancelled { text-decoration: line-through; color: var(--muted); }
  .two-col { display: grid; grid-template-columns: 1fr 1fr; gap: 1.5rem; }
  @media (max-width: 768px) { .two-col { grid-template-columns: 1fr; } }
  .empty { color: var(--muted); text-align: center; padding: 2rem; font-size: .9rem; }
</style>
</head>
<body>
<header>
  <h1>Goal Window Bot</h1>
  <span class="badge" id="mode-badge">…</span>
  <span style="margin-left:auto;color:var(--muted);font-size:.8rem;" id="last-updated"></span>
</header>
<main>
  <div class="stats-grid">
    <div class="stat-card"><div class="label">Tracked</div><div class="value" id="s-tracked">–</div></div>
    <div class="stat-card"><div class="label">Qualified</div><div class="value" id="s-qualified">–</div></div>
    <div class="stat-card"><div class="label">Bets</div><div class="value" id="s-placements">–</div></div>
    <div class="stat-card"><div class="label">Skipped</div><div class="value" id="s-skipped">–</div></div>
    <div class="stat-card"><div class="label">Expired</div><div class="value" id="s-expired">–</div></div>
    <div class="stat-card"><div class="label">Liability</div><div class="value" id="s-liability">–</div></div>
  </div>

  <div class="panel">
    <div class="panel-header">Live Matches</div>
    <table>
      <thead><tr><th>Match</th><th>Competition</th><th>Min</th><th>Score</th><th>Targets</th><th>Goals</th><th>State</th><th>Reason</th></tr></thead>
      <tbody id="matches-tbody"><tr><td colspan="8" class="empty">Loading…</td></tr></tbody>
    </table>
  </div>

  <div class="two-col">
    <div class="panel">
      <div class="panel-header">Bets</div>
      <table>
        <thead><tr><th>Time</th><th>Match</th><th>Price</th><th>Stake</th><th>Liability</th><th>Bet</th></tr></thead>
        <tbody id="placements-tbody"><tr><td colspan="6" class="empty">Loading…</td></tr></tbody>
      </table>
    </div>
    <div class="panel">
      <div class="panel-header">Skips &amp; Expiries</div>
      <table>
        <thead><tr><th>Time</th><th>Match</th><th>Min</th><th>Reason</th></tr></thead>
        <tbody id="audit-tbody"><tr><td colspan="4" class="empty">Loading…</td></tr></tbody>
      </table>
    </div>
  </div>

  <div class="panel">
    <div class="panel-header">State Changes</div>
    <table>
      <thead><tr><th>Time</th><th>Match</th><th>Min</th><th>Score</th><th>From</th><th>To</th><th>Reason</th></tr></thead>
      <tbody id="changes-tbody"><tr><td colspan="7" class="empty">Loading…</td></tr></tbody>
    </table>
  </div>
</main>

<script>
const time = ts => new Date(ts).toLocaleTimeString();
const pill = s => `<span class="pill ${s}">${s.replace(/_/g,' ')}</span>`;
const rows = (id, items, cols, render) => {
  const tbody = document.getElementById(id);
  tbody.innerHTML = items.length
    ? items.map(render).join('')
    : `<tr><td colspan="${cols}" class="empty">Nothing yet</td></tr>`;
};
const getJson = async url => { const r = await fetch(url); return r.ok ? r.json() : null; };

async function loadMatches() {
  const matches = await getJson('/api/matches');
  if (!matches) return;
  document.getElementById('s-tracked').textContent = matches.length;
  rows('matches-tbody', matches, 8, m => `<tr>
    <td>${m.name}</td>
    <td>${m.competition}</td>
    <td>${m.minute}'</td>
    <td class="${m.target ? 'target' : ''}">${m.score}</td>
    <td>${m.targets.join(', ')}</td>
    <td>${m.goals.map(g => `<span class="${g.cancelled ? 'cancelled' : ''}">${g.minute}' ${g.side}</span>`).join(' ')}</td>
    <td>${pill(m.state)}${m.discard_candidate ? ' ⏳' : ''}</td>
    <td>${m.discard_candidate ? m.discard_candidate.reason : m.reason}</td>
  </tr>`);
}

async function loadStats() {
  const s = await getJson('/api/stats');
  if (!s) return;
  document.getElementById('s-qualified').textContent = s.qualified;
  document.getElementById('s-placements').textContent = s.placements;
  document.getElementById('s-skipped').textContent = s.skipped;
  document.getElementById('s-expired').textContent = s.expired;
  document.getElementById('s-liability').textContent = Number(s.total_liability).toFixed(2);
}

async function loadJournal() {
  const [placements, audit, changes] = await Promise.all([
    getJson('/api/placements?limit=20'),
    getJson('/api/audit?limit=20'),
    getJson('/api/state-changes?limit=40'),
  ]);
  if (placements) rows('placements-tbody', placements, 6, p => `<tr>
    <td>${time(p.placed_at)}</td><td>${p.request.match_id}</td><td>${p.request.price}</td>
    <td>${p.request.size}</td><td>${p.request.liability}</td><td>${p.bet_id}</td></tr>`);
  if (audit) rows('audit-tbody', audit, 4, a => `<tr>
    <td>${time(a.at)}</td><td>${a.match_id}</td><td>${a.minute}'</td><td>${a.reason}</td></tr>`);
  if (changes) rows('changes-tbody', changes, 7, c => `<tr>
    <td>${time(c.at)}</td><td>${c.match_id}</td><td>${c.minute}'</td><td>${c.score}</td>
    <td>${pill(c.old_state)}</td><td>${pill(c.new_state)}</td><td>${c.reason}</td></tr>`);
}

async function loadAll() {
  await Promise.all([loadMatches(), loadStats(), loadJournal()]);
  document.getElementById('last-updated').textContent = 'Updated ' + new Date().toLocaleTimeString();
}

loadAll();
setInterval(loadAll, 3000);

document.addEventListener('DOMContentLoaded', () => {
  const isDryRun = document.body.dataset.dryrun === 'true';
  const badge = document.getElementById('mode-badge');
  badge.textContent = isDryRun ? 'Dry Run' : 'Live';
  badge.className = 'badge ' + (isDryRun ? 'dryrun' : 'live');
});
</script>
</body>
</html>"#;
