//! Dashboard — read-only Axum server over the ledger.
//!
//! Serves a small JSON API and a self-contained HTML page that polls it.
//! CORS is open for GET so the page can also be hosted elsewhere.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{AppState, DashboardState};

const DASHBOARD_HTML: &str = r##"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>MORPH Dashboard</title>
<style>
  body { font-family: ui-monospace, monospace; background: #0f1115; color: #d8dee9; margin: 2rem; }
  h1 { font-size: 1.2rem; }
  table { border-collapse: collapse; margin-bottom: 2rem; }
  td, th { padding: 0.3rem 0.8rem; border-bottom: 1px solid #2e3440; text-align: right; }
  th:first-child, td:first-child { text-align: left; }
  .off { color: #6c7380; }
</style>
</head>
<body>
<h1>MORPH Dashboard</h1>
<div id="stats"></div>
<table id="sources"><thead><tr><th>Source</th><th>Rate %</th><th>Volume</th><th>Score</th></tr></thead><tbody></tbody></table>
<table id="cycles"><thead><tr><th>Cycle</th><th>Users</th><th>Accrued</th><th>Moved</th><th>Optimal</th></tr></thead><tbody></tbody></table>
<script>
async function refresh() {
  const [stats, sources, cycles] = await Promise.all(
    ["/api/stats", "/api/sources", "/api/cycles"].map(u => fetch(u).then(r => r.json())));
  document.getElementById("stats").textContent =
    `users ${stats.total_users} | staked ${stats.total_staked} | earned ${stats.total_earned} | cycles ${stats.cycles_run}`;
  document.querySelector("#sources tbody").innerHTML = sources.map(s =>
    `<tr class="${s.active ? "" : "off"}"><td>${s.name}</td><td>${s.rate}</td><td>${s.volume}</td><td>${s.score.toFixed(2)}</td></tr>`).join("");
  document.querySelector("#cycles tbody").innerHTML = cycles.slice().reverse().map(c =>
    `<tr><td>${c.cycle_number}</td><td>${c.users_processed}</td><td>${c.total_accrued}</td><td>${c.positions_moved}</td><td>${c.optimal_source ?? "-"}</td></tr>`).join("");
}
refresh();
setInterval(refresh, 10000);
</script>
</body>
</html>
"##;

/// Bind the dashboard port and serve in a background task.
///
/// Fails only if the port cannot be bound; it doesn't block.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server starting on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });
    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/sources", get(routes::get_sources))
        .route("/api/stats", get(routes::get_stats))
        .route("/api/cycles", get(routes::get_cycles))
        .route("/health", get(routes::health))
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
