//! Dashboard API route handlers.
//!
//! All endpoints are read-only and return JSON. State is shared via
//! `Arc<DashboardState>`.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::engine::ledger::cycle::CycleReport;
use crate::engine::ledger::Ledger;
use crate::engine::scheduler::CycleLog;
use crate::strategy::scoring::{rank, score};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub ledger: Arc<Ledger>,
    pub cycle_log: CycleLog,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(ledger: Arc<Ledger>, cycle_log: CycleLog) -> Self {
        Self {
            ledger,
            cycle_log,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SourceView {
    pub id: String,
    pub name: String,
    pub rate: Decimal,
    pub volume: Decimal,
    pub active: bool,
    pub score: f64,
    /// 1 for the current optimal source; `None` when inactive.
    pub rank: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub total_users: usize,
    pub total_staked: Decimal,
    pub total_earned: Decimal,
    pub active_sources: usize,
    pub average_rate: Option<Decimal>,
    pub cycles_run: u64,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/sources
pub async fn get_sources(State(state): State<AppState>) -> Json<Vec<SourceView>> {
    let sources = state.ledger.get_sources().await;
    let ranked: Vec<&str> = rank(&sources).into_iter().map(|(s, _)| s.id.as_str()).collect();
    Json(
        sources
            .iter()
            .map(|s| SourceView {
                id: s.id.clone(),
                name: s.name.clone(),
                rate: s.rate,
                volume: s.volume,
                active: s.active,
                score: score(s),
                rank: ranked.iter().position(|id| *id == s.id).map(|i| i + 1),
            })
            .collect(),
    )
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.ledger.get_statistics().await;
    Json(StatsResponse {
        total_users: stats.total_users,
        total_staked: stats.total_staked,
        total_earned: stats.total_earned,
        active_sources: stats.active_sources,
        average_rate: stats.average_rate,
        cycles_run: state.ledger.cycles_run(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/cycles
pub async fn get_cycles(State(state): State<AppState>) -> Json<Vec<CycleReport>> {
    let log = state.cycle_log.read().await;
    // Return last 100 cycles
    let start = log.len().saturating_sub(100);
    Json(log.iter().skip(start).cloned().collect())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
