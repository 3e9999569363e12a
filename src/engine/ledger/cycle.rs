//! Compound cycle — the scheduled batch pass over every account.
//!
//! One cycle accrues every position to `now`, moves positions whose rate is
//! beaten by the optimal source by more than the threshold, then lets source
//! rates drift, carries the new rates onto bound positions, and writes the
//! result. The optimal source is picked once,
//! from pre-drift rates, so every account in a cycle sees the same target.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

use super::{mirror_positions, Ledger};
use crate::engine::accrual;
use crate::strategy::select_optimal;

/// What one compound cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub timestamp: DateTime<Utc>,
    pub users_processed: usize,
    pub positions_accrued: usize,
    pub total_accrued: Decimal,
    pub positions_moved: usize,
    /// Users that had at least one position moved, with the move count.
    pub moved_by_user: Vec<(String, usize)>,
    pub optimal_source: Option<String>,
    pub sources_drifted: usize,
    /// False when the end-of-cycle write failed. The in-memory state is
    /// kept either way and the next successful write catches up.
    pub persisted: bool,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle #{} users={} accrued={:.8} over {} positions, moved={} optimal={} drifted={}{}",
            self.cycle_number,
            self.users_processed,
            self.total_accrued,
            self.positions_accrued,
            self.positions_moved,
            self.optimal_source.as_deref().unwrap_or("none"),
            self.sources_drifted,
            if self.persisted { "" } else { " (not persisted)" },
        )
    }
}

/// A user whose earnings crossed the notification threshold.
#[derive(Debug, Clone, Serialize)]
pub struct EarningsUpdate {
    pub user_id: String,
    pub total_staked: Decimal,
    pub total_earned: Decimal,
}

impl Ledger {
    /// Run one compound cycle at `now`.
    ///
    /// Each account is processed under its own lock, so user operations on
    /// other accounts proceed while the cycle runs.
    pub async fn run_compound_cycle<R>(&self, now: DateTime<Utc>, rng: &mut R) -> CycleReport
    where
        R: Rng + Send + ?Sized,
    {
        let cycle_number = self.cycles_run.fetch_add(1, Ordering::SeqCst) + 1;

        let optimal = {
            let sources = self.sources.read().await;
            select_optimal(sources.iter()).ok().cloned()
        };
        if optimal.is_none() {
            warn!(cycle_number, "No active source, skipping reallocation");
        }

        let mut users_processed = 0;
        let mut positions_accrued = 0;
        let mut total_accrued = Decimal::ZERO;
        let mut moved_by_user = Vec::new();
        let mut volume_in: HashMap<String, Decimal> = HashMap::new();

        for handle in self.all_accounts().await {
            let mut account = handle.lock().await;
            users_processed += 1;

            let mut accrued = Decimal::ZERO;
            let mut moved = 0;
            for position in account.positions.iter_mut() {
                let delta = accrual::accrue(position, now);
                if delta > Decimal::ZERO {
                    positions_accrued += 1;
                    accrued += delta;
                }
                if let Some(target) = &optimal {
                    if self.policy.reallocate(position, target) {
                        moved += 1;
                        *volume_in.entry(target.id.clone()).or_default() += position.principal;
                    }
                }
            }

            account.user.total_earned += accrued;
            account.user.total_staked += accrued;
            total_accrued += accrued;

            if accrued > Decimal::ZERO || moved > 0 {
                self.committed
                    .lock()
                    .await
                    .accounts
                    .insert(account.user.id.clone(), account.clone());
            }
            if moved > 0 {
                info!(user_id = %account.user.id, moved, "Positions reallocated");
                moved_by_user.push((account.user.id.clone(), moved));
            }
        }

        let (sources_drifted, rates) = {
            let mut sources = self.sources.write().await;
            for source in sources.iter_mut() {
                if let Some(amount) = volume_in.get(&source.id) {
                    source.volume += *amount;
                }
            }
            let drifted = self.drift.apply(&mut sources, rng);
            let rates: HashMap<String, Decimal> =
                sources.iter().map(|s| (s.id.clone(), s.rate)).collect();
            (drifted, rates)
        };
        // Reallocation above saw pre-drift rates; positions pick up the
        // drifted ones only now.
        if sources_drifted > 0 {
            self.mirror_rates(&rates).await;
        }

        let persisted = match self.flush().await {
            Ok(()) => true,
            Err(e) => {
                error!(cycle_number, error = %e, "Failed to persist cycle");
                false
            }
        };

        moved_by_user.sort();
        let report = CycleReport {
            cycle_number,
            timestamp: now,
            users_processed,
            positions_accrued,
            total_accrued,
            positions_moved: moved_by_user.iter().map(|(_, n)| n).sum(),
            moved_by_user,
            optimal_source: optimal.map(|s| s.id),
            sources_drifted,
            persisted,
        };
        info!(%report, "Compound cycle complete");
        report
    }

    /// Point every live position at its bound source's rate.
    async fn mirror_rates(&self, rates: &HashMap<String, Decimal>) {
        for handle in self.all_accounts().await {
            let mut account = handle.lock().await;
            if mirror_positions(&mut account.positions, rates) > 0 {
                self.committed
                    .lock()
                    .await
                    .accounts
                    .insert(account.user.id.clone(), account.clone());
            }
        }
    }

    /// Users whose unrealized earnings exceed `threshold`, by user id.
    pub async fn earnings_report(&self, threshold: Decimal) -> Vec<EarningsUpdate> {
        let mut updates = Vec::new();
        for handle in self.all_accounts().await {
            let account = handle.lock().await;
            if account.user.total_earned > threshold {
                updates.push(EarningsUpdate {
                    user_id: account.user.id.clone(),
                    total_staked: account.user.total_staked,
                    total_earned: account.user.total_earned,
                });
            }
        }
        updates.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        updates
    }

    /// Cycles run since the ledger was opened.
    pub fn cycles_run(&self) -> u64 {
        self.cycles_run.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
