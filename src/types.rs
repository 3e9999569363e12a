//! Shared types for the MORPH ledger.
//!
//! These types form the data model used across all modules: the records
//! owned by the ledger store (users, positions, sources), the read-only
//! snapshots handed to callers, and the domain error taxonomy.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::wallet::Wallet;

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// A yield venue that positions can be bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    /// Annualized rate in percent (e.g. `12.5` for 12.5%).
    #[serde(with = "rust_decimal::serde::str")]
    pub rate: Decimal,
    /// Accumulated volume routed into this source. Only ever grows.
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    pub active: bool,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} rate={:.2}% vol={:.2} {}",
            self.id,
            self.name,
            self.rate,
            self.volume,
            if self.active { "active" } else { "inactive" },
        )
    }
}

impl Source {
    pub fn new(id: &str, name: &str, rate: Decimal) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            rate,
            volume: Decimal::ZERO,
            active: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A single stake of principal bound to one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub user_id: String,
    /// Principal; grows as rewards are accrued into it.
    #[serde(with = "rust_decimal::serde::str")]
    pub principal: Decimal,
    pub source_id: String,
    /// Rate at the moment the position was opened. Never changes.
    #[serde(with = "rust_decimal::serde::str")]
    pub start_rate: Decimal,
    /// Rate of the currently bound source, refreshed on reallocation and
    /// whenever that source's rate drifts.
    #[serde(with = "rust_decimal::serde::str")]
    pub current_rate: Decimal,
    /// Reward accrued since the last earnings withdrawal.
    #[serde(with = "rust_decimal::serde::str")]
    pub earned: Decimal,
    /// Liquidity shares; mirrors `principal`.
    #[serde(with = "rust_decimal::serde::str")]
    pub shares: Decimal,
    pub created_at: DateTime<Utc>,
    pub last_accrual: DateTime<Utc>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} principal={:.4} rate={:.2}% earned={:.6}",
            self.source_id, self.id, self.principal, self.current_rate, self.earned,
        )
    }
}

impl Position {
    /// Open a new position bound to `source` at its current rate.
    pub fn open(user_id: &str, source: &Source, amount: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            principal: amount,
            source_id: source.id.clone(),
            start_rate: source.rate,
            current_rate: source.rate,
            earned: Decimal::ZERO,
            shares: amount,
            created_at: now,
            last_accrual: now,
        }
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// An account holder. Owns a wallet identity and a list of positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub wallet: Wallet,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_staked: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_earned: Decimal,
    pub position_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) balance={:.4} staked={:.4} earned={:.6} positions={}",
            self.id,
            self.display_name,
            self.balance,
            self.total_staked,
            self.total_earned,
            self.position_ids.len(),
        )
    }
}

impl User {
    pub fn new(id: &str, display_name: &str, wallet: Wallet, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            wallet,
            balance: Decimal::ZERO,
            total_staked: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            position_ids: Vec::new(),
            created_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Withdrawal
// ---------------------------------------------------------------------------

/// What a withdrawal takes out of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawMode {
    /// Realize earned rewards; positions stay live.
    EarningsOnly,
    /// Close every position and realize principal plus earnings.
    Full,
}

impl fmt::Display for WithdrawMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawMode::EarningsOnly => write!(f, "earnings-only"),
            WithdrawMode::Full => write!(f, "full"),
        }
    }
}

/// Outcome of a successful withdrawal.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
    pub mode: WithdrawMode,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub positions_closed: usize,
}

// ---------------------------------------------------------------------------
// Read-only snapshots
// ---------------------------------------------------------------------------

/// Per-position line in a portfolio snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PositionDetail {
    pub position_id: String,
    pub source_id: String,
    pub source_name: String,
    pub principal: Decimal,
    pub start_rate: Decimal,
    pub current_rate: Decimal,
    pub earned: Decimal,
    pub shares: Decimal,
    pub duration_days: i64,
}

/// A user's holdings at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    pub user_id: String,
    pub balance: Decimal,
    pub total_staked: Decimal,
    pub total_earned: Decimal,
    /// `total_earned / total_staked`, zero when nothing is staked.
    pub roi: Decimal,
    /// Reward accrued by the lazy accrual that produced this snapshot.
    pub accrued_now: Decimal,
    pub positions: Vec<PositionDetail>,
}

impl fmt::Display for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "balance={:.4} staked={:.4} earned={:.6} roi={:.2}% positions={}",
            self.balance,
            self.total_staked,
            self.total_earned,
            self.roi * Decimal::ONE_HUNDRED,
            self.positions.len(),
        )
    }
}

/// Aggregate totals across the whole ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_users: usize,
    pub total_staked: Decimal,
    pub total_earned: Decimal,
    pub active_sources: usize,
    /// Mean rate over active sources; `None` when none are active.
    pub average_rate: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for MORPH.
#[derive(Debug, thiserror::Error)]
pub enum MorphError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("No active source available")]
    NoActiveSource,

    #[error("No active stakes for user {0}")]
    NoActiveStakes(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl MorphError {
    pub fn user_not_found(id: &str) -> Self {
        MorphError::NotFound { kind: "User", id: id.to_string() }
    }

    pub fn source_not_found(id: &str) -> Self {
        MorphError::NotFound { kind: "Source", id: id.to_string() }
    }
}

pub type LedgerResult<T> = std::result::Result<T, MorphError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
