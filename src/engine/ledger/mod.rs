//! Ledger — the store of users, positions and sources, and the operations
//! that mutate it on user action.
//!
//! # Locking
//!
//! Every account (a user plus its positions) sits behind its own mutex, and
//! every read-modify-write of an account holds that mutex for its whole
//! duration. The source table is behind one `RwLock`. Persistence goes
//! through a single commit lock guarding the last written snapshot.
//!
//! Lock order is always account → commit → sources. No path holds two
//! account locks at once.
//!
//! # Persistence
//!
//! User-triggered operations build a draft of the account, write a full
//! snapshot containing the draft, and only then install the draft. A failed
//! write fails the operation and leaves memory as it was. The scheduler's
//! batch cycle instead publishes its mutations immediately and flushes at
//! the end; see [`cycle`].

pub mod cycle;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::engine::accrual;
use crate::engine::market::RateDrift;
use crate::storage::{Collection, LedgerStorage, Mapping};
use crate::strategy::{select_optimal, ReallocationPolicy};
use crate::types::{
    LedgerResult, MorphError, Portfolio, Position, PositionDetail, Source, Statistics, User,
    WithdrawMode, WithdrawalReceipt,
};
use crate::wallet::Wallet;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A user together with the positions it owns.
#[derive(Debug, Clone)]
pub(crate) struct Account {
    pub(crate) user: User,
    pub(crate) positions: Vec<Position>,
}

impl Account {
    fn new(user: User) -> Self {
        Self { user, positions: Vec::new() }
    }

    /// Accrue every position to `now`, keeping the user aggregates in step.
    fn accrue(&mut self, now: DateTime<Utc>) -> Decimal {
        let mut total = Decimal::ZERO;
        for position in self.positions.iter_mut() {
            total += accrual::accrue(position, now);
        }
        self.user.total_earned += total;
        self.user.total_staked += total;
        total
    }

    fn principal_sum(&self) -> Decimal {
        self.positions.iter().map(|p| p.principal).sum()
    }
}

/// Public view of a user. Carries no secret material.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub user_id: String,
    pub display_name: String,
    pub public_key: String,
    pub balance: Decimal,
    pub total_staked: Decimal,
    pub total_earned: Decimal,
    pub position_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        let user = &account.user;
        Self {
            user_id: user.id.clone(),
            display_name: user.display_name.clone(),
            public_key: user.wallet.public_key.clone(),
            balance: user.balance,
            total_staked: user.total_staked,
            total_earned: user.total_earned,
            position_count: account.positions.len(),
            created_at: user.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything that gets written to storage.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    accounts: BTreeMap<String, Account>,
    sources: Vec<Source>,
}

impl Snapshot {
    fn to_batch(&self) -> LedgerResult<Vec<(Collection, Mapping)>> {
        let users = to_mapping(self.accounts.values().map(|a| (a.user.id.as_str(), &a.user)))?;
        let positions = to_mapping(
            self.accounts
                .values()
                .flat_map(|a| a.positions.iter())
                .map(|p| (p.id.as_str(), p)),
        )?;
        let sources = to_mapping(self.sources.iter().map(|s| (s.id.as_str(), s)))?;
        Ok(vec![
            (Collection::Sources, sources),
            (Collection::Positions, positions),
            (Collection::Users, users),
        ])
    }
}

fn to_mapping<'a, T, I>(records: I) -> LedgerResult<Mapping>
where
    T: Serialize + 'a,
    I: Iterator<Item = (&'a str, &'a T)>,
{
    let mut mapping = Mapping::new();
    for (id, record) in records {
        let value = serde_json::to_value(record)
            .map_err(|e| MorphError::Storage(format!("failed to serialise {id}: {e}")))?;
        mapping.insert(id.to_string(), value);
    }
    Ok(mapping)
}

fn from_mapping<T: DeserializeOwned>(collection: Collection, mapping: Mapping) -> LedgerResult<Vec<T>> {
    mapping
        .into_iter()
        .map(|(id, value)| {
            serde_json::from_value(value).map_err(|e| {
                MorphError::Storage(format!("bad record {id} in {}: {e}", collection.name()))
            })
        })
        .collect()
}

fn load_collection<T: DeserializeOwned>(
    storage: &dyn LedgerStorage,
    collection: Collection,
) -> LedgerResult<Option<Vec<T>>> {
    let mapping = storage
        .load(collection)
        .map_err(|e| MorphError::Storage(format!("{e:#}")))?;
    mapping.map(|m| from_mapping(collection, m)).transpose()
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct Ledger {
    config: LedgerConfig,
    policy: ReallocationPolicy,
    drift: RateDrift,
    storage: Arc<dyn LedgerStorage>,
    accounts: RwLock<HashMap<String, Arc<Mutex<Account>>>>,
    sources: RwLock<Vec<Source>>,
    committed: Mutex<Snapshot>,
    cycles_run: AtomicU64,
}

impl Ledger {
    /// Build a ledger from whatever `storage` holds.
    ///
    /// `initial_sources` fixes the source order (and therefore tie-breaking)
    /// and seeds the table when storage has none. Stored sources missing
    /// from it are appended in id order. Account aggregates are reconciled
    /// against their positions.
    pub async fn open(
        config: LedgerConfig,
        storage: Arc<dyn LedgerStorage>,
        initial_sources: Vec<Source>,
    ) -> LedgerResult<Self> {
        let stored_sources: Option<Vec<Source>> = load_collection(&*storage, Collection::Sources)?;
        let users: Vec<User> = load_collection(&*storage, Collection::Users)?.unwrap_or_default();
        let positions: Vec<Position> =
            load_collection(&*storage, Collection::Positions)?.unwrap_or_default();

        let drift = RateDrift::from(&config);
        let seeded = stored_sources.as_ref().map_or(true, |s| s.is_empty());
        let mut sources = merge_sources(initial_sources, stored_sources.unwrap_or_default());
        let clamped = clamp_rates(&mut sources, &drift);
        let mut accounts = assemble_accounts(users, positions);

        let rates: HashMap<String, Decimal> =
            sources.iter().map(|s| (s.id.clone(), s.rate)).collect();
        let mut realigned = 0;
        for account in accounts.values_mut() {
            realigned += mirror_positions(&mut account.positions, &rates);
        }
        if realigned > 0 {
            warn!(positions = realigned, "Realigned position rates with their sources");
        }

        info!(
            users = accounts.len(),
            positions = accounts.values().map(|a| a.positions.len()).sum::<usize>(),
            sources = sources.len(),
            "Ledger opened"
        );

        let ledger = Self {
            policy: ReallocationPolicy::new(config.reallocation_threshold),
            drift,
            config,
            storage,
            accounts: RwLock::new(
                accounts
                    .iter()
                    .map(|(id, a)| (id.clone(), Arc::new(Mutex::new(a.clone()))))
                    .collect(),
            ),
            sources: RwLock::new(sources.clone()),
            committed: Mutex::new(Snapshot { accounts, sources }),
            cycles_run: AtomicU64::new(0),
        };

        if seeded || clamped > 0 || realigned > 0 {
            ledger.flush().await?;
        }
        Ok(ledger)
    }

    // -- Internals --------------------------------------------------------

    async fn account(&self, user_id: &str) -> LedgerResult<Arc<Mutex<Account>>> {
        self.accounts
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| MorphError::user_not_found(user_id))
    }

    async fn all_accounts(&self) -> Vec<Arc<Mutex<Account>>> {
        self.accounts.read().await.values().cloned().collect()
    }

    fn write(&self, snapshot: &Snapshot) -> LedgerResult<()> {
        let batch = snapshot.to_batch()?;
        self.storage
            .save_batch(&batch)
            .map_err(|e| MorphError::Storage(format!("{e:#}")))
    }

    /// Persist a draft account (and an optional source edit) before it
    /// becomes visible. On error nothing in memory changes.
    async fn commit<F>(&self, draft: &Account, edit_sources: F) -> LedgerResult<()>
    where
        F: FnOnce(&mut Vec<Source>),
    {
        let mut committed = self.committed.lock().await;
        let mut sources = self.sources.write().await;

        let mut next_sources = sources.clone();
        edit_sources(&mut next_sources);

        let mut candidate = committed.clone();
        candidate.accounts.insert(draft.user.id.clone(), draft.clone());
        candidate.sources = next_sources.clone();

        self.write(&candidate)?;

        *sources = next_sources;
        *committed = candidate;
        Ok(())
    }

    /// Write the current state. Used at cycle end and on shutdown.
    pub async fn flush(&self) -> LedgerResult<()> {
        let mut committed = self.committed.lock().await;
        committed.sources = self.sources.read().await.clone();
        self.write(&committed)
    }

    fn validate_amount(&self, amount: f64) -> LedgerResult<Decimal> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(MorphError::InvalidAmount(format!("{amount} is not a positive number")));
        }
        let value = Decimal::from_f64(amount)
            .ok_or_else(|| MorphError::InvalidAmount(format!("{amount} is not representable")))?;
        if value < self.config.min_stake || value > self.config.max_stake {
            return Err(MorphError::InvalidAmount(format!(
                "{value} outside [{}, {}]",
                self.config.min_stake, self.config.max_stake
            )));
        }
        Ok(value)
    }

    // -- Ledger API -------------------------------------------------------

    /// Register a user with a freshly generated wallet.
    pub async fn create_user(&self, user_id: &str, display_name: &str) -> LedgerResult<AccountSummary> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(user_id) {
            return Err(MorphError::AlreadyExists(format!("user {user_id}")));
        }

        let account = Account::new(User::new(user_id, display_name, Wallet::generate(), Utc::now()));
        self.commit(&account, |_| {}).await?;

        info!(user_id, public_key = %account.user.wallet.public_key, "User created");
        let summary = AccountSummary::from(&account);
        accounts.insert(user_id.to_string(), Arc::new(Mutex::new(account)));
        Ok(summary)
    }

    pub async fn get_user(&self, user_id: &str) -> LedgerResult<AccountSummary> {
        let account = self.account(user_id).await?;
        let account = account.lock().await;
        Ok(AccountSummary::from(&*account))
    }

    /// Credit liquid balance (funding arrives outside the ledger).
    pub async fn deposit(&self, user_id: &str, amount: Decimal) -> LedgerResult<Decimal> {
        let account = self.account(user_id).await?;
        if amount <= Decimal::ZERO {
            return Err(MorphError::InvalidAmount(format!("deposit of {amount}")));
        }
        let mut account = account.lock().await;

        let mut draft = account.clone();
        draft.user.balance += amount;
        self.commit(&draft, |_| {}).await?;
        *account = draft;

        info!(user_id, amount = %amount, balance = %account.user.balance, "Deposit credited");
        Ok(account.user.balance)
    }

    /// Open a position on the current optimal source.
    pub async fn stake(&self, user_id: &str, amount: f64, now: DateTime<Utc>) -> LedgerResult<Position> {
        let account = self.account(user_id).await?;
        let amount = self.validate_amount(amount)?;
        let mut account = account.lock().await;

        if amount > account.user.balance {
            return Err(MorphError::InsufficientBalance {
                needed: amount,
                available: account.user.balance,
            });
        }

        let source = {
            let sources = self.sources.read().await;
            select_optimal(sources.iter())?.clone()
        };

        let position = Position::open(user_id, &source, amount, now);
        let mut draft = account.clone();
        draft.user.balance -= amount;
        draft.user.total_staked += amount;
        draft.user.position_ids.push(position.id.clone());
        draft.positions.push(position.clone());

        self.commit(&draft, |sources| add_volume(sources, &source.id, amount))
            .await?;
        *account = draft;

        info!(
            user_id,
            position_id = %position.id,
            source_id = %source.id,
            amount = %amount,
            rate = %source.rate,
            "Stake opened"
        );
        Ok(position)
    }

    /// Realize earnings, or close everything.
    pub async fn withdraw(
        &self,
        user_id: &str,
        mode: WithdrawMode,
        now: DateTime<Utc>,
    ) -> LedgerResult<WithdrawalReceipt> {
        let account = self.account(user_id).await?;
        let mut account = account.lock().await;
        if account.user.position_ids.is_empty() {
            return Err(MorphError::NoActiveStakes(user_id.to_string()));
        }

        let mut draft = account.clone();
        draft.accrue(now);

        let (amount, positions_closed) = match mode {
            WithdrawMode::EarningsOnly => {
                let earnings = draft.user.total_earned;
                draft.user.total_earned = Decimal::ZERO;
                for position in draft.positions.iter_mut() {
                    position.earned = Decimal::ZERO;
                }
                (earnings, 0)
            }
            WithdrawMode::Full => {
                let total = draft.user.total_staked + draft.user.total_earned;
                let closed = draft.positions.len();
                draft.user.total_staked = Decimal::ZERO;
                draft.user.total_earned = Decimal::ZERO;
                draft.user.position_ids.clear();
                draft.positions.clear();
                (total, closed)
            }
        };
        draft.user.balance += amount;

        self.commit(&draft, |_| {}).await?;
        *account = draft;

        info!(
            user_id,
            mode = %mode,
            amount = %amount,
            balance = %account.user.balance,
            positions_closed,
            "Withdrawal complete"
        );
        Ok(WithdrawalReceipt {
            mode,
            amount,
            balance_after: account.user.balance,
            positions_closed,
        })
    }

    /// Accrue lazily, then describe the user's holdings.
    pub async fn get_portfolio(&self, user_id: &str, now: DateTime<Utc>) -> LedgerResult<Portfolio> {
        let account = self.account(user_id).await?;
        let mut account = account.lock().await;

        let mut draft = account.clone();
        let accrued_now = draft.accrue(now);
        if draft.positions != account.positions {
            self.commit(&draft, |_| {}).await?;
            *account = draft;
        }

        let names: HashMap<String, String> = self
            .sources
            .read()
            .await
            .iter()
            .map(|s| (s.id.clone(), s.name.clone()))
            .collect();

        let user = &account.user;
        let roi = if user.total_staked.is_zero() {
            Decimal::ZERO
        } else {
            user.total_earned / user.total_staked
        };

        Ok(Portfolio {
            user_id: user.id.clone(),
            balance: user.balance,
            total_staked: user.total_staked,
            total_earned: user.total_earned,
            roi,
            accrued_now,
            positions: account
                .positions
                .iter()
                .map(|p| PositionDetail {
                    position_id: p.id.clone(),
                    source_id: p.source_id.clone(),
                    source_name: names.get(&p.source_id).cloned().unwrap_or_else(|| p.source_id.clone()),
                    principal: p.principal,
                    start_rate: p.start_rate,
                    current_rate: p.current_rate,
                    earned: p.earned,
                    shares: p.shares,
                    duration_days: (now - p.created_at).num_days(),
                })
                .collect(),
        })
    }

    /// Hand out a user's secret key. Every call is audit-logged.
    pub async fn export_secret_key(&self, user_id: &str) -> LedgerResult<SecretString> {
        let account = self.account(user_id).await?;
        let account = account.lock().await;
        warn!(
            user_id,
            public_key = %account.user.wallet.public_key,
            audit = true,
            "Secret key exported"
        );
        Ok(account.user.wallet.export_secret())
    }

    /// Active sources, in configuration order.
    pub async fn get_available_sources(&self) -> Vec<Source> {
        self.sources.read().await.iter().filter(|s| s.active).cloned().collect()
    }

    /// Every source, active or not.
    pub async fn get_sources(&self) -> Vec<Source> {
        self.sources.read().await.clone()
    }

    /// Switch a source on or off. Positions bound to it stay bound.
    pub async fn set_source_active(&self, source_id: &str, active: bool) -> LedgerResult<()> {
        if !self.sources.read().await.iter().any(|s| s.id == source_id) {
            return Err(MorphError::source_not_found(source_id));
        }

        let mut committed = self.committed.lock().await;
        let mut sources = self.sources.write().await;
        let mut next = sources.clone();
        for s in next.iter_mut().filter(|s| s.id == source_id) {
            s.active = active;
        }
        let mut candidate = committed.clone();
        candidate.sources = next.clone();
        self.write(&candidate)?;
        *sources = next;
        *committed = candidate;

        info!(source_id, active, "Source toggled");
        Ok(())
    }

    pub async fn get_statistics(&self) -> Statistics {
        let mut total_users = 0;
        let mut total_staked = Decimal::ZERO;
        let mut total_earned = Decimal::ZERO;
        for account in self.all_accounts().await {
            let account = account.lock().await;
            total_users += 1;
            total_staked += account.user.total_staked;
            total_earned += account.user.total_earned;
        }

        let sources = self.sources.read().await;
        let active: Vec<&Source> = sources.iter().filter(|s| s.active).collect();
        let average_rate = if active.is_empty() {
            None
        } else {
            let sum: Decimal = active.iter().map(|s| s.rate).sum();
            Some(sum / Decimal::from(active.len()))
        };

        Statistics {
            total_users,
            total_staked,
            total_earned,
            active_sources: active.len(),
            average_rate,
        }
    }

    /// List accounting inconsistencies. Empty when the ledger is sound.
    pub async fn check_integrity(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for account in self.all_accounts().await {
            let account = account.lock().await;
            let user = &account.user;
            if user.total_staked != account.principal_sum() {
                problems.push(format!(
                    "{}: total_staked {} != principal sum {}",
                    user.id,
                    user.total_staked,
                    account.principal_sum()
                ));
            }
            if user.balance < Decimal::ZERO {
                problems.push(format!("{}: negative balance {}", user.id, user.balance));
            }
            let ids: Vec<&str> = account.positions.iter().map(|p| p.id.as_str()).collect();
            let owned: Vec<&str> = user.position_ids.iter().map(String::as_str).collect();
            if ids != owned {
                problems.push(format!("{}: position list out of sync", user.id));
            }
            for p in &account.positions {
                if p.shares != p.principal {
                    problems.push(format!("{}: shares {} != principal {}", p.id, p.shares, p.principal));
                }
            }
        }
        problems
    }
}

fn add_volume(sources: &mut [Source], source_id: &str, amount: Decimal) {
    if let Some(s) = sources.iter_mut().find(|s| s.id == source_id) {
        s.volume += amount;
    }
}

/// Pull every rate into the drift band. Returns how many were out of it.
fn clamp_rates(sources: &mut [Source], drift: &RateDrift) -> usize {
    let mut clamped = 0;
    for source in sources.iter_mut() {
        let rate = drift.clamp(source.rate);
        if rate != source.rate {
            warn!(source_id = %source.id, stored = %source.rate, rate = %rate, "Clamping source rate into band");
            source.rate = rate;
            clamped += 1;
        }
    }
    clamped
}

/// Set each position's current rate to its bound source's rate. Returns
/// how many positions changed.
fn mirror_positions(positions: &mut [Position], rates: &HashMap<String, Decimal>) -> usize {
    let mut changed = 0;
    for position in positions.iter_mut() {
        if let Some(rate) = rates.get(&position.source_id) {
            if *rate != position.current_rate {
                position.current_rate = *rate;
                changed += 1;
            }
        }
    }
    changed
}

/// Configured order first, then any stored-only sources by id. Stored
/// state (rate, volume, active) wins over configured defaults.
fn merge_sources(initial: Vec<Source>, stored: Vec<Source>) -> Vec<Source> {
    let mut stored: BTreeMap<String, Source> = stored.into_iter().map(|s| (s.id.clone(), s)).collect();
    let mut merged: Vec<Source> = initial
        .into_iter()
        .map(|s| stored.remove(&s.id).unwrap_or(s))
        .collect();
    merged.extend(stored.into_values());
    merged
}

/// Group positions under their users, dropping dangling references and
/// repairing aggregates that disagree with the positions.
fn assemble_accounts(users: Vec<User>, positions: Vec<Position>) -> BTreeMap<String, Account> {
    let mut by_id: HashMap<String, Position> = positions.into_iter().map(|p| (p.id.clone(), p)).collect();
    let mut accounts = BTreeMap::new();

    for mut user in users {
        let mut owned = Vec::with_capacity(user.position_ids.len());
        user.position_ids.retain(|id| match by_id.remove(id) {
            Some(p) if p.user_id == user.id => {
                owned.push(p);
                true
            }
            _ => {
                warn!(user_id = %user.id, position_id = %id, "Dropping dangling position reference");
                false
            }
        });

        let mut account = Account { user, positions: owned };
        let principal = account.principal_sum();
        if account.user.total_staked != principal {
            warn!(
                user_id = %account.user.id,
                recorded = %account.user.total_staked,
                actual = %principal,
                "Repairing total_staked from positions"
            );
            account.user.total_staked = principal;
        }
        accounts.insert(account.user.id.clone(), account);
    }

    for orphan in by_id.keys() {
        warn!(position_id = %orphan, "Ignoring position with no owning user");
    }
    accounts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
