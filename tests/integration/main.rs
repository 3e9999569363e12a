//! Integration tests for the MORPH ledger, scheduler and storage.

mod ledger_flow;
mod persistence;
mod recording_notifier;
mod simulation;

use morph::config::{default_sources, LedgerConfig};
use morph::engine::ledger::Ledger;
use morph::storage::MemoryStorage;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// Ledger on the stock sources with in-memory storage.
pub async fn memory_ledger() -> (Arc<Ledger>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let ledger = Ledger::open(LedgerConfig::default(), storage.clone(), default_sources())
        .await
        .unwrap();
    (Arc::new(ledger), storage)
}

/// Create a user and fund it.
pub async fn funded_user(ledger: &Ledger, id: &str, balance: Decimal) {
    ledger.create_user(id, id).await.unwrap();
    if balance > dec!(0) {
        ledger.deposit(id, balance).await.unwrap();
    }
}
