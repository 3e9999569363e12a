//! Ledger state surviving a restart through the JSON file store.

use chrono::{Duration, Utc};
use morph::config::{default_sources, LedgerConfig};
use morph::engine::ledger::Ledger;
use morph::storage::{Collection, JsonFileStorage, LedgerStorage};
use morph::types::{MorphError, Source, WithdrawMode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;

use crate::funded_user;

fn temp_dir() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("morph_it_{}", uuid::Uuid::new_v4()));
    p
}

async fn open(dir: &PathBuf, sources: Vec<Source>) -> Result<Ledger, MorphError> {
    let storage = Arc::new(JsonFileStorage::new(dir).unwrap());
    Ledger::open(LedgerConfig::default(), storage, sources).await
}

#[tokio::test]
async fn test_fresh_directory_seeds_sources() {
    let dir = temp_dir();
    let ledger = open(&dir, default_sources()).await.unwrap();
    assert_eq!(ledger.get_sources().await.len(), 5);

    let store = JsonFileStorage::new(&dir).unwrap();
    let sources = store.load(Collection::Sources).unwrap().unwrap();
    assert!(sources.contains_key("kamino"));
    assert!(store.load(Collection::Users).unwrap().unwrap().is_empty());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_restart_restores_users_positions_and_rates() {
    let dir = temp_dir();
    let t0 = Utc::now();
    let (rates_before, earned_before) = {
        let ledger = open(&dir, default_sources()).await.unwrap();
        funded_user(&ledger, "erin", dec!(100)).await;
        ledger.stake("erin", 25.0, t0).await.unwrap();
        ledger
            .run_compound_cycle(t0 + Duration::hours(12), &mut StdRng::seed_from_u64(8))
            .await;
        let rates: Vec<_> = ledger.get_sources().await.into_iter().map(|s| s.rate).collect();
        (rates, ledger.get_user("erin").await.unwrap().total_earned)
    };

    let ledger = open(&dir, default_sources()).await.unwrap();
    let rates: Vec<_> = ledger.get_sources().await.into_iter().map(|s| s.rate).collect();
    assert_eq!(rates, rates_before);

    let user = ledger.get_user("erin").await.unwrap();
    assert_eq!(user.total_earned, earned_before);
    assert_eq!(user.balance, dec!(75));
    assert_eq!(user.position_count, 1);

    // Accrual resumes from the persisted checkpoint, not from stake time
    let portfolio = ledger.get_portfolio("erin", t0 + Duration::hours(12)).await.unwrap();
    assert_eq!(portfolio.accrued_now, dec!(0));
    assert!(ledger.check_integrity().await.is_empty());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_stored_sources_keep_config_order() {
    let dir = temp_dir();
    {
        let ledger = open(&dir, default_sources()).await.unwrap();
        ledger.set_source_active("orca", false).await.unwrap();
    }

    // Config now lists kamino first and drops drift entirely
    let mut reordered = default_sources();
    reordered.retain(|s| s.id != "drift");
    reordered.rotate_left(3);
    let ledger = open(&dir, reordered).await.unwrap();

    let ids: Vec<String> = ledger.get_sources().await.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["kamino", "marinade", "raydium", "orca", "drift"]);
    let orca = ledger.get_sources().await.into_iter().find(|s| s.id == "orca").unwrap();
    assert!(!orca.active);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_failed_withdrawal_write_keeps_funds_across_restart() {
    let dir = temp_dir();
    let t0 = Utc::now();
    {
        let ledger = open(&dir, default_sources()).await.unwrap();
        funded_user(&ledger, "fay", dec!(100)).await;
        ledger.stake("fay", 50.0, t0).await.unwrap();

        let store = JsonFileStorage::new(&dir).unwrap();
        std::fs::create_dir(store.staging_path()).unwrap();
        let err = ledger.withdraw("fay", WithdrawMode::Full, t0).await.unwrap_err();
        assert!(matches!(err, MorphError::Storage(_)));
        std::fs::remove_dir(store.staging_path()).unwrap();
    }

    let ledger = open(&dir, default_sources()).await.unwrap();
    let user = ledger.get_user("fay").await.unwrap();
    assert_eq!(user.balance + user.total_staked, dec!(100));
    assert_eq!(user.position_count, 1);
    assert!(ledger.check_integrity().await.is_empty());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_corrupt_file_fails_open() {
    let dir = temp_dir();
    let store = JsonFileStorage::new(&dir).unwrap();
    std::fs::write(store.path(), "[not a mapping").unwrap();

    let err = open(&dir, default_sources()).await.err().unwrap();
    assert!(matches!(err, MorphError::Storage(_)));

    std::fs::remove_dir_all(&dir).unwrap();
}
