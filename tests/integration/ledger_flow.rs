//! End-to-end ledger operations through the public API.

use chrono::{Duration, Utc};
use futures::future::join_all;
use morph::types::{MorphError, WithdrawMode};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use crate::{funded_user, memory_ledger};

#[tokio::test]
async fn test_stake_accrue_withdraw_lifecycle() {
    let (ledger, _) = memory_ledger().await;
    funded_user(&ledger, "alice", dec!(100)).await;
    let t0 = Utc::now();

    let position = ledger.stake("alice", 40.0, t0).await.unwrap();
    assert_eq!(position.source_id, "kamino");

    let portfolio = ledger.get_portfolio("alice", t0 + Duration::days(30)).await.unwrap();
    assert!(portfolio.total_earned > Decimal::ZERO);
    assert_eq!(portfolio.total_staked, dec!(40) + portfolio.total_earned);
    assert_eq!(portfolio.positions[0].duration_days, 30);

    let receipt = ledger
        .withdraw("alice", WithdrawMode::EarningsOnly, t0 + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(receipt.amount, portfolio.total_earned);
    assert_eq!(receipt.balance_after, dec!(60) + portfolio.total_earned);

    let receipt = ledger
        .withdraw("alice", WithdrawMode::Full, t0 + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(receipt.positions_closed, 1);
    assert_eq!(receipt.amount, portfolio.total_staked);

    let after = ledger.get_portfolio("alice", t0 + Duration::days(31)).await.unwrap();
    assert!(after.positions.is_empty());
    assert_eq!(after.total_staked, Decimal::ZERO);
    assert_eq!(after.roi, Decimal::ZERO);
    assert!(ledger.check_integrity().await.is_empty());

    let err = ledger.withdraw("alice", WithdrawMode::Full, Utc::now()).await.unwrap_err();
    assert!(matches!(err, MorphError::NoActiveStakes(_)));
}

#[tokio::test]
async fn test_concurrent_stakes_never_overdraw() {
    let (ledger, _) = memory_ledger().await;
    funded_user(&ledger, "bob", dec!(10)).await;
    let now = Utc::now();

    let attempts = (0..20).map(|_| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.stake("bob", 1.0, now).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| matches!(r, Err(MorphError::InsufficientBalance { .. })))
        .count();
    assert_eq!(ok, 10);
    assert_eq!(short, 10);

    let user = ledger.get_user("bob").await.unwrap();
    assert_eq!(user.balance, Decimal::ZERO);
    assert_eq!(user.total_staked, dec!(10));
    assert_eq!(user.position_count, 10);
    assert!(ledger.check_integrity().await.is_empty());
}

#[tokio::test]
async fn test_cycle_runs_alongside_user_operations() {
    let (ledger, _) = memory_ledger().await;
    let t0 = Utc::now();
    for i in 0..8 {
        let id = format!("user-{i}");
        funded_user(&ledger, &id, dec!(50)).await;
        ledger.stake(&id, 10.0, t0).await.unwrap();
    }

    let cycle = {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            ledger
                .run_compound_cycle(t0 + Duration::hours(1), &mut StdRng::seed_from_u64(5))
                .await
        })
    };
    let user_ops = (0..8).map(|i| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            let id = format!("user-{i}");
            ledger.stake(&id, 5.0, t0 + Duration::hours(1)).await.unwrap();
            ledger.get_portfolio(&id, t0 + Duration::hours(2)).await.unwrap()
        })
    });

    let portfolios = join_all(user_ops).await;
    let report = cycle.await.unwrap();
    assert_eq!(report.users_processed, 8);
    for portfolio in portfolios {
        let portfolio = portfolio.unwrap();
        assert_eq!(portfolio.balance, dec!(35));
        assert_eq!(portfolio.positions.len(), 2);
    }
    assert!(ledger.check_integrity().await.is_empty());
}

#[tokio::test]
async fn test_rejected_operations_leave_no_trace() {
    let (ledger, storage) = memory_ledger().await;
    funded_user(&ledger, "carol", dec!(5)).await;
    let before = storage.snapshot(morph::storage::Collection::Users);

    assert!(matches!(
        ledger.stake("carol", 0.0, Utc::now()).await,
        Err(MorphError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.stake("carol", 2000.0, Utc::now()).await,
        Err(MorphError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.stake("carol", 6.0, Utc::now()).await,
        Err(MorphError::InsufficientBalance { .. })
    ));
    assert!(matches!(
        ledger.deposit("carol", dec!(-1)).await,
        Err(MorphError::InvalidAmount(_))
    ));

    assert_eq!(storage.snapshot(morph::storage::Collection::Users), before);
    assert_eq!(ledger.get_user("carol").await.unwrap().balance, dec!(5));
}

#[tokio::test]
async fn test_inactive_optimal_source_is_skipped() {
    let (ledger, _) = memory_ledger().await;
    funded_user(&ledger, "dave", dec!(10)).await;
    ledger.set_source_active("kamino", false).await.unwrap();

    let position = ledger.stake("dave", 2.0, Utc::now()).await.unwrap();
    assert_eq!(position.source_id, "raydium");
    assert_eq!(ledger.get_available_sources().await.len(), 4);
}

#[tokio::test]
async fn test_statistics_track_all_users() {
    let (ledger, _) = memory_ledger().await;
    let t0 = Utc::now();
    funded_user(&ledger, "a", dec!(10)).await;
    funded_user(&ledger, "b", dec!(10)).await;
    ledger.stake("a", 3.0, t0).await.unwrap();
    ledger.stake("b", 7.0, t0).await.unwrap();

    let stats = ledger.get_statistics().await;
    assert_eq!(stats.total_users, 2);
    assert_eq!(stats.total_staked, dec!(10));
    assert_eq!(stats.total_earned, Decimal::ZERO);

    ledger
        .run_compound_cycle(t0 + Duration::days(1), &mut StdRng::seed_from_u64(1))
        .await;
    let stats = ledger.get_statistics().await;
    assert_eq!(stats.total_staked, dec!(10) + stats.total_earned);
    assert!(stats.total_earned > Decimal::ZERO);
}
