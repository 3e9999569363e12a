//! Core engine — accrual, rate drift, the ledger store and the scheduler
//! that drives the periodic compound cycle.

pub mod accrual;
pub mod ledger;
pub mod market;
pub mod scheduler;
