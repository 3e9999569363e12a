//! MORPH — yield accrual and allocation engine for tracked stake positions.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod wallet;
pub mod storage;
pub mod strategy;
pub mod engine;
pub mod notify;
pub mod dashboard;
