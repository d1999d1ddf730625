//! AUGUR: prediction ensembling and stake-decision engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod ensemble;
pub mod strategy;
pub mod optimize;
pub mod performance;
pub mod engine;
pub mod storage;
