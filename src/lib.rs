//! hashrent: hashpower rental orchestration across mining marketplaces.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod marketplaces;
pub mod pools;
pub mod provider;
pub mod strategy;
pub mod engine;
pub mod storage;
