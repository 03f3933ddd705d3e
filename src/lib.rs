//! SETTLER — prop-market settlement engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod calculators;
pub mod config;
pub mod engine;
pub mod error;
pub mod storage;
pub mod types;
