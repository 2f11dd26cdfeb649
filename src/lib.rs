//! SUREBET — UK & Ireland racing form scorer
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod form;
pub mod exchange;
pub mod store;
pub mod engine;
