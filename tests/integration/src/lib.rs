//! MealSync Integration Tests
//!
//! These tests run against a deployed API (set the MEALSYNC_API_URL
//! environment variable, or put it in a `.env` file). Without it every test
//! is skipped.
//!
//! Run with: cargo test --package mealsync-integration-tests

pub mod client;
pub mod fixtures;

pub use client::MealSyncClient;
pub use fixtures::*;
