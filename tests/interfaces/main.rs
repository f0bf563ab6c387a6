//! Interface tests for lot storage backends using Cucumber.
//!
//! These tests verify that all LotStore implementations conform to the same contract.
//! Select a backend via environment variable:
//!
//! ```bash
//! # SQLite (default)
//! cargo test --test interfaces
//!
//! # In-memory
//! STORAGE_BACKEND=memory cargo test --test interfaces
//! ```

mod backend;
mod steps;

use cucumber::World;
use steps::lot_store::LotStoreWorld;

#[tokio::main]
async fn main() {
    println!("\n=== Running LotStore Interface Tests ===\n");
    LotStoreWorld::cucumber()
        .fail_on_skipped()
        .run_and_exit("tests/interfaces/features/lot_store.feature")
        .await;
}
