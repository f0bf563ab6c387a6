//! Cucumber step definitions for interface tests.

pub mod lot_store;
