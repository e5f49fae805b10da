//! Database module.
//!
//! Provides SQLite storage for samples, rollups and notification state.

mod models;
mod store;

pub use models::*;
pub use store::*;
