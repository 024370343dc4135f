//! Core data models for altsync.
//!
//! - `config`: TOML configuration and credential resolution
//! - `error`: error taxonomy (run-fatal vs per-item)
//! - `item`: identifiers, fetched records, outcomes and run stats

mod config;
mod error;
mod item;

pub use config::*;
pub use error::*;
pub use item::*;
