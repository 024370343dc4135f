//! Pool module - the per-item worker.

mod worker;

pub use worker::*;
