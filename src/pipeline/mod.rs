//! Pipeline module - bulk update coordinator and identifier list I/O.

mod bulk;
mod input;

pub use bulk::*;
pub use input::*;
