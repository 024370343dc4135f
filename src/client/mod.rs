//! Catalog API client module.

mod backoff;
mod catalog;
mod http;
mod rate_limiter;
mod transport;

pub use backoff::*;
pub use catalog::*;
pub use http::*;
pub use rate_limiter::*;
pub use transport::*;
