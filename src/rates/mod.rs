//! Currency conversion: an external rate source, a fallback table for when it is
//! unreachable, and a TTL cache in front of both.

mod adapter;
mod cache;
mod provider;

pub use adapter::*;
pub use cache::*;
pub use provider::*;
