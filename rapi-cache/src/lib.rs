//! In-memory response caching for rapi.
//!
//! This crate provides the bounded, TTL based [`ResponseCache`] the API client
//! stores successful GET responses in, and the [`CacheInvalidator`] façade that
//! turns "something changed on the server" into pattern invalidations.
//!
//! Entries live only as long as the process; there is no persistence and no
//! coherency between processes.

mod cache;
mod invalidator;
mod response_cache;

pub use cache::{
    CacheEntry, CacheOptions, CacheOptionsBuilder, CacheOptionsBuilderError,
    CacheStats, DEFAULT_CAPACITY, DEFAULT_CLEANUP_INTERVAL, DEFAULT_TTL,
};
pub use invalidator::{CacheAction, CacheInvalidator, Resource, UnknownResource};
pub use response_cache::{CleanupHandle, ResponseCache, compile_pattern};
