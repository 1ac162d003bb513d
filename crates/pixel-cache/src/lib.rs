//! Byte-budgeted in-memory cache for decoded image variants
//!
//! This crate holds the memory side of the gallery's image-serving pipeline:
//! decoded pixel buffers keyed by a fingerprint of the source file, its edit
//! revision, and the requested variant parameters. The store evicts the
//! least-recently-used entries once a configurable byte budget is exceeded,
//! so the UI can request freely without unbounded memory growth.
//!
//! # Features
//!
//! - **Fingerprinted keys**: source path + edit revision + size + orientation,
//!   so edited photos never serve stale pixels
//! - **Byte-accounted LRU**: eviction driven by a logical access clock, not
//!   physical reordering
//! - **Thread-safe**: a single mutex guards the store; lookups and the linear
//!   eviction scan are cheap enough that finer locking buys nothing
//! - **Infallible operations**: an entry larger than the whole budget is
//!   silently not retained, never an error

pub mod key;
pub mod pixels;
pub mod store;

pub use key::VariantKey;
pub use pixels::PixelBuffer;
pub use store::{CacheStats, PixelCache};

/// Default store budget: 20 MiB of decoded pixel data.
pub const DEFAULT_CACHE_BUDGET: usize = 20 * 1024 * 1024;

/// Decoded buffers are RGBA8.
pub const BYTES_PER_PIXEL: usize = 4;
