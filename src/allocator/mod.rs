//! Stream-aware caching allocator for device memory
//!
//! Amortizes the cost of primitive device allocation by caching freed
//! blocks for reuse. Reuse is confined to the (device, stream) pair a
//! block was first used on, so pending asynchronous work on the original
//! stream stays correctly ordered without host-side synchronization.

mod block;
pub mod engine;
pub mod facade;

pub use engine::{CacheStats, CachingAllocator, ROUND_LARGE, ROUND_SMALL, SMALL_ALLOC};
pub use facade::DeviceAllocator;

#[cfg(feature = "rocm")]
pub use facade::{caching_allocator, device_allocator_table, DeviceAllocatorTable};
