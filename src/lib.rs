//! hipcache - Stream-aware caching allocator for HIP device memory
//!
//! A caching layer over the primitive device allocator of a HIP runtime.
//! Freed blocks are kept and reused instead of being returned to the
//! runtime, amortizing allocation cost; a block is only ever reused on the
//! (device, stream) it was first used on, which keeps asynchronous device
//! work correctly ordered without host-side synchronization.
//!
//! The engine is generic over a [`DeviceRuntime`]; the ROCm-backed
//! implementation (and the C callback table the host library binds to) is
//! enabled with the `rocm` feature.

pub mod allocator;
pub mod backend;
pub mod logging;

pub use allocator::{
    CacheStats, CachingAllocator, DeviceAllocator, ROUND_LARGE, ROUND_SMALL, SMALL_ALLOC,
};
pub use backend::{DeviceId, DevicePtr, DeviceRuntime, HipError, HipResult, StreamId};

#[cfg(feature = "rocm")]
pub use allocator::{caching_allocator, device_allocator_table, DeviceAllocatorTable};
#[cfg(feature = "rocm")]
pub use backend::{HipRuntime, HipStream};
