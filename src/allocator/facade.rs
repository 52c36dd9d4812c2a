//! Allocator facade for the surrounding numerical library
//!
//! The engine is surfaced two ways: as the [`DeviceAllocator`] capability
//! trait for Rust callers, and (under the `rocm` feature) as a C-compatible
//! five-slot callback table bound to a process-wide
//! `CachingAllocator<HipRuntime>` singleton, which is the shape the host
//! library's allocator hook expects.

use crate::allocator::engine::CachingAllocator;
use crate::backend::{DevicePtr, DeviceRuntime, HipResult, StreamId};

/// Capability surface a device allocator exposes to the host library
pub trait DeviceAllocator: Send + Sync {
    /// Allocate a block safe to use from `stream`
    fn allocate(&self, nbytes: usize, stream: StreamId) -> HipResult<DevicePtr>;

    /// Return a block obtained from [`DeviceAllocator::allocate`]
    fn deallocate(&self, ptr: DevicePtr) -> HipResult<()>;

    /// Return unused cached memory to the device runtime
    fn empty_cache(&self) -> HipResult<()>;
}

impl<R: DeviceRuntime + Send + Sync> DeviceAllocator for CachingAllocator<R> {
    fn allocate(&self, nbytes: usize, stream: StreamId) -> HipResult<DevicePtr> {
        CachingAllocator::allocate(self, nbytes, stream)
    }

    fn deallocate(&self, ptr: DevicePtr) -> HipResult<()> {
        CachingAllocator::deallocate(self, ptr)
    }

    fn empty_cache(&self) -> HipResult<()> {
        CachingAllocator::empty_cache(self)
    }
}

#[cfg(feature = "rocm")]
mod table {
    use std::ffi::c_void;

    use once_cell::sync::Lazy;

    use crate::allocator::engine::CachingAllocator;
    use crate::backend::error::HIP_SUCCESS;
    use crate::backend::{DevicePtr, HipRuntime, StreamId};

    pub type MallocFn =
        unsafe extern "C" fn(*mut c_void, *mut *mut c_void, usize, *mut c_void) -> i32;
    pub type ReallocFn =
        unsafe extern "C" fn(*mut c_void, *mut *mut c_void, usize, usize, *mut c_void) -> i32;
    pub type FreeFn = unsafe extern "C" fn(*mut c_void, *mut c_void) -> i32;
    pub type EmptyCacheFn = unsafe extern "C" fn(*mut c_void) -> i32;

    /// C-compatible allocator callback table
    ///
    /// `ctx` points at the process-wide caching allocator and is passed
    /// back as the first argument of every slot. Status codes are raw HIP
    /// codes; `HIP_SUCCESS` on success.
    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct DeviceAllocatorTable {
        pub malloc: Option<MallocFn>,
        pub realloc: Option<ReallocFn>,
        pub free: Option<FreeFn>,
        pub empty_cache: Option<EmptyCacheFn>,
        pub ctx: *mut c_void,
    }

    static CACHING_ALLOCATOR: Lazy<CachingAllocator<HipRuntime>> =
        Lazy::new(|| CachingAllocator::new(HipRuntime));

    /// The process-wide caching allocator behind the callback table
    pub fn caching_allocator() -> &'static CachingAllocator<HipRuntime> {
        &CACHING_ALLOCATOR
    }

    unsafe extern "C" fn table_malloc(
        ctx: *mut c_void,
        dev_ptr: *mut *mut c_void,
        nbytes: usize,
        stream: *mut c_void,
    ) -> i32 {
        let allocator = &*(ctx as *const CachingAllocator<HipRuntime>);
        match allocator.allocate(nbytes, StreamId::from_raw(stream)) {
            Ok(ptr) => {
                *dev_ptr = ptr.as_raw();
                HIP_SUCCESS
            }
            Err(err) => err.raw_code(),
        }
    }

    unsafe extern "C" fn table_free(ctx: *mut c_void, ptr: *mut c_void) -> i32 {
        let allocator = &*(ctx as *const CachingAllocator<HipRuntime>);
        match allocator.deallocate(DevicePtr::from_raw(ptr)) {
            Ok(()) => HIP_SUCCESS,
            Err(err) => err.raw_code(),
        }
    }

    unsafe extern "C" fn table_empty_cache(ctx: *mut c_void) -> i32 {
        let allocator = &*(ctx as *const CachingAllocator<HipRuntime>);
        match allocator.empty_cache() {
            Ok(()) => HIP_SUCCESS,
            Err(err) => err.raw_code(),
        }
    }

    /// Build the callback table for the process-wide allocator.
    ///
    /// The realloc slot is left empty: cached blocks are never resized in
    /// place.
    pub fn device_allocator_table() -> DeviceAllocatorTable {
        DeviceAllocatorTable {
            malloc: Some(table_malloc),
            realloc: None,
            free: Some(table_free),
            empty_cache: Some(table_empty_cache),
            ctx: caching_allocator() as *const CachingAllocator<HipRuntime> as *mut c_void,
        }
    }
}

#[cfg(feature = "rocm")]
pub use table::{
    caching_allocator, device_allocator_table, DeviceAllocatorTable, EmptyCacheFn, FreeFn,
    MallocFn, ReallocFn,
};
