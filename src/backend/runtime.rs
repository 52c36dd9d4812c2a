//! Primitive device-runtime surface consumed by the caching allocator
//!
//! The allocator only needs four capabilities from the runtime: querying
//! the current device, raw allocate, raw free, and clearing the runtime's
//! sticky error state. They are expressed as the [`DeviceRuntime`] trait so
//! the allocator engine can be exercised against a scripted runtime in
//! tests; [`HipRuntime`] is the ROCm-backed implementation.

use crate::backend::error::{HipError, HipResult};

/// GPU device identifier, as reported by the runtime
pub type DeviceId = i32;

/// Byte-addressed device pointer
///
/// Stored as an integer address so the allocator's bookkeeping (ordering,
/// offset arithmetic on split and merge) never dereferences it. Convertible
/// to and from the raw `*mut c_void` the runtime traffics in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevicePtr(usize);

impl DevicePtr {
    /// The null device pointer
    pub const NULL: DevicePtr = DevicePtr(0);

    /// Build a pointer from an integer device address
    pub fn from_addr(addr: usize) -> Self {
        DevicePtr(addr)
    }

    /// Build a pointer from the runtime's raw representation
    pub fn from_raw(ptr: *mut std::ffi::c_void) -> Self {
        DevicePtr(ptr as usize)
    }

    /// The integer device address
    pub fn addr(self) -> usize {
        self.0
    }

    /// The raw pointer for FFI calls
    pub fn as_raw(self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Minimal capability set the caching allocator consumes from the device
/// runtime.
///
/// Implementations are expected to be cheap handles: the allocator calls
/// these methods while holding its internal mutex, and they are its only
/// blocking points.
pub trait DeviceRuntime {
    /// The device subsequent allocations will be placed on.
    fn current_device(&self) -> HipResult<DeviceId>;

    /// Allocate `nbytes` of raw device memory on `device`.
    ///
    /// Out-of-memory failures must be reported as
    /// [`HipError::OutOfMemory`]; they are the only class the allocator
    /// retries.
    fn alloc(&self, device: DeviceId, nbytes: usize) -> HipResult<DevicePtr>;

    /// Release memory previously returned by [`DeviceRuntime::alloc`].
    fn free(&self, ptr: DevicePtr) -> HipResult<()>;

    /// Reset the runtime's sticky error state after a failed call.
    fn clear_last_error(&self);
}

/// ROCm HIP implementation of [`DeviceRuntime`]
///
/// A zero-sized handle over the process-global HIP runtime. `hipMalloc`
/// allocates on the current device, so `alloc` only uses its `device`
/// argument for error reporting.
#[cfg(feature = "rocm")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HipRuntime;

#[cfg(feature = "rocm")]
impl DeviceRuntime for HipRuntime {
    fn current_device(&self) -> HipResult<DeviceId> {
        let mut device: i32 = 0;
        let result = unsafe { super::ffi::hipGetDevice(&mut device) };
        if result != crate::backend::error::HIP_SUCCESS {
            return Err(HipError::DeviceQueryFailed { code: result });
        }
        Ok(device)
    }

    fn alloc(&self, device: DeviceId, nbytes: usize) -> HipResult<DevicePtr> {
        let mut ptr: *mut std::ffi::c_void = std::ptr::null_mut();
        let result = unsafe { super::ffi::hipMalloc(&mut ptr, nbytes) };

        if result == crate::backend::error::HIP_ERROR_OUT_OF_MEMORY {
            return Err(HipError::OutOfMemory { device, nbytes });
        }
        if result != crate::backend::error::HIP_SUCCESS {
            tracing::error!(
                "hipMalloc failed with code {} ({}) for {} bytes",
                result,
                super::ffi::get_error_string(result),
                nbytes
            );
            return Err(HipError::AllocationFailed {
                code: result,
                nbytes,
            });
        }
        if ptr.is_null() {
            tracing::error!("hipMalloc returned null pointer for {} bytes", nbytes);
            return Err(HipError::OutOfMemory { device, nbytes });
        }

        Ok(DevicePtr::from_raw(ptr))
    }

    fn free(&self, ptr: DevicePtr) -> HipResult<()> {
        let result = unsafe { super::ffi::hipFree(ptr.as_raw()) };
        if result != crate::backend::error::HIP_SUCCESS {
            return Err(HipError::FreeFailed {
                code: result,
                addr: ptr.addr(),
            });
        }
        Ok(())
    }

    fn clear_last_error(&self) {
        // hipGetLastError both returns and resets the sticky error flag.
        unsafe {
            super::ffi::hipGetLastError();
        }
    }
}

/// Number of HIP devices visible to this process
#[cfg(feature = "rocm")]
pub fn device_count() -> HipResult<i32> {
    let mut count: i32 = 0;
    let result = unsafe { super::ffi::hipGetDeviceCount(&mut count) };
    if result != crate::backend::error::HIP_SUCCESS {
        return Err(HipError::DeviceQueryFailed { code: result });
    }
    Ok(count)
}

/// Select the device subsequent allocations are placed on
#[cfg(feature = "rocm")]
pub fn set_device(device: DeviceId) -> HipResult<()> {
    let result = unsafe { super::ffi::hipSetDevice(device) };
    if result != crate::backend::error::HIP_SUCCESS {
        return Err(HipError::DeviceQueryFailed { code: result });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_ptr_null() {
        assert!(DevicePtr::NULL.is_null());
        assert_eq!(DevicePtr::NULL.addr(), 0);
        assert!(!DevicePtr::from_addr(0x1000).is_null());
    }

    #[test]
    fn test_device_ptr_addr_round_trip() {
        let ptr = DevicePtr::from_addr(0x7f00_0000_1000);
        assert_eq!(ptr.addr(), 0x7f00_0000_1000);
        assert_eq!(DevicePtr::from_raw(ptr.as_raw()), ptr);
    }

    #[test]
    fn test_device_ptr_ordering_follows_address() {
        let low = DevicePtr::from_addr(0x1000);
        let high = DevicePtr::from_addr(0x2000);
        assert!(low < high);
    }
}
