//! HIP stream handles
//!
//! The allocator tags every block with the stream it was first used on and
//! only ever reuses a block on that same stream. [`StreamId`] is the
//! host-side identity it keys on: the stream handle's bit pattern, totally
//! ordered so it can participate in the free-pool composite key.

/// Opaque, totally-ordered identity of a device stream
///
/// The default value identifies the runtime's null stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId(u64);

impl StreamId {
    /// The runtime's default (null) stream
    pub const DEFAULT: StreamId = StreamId(0);

    /// Identity of a raw stream handle
    pub fn from_raw(stream: *mut std::ffi::c_void) -> Self {
        StreamId(stream as usize as u64)
    }

    /// The raw bit pattern, usable as an FFI stream handle
    pub fn as_raw(self) -> *mut std::ffi::c_void {
        self.0 as usize as *mut std::ffi::c_void
    }
}

// SAFETY: HipStream is Send+Sync because it only contains a raw pointer
// and we ensure thread-safe access through proper synchronization.
// NOTE: HipStream does NOT implement Clone because cloning raw pointers
// would cause double-free when both instances are dropped.
#[cfg(feature = "rocm")]
unsafe impl Send for HipStream {}
#[cfg(feature = "rocm")]
unsafe impl Sync for HipStream {}

/// HIP stream wrapper
#[cfg(feature = "rocm")]
#[derive(Debug)]
pub struct HipStream {
    stream: *mut std::ffi::c_void,
}

#[cfg(feature = "rocm")]
impl HipStream {
    /// Create a new HIP stream
    pub fn new() -> crate::backend::error::HipResult<Self> {
        use crate::backend::error::{HipError, HIP_SUCCESS};

        let mut stream: *mut std::ffi::c_void = std::ptr::null_mut();
        let result = unsafe { super::ffi::hipStreamCreate(&mut stream) };
        tracing::debug!(
            "HipStream::new: hipStreamCreate returned result={}, stream={:?}",
            result,
            stream
        );

        if result != HIP_SUCCESS {
            return Err(HipError::StreamCreateFailed { code: result });
        }
        if stream.is_null() {
            return Err(HipError::StreamCreateFailed { code: result });
        }

        Ok(HipStream { stream })
    }

    /// Block the host until all work queued on this stream has completed
    pub fn synchronize(&self) -> crate::backend::error::HipResult<()> {
        use crate::backend::error::{HipError, HIP_SUCCESS};

        let result = unsafe { super::ffi::hipStreamSynchronize(self.stream) };
        if result != HIP_SUCCESS {
            return Err(HipError::StreamSyncFailed { code: result });
        }
        Ok(())
    }

    /// The allocator-facing identity of this stream
    pub fn id(&self) -> StreamId {
        StreamId::from_raw(self.stream)
    }

    /// Get raw stream pointer (for FFI calls)
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.stream
    }
}

#[cfg(feature = "rocm")]
impl Drop for HipStream {
    fn drop(&mut self) {
        if !self.stream.is_null() {
            unsafe {
                super::ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stream_is_null() {
        assert_eq!(StreamId::default(), StreamId::DEFAULT);
        assert!(StreamId::DEFAULT.as_raw().is_null());
    }

    #[test]
    fn test_stream_id_orders_by_bit_pattern() {
        let a = StreamId::from_raw(0x1000usize as *mut std::ffi::c_void);
        let b = StreamId::from_raw(0x2000usize as *mut std::ffi::c_void);
        assert!(a < b);
        assert!(StreamId::DEFAULT < a);
    }

    #[test]
    fn test_stream_id_round_trip() {
        let raw = 0xbeef_0000usize as *mut std::ffi::c_void;
        assert_eq!(StreamId::from_raw(raw).as_raw(), raw);
    }
}
