//! HIP status codes and error types

use thiserror::Error;

use crate::backend::runtime::DeviceId;

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// hipErrorInvalidValue
pub const HIP_ERROR_INVALID_VALUE: i32 = 1;

/// hipErrorOutOfMemory
pub const HIP_ERROR_OUT_OF_MEMORY: i32 = 2;

/// hipErrorInvalidDevicePointer
pub const HIP_ERROR_INVALID_DEVICE_POINTER: i32 = 17;

/// HIP error types
///
/// Each variant keeps the raw HIP status code where one exists so callers
/// crossing the C boundary can recover it through [`HipError::raw_code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HipError {
    #[error("out of memory: failed to allocate {nbytes} bytes on device {device}")]
    OutOfMemory { device: DeviceId, nbytes: usize },
    #[error("invalid device pointer {addr:#x}")]
    InvalidDevicePointer { addr: usize },
    #[error("device query failed with code {code}")]
    DeviceQueryFailed { code: i32 },
    #[error("hipMalloc failed with code {code} for {nbytes} bytes")]
    AllocationFailed { code: i32, nbytes: usize },
    #[error("hipFree failed with code {code} for pointer {addr:#x}")]
    FreeFailed { code: i32, addr: usize },
    #[error("stream creation failed with code {code}")]
    StreamCreateFailed { code: i32 },
    #[error("stream synchronization failed with code {code}")]
    StreamSyncFailed { code: i32 },
    #[error("internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for HipError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        HipError::LockPoisoned(format!("Lock poisoned: {}", err))
    }
}

/// HIP result type
pub type HipResult<T> = Result<T, HipError>;

impl HipError {
    /// Check if this error is the out-of-memory class.
    ///
    /// Out-of-memory failures from the primitive allocator are the only
    /// errors the caching allocator retries (once, after returning its
    /// cached blocks to the runtime).
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, HipError::OutOfMemory { .. })
    }

    /// Check if this error reports an invalid device pointer.
    ///
    /// Raised when a free targets an address that is not currently
    /// allocated: an unknown pointer, an already-freed one, or a pointer
    /// owned by a different allocator.
    pub fn is_invalid_device_pointer(&self) -> bool {
        matches!(self, HipError::InvalidDevicePointer { .. })
    }

    /// The raw HIP status code for this error.
    ///
    /// Used by the C callback table, which reports status codes rather
    /// than Rust errors.
    pub fn raw_code(&self) -> i32 {
        match self {
            HipError::OutOfMemory { .. } => HIP_ERROR_OUT_OF_MEMORY,
            HipError::InvalidDevicePointer { .. } => HIP_ERROR_INVALID_DEVICE_POINTER,
            HipError::DeviceQueryFailed { code } => *code,
            HipError::AllocationFailed { code, .. } => *code,
            HipError::FreeFailed { code, .. } => *code,
            HipError::StreamCreateFailed { code } => *code,
            HipError::StreamSyncFailed { code } => *code,
            HipError::LockPoisoned(_) => HIP_ERROR_INVALID_VALUE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_classification() {
        let err = HipError::OutOfMemory {
            device: 0,
            nbytes: 1024,
        };
        assert!(err.is_out_of_memory());
        assert!(!err.is_invalid_device_pointer());
        assert_eq!(err.raw_code(), HIP_ERROR_OUT_OF_MEMORY);
    }

    #[test]
    fn test_invalid_device_pointer_classification() {
        let err = HipError::InvalidDevicePointer { addr: 0xdead_b000 };
        assert!(err.is_invalid_device_pointer());
        assert!(!err.is_out_of_memory());
        assert_eq!(err.raw_code(), HIP_ERROR_INVALID_DEVICE_POINTER);
    }

    #[test]
    fn test_raw_code_passthrough() {
        let err = HipError::AllocationFailed {
            code: 709,
            nbytes: 512,
        };
        assert_eq!(err.raw_code(), 709);

        let err = HipError::DeviceQueryFailed { code: 3 };
        assert_eq!(err.raw_code(), 3);
    }

    #[test]
    fn test_poison_error_conversion() {
        fn poisoned() -> HipResult<()> {
            let mutex = std::sync::Mutex::new(());
            let guard = mutex.lock()?;
            drop(guard);
            Ok(())
        }
        assert!(poisoned().is_ok());
    }
}
