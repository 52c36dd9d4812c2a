//! ROCm/HIP device-runtime surface
//!
//! This module provides the thin runtime layer the caching allocator sits
//! on: typed status codes and errors, stream identities, and the
//! [`DeviceRuntime`] capability trait with its HIP-backed implementation.
//! Everything that links against libamdhip64 is gated behind the `rocm`
//! feature.

pub mod error;
#[cfg(feature = "rocm")]
pub mod ffi;
pub mod runtime;
pub mod stream;

pub use error::{HipError, HipResult};
pub use runtime::{DeviceId, DevicePtr, DeviceRuntime};
pub use stream::StreamId;

#[cfg(feature = "rocm")]
pub use ffi::get_error_string;
#[cfg(feature = "rocm")]
pub use runtime::{device_count, set_device, HipRuntime};
#[cfg(feature = "rocm")]
pub use stream::HipStream;
