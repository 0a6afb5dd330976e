//! Hierarchical kernel execution core.
//!
//! Kernels are packed, self-describing byte buffers of frames built
//! top-down from type descriptors and invoked bottom-up to stream data
//! between multi-dimensional arrays:
//!
//! - [`builder::KernelBuilder`]: the packed frame buffer (inline small
//!   buffer, 1.5x growth, offset-stable appends, destructor chain);
//! - [`assignment`]: POD copy and scalar conversion frames keyed on
//!   `(dst, src, error mode)`;
//! - [`strided`]: the single-axis wrapper lifting element kernels across a
//!   strided dimension;
//! - [`reduction`]: the reduce/broadcast frame family and the driver that
//!   composes them per axis, with or without an identity element.
//!
//! Building and invoking a buffer is single-threaded and synchronous;
//! independently built buffers are independent. All build-time errors leave
//! the buffer destructible, and call-time range/precision signals propagate
//! out of the entry points as [`CallError`].

pub mod assignment;
pub mod builder;
pub mod error;
pub mod prefix;
pub mod reduction;
pub mod strided;

#[cfg(test)]
mod test;

pub use assignment::{build_assignment_kernel, build_builtin_assignment_kernel, build_pod_assignment_kernel, ErrorMode};
pub use builder::KernelBuilder;
pub use error::{CallError, Error, Result};
pub use prefix::{
    aligned_size, CallResult, KernelFn, KernelPrefix, KernelRequest, ReductionKernel, ReductionKernelPrefix,
    SingleFn, SingleKernel, StridedFn,
};
pub use reduction::{build_reduction_kernel, ReduceOp, ReductionData};
