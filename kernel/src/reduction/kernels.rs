//! The per-axis reduction frame family.
//!
//! Each frame handles one source dimension, indexed by (dimension kind,
//! reduce-or-broadcast at this axis, inner-or-outer position):
//!
//! - reduce frames drive their child with `dst_stride == 0`, funnelling a
//!   whole axis into one output cell;
//! - broadcast frames walk dst and src in lockstep;
//! - outer frames drive a child reduction frame's first/followup calls;
//! - inner frames hold two children: the accumulation kernel immediately
//!   after the frame, and the destination-initialization kernel at
//!   `init_offset` (frame-relative, patched by the driver after both
//!   children are appended).
//!
//! `init_offset == 0` means the init child was never attached (a build
//! aborted between the frame and its children); destructors skip it then.

use std::mem;

use ndkern_dtype::VarDimData;

use crate::error::CallError;
use crate::prefix::{child_at, CallResult, KernelPrefix, ReductionKernel, ReductionKernelPrefix};

/// A `fixed_dim` axis being reduced, with more dimensions below.
///
/// The child's first call must be `single`, its followup `strided`.
#[repr(C)]
pub(crate) struct FixedReduceOuter {
    #[allow(dead_code)]
    prefix: ReductionKernelPrefix,
    src_size: usize,
    src_stride: isize,
}

impl FixedReduceOuter {
    pub(crate) fn new(src_size: usize, src_stride: isize) -> Self {
        Self { prefix: ReductionKernelPrefix::placeholder(), src_size, src_stride }
    }

    fn child(&mut self) -> *mut ReductionKernelPrefix {
        unsafe { child_at(self, mem::size_of::<Self>()) as *mut ReductionKernelPrefix }
    }
}

unsafe impl ReductionKernel for FixedReduceOuter {
    unsafe fn single_first(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        let child = self.child();
        unsafe {
            // First element seeds dst, the rest accumulate into it.
            (*child).single_first(dst, src)?;
            if self.src_size > 1 {
                let src_second = (*src).wrapping_offset(self.src_stride);
                (*child).strided_followup(dst, 0, &src_second, &self.src_stride, self.src_size - 1)?;
            }
        }
        Ok(())
    }

    unsafe fn strided_first(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let child = self.child();
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        if dst_stride == 0 {
            // One "first" on the shared dst, then everything accumulates.
            unsafe {
                self.single_first(dst, &src0)?;
                src0 = src0.wrapping_offset(src0_stride);
                for _ in 1..count {
                    (*child).strided_followup(dst, 0, &src0, &self.src_stride, self.src_size)?;
                    src0 = src0.wrapping_offset(src0_stride);
                }
            }
        } else {
            for _ in 0..count {
                unsafe { self.single_first(dst, &src0)? };
                dst = dst.wrapping_offset(dst_stride);
                src0 = src0.wrapping_offset(src0_stride);
            }
        }
        Ok(())
    }

    unsafe fn strided_followup(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let child = self.child();
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        for _ in 0..count {
            unsafe { (*child).strided_followup(dst, 0, &src0, &self.src_stride, self.src_size)? };
            dst = dst.wrapping_offset(dst_stride);
            src0 = src0.wrapping_offset(src0_stride);
        }
        Ok(())
    }

    unsafe fn destroy_children(&mut self) {
        unsafe { KernelPrefix::destroy(self.child() as *mut KernelPrefix) };
    }
}

/// A `fixed_dim` axis being reduced, directly above the accumulation.
///
/// Without an identity the init child copies the first source element and
/// accumulation covers the remaining `size_first = size - 1` elements
/// (`src_stride_first = src_stride`); with an identity the init child
/// writes it and accumulation covers all `size_first = size` elements
/// (`src_stride_first = 0`).
#[repr(C)]
pub(crate) struct FixedReduceInner {
    #[allow(dead_code)]
    prefix: ReductionKernelPrefix,
    size_first: usize,
    src_stride_first: isize,
    size: usize,
    src_stride: isize,
    pub(crate) init_offset: usize,
}

impl FixedReduceInner {
    pub(crate) fn new(size: usize, src_stride: isize, size_first: usize, src_stride_first: isize) -> Self {
        Self {
            prefix: ReductionKernelPrefix::placeholder(),
            size_first,
            src_stride_first,
            size,
            src_stride,
            init_offset: 0,
        }
    }

    fn reduce_child(&mut self) -> *mut KernelPrefix {
        unsafe { child_at(self, mem::size_of::<Self>()) }
    }

    fn init_child(&mut self) -> *mut KernelPrefix {
        unsafe { child_at(self, self.init_offset) }
    }
}

unsafe impl ReductionKernel for FixedReduceInner {
    unsafe fn single_first(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        unsafe {
            let src0 = *src;
            (*self.init_child()).single(dst, src)?;
            let src_rest = src0.wrapping_offset(self.src_stride_first);
            (*self.reduce_child()).strided(dst, 0, &src_rest, &self.src_stride, self.size_first)
        }
    }

    unsafe fn strided_first(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        if dst_stride == 0 {
            // dst is initialized once; every further row is pure
            // accumulation over its full extent.
            unsafe {
                self.single_first(dst, &src0)?;
                src0 = src0.wrapping_offset(src0_stride);
                for _ in 1..count {
                    (*self.reduce_child()).strided(dst, 0, &src0, &self.src_stride, self.size)?;
                    src0 = src0.wrapping_offset(src0_stride);
                }
            }
        } else {
            for _ in 0..count {
                unsafe { self.single_first(dst, &src0)? };
                dst = dst.wrapping_offset(dst_stride);
                src0 = src0.wrapping_offset(src0_stride);
            }
        }
        Ok(())
    }

    unsafe fn strided_followup(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let reduce = self.reduce_child();
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        for _ in 0..count {
            unsafe { (*reduce).strided(dst, 0, &src0, &self.src_stride, self.size)? };
            dst = dst.wrapping_offset(dst_stride);
            src0 = src0.wrapping_offset(src0_stride);
        }
        Ok(())
    }

    unsafe fn destroy_children(&mut self) {
        unsafe {
            KernelPrefix::destroy(self.reduce_child());
            if self.init_offset != 0 {
                KernelPrefix::destroy(self.init_child());
            }
        }
    }
}

/// A `var_dim` axis being reduced, directly above the accumulation.
///
/// Reads the `{begin, size}` record from each source element. A row of
/// length zero is only meaningful with an identity
/// (`inner_stride_first == 0`); otherwise the call fails.
#[repr(C)]
pub(crate) struct VarReduceInner {
    #[allow(dead_code)]
    prefix: ReductionKernelPrefix,
    inner_stride: isize,
    inner_stride_first: isize,
    pub(crate) init_offset: usize,
}

impl VarReduceInner {
    pub(crate) fn new(inner_stride: isize, inner_stride_first: isize) -> Self {
        Self { prefix: ReductionKernelPrefix::placeholder(), inner_stride, inner_stride_first, init_offset: 0 }
    }

    fn reduce_child(&mut self) -> *mut KernelPrefix {
        unsafe { child_at(self, mem::size_of::<Self>()) }
    }

    fn init_child(&mut self) -> *mut KernelPrefix {
        unsafe { child_at(self, self.init_offset) }
    }
}

unsafe impl ReductionKernel for VarReduceInner {
    unsafe fn single_first(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        let record = unsafe { *(*src as *const VarDimData) };
        let mut inner_size = record.size;
        if self.inner_stride_first != 0 {
            if inner_size == 0 {
                return Err(CallError::EmptyReduction);
            }
            inner_size -= 1;
        }

        let mut data = record.begin as *const u8;
        unsafe {
            (*self.init_child()).single(dst, &data)?;
            data = data.wrapping_offset(self.inner_stride_first);
            (*self.reduce_child()).strided(dst, 0, &data, &self.inner_stride, inner_size)
        }
    }

    unsafe fn strided_first(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        for _ in 0..count {
            unsafe { self.single_first(dst, &src0)? };
            dst = dst.wrapping_offset(dst_stride);
            src0 = src0.wrapping_offset(src0_stride);
        }
        Ok(())
    }

    unsafe fn strided_followup(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let reduce = self.reduce_child();
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        for _ in 0..count {
            let record = unsafe { *(src0 as *const VarDimData) };
            let data = record.begin as *const u8;
            unsafe { (*reduce).strided(dst, 0, &data, &self.inner_stride, record.size)? };
            dst = dst.wrapping_offset(dst_stride);
            src0 = src0.wrapping_offset(src0_stride);
        }
        Ok(())
    }

    unsafe fn destroy_children(&mut self) {
        unsafe {
            if self.init_offset != 0 {
                KernelPrefix::destroy(self.init_child());
            }
            KernelPrefix::destroy(self.reduce_child());
        }
    }
}

/// A `fixed_dim` axis being broadcast, with more dimensions below.
///
/// The child's first and followup calls must both be `strided`.
#[repr(C)]
pub(crate) struct FixedBroadcastOuter {
    #[allow(dead_code)]
    prefix: ReductionKernelPrefix,
    size: usize,
    dst_stride: isize,
    src_stride: isize,
}

impl FixedBroadcastOuter {
    pub(crate) fn new(size: usize, dst_stride: isize, src_stride: isize) -> Self {
        Self { prefix: ReductionKernelPrefix::placeholder(), size, dst_stride, src_stride }
    }

    fn child(&mut self) -> *mut ReductionKernelPrefix {
        unsafe { child_at(self, mem::size_of::<Self>()) as *mut ReductionKernelPrefix }
    }
}

unsafe impl ReductionKernel for FixedBroadcastOuter {
    unsafe fn single_first(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        let child = self.child();
        unsafe { (*child).strided_first(dst, self.dst_stride, src, &self.src_stride, self.size) }
    }

    unsafe fn strided_first(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let child = self.child();
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        if dst_stride == 0 {
            // Shared dst: seed from the first outer element, then
            // accumulate the rest.
            unsafe {
                (*child).strided_first(dst, self.dst_stride, &src0, &self.src_stride, self.size)?;
                src0 = src0.wrapping_offset(src0_stride);
                for _ in 1..count {
                    (*child).strided_followup(dst, self.dst_stride, &src0, &self.src_stride, self.size)?;
                    src0 = src0.wrapping_offset(src0_stride);
                }
            }
        } else {
            for _ in 0..count {
                unsafe {
                    (*child).strided_first(dst, self.dst_stride, &src0, &self.src_stride, self.size)?;
                }
                dst = dst.wrapping_offset(dst_stride);
                src0 = src0.wrapping_offset(src0_stride);
            }
        }
        Ok(())
    }

    unsafe fn strided_followup(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let child = self.child();
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        for _ in 0..count {
            unsafe {
                (*child).strided_followup(dst, self.dst_stride, &src0, &self.src_stride, self.size)?;
            }
            dst = dst.wrapping_offset(dst_stride);
            src0 = src0.wrapping_offset(src0_stride);
        }
        Ok(())
    }

    unsafe fn destroy_children(&mut self) {
        unsafe { KernelPrefix::destroy(self.child() as *mut KernelPrefix) };
    }
}

/// A `fixed_dim` axis being broadcast, directly above the accumulation.
///
/// Without an identity the init child copies the whole source row into dst
/// (`src_stride_first = src_stride`) and the first pass is complete; with
/// an identity (`src_stride_first = 0`) the init child fills dst and the
/// accumulation child then folds the row in.
#[repr(C)]
pub(crate) struct FixedBroadcastInner {
    #[allow(dead_code)]
    prefix: ReductionKernelPrefix,
    size: usize,
    dst_stride: isize,
    src_stride: isize,
    src_stride_first: isize,
    pub(crate) init_offset: usize,
}

impl FixedBroadcastInner {
    pub(crate) fn new(size: usize, dst_stride: isize, src_stride: isize, src_stride_first: isize) -> Self {
        Self {
            prefix: ReductionKernelPrefix::placeholder(),
            size,
            dst_stride,
            src_stride,
            src_stride_first,
            init_offset: 0,
        }
    }

    fn reduce_child(&mut self) -> *mut KernelPrefix {
        unsafe { child_at(self, mem::size_of::<Self>()) }
    }

    fn init_child(&mut self) -> *mut KernelPrefix {
        unsafe { child_at(self, self.init_offset) }
    }
}

unsafe impl ReductionKernel for FixedBroadcastInner {
    unsafe fn single_first(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        unsafe {
            (*self.init_child()).strided(dst, self.dst_stride, src, &self.src_stride_first, self.size)?;
            if self.src_stride_first == 0 {
                (*self.reduce_child()).strided(dst, self.dst_stride, src, &self.src_stride, self.size)?;
            }
        }
        Ok(())
    }

    unsafe fn strided_first(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        if dst_stride == 0 {
            // Shared dst row: first outer element initializes it, the rest
            // accumulate.
            unsafe {
                self.single_first(dst, &src0)?;
                src0 = src0.wrapping_offset(src0_stride);
                for _ in 1..count {
                    (*self.reduce_child()).strided(dst, self.dst_stride, &src0, &self.src_stride, self.size)?;
                    src0 = src0.wrapping_offset(src0_stride);
                }
            }
        } else {
            for _ in 0..count {
                unsafe { self.single_first(dst, &src0)? };
                dst = dst.wrapping_offset(dst_stride);
                src0 = src0.wrapping_offset(src0_stride);
            }
        }
        Ok(())
    }

    unsafe fn strided_followup(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        let reduce = self.reduce_child();
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        let src0_stride = unsafe { *src_stride };
        for _ in 0..count {
            unsafe { (*reduce).strided(dst, self.dst_stride, &src0, &self.src_stride, self.size)? };
            dst = dst.wrapping_offset(dst_stride);
            src0 = src0.wrapping_offset(src0_stride);
        }
        Ok(())
    }

    unsafe fn destroy_children(&mut self) {
        unsafe {
            KernelPrefix::destroy(self.reduce_child());
            if self.init_offset != 0 {
                KernelPrefix::destroy(self.init_child());
            }
        }
    }
}
