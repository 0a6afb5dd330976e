//! Strided wrapper frame: lifts a child `single` kernel across one fixed
//! axis.

use std::mem;

use ndkern_dtype::{ArrayMeta, DType, DimMeta};

use crate::assignment::{build_assignment_kernel, ErrorMode};
use crate::builder::KernelBuilder;
use crate::error::{DimSizeMismatchSnafu, MetaMismatchSnafu, Result};
use crate::prefix::{child_at, CallResult, KernelPrefix, KernelRequest, SingleKernel};

/// One-axis driver: `single` iterates the child's `single` under the
/// stored strides, `strided` repeats that per outer element.
#[repr(C)]
pub(crate) struct StridedAssign {
    #[allow(dead_code)]
    prefix: KernelPrefix,
    size: usize,
    dst_stride: isize,
    src_stride: isize,
}

impl StridedAssign {
    fn new(size: usize, dst_stride: isize, src_stride: isize) -> Self {
        Self { prefix: KernelPrefix::placeholder(), size, dst_stride, src_stride }
    }

    fn child(&mut self) -> *mut KernelPrefix {
        unsafe { child_at(self, mem::size_of::<Self>()) }
    }
}

unsafe impl SingleKernel for StridedAssign {
    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        let child = self.child();
        let mut dst = dst;
        let mut src0 = unsafe { *src };
        for _ in 0..self.size {
            unsafe { (*child).single(dst, &src0)? };
            dst = dst.wrapping_offset(self.dst_stride);
            src0 = src0.wrapping_offset(self.src_stride);
        }
        Ok(())
    }

    unsafe fn destroy_children(&mut self) {
        unsafe { KernelPrefix::destroy(self.child()) };
    }
}

/// Peel one `fixed_dim` from both sides, append the wrapper and recurse on
/// the element assignment.
pub(crate) fn build_strided_assignment_kernel(
    ckb: &mut KernelBuilder,
    kernreq: KernelRequest,
    dst_tp: &DType,
    dst_meta: ArrayMeta,
    src_tp: &DType,
    src_meta: ArrayMeta,
    mode: ErrorMode,
) -> Result<usize> {
    let (DType::FixedDim { size: dst_size, element: dst_element }, DType::FixedDim { size: src_size, element: src_element }) =
        (dst_tp, src_tp)
    else {
        unreachable!("caller dispatches on matching fixed_dim wrappers")
    };
    if dst_size != src_size {
        return DimSizeMismatchSnafu { dst: *dst_size, src: *src_size }.fail();
    }

    let dst_ss = dst_meta
        .first()
        .and_then(DimMeta::as_fixed)
        .ok_or_else(|| MetaMismatchSnafu { tp: dst_tp.clone() }.build())?;
    let src_ss = src_meta
        .first()
        .and_then(DimMeta::as_fixed)
        .ok_or_else(|| MetaMismatchSnafu { tp: src_tp.clone() }.build())?;

    let offset = ckb.emplace_back(kernreq, StridedAssign::new(*dst_size, dst_ss.stride, src_ss.stride))?;
    build_assignment_kernel(
        ckb,
        KernelRequest::Single,
        dst_element,
        &dst_meta[1..],
        src_element,
        &src_meta[1..],
        mode,
    )?;
    Ok(offset)
}
