//! Scalar accumulation frames and destination-initialization frames.
//!
//! The accumulation frame is the leaf of every reduction kernel: a
//! prefix-only frame computing `dst = op(dst, src)` element-wise. Integer
//! ops wrap; float ops follow IEEE; `Max`/`Min` on bool are or/and.

use std::ptr;

use ndkern_dtype::{ScalarType, ScalarValue};

use crate::builder::KernelBuilder;
use crate::error::{IdentityMismatchSnafu, Result, UnsupportedAccumulationSnafu};
use crate::prefix::{CallResult, KernelFn, KernelPrefix, KernelRequest, SingleKernel};
use crate::reduction::ReduceOp;

trait Accumulate<T> {
    fn combine(acc: T, value: T) -> T;
}

struct AddOp;
struct MulOp;
struct MaxOp;
struct MinOp;
struct SubOp;

macro_rules! impl_int_accumulate {
    ($($t:ty),*) => { $(
        impl Accumulate<$t> for AddOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc.wrapping_add(value) }
        }
        impl Accumulate<$t> for MulOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc.wrapping_mul(value) }
        }
        impl Accumulate<$t> for SubOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc.wrapping_sub(value) }
        }
        impl Accumulate<$t> for MaxOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc.max(value) }
        }
        impl Accumulate<$t> for MinOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc.min(value) }
        }
    )* };
}

impl_int_accumulate!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! impl_float_accumulate {
    ($($t:ty),*) => { $(
        impl Accumulate<$t> for AddOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc + value }
        }
        impl Accumulate<$t> for MulOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc * value }
        }
        impl Accumulate<$t> for SubOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc - value }
        }
        impl Accumulate<$t> for MaxOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc.max(value) }
        }
        impl Accumulate<$t> for MinOp {
            #[inline]
            fn combine(acc: $t, value: $t) -> $t { acc.min(value) }
        }
    )* };
}

impl_float_accumulate!(f32, f64);

impl Accumulate<bool> for MaxOp {
    #[inline]
    fn combine(acc: bool, value: bool) -> bool {
        acc | value
    }
}

impl Accumulate<bool> for MinOp {
    #[inline]
    fn combine(acc: bool, value: bool) -> bool {
        acc & value
    }
}

unsafe fn accumulate_single<A, T>(_: *mut KernelPrefix, dst: *mut u8, src: *const *const u8) -> CallResult
where
    A: Accumulate<T>,
    T: Copy,
{
    unsafe {
        let acc = dst as *mut T;
        ptr::write(acc, A::combine(ptr::read(acc), ptr::read(*src as *const T)));
    }
    Ok(())
}

unsafe fn accumulate_strided<A, T>(
    _: *mut KernelPrefix,
    dst: *mut u8,
    dst_stride: isize,
    src: *const *const u8,
    src_stride: *const isize,
    count: usize,
) -> CallResult
where
    A: Accumulate<T>,
    T: Copy,
{
    let mut dst = dst;
    let mut src0 = unsafe { *src };
    let src0_stride = unsafe { *src_stride };
    for _ in 0..count {
        unsafe {
            let acc = dst as *mut T;
            ptr::write(acc, A::combine(ptr::read(acc), ptr::read(src0 as *const T)));
        }
        dst = dst.wrapping_offset(dst_stride);
        src0 = src0.wrapping_offset(src0_stride);
    }
    Ok(())
}

fn accumulate_fn<A, T>(kernreq: KernelRequest) -> KernelFn
where
    A: Accumulate<T>,
    T: Copy,
{
    match kernreq {
        KernelRequest::Single => KernelFn { single: accumulate_single::<A, T> },
        KernelRequest::Strided => KernelFn { strided: accumulate_strided::<A, T> },
    }
}

fn select(op: ReduceOp, tp: ScalarType, kernreq: KernelRequest) -> Option<KernelFn> {
    macro_rules! numeric {
        ($op:ty) => {
            match tp {
                ScalarType::Bool => return None,
                ScalarType::Int8 => accumulate_fn::<$op, i8>(kernreq),
                ScalarType::Int16 => accumulate_fn::<$op, i16>(kernreq),
                ScalarType::Int32 => accumulate_fn::<$op, i32>(kernreq),
                ScalarType::Int64 => accumulate_fn::<$op, i64>(kernreq),
                ScalarType::UInt8 => accumulate_fn::<$op, u8>(kernreq),
                ScalarType::UInt16 => accumulate_fn::<$op, u16>(kernreq),
                ScalarType::UInt32 => accumulate_fn::<$op, u32>(kernreq),
                ScalarType::UInt64 => accumulate_fn::<$op, u64>(kernreq),
                ScalarType::Float32 => accumulate_fn::<$op, f32>(kernreq),
                ScalarType::Float64 => accumulate_fn::<$op, f64>(kernreq),
            }
        };
    }
    macro_rules! ordered {
        ($op:ty) => {
            match tp {
                ScalarType::Bool => accumulate_fn::<$op, bool>(kernreq),
                _ => numeric!($op),
            }
        };
    }

    Some(match op {
        ReduceOp::Add => numeric!(AddOp),
        ReduceOp::Mul => numeric!(MulOp),
        ReduceOp::Sub => numeric!(SubOp),
        ReduceOp::Max => ordered!(MaxOp),
        ReduceOp::Min => ordered!(MinOp),
    })
}

/// Append the `dst = op(dst, src)` accumulation frame.
pub(crate) fn build_accumulation_kernel(
    ckb: &mut KernelBuilder,
    kernreq: KernelRequest,
    op: ReduceOp,
    tp: ScalarType,
) -> Result<usize> {
    let function = select(op, tp, kernreq)
        .ok_or_else(|| UnsupportedAccumulationSnafu { op, tp }.build())?;
    ckb.emplace_prefix(function)
}

/// Destination-initialization frame used when the reduction has an
/// identity: writes the identity bytes and ignores the source.
#[repr(C)]
pub(crate) struct ConstantFill {
    #[allow(dead_code)]
    prefix: KernelPrefix,
    len: usize,
    bytes: [u8; 16],
}

unsafe impl SingleKernel for ConstantFill {
    unsafe fn single(&mut self, dst: *mut u8, _src: *const *const u8) -> CallResult {
        unsafe { ptr::copy_nonoverlapping(self.bytes.as_ptr(), dst, self.len) };
        Ok(())
    }
}

/// Append a [`ConstantFill`] holding `identity` converted to `tp`.
pub(crate) fn build_constant_fill(
    ckb: &mut KernelBuilder,
    kernreq: KernelRequest,
    tp: ScalarType,
    identity: &ScalarValue,
) -> Result<usize> {
    let mut bytes = [0u8; 16];
    let len = identity
        .write_to(tp, &mut bytes)
        .ok_or_else(|| IdentityMismatchSnafu { identity: *identity, tp }.build())?;
    ckb.emplace_back(kernreq, ConstantFill { prefix: KernelPrefix::placeholder(), len, bytes })
}
