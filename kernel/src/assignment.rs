//! Assignment kernel factory.
//!
//! Produces the element-level copy and conversion frames everything else is
//! built from:
//! - same-type builtins get a POD copy frame specialized on size and
//!   alignment (typed load/store for aligned 1/2/4/8, unaligned variants,
//!   a memcpy frame otherwise);
//! - differing builtins go through a `[dst][src][error_mode]` table of
//!   precompiled single-element converters;
//! - dimension types delegate to the per-dimension builders.
//!
//! Error policy at call time: out-of-range values signal `Overflow` unless
//! the mode is `None`; float-to-int values with a fractional part signal
//! `Fractional` unless the mode is `None` or `Overflow`; precision loss in
//! narrowing signals `Inexact` only under mode `Inexact`. Unchecked paths
//! use plain `as` casts (float to int saturates).

use std::ptr;

use ndkern_dtype::{ArrayMeta, DType, HasScalarType, ScalarType};
use strum::EnumCount;

use crate::builder::KernelBuilder;
use crate::error::{CallError, FractionalSnafu, InexactSnafu, OverflowSnafu, Result, TypeMismatchSnafu};
use crate::prefix::{CallResult, KernelFn, KernelPrefix, KernelRequest, SingleFn, SingleKernel, StridedFn};

/// Call-time checking mode of an assignment kernel; the table dimension
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorMode {
    /// No checks; `as`-cast semantics.
    None = 0,
    /// Range checks only.
    Overflow = 1,
    /// Range checks plus fractional-part checks on float to int.
    Fractional = 2,
    /// Everything, including precision loss in narrowing.
    Inexact = 3,
}

impl ErrorMode {
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

const fn mode_from_index(index: u8) -> ErrorMode {
    match index {
        1 => ErrorMode::Overflow,
        2 => ErrorMode::Fractional,
        _ => ErrorMode::Inexact,
    }
}

// ---------------------------------------------------------------------
// Scalar conversion, one impl per (dst, src) pair.
// ---------------------------------------------------------------------

trait ConvertFrom<S>: Sized {
    /// `as`-cast semantics, never fails.
    fn convert_unchecked(src: S) -> Self;
    /// Checked conversion; `mode` is never [`ErrorMode::None`].
    fn convert_checked(src: S, mode: ErrorMode) -> Result<Self, CallError>;
}

macro_rules! impl_identity {
    ($($t:ty),*) => { $(
        impl ConvertFrom<$t> for $t {
            #[inline]
            fn convert_unchecked(src: $t) -> Self { src }
            #[inline]
            fn convert_checked(src: $t, _mode: ErrorMode) -> Result<Self, CallError> { Ok(src) }
        }
    )* };
}

impl_identity!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

macro_rules! impl_from_bool {
    ($($dst:ty),*) => { $(
        impl ConvertFrom<bool> for $dst {
            #[inline]
            fn convert_unchecked(src: bool) -> Self { src as u8 as $dst }
            #[inline]
            fn convert_checked(src: bool, _mode: ErrorMode) -> Result<Self, CallError> {
                Ok(Self::convert_unchecked(src))
            }
        }
    )* };
}

impl_from_bool!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

macro_rules! impl_bool_from_int {
    ($($src:ty),*) => { $(
        impl ConvertFrom<$src> for bool {
            #[inline]
            fn convert_unchecked(src: $src) -> Self { src != 0 }
            #[inline]
            fn convert_checked(src: $src, _mode: ErrorMode) -> Result<Self, CallError> {
                match src {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => OverflowSnafu { dst: ScalarType::Bool }.fail(),
                }
            }
        }
    )* };
}

impl_bool_from_int!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! impl_bool_from_float {
    ($($src:ty),*) => { $(
        impl ConvertFrom<$src> for bool {
            #[inline]
            fn convert_unchecked(src: $src) -> Self { src != 0.0 }
            #[inline]
            fn convert_checked(src: $src, _mode: ErrorMode) -> Result<Self, CallError> {
                if src == 0.0 {
                    Ok(false)
                } else if src == 1.0 {
                    Ok(true)
                } else {
                    OverflowSnafu { dst: ScalarType::Bool }.fail()
                }
            }
        }
    )* };
}

impl_bool_from_float!(f32, f64);

macro_rules! impl_int_from_ints {
    ($dst:ty: $($src:ty),*) => { $(
        impl ConvertFrom<$src> for $dst {
            #[inline]
            fn convert_unchecked(src: $src) -> Self { src as $dst }
            #[inline]
            fn convert_checked(src: $src, _mode: ErrorMode) -> Result<Self, CallError> {
                <$dst>::try_from(src).map_err(|_| CallError::Overflow { dst: <$dst>::SCALAR })
            }
        }
    )* };
}

impl_int_from_ints!(i8: i16, i32, i64, u8, u16, u32, u64);
impl_int_from_ints!(i16: i8, i32, i64, u8, u16, u32, u64);
impl_int_from_ints!(i32: i8, i16, i64, u8, u16, u32, u64);
impl_int_from_ints!(i64: i8, i16, i32, u8, u16, u32, u64);
impl_int_from_ints!(u8: i8, i16, i32, i64, u16, u32, u64);
impl_int_from_ints!(u16: i8, i16, i32, i64, u8, u32, u64);
impl_int_from_ints!(u32: i8, i16, i32, i64, u8, u16, u64);
impl_int_from_ints!(u64: i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_int_from_floats {
    ($dst:ty: $($src:ty),*) => { $(
        impl ConvertFrom<$src> for $dst {
            #[inline]
            fn convert_unchecked(src: $src) -> Self { src as $dst }
            #[inline]
            fn convert_checked(src: $src, mode: ErrorMode) -> Result<Self, CallError> {
                let truncated = src.trunc();
                if mode != ErrorMode::Overflow && truncated != src {
                    return FractionalSnafu { dst: <$dst>::SCALAR }.fail();
                }
                num_traits::cast::<$src, $dst>(truncated)
                    .ok_or(CallError::Overflow { dst: <$dst>::SCALAR })
            }
        }
    )* };
}

impl_int_from_floats!(i8: f32, f64);
impl_int_from_floats!(i16: f32, f64);
impl_int_from_floats!(i32: f32, f64);
impl_int_from_floats!(i64: f32, f64);
impl_int_from_floats!(u8: f32, f64);
impl_int_from_floats!(u16: f32, f64);
impl_int_from_floats!(u32: f32, f64);
impl_int_from_floats!(u64: f32, f64);

macro_rules! impl_float_from_ints {
    ($dst:ty: $($src:ty),*) => { $(
        impl ConvertFrom<$src> for $dst {
            #[inline]
            fn convert_unchecked(src: $src) -> Self { src as $dst }
            #[inline]
            fn convert_checked(src: $src, mode: ErrorMode) -> Result<Self, CallError> {
                let value = src as $dst;
                if mode == ErrorMode::Inexact && num_traits::cast::<$dst, $src>(value) != Some(src) {
                    return InexactSnafu { dst: <$dst>::SCALAR }.fail();
                }
                Ok(value)
            }
        }
    )* };
}

impl_float_from_ints!(f32: i8, i16, i32, i64, u8, u16, u32, u64);
impl_float_from_ints!(f64: i8, i16, i32, i64, u8, u16, u32, u64);

impl ConvertFrom<f32> for f64 {
    #[inline]
    fn convert_unchecked(src: f32) -> Self {
        src as f64
    }
    #[inline]
    fn convert_checked(src: f32, _mode: ErrorMode) -> Result<Self, CallError> {
        Ok(src as f64)
    }
}

impl ConvertFrom<f64> for f32 {
    #[inline]
    fn convert_unchecked(src: f64) -> Self {
        src as f32
    }
    #[inline]
    fn convert_checked(src: f64, mode: ErrorMode) -> Result<Self, CallError> {
        let narrowed = src as f32;
        if mode == ErrorMode::Inexact {
            if narrowed as f64 != src {
                return InexactSnafu { dst: ScalarType::Float32 }.fail();
            }
        } else if narrowed.is_infinite() && src.is_finite() {
            return OverflowSnafu { dst: ScalarType::Float32 }.fail();
        }
        Ok(narrowed)
    }
}

// ---------------------------------------------------------------------
// Table entry functions (prefix-only frames).
// ---------------------------------------------------------------------

unsafe fn assign_single_unchecked<D, S>(_: *mut KernelPrefix, dst: *mut u8, src: *const *const u8) -> CallResult
where
    D: ConvertFrom<S>,
    S: Copy,
{
    unsafe {
        let value = ptr::read(*src as *const S);
        ptr::write(dst as *mut D, D::convert_unchecked(value));
    }
    Ok(())
}

unsafe fn assign_single_checked<D, S, const MODE: u8>(
    _: *mut KernelPrefix,
    dst: *mut u8,
    src: *const *const u8,
) -> CallResult
where
    D: ConvertFrom<S>,
    S: Copy,
{
    unsafe {
        let value = ptr::read(*src as *const S);
        ptr::write(dst as *mut D, D::convert_checked(value, mode_from_index(MODE))?);
    }
    Ok(())
}

unsafe fn assign_strided_unchecked<D, S>(
    _: *mut KernelPrefix,
    dst: *mut u8,
    dst_stride: isize,
    src: *const *const u8,
    src_stride: *const isize,
    count: usize,
) -> CallResult
where
    D: ConvertFrom<S>,
    S: Copy,
{
    let mut dst = dst;
    let mut src0 = unsafe { *src };
    let src0_stride = unsafe { *src_stride };
    for _ in 0..count {
        unsafe {
            let value = ptr::read(src0 as *const S);
            ptr::write(dst as *mut D, D::convert_unchecked(value));
        }
        dst = dst.wrapping_offset(dst_stride);
        src0 = src0.wrapping_offset(src0_stride);
    }
    Ok(())
}

unsafe fn assign_strided_checked<D, S, const MODE: u8>(
    _: *mut KernelPrefix,
    dst: *mut u8,
    dst_stride: isize,
    src: *const *const u8,
    src_stride: *const isize,
    count: usize,
) -> CallResult
where
    D: ConvertFrom<S>,
    S: Copy,
{
    let mut dst = dst;
    let mut src0 = unsafe { *src };
    let src0_stride = unsafe { *src_stride };
    for _ in 0..count {
        unsafe {
            let value = ptr::read(src0 as *const S);
            ptr::write(dst as *mut D, D::convert_checked(value, mode_from_index(MODE))?);
        }
        dst = dst.wrapping_offset(dst_stride);
        src0 = src0.wrapping_offset(src0_stride);
    }
    Ok(())
}

const NTYPES: usize = ScalarType::COUNT;

// The nesting below must match the ScalarType discriminant order exactly;
// kernel/src/test/unit/assignment.rs spot-checks the corners.

macro_rules! mode_level_single {
    ($dst:ty, $src:ty) => {
        [
            assign_single_unchecked::<$dst, $src> as SingleFn,
            assign_single_checked::<$dst, $src, 1> as SingleFn,
            assign_single_checked::<$dst, $src, 2> as SingleFn,
            assign_single_checked::<$dst, $src, 3> as SingleFn,
        ]
    };
}

macro_rules! src_level_single {
    ($dst:ty) => {
        [
            mode_level_single!($dst, bool),
            mode_level_single!($dst, i8),
            mode_level_single!($dst, i16),
            mode_level_single!($dst, i32),
            mode_level_single!($dst, i64),
            mode_level_single!($dst, u8),
            mode_level_single!($dst, u16),
            mode_level_single!($dst, u32),
            mode_level_single!($dst, u64),
            mode_level_single!($dst, f32),
            mode_level_single!($dst, f64),
        ]
    };
}

static SINGLE_ASSIGN_TABLE: [[[SingleFn; 4]; NTYPES]; NTYPES] = [
    src_level_single!(bool),
    src_level_single!(i8),
    src_level_single!(i16),
    src_level_single!(i32),
    src_level_single!(i64),
    src_level_single!(u8),
    src_level_single!(u16),
    src_level_single!(u32),
    src_level_single!(u64),
    src_level_single!(f32),
    src_level_single!(f64),
];

macro_rules! mode_level_strided {
    ($dst:ty, $src:ty) => {
        [
            assign_strided_unchecked::<$dst, $src> as StridedFn,
            assign_strided_checked::<$dst, $src, 1> as StridedFn,
            assign_strided_checked::<$dst, $src, 2> as StridedFn,
            assign_strided_checked::<$dst, $src, 3> as StridedFn,
        ]
    };
}

macro_rules! src_level_strided {
    ($dst:ty) => {
        [
            mode_level_strided!($dst, bool),
            mode_level_strided!($dst, i8),
            mode_level_strided!($dst, i16),
            mode_level_strided!($dst, i32),
            mode_level_strided!($dst, i64),
            mode_level_strided!($dst, u8),
            mode_level_strided!($dst, u16),
            mode_level_strided!($dst, u32),
            mode_level_strided!($dst, u64),
            mode_level_strided!($dst, f32),
            mode_level_strided!($dst, f64),
        ]
    };
}

static STRIDED_ASSIGN_TABLE: [[[StridedFn; 4]; NTYPES]; NTYPES] = [
    src_level_strided!(bool),
    src_level_strided!(i8),
    src_level_strided!(i16),
    src_level_strided!(i32),
    src_level_strided!(i64),
    src_level_strided!(u8),
    src_level_strided!(u16),
    src_level_strided!(u32),
    src_level_strided!(u64),
    src_level_strided!(f32),
    src_level_strided!(f64),
];

// ---------------------------------------------------------------------
// POD copy frames.
// ---------------------------------------------------------------------

unsafe fn aligned_copy_single<T: Copy>(_: *mut KernelPrefix, dst: *mut u8, src: *const *const u8) -> CallResult {
    unsafe { ptr::write(dst as *mut T, ptr::read(*src as *const T)) };
    Ok(())
}

unsafe fn aligned_copy_strided<T: Copy>(
    _: *mut KernelPrefix,
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
        unsafe { ptr::write(dst as *mut T, ptr::read(src0 as *const T)) };
        dst = dst.wrapping_offset(dst_stride);
        src0 = src0.wrapping_offset(src0_stride);
    }
    Ok(())
}

unsafe fn unaligned_copy_single<T: Copy>(_: *mut KernelPrefix, dst: *mut u8, src: *const *const u8) -> CallResult {
    unsafe { ptr::write_unaligned(dst as *mut T, ptr::read_unaligned(*src as *const T)) };
    Ok(())
}

unsafe fn unaligned_copy_strided<T: Copy>(
    _: *mut KernelPrefix,
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
        unsafe { ptr::write_unaligned(dst as *mut T, ptr::read_unaligned(src0 as *const T)) };
        dst = dst.wrapping_offset(dst_stride);
        src0 = src0.wrapping_offset(src0_stride);
    }
    Ok(())
}

fn aligned_copy_fn<T: Copy>(kernreq: KernelRequest) -> KernelFn {
    match kernreq {
        KernelRequest::Single => KernelFn { single: aligned_copy_single::<T> },
        KernelRequest::Strided => KernelFn { strided: aligned_copy_strided::<T> },
    }
}

fn unaligned_copy_fn<T: Copy>(kernreq: KernelRequest) -> KernelFn {
    match kernreq {
        KernelRequest::Single => KernelFn { single: unaligned_copy_single::<T> },
        KernelRequest::Strided => KernelFn { strided: unaligned_copy_strided::<T> },
    }
}

/// Copy frame for sizes without a fixed-width specialization; the size is
/// baked into the frame.
#[repr(C)]
struct MemCopy {
    #[allow(dead_code)]
    prefix: KernelPrefix,
    data_size: usize,
}

impl MemCopy {
    fn new(data_size: usize) -> Self {
        Self { prefix: KernelPrefix::placeholder(), data_size }
    }
}

unsafe impl SingleKernel for MemCopy {
    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        unsafe { ptr::copy_nonoverlapping(*src, dst, self.data_size) };
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Factory entry points.
// ---------------------------------------------------------------------

/// Append a frame that copies `data_size` bytes between same-type values.
///
/// Aligned sizes 1/2/4/8 load and store the matching integer width; when
/// `data_alignment < data_size` the unaligned variants are used; any other
/// size gets a memcpy frame.
pub fn build_pod_assignment_kernel(
    ckb: &mut KernelBuilder,
    kernreq: KernelRequest,
    data_size: usize,
    data_alignment: usize,
) -> Result<usize> {
    let function = if data_size == data_alignment {
        match data_size {
            1 => Some(aligned_copy_fn::<u8>(kernreq)),
            2 => Some(aligned_copy_fn::<u16>(kernreq)),
            4 => Some(aligned_copy_fn::<u32>(kernreq)),
            8 => Some(aligned_copy_fn::<u64>(kernreq)),
            _ => None,
        }
    } else {
        match data_size {
            2 => Some(unaligned_copy_fn::<u16>(kernreq)),
            4 => Some(unaligned_copy_fn::<u32>(kernreq)),
            8 => Some(unaligned_copy_fn::<u64>(kernreq)),
            _ => None,
        }
    };
    match function {
        Some(function) => ckb.emplace_prefix(function),
        None => ckb.emplace_back(kernreq, MemCopy::new(data_size)),
    }
}

/// Append the table-dispatched converter frame for a builtin pair.
pub fn build_builtin_assignment_kernel(
    ckb: &mut KernelBuilder,
    kernreq: KernelRequest,
    dst: ScalarType,
    src: ScalarType,
    mode: ErrorMode,
) -> Result<usize> {
    let function = match kernreq {
        KernelRequest::Single => {
            KernelFn { single: SINGLE_ASSIGN_TABLE[dst.index()][src.index()][mode.index()] }
        }
        KernelRequest::Strided => {
            KernelFn { strided: STRIDED_ASSIGN_TABLE[dst.index()][src.index()][mode.index()] }
        }
    };
    ckb.emplace_prefix(function)
}

/// Append an assignment kernel for `dst_tp = src_tp` into `ckb`.
///
/// Builtin pairs resolve to POD copies or table converters (with the mode
/// downgraded to `None` when the pair is lossless); matching `fixed_dim`
/// wrappers lift the element assignment through a strided wrapper frame;
/// anything else is a build-time type mismatch.
pub fn build_assignment_kernel(
    ckb: &mut KernelBuilder,
    kernreq: KernelRequest,
    dst_tp: &DType,
    dst_meta: ArrayMeta,
    src_tp: &DType,
    src_meta: ArrayMeta,
    mode: ErrorMode,
) -> Result<usize> {
    match (dst_tp, src_tp) {
        (DType::Builtin(dst), DType::Builtin(src)) => {
            let mode = if mode != ErrorMode::None && ScalarType::is_lossless_assignment(*dst, *src) {
                ErrorMode::None
            } else {
                mode
            };
            if dst == src {
                build_pod_assignment_kernel(ckb, kernreq, dst.bytes(), dst.alignment())
            } else {
                tracing::debug!(?dst, ?src, ?mode, "builtin assignment kernel");
                build_builtin_assignment_kernel(ckb, kernreq, *dst, *src, mode)
            }
        }
        (DType::FixedDim { .. }, DType::FixedDim { .. }) => {
            crate::strided::build_strided_assignment_kernel(ckb, kernreq, dst_tp, dst_meta, src_tp, src_meta, mode)
        }
        _ => TypeMismatchSnafu { dst: dst_tp.clone(), src: src_tp.clone() }.fail(),
    }
}
