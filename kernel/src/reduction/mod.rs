//! Reduction kernel driver.
//!
//! [`build_reduction_kernel`] walks the source type top-down, one dimension
//! per recursion step. At each axis it decides reduce vs broadcast (is the
//! axis listed in the reduction axes?) and inner vs outer (is this the last
//! dimension?), appends the matching frame from [`kernels`], and recurses
//! on the peeled element type and metadata. The innermost step appends the
//! accumulation kernel and the destination-initialization kernel, then the
//! inner frame's `init_offset` is patched frame-relative; pointers are
//! always re-derived from offsets because every append may relocate the
//! buffer.

use ndkern_dtype::{ArrayMeta, DType, DimMeta, ScalarValue};
use smallvec::SmallVec;

use crate::assignment::build_pod_assignment_kernel;
use crate::builder::KernelBuilder;
use crate::error::{
    DimSizeMismatchSnafu, EmptyReductionAxisSnafu, InvalidAxesSnafu, MetaMismatchSnafu, Result, TypeMismatchSnafu,
    UnsupportedReductionSnafu,
};
use crate::prefix::KernelRequest;

pub(crate) mod accumulate;
pub(crate) mod kernels;

use accumulate::{build_accumulation_kernel, build_constant_fill};
use kernels::{FixedBroadcastInner, FixedBroadcastOuter, FixedReduceInner, FixedReduceOuter, VarReduceInner};

/// The element-wise accumulation applied along reduced axes.
///
/// `Sub` is the left-fold `acc - x`; it is left-associative but not
/// commutative, so it is rejected for multi-axis reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Add,
    Mul,
    Max,
    Min,
    Sub,
}

impl ReduceOp {
    pub const fn is_commutative(&self) -> bool {
        !matches!(self, Self::Sub)
    }

    pub const fn is_left_associative(&self) -> bool {
        true
    }

    pub const fn is_right_associative(&self) -> bool {
        false
    }
}

/// Mutable traversal record consumed while building a reduction kernel.
///
/// Tracks how many dimensions and reduction axes remain, which axis the
/// cursor is at, and carries the identity down to the innermost frame,
/// which records where the init kernel was appended (`init_offset`).
#[derive(Debug, Clone)]
pub struct ReductionData {
    ndim: usize,
    naxis: usize,
    axes: SmallVec<[i32; 4]>,
    axis_cursor: usize,
    keepdims: bool,
    stored_ndim: usize,
    identity: Option<ScalarValue>,
    init_offset: usize,
}

impl ReductionData {
    /// Validate and package the reduction parameters. `axes` must be
    /// sorted ascending, without duplicates, each in `[0, ndim)`.
    pub fn new(ndim: usize, axes: &[i32], keepdims: bool, identity: Option<ScalarValue>) -> Result<Self> {
        if ndim == 0 {
            return InvalidAxesSnafu { reason: "reduction requires at least one dimension" }.fail();
        }
        if axes.len() > ndim {
            return InvalidAxesSnafu { reason: "more reduction axes than dimensions" }.fail();
        }
        for (i, &axis) in axes.iter().enumerate() {
            if axis < 0 || axis as usize >= ndim {
                return InvalidAxesSnafu { reason: "axis out of range" }.fail();
            }
            if i > 0 && axes[i - 1] >= axis {
                return InvalidAxesSnafu { reason: "axes must be sorted ascending without duplicates" }.fail();
            }
        }
        Ok(Self {
            ndim,
            naxis: axes.len(),
            axes: SmallVec::from_slice(axes),
            axis_cursor: 0,
            keepdims,
            stored_ndim: ndim,
            identity,
            init_offset: 0,
        })
    }

    /// The current dimension is the last one.
    pub fn is_inner(&self) -> bool {
        self.ndim == 1
    }

    /// The current outer axis is not a reduction axis.
    pub fn is_broadcast_here(&self) -> bool {
        match self.axes.get(self.axis_cursor) {
            None => true,
            Some(&axis) => self.stored_ndim - axis as usize != self.ndim,
        }
    }

    fn consume_axis(&mut self) {
        self.ndim -= 1;
        self.naxis -= 1;
        self.axis_cursor += 1;
    }

    fn consume_broadcast(&mut self) {
        self.ndim -= 1;
    }
}

/// Append a reduction kernel for `dst_tp = reduce(op, src_tp)` into `ckb`,
/// consuming the traversal record.
///
/// Returns the root frame's offset. The root is instantiated for
/// `kernreq`; its first call seeds the output, followup calls accumulate
/// more input into it.
pub fn build_reduction_kernel(
    ckb: &mut KernelBuilder,
    kernreq: KernelRequest,
    dst_tp: &DType,
    dst_meta: ArrayMeta,
    src_tp: &DType,
    src_meta: ArrayMeta,
    op: ReduceOp,
    mut data: ReductionData,
) -> Result<usize> {
    if op.is_right_associative() {
        return UnsupportedReductionSnafu { op, reason: "right-associative reductions are not supported" }.fail();
    }
    if data.naxis > 1 && !(op.is_left_associative() && op.is_commutative()) {
        return UnsupportedReductionSnafu {
            op,
            reason: "reducing along multiple axes requires a left-associative, commutative op",
        }
        .fail();
    }
    if src_tp.ndim() != data.ndim {
        return InvalidAxesSnafu { reason: "reduction rank does not match the source type" }.fail();
    }

    tracing::debug!(?op, ndim = data.ndim, naxis = data.naxis, keepdims = data.keepdims, "building reduction kernel");
    let root = ckb.size();
    build_dim(ckb, kernreq, dst_tp, dst_meta, src_tp, src_meta, op, &mut data)?;
    Ok(root)
}

fn fixed_meta(meta: ArrayMeta, tp: &DType) -> Result<ndkern_dtype::SizeStride> {
    meta.first().and_then(DimMeta::as_fixed).ok_or_else(|| MetaMismatchSnafu { tp: tp.clone() }.build())
}

fn var_meta(meta: ArrayMeta, tp: &DType) -> Result<ndkern_dtype::VarStride> {
    meta.first().and_then(DimMeta::as_var).ok_or_else(|| MetaMismatchSnafu { tp: tp.clone() }.build())
}

/// Peel the destination's size-1 axis kept by `keepdims`.
fn peel_dst_kept<'a>(dst_tp: &'a DType, dst_meta: ArrayMeta<'a>) -> Result<(&'a DType, ArrayMeta<'a>)> {
    let DType::FixedDim { size, element } = dst_tp else {
        return InvalidAxesSnafu { reason: "keepdims destination axis must be a size-1 fixed dimension" }.fail();
    };
    if *size != 1 {
        return DimSizeMismatchSnafu { dst: *size, src: 1usize }.fail();
    }
    fixed_meta(dst_meta, dst_tp)?;
    Ok((element, &dst_meta[1..]))
}

#[allow(clippy::too_many_arguments)]
fn build_dim(
    ckb: &mut KernelBuilder,
    kernreq: KernelRequest,
    dst_tp: &DType,
    dst_meta: ArrayMeta,
    src_tp: &DType,
    src_meta: ArrayMeta,
    op: ReduceOp,
    data: &mut ReductionData,
) -> Result<()> {
    let broadcast = data.is_broadcast_here();
    let inner = data.is_inner();
    tracing::trace!(ndim = data.ndim, broadcast, inner, src = ?src_tp.id(), "selecting reduction frame");

    match src_tp {
        DType::FixedDim { size, element } => {
            let src_stride = fixed_meta(src_meta, src_tp)?.stride;
            let src_el_meta = &src_meta[1..];
            match (broadcast, inner) {
                (false, false) => {
                    ckb.emplace_back_reduction(kernreq, FixedReduceOuter::new(*size, src_stride))?;
                    data.consume_axis();
                    let (dst_el, dst_el_meta) =
                        if data.keepdims { peel_dst_kept(dst_tp, dst_meta)? } else { (dst_tp, dst_meta) };
                    build_dim(ckb, KernelRequest::Single, dst_el, dst_el_meta, element, src_el_meta, op, data)
                }
                (false, true) => {
                    if *size == 0 && data.identity.is_none() {
                        return EmptyReductionAxisSnafu.fail();
                    }
                    let (size_first, src_stride_first) = match data.identity {
                        Some(_) => (*size, 0),
                        None => (*size - 1, src_stride),
                    };
                    let root = ckb.size();
                    ckb.emplace_back_reduction(
                        kernreq,
                        FixedReduceInner::new(*size, src_stride, size_first, src_stride_first),
                    )?;
                    data.consume_axis();
                    let (dst_el, _dst_el_meta) =
                        if data.keepdims { peel_dst_kept(dst_tp, dst_meta)? } else { (dst_tp, dst_meta) };
                    build_leaf(ckb, dst_el, element, op, data, KernelRequest::Single)?;
                    let init_offset = data.init_offset - root;
                    unsafe { (*ckb.get_at::<FixedReduceInner>(root)).init_offset = init_offset };
                    Ok(())
                }
                (true, false) => {
                    let dst_ss = fixed_meta(dst_meta, dst_tp)?;
                    let (dst_el, dst_el_meta) = peel_dst_broadcast(dst_tp, dst_meta, *size)?;
                    ckb.emplace_back_reduction(
                        kernreq,
                        FixedBroadcastOuter::new(*size, dst_ss.stride, src_stride),
                    )?;
                    data.consume_broadcast();
                    build_dim(ckb, KernelRequest::Strided, dst_el, dst_el_meta, element, src_el_meta, op, data)
                }
                (true, true) => {
                    let dst_ss = fixed_meta(dst_meta, dst_tp)?;
                    let (dst_el, _dst_el_meta) = peel_dst_broadcast(dst_tp, dst_meta, *size)?;
                    let src_stride_first = match data.identity {
                        Some(_) => 0,
                        None => src_stride,
                    };
                    let root = ckb.size();
                    ckb.emplace_back_reduction(
                        kernreq,
                        FixedBroadcastInner::new(*size, dst_ss.stride, src_stride, src_stride_first),
                    )?;
                    data.consume_broadcast();
                    build_leaf(ckb, dst_el, element, op, data, KernelRequest::Strided)?;
                    let init_offset = data.init_offset - root;
                    unsafe { (*ckb.get_at::<FixedBroadcastInner>(root)).init_offset = init_offset };
                    Ok(())
                }
            }
        }
        DType::VarDim { element } => {
            if broadcast || !inner {
                // Only the inner-reduce slot is defined for var_dim.
                return TypeMismatchSnafu { dst: dst_tp.clone(), src: src_tp.clone() }.fail();
            }
            let inner_stride = var_meta(src_meta, src_tp)?.stride;
            let inner_stride_first = match data.identity {
                Some(_) => 0,
                None => inner_stride,
            };
            let root = ckb.size();
            ckb.emplace_back_reduction(kernreq, VarReduceInner::new(inner_stride, inner_stride_first))?;
            data.consume_axis();
            let (dst_el, _dst_el_meta) =
                if data.keepdims { peel_dst_kept(dst_tp, dst_meta)? } else { (dst_tp, dst_meta) };
            build_leaf(ckb, dst_el, element, op, data, KernelRequest::Single)?;
            let init_offset = data.init_offset - root;
            unsafe { (*ckb.get_at::<VarReduceInner>(root)).init_offset = init_offset };
            Ok(())
        }
        DType::Builtin(_) => {
            InvalidAxesSnafu { reason: "source type has fewer dimensions than the reduction rank" }.fail()
        }
    }
}

/// Peel one broadcast axis from the destination, checking its size against
/// the source.
fn peel_dst_broadcast<'a>(
    dst_tp: &'a DType,
    dst_meta: ArrayMeta<'a>,
    src_size: usize,
) -> Result<(&'a DType, ArrayMeta<'a>)> {
    let DType::FixedDim { size, element } = dst_tp else {
        return InvalidAxesSnafu { reason: "broadcast destination axis must be a fixed dimension" }.fail();
    };
    if *size != src_size {
        return DimSizeMismatchSnafu { dst: *size, src: src_size }.fail();
    }
    Ok((element, &dst_meta[1..]))
}

/// Append the two leaf children of an inner frame: the accumulation kernel
/// (always strided), then the destination-initialization kernel (identity
/// fill, or a POD copy of the first element), recording where the init
/// kernel landed.
fn build_leaf(
    ckb: &mut KernelBuilder,
    dst_tp: &DType,
    src_tp: &DType,
    op: ReduceOp,
    data: &mut ReductionData,
    init_request: KernelRequest,
) -> Result<()> {
    debug_assert_eq!(data.ndim, 0, "inner frame must consume the last dimension");
    let (Some(dst), Some(src)) = (dst_tp.scalar(), src_tp.scalar()) else {
        return TypeMismatchSnafu { dst: dst_tp.clone(), src: src_tp.clone() }.fail();
    };
    if dst != src {
        // The accumulator works in the destination type; converting
        // sources belongs to a separate assignment pass.
        return TypeMismatchSnafu { dst: dst_tp.clone(), src: src_tp.clone() }.fail();
    }

    build_accumulation_kernel(ckb, KernelRequest::Strided, op, dst)?;
    data.init_offset = match &data.identity {
        Some(identity) => build_constant_fill(ckb, init_request, dst, identity)?,
        None => build_pod_assignment_kernel(ckb, init_request, dst.bytes(), dst.alignment())?,
    };
    Ok(())
}
