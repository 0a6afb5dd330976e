//! Per-axis array metadata, walked in lockstep with a [`DType`].
//!
//! Metadata records sit outside the data buffer: one record per dimension
//! wrapper, outermost first. Kernel builders peel one record per axis as
//! they peel the matching dimension wrapper from the type.

use crate::DType;

/// Size and stride of one `fixed_dim` axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeStride {
    pub size: usize,
    /// Byte stride between consecutive elements along this axis.
    pub stride: isize,
}

/// Stride of one `var_dim` axis: the byte distance between consecutive
/// elements within a row (the row base comes from the per-element
/// [`VarDimData`] record).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarStride {
    pub stride: isize,
}

/// One axis worth of side-band metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimMeta {
    Fixed(SizeStride),
    Var(VarStride),
}

impl DimMeta {
    pub const fn as_fixed(&self) -> Option<SizeStride> {
        match self {
            Self::Fixed(ss) => Some(*ss),
            Self::Var(_) => None,
        }
    }

    pub const fn as_var(&self) -> Option<VarStride> {
        match self {
            Self::Var(vs) => Some(*vs),
            Self::Fixed(_) => None,
        }
    }
}

/// Metadata for the remaining axes of a type, outermost first.
pub type ArrayMeta<'a> = &'a [DimMeta];

/// The in-data record of one `var_dim` element.
///
/// Kernels read this record from the source data at call time; `begin`
/// points at the first row element, `size` is the row length in elements.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VarDimData {
    pub begin: *mut u8,
    pub size: usize,
}

/// Build contiguous (C-order) metadata records for `tp`.
///
/// `var_dim` axes get the contiguous stride of their element type; row
/// base pointers are per-element data, not metadata.
pub fn contiguous_meta(tp: &DType) -> Vec<DimMeta> {
    let mut meta = Vec::with_capacity(tp.ndim());
    let mut tp = tp;
    loop {
        match tp {
            DType::Builtin(_) => break,
            DType::FixedDim { size, element } => {
                meta.push(DimMeta::Fixed(SizeStride { size: *size, stride: element.element_size() as isize }));
                tp = element;
            }
            DType::VarDim { element } => {
                meta.push(DimMeta::Var(VarStride { stride: element.element_size() as isize }));
                tp = element;
            }
        }
    }
    meta
}
