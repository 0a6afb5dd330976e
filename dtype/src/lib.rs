//! Dynamic type descriptors for the ndkern kernel engine.
//!
//! This crate is the data vocabulary shared by kernel builders:
//! - [`ScalarType`]: the builtin scalar ids, in fixed table order
//! - [`DType`]: a scalar or an arbitrarily nested dimension wrapper
//! - [`meta`]: per-axis side-band metadata walked in lockstep with a type
//! - [`value::ScalarValue`]: dynamically typed constants (reduction
//!   identities)
//!
//! It deliberately knows nothing about kernels or buffers; the kernel crate
//! consumes this surface when instantiating assignment and reduction
//! kernels.

use std::sync::Arc;

pub mod cast;
pub mod ext;
pub mod meta;
pub mod value;

#[cfg(feature = "proptest")]
pub mod proptest_gen;

#[cfg(test)]
mod test;

pub use ext::HasScalarType;
pub use meta::{ArrayMeta, DimMeta, SizeStride, VarDimData, VarStride};
pub use value::ScalarValue;

/// Builtin scalar type ids.
///
/// The discriminants are the row/column indices of the builtin assignment
/// dispatch tables, so the declaration order here is load-bearing.
#[derive(Debug, Hash, PartialOrd, Ord, PartialEq, Eq, Clone, Copy)]
#[derive(strum::EnumCount, strum::VariantArray, strum::FromRepr)]
pub enum ScalarType {
    Bool = 0,

    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,

    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,

    Float32 = 9,
    Float64 = 10,
}

impl ScalarType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 4,
            Self::Int64 => 8,
            Self::UInt8 => 1,
            Self::UInt16 => 2,
            Self::UInt32 => 4,
            Self::UInt64 => 8,
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Required alignment; every builtin is naturally aligned.
    pub const fn alignment(&self) -> usize {
        self.bytes()
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Table index of this scalar (equal to the discriminant).
    pub const fn index(&self) -> usize {
        *self as usize
    }
}

/// Identifies the outermost constructor of a [`DType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeId {
    Scalar(ScalarType),
    FixedDim,
    VarDim,
}

/// A dynamic type descriptor: a builtin scalar, or a dimension wrapper
/// around an element type.
///
/// `FixedDim` carries its length in the type; per-axis strides always live
/// in the side-band [`meta::DimMeta`] records. `VarDim` rows store their
/// length per element in a [`meta::VarDimData`] record inside the data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    Builtin(ScalarType),
    FixedDim { size: usize, element: Arc<DType> },
    VarDim { element: Arc<DType> },
}

impl DType {
    pub fn fixed_dim(size: usize, element: DType) -> Self {
        Self::FixedDim { size, element: Arc::new(element) }
    }

    pub fn var_dim(element: DType) -> Self {
        Self::VarDim { element: Arc::new(element) }
    }

    pub const fn id(&self) -> TypeId {
        match self {
            Self::Builtin(s) => TypeId::Scalar(*s),
            Self::FixedDim { .. } => TypeId::FixedDim,
            Self::VarDim { .. } => TypeId::VarDim,
        }
    }

    pub const fn is_builtin(&self) -> bool {
        matches!(self, Self::Builtin(_))
    }

    /// The scalar id, if this is a builtin.
    pub const fn scalar(&self) -> Option<ScalarType> {
        match self {
            Self::Builtin(s) => Some(*s),
            _ => None,
        }
    }

    /// The element type, if this is a dimension wrapper.
    pub fn get_element_type(&self) -> Option<&DType> {
        match self {
            Self::Builtin(_) => None,
            Self::FixedDim { element, .. } | Self::VarDim { element } => Some(element),
        }
    }

    /// Number of dimension wrappers around the scalar.
    pub fn ndim(&self) -> usize {
        match self {
            Self::Builtin(_) => 0,
            Self::FixedDim { element, .. } | Self::VarDim { element } => 1 + element.ndim(),
        }
    }

    /// Byte size of one value of this type in a data buffer.
    ///
    /// A `var_dim` value is its `{begin, size}` record; the row storage it
    /// points at is owned elsewhere.
    pub fn element_size(&self) -> usize {
        match self {
            Self::Builtin(s) => s.bytes(),
            Self::FixedDim { size, element } => size * element.element_size(),
            Self::VarDim { .. } => std::mem::size_of::<VarDimData>(),
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            Self::Builtin(s) => s.alignment(),
            Self::FixedDim { element, .. } => element.alignment(),
            Self::VarDim { .. } => std::mem::align_of::<VarDimData>(),
        }
    }

    /// The scalar at the bottom of the dimension stack.
    pub fn leaf_scalar(&self) -> ScalarType {
        match self {
            Self::Builtin(s) => *s,
            Self::FixedDim { element, .. } | Self::VarDim { element } => element.leaf_scalar(),
        }
    }
}

impl From<ScalarType> for DType {
    fn from(scalar: ScalarType) -> Self {
        Self::Builtin(scalar)
    }
}
