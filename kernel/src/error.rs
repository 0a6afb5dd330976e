use ndkern_dtype::{DType, ScalarType, ScalarValue};
use snafu::Snafu;

use crate::reduction::ReduceOp;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Build-time errors raised while instantiating kernels into a buffer.
///
/// Any of these leaves the kernel buffer in a destructible state; after an
/// [`Error::AllocationFailure`] the buffer has already been reset to its
/// empty inline storage.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Growing the kernel buffer failed.
    #[snafu(display("kernel buffer allocation failed ({requested} bytes requested)"))]
    AllocationFailure { requested: usize },

    /// No kernel exists for this destination/source type pair.
    #[snafu(display("cannot build a kernel from {src:?} to {dst:?}"))]
    TypeMismatch { dst: DType, src: DType },

    #[snafu(display("fixed dimension size mismatch: dst {dst}, src {src}"))]
    DimSizeMismatch { dst: usize, src: usize },

    /// A metadata record of the wrong kind for the dimension being peeled.
    #[snafu(display("array metadata does not match type {tp:?}"))]
    MetaMismatch { tp: DType },

    #[snafu(display("accumulation op {op:?} is not defined for {tp:?}"))]
    UnsupportedAccumulation { op: ReduceOp, tp: ScalarType },

    /// Multi-axis reduction over an op that is not both left-associative
    /// and commutative, or any right-associative reduction.
    #[snafu(display("unsupported reduction with op {op:?}: {reason}"))]
    UnsupportedReduction { op: ReduceOp, reason: &'static str },

    #[snafu(display("invalid reduction axes: {reason}"))]
    InvalidAxes { reason: &'static str },

    /// Reducing a statically empty axis is only defined with an identity.
    #[snafu(display("reduction along an empty axis requires an identity"))]
    EmptyReductionAxis,

    #[snafu(display("identity {identity:?} is not exactly representable as {tp:?}"))]
    IdentityMismatch { identity: ScalarValue, tp: ScalarType },
}

/// Call-time errors signalled by scalar kernels and propagated out of the
/// kernel entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum CallError {
    #[snafu(display("value out of range assigning to {dst:?}"))]
    Overflow { dst: ScalarType },

    #[snafu(display("fractional part lost assigning to {dst:?}"))]
    Fractional { dst: ScalarType },

    #[snafu(display("inexact value narrowing to {dst:?}"))]
    Inexact { dst: ScalarType },

    /// A variable-sized row of length zero was reduced without an identity.
    #[snafu(display("reduction of an empty sequence with no identity"))]
    EmptyReduction,
}
