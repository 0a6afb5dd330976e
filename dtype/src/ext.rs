use super::*;

pub trait HasScalarType {
    const SCALAR: ScalarType;
}

macro_rules! impl_scalar_ext {
    ($($ty:ty => $scalar:expr),* $(,)?) => {
        $(impl HasScalarType for $ty { const SCALAR: ScalarType = $scalar; })*
    };
}

impl_scalar_ext! {
    bool => ScalarType::Bool,
    i8 => ScalarType::Int8, i16 => ScalarType::Int16, i32 => ScalarType::Int32, i64 => ScalarType::Int64,
    u8 => ScalarType::UInt8, u16 => ScalarType::UInt16, u32 => ScalarType::UInt32, u64 => ScalarType::UInt64,
    f32 => ScalarType::Float32, f64 => ScalarType::Float64,
}
