use crate::*;
use proptest::prelude::*;
use strum::VariantArray;

#[rustfmt::skip]
impl ScalarType {
    pub fn int_generator() -> impl Strategy<Value = Self> {
        prop_oneof![
            Just(ScalarType::Int8), Just(ScalarType::Int16), Just(ScalarType::Int32), Just(ScalarType::Int64),
            Just(ScalarType::UInt8), Just(ScalarType::UInt16), Just(ScalarType::UInt32), Just(ScalarType::UInt64),
        ]
    }

    pub fn float_generator() -> impl Strategy<Value = Self> {
        prop_oneof![Just(ScalarType::Float32), Just(ScalarType::Float64)]
    }

    pub fn scalar_generator() -> impl Strategy<Value = Self> {
        proptest::sample::select(ScalarType::VARIANTS.to_vec())
    }
}
