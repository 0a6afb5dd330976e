use super::*;

impl ScalarType {
    /// Check if assigning a `src` value to a `dst` slot preserves every
    /// representable value exactly.
    ///
    /// The assignment factory uses this to drop range/precision checks and
    /// select the unchecked conversion path.
    pub fn is_lossless_assignment(dst: Self, src: Self) -> bool {
        // Same type, or from Bool (0/1 fits everywhere)
        if dst == src || src.is_bool() {
            return true;
        }
        // Nothing but Bool converts to Bool without a range check
        if dst.is_bool() {
            return false;
        }

        let from_bytes = src.bytes();
        let to_bytes = dst.bytes();
        match (src.is_unsigned(), src.is_signed(), src.is_float(), dst.is_unsigned(), dst.is_signed(), dst.is_float()) {
            // Unsigned -> Unsigned: only if target is larger
            (true, _, _, true, _, _) => from_bytes < to_bytes,
            // Unsigned -> Signed: only if target is strictly larger
            (true, _, _, _, true, _) => from_bytes < to_bytes,
            // Signed -> Signed: only if target is larger
            (_, true, _, _, true, _) => from_bytes < to_bytes,
            // Signed -> Unsigned: negative values never fit
            (_, true, _, true, _, _) => false,
            // Integer -> Float: the mantissa must cover the full int range
            // (f32 holds 24 bits, f64 holds 53)
            (_, _, false, _, _, true) => match dst {
                Self::Float32 => from_bytes <= 2,
                _ => from_bytes <= 4,
            },
            // Float -> Float: only widening
            (_, _, true, _, _, true) => from_bytes < to_bytes,
            // Float -> Integer: always lossy
            _ => false,
        }
    }
}

impl DType {
    /// Lossless-assignment check lifted to type descriptors; dimension
    /// wrappers are never lossless (they go through per-axis kernels).
    pub fn is_lossless_assignment(dst: &Self, src: &Self) -> bool {
        match (dst.scalar(), src.scalar()) {
            (Some(d), Some(s)) => ScalarType::is_lossless_assignment(d, s),
            _ => false,
        }
    }
}
