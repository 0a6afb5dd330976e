use ndkern_dtype::meta::contiguous_meta;
use ndkern_dtype::{DType, ScalarType};
use strum::VariantArray;
use test_case::test_case;

use crate::assignment::{build_assignment_kernel, build_pod_assignment_kernel, ErrorMode};
use crate::builder::KernelBuilder;
use crate::error::CallError;
use crate::prefix::KernelRequest;

/// Build a scalar assignment kernel and run it once.
fn assign_once<D: Copy + Default, S: Copy>(
    dst_tp: ScalarType,
    src_tp: ScalarType,
    mode: ErrorMode,
    src: S,
) -> Result<D, CallError> {
    let mut ckb = KernelBuilder::new();
    build_assignment_kernel(
        &mut ckb,
        KernelRequest::Single,
        &DType::Builtin(dst_tp),
        &[],
        &DType::Builtin(src_tp),
        &[],
        mode,
    )
    .unwrap();

    let mut dst = D::default();
    let src_ptr = &src as *const S as *const u8;
    unsafe { ckb.run_single(&mut dst as *mut D as *mut u8, &[src_ptr])? };
    Ok(dst)
}

#[test]
fn pod_copy_i32_strided() {
    let mut ckb = KernelBuilder::new();
    build_pod_assignment_kernel(&mut ckb, KernelRequest::Strided, 4, 4).unwrap();

    let src = [1i32, 2, 3];
    let mut dst = [0i32; 3];
    unsafe {
        ckb.run_strided(dst.as_mut_ptr() as *mut u8, 4, &[src.as_ptr() as *const u8], &[4], 3).unwrap();
    }
    assert_eq!(dst, [1, 2, 3]);
}

#[test]
fn pod_copy_unaligned_matches_aligned() {
    let mut ckb = KernelBuilder::new();
    // alignment 1 selects the unaligned 4-byte specialization
    build_pod_assignment_kernel(&mut ckb, KernelRequest::Single, 4, 1).unwrap();

    let mut src_bytes = [0u8; 8];
    let mut dst_bytes = [0u8; 8];
    src_bytes[1..5].copy_from_slice(&0x1234_5678i32.to_ne_bytes());

    unsafe {
        let src_ptr = src_bytes.as_ptr().add(1);
        ckb.run_single(dst_bytes.as_mut_ptr().add(1), &[src_ptr]).unwrap();
    }
    assert_eq!(dst_bytes[1..5], src_bytes[1..5]);
}

#[test]
fn pod_copy_odd_size_uses_memcpy_frame() {
    let mut ckb = KernelBuilder::new();
    build_pod_assignment_kernel(&mut ckb, KernelRequest::Single, 24, 8).unwrap();

    let src = [1u64, 2, 3];
    let mut dst = [0u64; 3];
    unsafe {
        ckb.run_single(dst.as_mut_ptr() as *mut u8, &[src.as_ptr() as *const u8]).unwrap();
    }
    assert_eq!(dst, src);
}

#[test]
fn fixed_dim_assignment_copies_an_array() {
    let dst_tp = DType::fixed_dim(3, DType::Builtin(ScalarType::Int32));
    let src_tp = dst_tp.clone();
    let dst_meta = contiguous_meta(&dst_tp);
    let src_meta = contiguous_meta(&src_tp);

    let mut ckb = KernelBuilder::new();
    build_assignment_kernel(
        &mut ckb,
        KernelRequest::Single,
        &dst_tp,
        &dst_meta,
        &src_tp,
        &src_meta,
        ErrorMode::None,
    )
    .unwrap();

    let src = [1i32, 2, 3];
    let mut dst = [0i32; 3];
    unsafe {
        ckb.run_single(dst.as_mut_ptr() as *mut u8, &[src.as_ptr() as *const u8]).unwrap();
    }
    assert_eq!(dst, [1, 2, 3]);
}

#[test]
fn fractional_float_to_int() {
    // error_mode=fractional flags a fractional part
    let result = assign_once::<i32, f64>(ScalarType::Int32, ScalarType::Float64, ErrorMode::Fractional, 3.5);
    assert_eq!(result, Err(CallError::Fractional { dst: ScalarType::Int32 }));

    // error_mode=none truncates instead
    let result = assign_once::<i32, f64>(ScalarType::Int32, ScalarType::Float64, ErrorMode::None, 3.5);
    assert_eq!(result, Ok(3));

    // overflow mode ignores the fractional part but keeps range checks
    let result = assign_once::<i32, f64>(ScalarType::Int32, ScalarType::Float64, ErrorMode::Overflow, 3.5);
    assert_eq!(result, Ok(3));
    let result = assign_once::<i32, f64>(ScalarType::Int32, ScalarType::Float64, ErrorMode::Overflow, 1e12);
    assert_eq!(result, Err(CallError::Overflow { dst: ScalarType::Int32 }));
}

#[test]
fn integer_overflow_checked_and_unchecked() {
    let result = assign_once::<i8, i64>(ScalarType::Int8, ScalarType::Int64, ErrorMode::Overflow, 300);
    assert_eq!(result, Err(CallError::Overflow { dst: ScalarType::Int8 }));

    let result = assign_once::<i8, i64>(ScalarType::Int8, ScalarType::Int64, ErrorMode::None, 300);
    assert_eq!(result, Ok(300i64 as i8));

    let result = assign_once::<u8, i8>(ScalarType::UInt8, ScalarType::Int8, ErrorMode::Overflow, -1);
    assert_eq!(result, Err(CallError::Overflow { dst: ScalarType::UInt8 }));

    let result = assign_once::<u8, i8>(ScalarType::UInt8, ScalarType::Int8, ErrorMode::None, -1);
    assert_eq!(result, Ok(255));
}

#[test]
fn lossless_pairs_skip_checks() {
    // i32 -> f64 is lossless, so even inexact mode never signals
    let result = assign_once::<f64, i32>(ScalarType::Float64, ScalarType::Int32, ErrorMode::Inexact, i32::MAX);
    assert_eq!(result, Ok(i32::MAX as f64));

    // i64 -> f64 is not: 2^53 + 1 rounds
    let value = (1i64 << 53) + 1;
    let result = assign_once::<f64, i64>(ScalarType::Float64, ScalarType::Int64, ErrorMode::Inexact, value);
    assert_eq!(result, Err(CallError::Inexact { dst: ScalarType::Float64 }));
}

#[test]
fn float_narrowing() {
    let result = assign_once::<f32, f64>(ScalarType::Float32, ScalarType::Float64, ErrorMode::Inexact, 0.1);
    assert_eq!(result, Err(CallError::Inexact { dst: ScalarType::Float32 }));

    let result = assign_once::<f32, f64>(ScalarType::Float32, ScalarType::Float64, ErrorMode::Inexact, 0.5);
    assert_eq!(result, Ok(0.5));

    let result = assign_once::<f32, f64>(ScalarType::Float32, ScalarType::Float64, ErrorMode::Overflow, 1e300);
    assert_eq!(result, Err(CallError::Overflow { dst: ScalarType::Float32 }));

    let result = assign_once::<f32, f64>(ScalarType::Float32, ScalarType::Float64, ErrorMode::None, 1e300);
    assert_eq!(result, Ok(f32::INFINITY));
}

#[test_case(0i64, false ; "zero is false")]
#[test_case(1i64, true ; "one is true")]
fn bool_from_int_in_range(value: i64, expected: bool) {
    let result = assign_once::<bool, i64>(ScalarType::Bool, ScalarType::Int64, ErrorMode::Overflow, value);
    assert_eq!(result, Ok(expected));
}

#[test]
fn bool_from_int_out_of_range() {
    let result = assign_once::<bool, i64>(ScalarType::Bool, ScalarType::Int64, ErrorMode::Overflow, 2);
    assert_eq!(result, Err(CallError::Overflow { dst: ScalarType::Bool }));

    let result = assign_once::<bool, i64>(ScalarType::Bool, ScalarType::Int64, ErrorMode::None, 2);
    assert_eq!(result, Ok(true));
}

#[test]
fn var_dim_assignment_is_rejected() {
    let tp = DType::var_dim(DType::Builtin(ScalarType::Int32));
    let meta = contiguous_meta(&tp);
    let mut ckb = KernelBuilder::new();
    let result = build_assignment_kernel(&mut ckb, KernelRequest::Single, &tp, &meta, &tp, &meta, ErrorMode::None);
    assert!(matches!(result, Err(crate::error::Error::TypeMismatch { .. })));
}

/// Every (dst, src, mode) table entry must be callable; a zero source value
/// converts exactly for every pair, and the all-zero representation must
/// come back out.
#[test]
fn conversion_table_is_total_for_zero() {
    for &dst in ScalarType::VARIANTS {
        for &src in ScalarType::VARIANTS {
            for mode in [ErrorMode::None, ErrorMode::Overflow, ErrorMode::Fractional, ErrorMode::Inexact] {
                let mut ckb = KernelBuilder::new();
                build_assignment_kernel(
                    &mut ckb,
                    KernelRequest::Single,
                    &DType::Builtin(dst),
                    &[],
                    &DType::Builtin(src),
                    &[],
                    mode,
                )
                .unwrap();

                // word-aligned stores so the typed POD loads are valid
                let src_store = [0u64; 1];
                let mut dst_store = [u64::MAX; 1];
                unsafe {
                    ckb.run_single(dst_store.as_mut_ptr() as *mut u8, &[src_store.as_ptr() as *const u8])
                        .unwrap_or_else(|e| panic!("{dst:?} <- {src:?} under {mode:?}: {e}"));
                }
                let dst_bytes = dst_store[0].to_ne_bytes();
                assert!(
                    dst_bytes[..dst.bytes()].iter().all(|&b| b == 0),
                    "{dst:?} <- {src:?} under {mode:?} produced nonzero bytes"
                );
            }
        }
    }
}

#[test]
fn strided_conversion_kernel() {
    let mut ckb = KernelBuilder::new();
    build_assignment_kernel(
        &mut ckb,
        KernelRequest::Strided,
        &DType::Builtin(ScalarType::Float64),
        &[],
        &DType::Builtin(ScalarType::Int32),
        &[],
        ErrorMode::None,
    )
    .unwrap();

    let src = [1i32, -2, 3];
    let mut dst = [0f64; 3];
    unsafe {
        ckb.run_strided(dst.as_mut_ptr() as *mut u8, 8, &[src.as_ptr() as *const u8], &[4], 3).unwrap();
    }
    assert_eq!(dst, [1.0, -2.0, 3.0]);
}
