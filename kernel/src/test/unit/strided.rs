use ndkern_dtype::meta::contiguous_meta;
use ndkern_dtype::{DType, DimMeta, ScalarType, SizeStride};

use crate::assignment::{build_assignment_kernel, ErrorMode};
use crate::builder::KernelBuilder;
use crate::error::Error;
use crate::prefix::KernelRequest;

fn i32_vector(len: usize) -> DType {
    DType::fixed_dim(len, DType::Builtin(ScalarType::Int32))
}

#[test]
fn gathers_with_a_wider_source_stride() {
    let dst_tp = i32_vector(3);
    let src_tp = i32_vector(3);
    let dst_meta = contiguous_meta(&dst_tp);
    // read every other element of the source
    let src_meta = [DimMeta::Fixed(SizeStride { size: 3, stride: 8 })];

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

    let src = [1i32, 0, 2, 0, 3, 0];
    let mut dst = [0i32; 3];
    unsafe {
        ckb.run_single(dst.as_mut_ptr() as *mut u8, &[src.as_ptr() as *const u8]).unwrap();
    }
    assert_eq!(dst, [1, 2, 3]);
}

#[test]
fn two_dimensional_transpose_via_strides() {
    // dst is a contiguous (2, 3), src metadata walks a (3, 2) buffer
    // column-first, so the kernel transposes
    let dst_tp = DType::fixed_dim(2, i32_vector(3));
    let src_tp = DType::fixed_dim(2, i32_vector(3));
    let dst_meta = contiguous_meta(&dst_tp);
    let src_meta = [
        DimMeta::Fixed(SizeStride { size: 2, stride: 4 }),
        DimMeta::Fixed(SizeStride { size: 3, stride: 8 }),
    ];

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

    // row-major (3, 2): [[1, 2], [3, 4], [5, 6]]
    let src = [1i32, 2, 3, 4, 5, 6];
    let mut dst = [0i32; 6];
    unsafe {
        ckb.run_single(dst.as_mut_ptr() as *mut u8, &[src.as_ptr() as *const u8]).unwrap();
    }
    assert_eq!(dst, [1, 3, 5, 2, 4, 6]);
}

#[test]
fn strided_request_lifts_the_wrapper_once_more() {
    let dst_tp = i32_vector(2);
    let src_tp = i32_vector(2);
    let dst_meta = contiguous_meta(&dst_tp);
    let src_meta = contiguous_meta(&src_tp);

    let mut ckb = KernelBuilder::new();
    build_assignment_kernel(
        &mut ckb,
        KernelRequest::Strided,
        &dst_tp,
        &dst_meta,
        &src_tp,
        &src_meta,
        ErrorMode::None,
    )
    .unwrap();

    // two rows of two elements, both copied in one strided call
    let src = [1i32, 2, 3, 4];
    let mut dst = [0i32; 4];
    unsafe {
        ckb.run_strided(dst.as_mut_ptr() as *mut u8, 8, &[src.as_ptr() as *const u8], &[8], 2).unwrap();
    }
    assert_eq!(dst, [1, 2, 3, 4]);
}

#[test]
fn element_conversion_under_a_dimension() {
    let dst_tp = DType::fixed_dim(3, DType::Builtin(ScalarType::Float64));
    let src_tp = i32_vector(3);
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
        ErrorMode::Overflow,
    )
    .unwrap();

    let src = [1i32, -2, 3];
    let mut dst = [0f64; 3];
    unsafe {
        ckb.run_single(dst.as_mut_ptr() as *mut u8, &[src.as_ptr() as *const u8]).unwrap();
    }
    assert_eq!(dst, [1.0, -2.0, 3.0]);
}

#[test]
fn dimension_size_mismatch_fails_at_build() {
    let dst_tp = i32_vector(2);
    let src_tp = i32_vector(3);
    let dst_meta = contiguous_meta(&dst_tp);
    let src_meta = contiguous_meta(&src_tp);

    let mut ckb = KernelBuilder::new();
    let result = build_assignment_kernel(
        &mut ckb,
        KernelRequest::Single,
        &dst_tp,
        &dst_meta,
        &src_tp,
        &src_meta,
        ErrorMode::None,
    );
    assert!(matches!(result, Err(Error::DimSizeMismatch { dst: 2, src: 3 })));
}

#[test]
fn missing_metadata_fails_at_build() {
    let tp = i32_vector(3);
    let mut ckb = KernelBuilder::new();
    let result = build_assignment_kernel(&mut ckb, KernelRequest::Single, &tp, &[], &tp, &[], ErrorMode::None);
    assert!(matches!(result, Err(Error::MetaMismatch { .. })));
}
