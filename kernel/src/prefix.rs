//! Frame prefixes and calling conventions.
//!
//! Every kernel frame in a buffer starts with a [`KernelPrefix`]: one
//! generic function-pointer slot and a nullable destructor slot. Reduction
//! frames start with the wider [`ReductionKernelPrefix`], which adds the
//! followup-call slot. Frames must be bitwise-relocatable: the buffer moves
//! them with a plain memcpy when it grows, so a frame may never store a
//! pointer into itself; children are always reached by offset from the
//! frame's current address.

use crate::error::CallError;

pub type CallResult = Result<(), CallError>;

/// Calling convention a frame is instantiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelRequest {
    /// `(dst, src[])`: process one element.
    Single,
    /// `(dst, dst_stride, src[], src_stride[], count)`: process `count`
    /// elements under the given strides.
    Strided,
}

pub type SingleFn = unsafe fn(*mut KernelPrefix, *mut u8, *const *const u8) -> CallResult;
pub type StridedFn =
    unsafe fn(*mut KernelPrefix, *mut u8, isize, *const *const u8, *const isize, usize) -> CallResult;
pub type DestructorFn = unsafe fn(*mut KernelPrefix);

/// The generic function slot: one pointer, reinterpreted according to the
/// request the frame was instantiated for (the `RawWakerVTable` pattern).
///
/// Reading the wrong variant is undefined behaviour; the builder guarantees
/// the slot matches the [`KernelRequest`] passed at emplacement, and
/// callers must invoke the same convention.
#[derive(Clone, Copy)]
pub union KernelFn {
    pub single: SingleFn,
    pub strided: StridedFn,
}

unsafe fn uninstantiated(_: *mut KernelPrefix, _: *mut u8, _: *const *const u8) -> CallResult {
    unreachable!("kernel frame invoked before the builder initialized its prefix")
}

/// Fixed header of every frame.
///
/// An all-zero byte pattern is a valid, inert prefix (`destructor` is a
/// null-niche `Option`); the zero-filled tail the buffer maintains past its
/// length therefore terminates destructor walks of aborted builds.
#[repr(C)]
pub struct KernelPrefix {
    function: KernelFn,
    destructor: Option<DestructorFn>,
}

impl KernelPrefix {
    /// Placeholder written by frame constructors; `emplace_back` overwrites
    /// both slots before the frame can be reached.
    pub(crate) fn placeholder() -> Self {
        Self { function: KernelFn { single: uninstantiated }, destructor: None }
    }

    pub(crate) fn new_leaf(function: KernelFn) -> Self {
        Self { function, destructor: None }
    }

    pub(crate) fn set_function(&mut self, function: KernelFn) {
        self.function = function;
    }

    pub(crate) fn set_destructor(&mut self, destructor: DestructorFn) {
        self.destructor = Some(destructor);
    }

    /// Invoke the frame under the `single` convention.
    ///
    /// # Safety
    /// The frame must have been instantiated for [`KernelRequest::Single`],
    /// and `dst`/`src` must point at data valid for the frame's types.
    #[inline]
    pub unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        unsafe { (self.function.single)(self, dst, src) }
    }

    /// Invoke the frame under the `strided` convention.
    ///
    /// # Safety
    /// The frame must have been instantiated for [`KernelRequest::Strided`],
    /// and all pointers must be valid for `count` strided elements.
    #[inline]
    pub unsafe fn strided(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        unsafe { (self.function.strided)(self, dst, dst_stride, src, src_stride, count) }
    }

    /// Run the frame's destructor, if it has one.
    ///
    /// # Safety
    /// `this` must point at a live frame (or an all-zero prefix); the frame
    /// must not be used afterwards.
    pub unsafe fn destroy(this: *mut Self) {
        if let Some(destructor) = unsafe { (*this).destructor } {
            unsafe { destructor(this) };
        }
    }
}

/// Header of reduction frames: the base `function` slot is the first_call
/// entry (seeding one output cell), `followup_call` accumulates further
/// input into an already-seeded cell and is always `strided`.
#[repr(C)]
pub struct ReductionKernelPrefix {
    pub(crate) base: KernelPrefix,
    pub(crate) followup_call: StridedFn,
}

impl ReductionKernelPrefix {
    pub(crate) fn placeholder() -> Self {
        unsafe fn uninstantiated_followup(
            _: *mut KernelPrefix,
            _: *mut u8,
            _: isize,
            _: *const *const u8,
            _: *const isize,
            _: usize,
        ) -> CallResult {
            unreachable!("reduction frame invoked before the builder initialized its prefix")
        }
        Self { base: KernelPrefix::placeholder(), followup_call: uninstantiated_followup }
    }

    /// First call, `single` convention: seed one output cell.
    ///
    /// # Safety
    /// As [`KernelPrefix::single`]; the frame must be a reduction frame
    /// instantiated for [`KernelRequest::Single`].
    #[inline]
    pub unsafe fn single_first(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        unsafe { self.base.single(dst, src) }
    }

    /// First call, `strided` convention: seed `count` output cells.
    ///
    /// # Safety
    /// As [`KernelPrefix::strided`]; the frame must be a reduction frame
    /// instantiated for [`KernelRequest::Strided`].
    #[inline]
    pub unsafe fn strided_first(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        unsafe { self.base.strided(dst, dst_stride, src, src_stride, count) }
    }

    /// Followup call: accumulate into already-seeded output cells.
    ///
    /// # Safety
    /// As [`KernelPrefix::strided`].
    #[inline]
    pub unsafe fn strided_followup(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult {
        unsafe { (self.followup_call)(&mut self.base, dst, dst_stride, src, src_stride, count) }
    }
}

/// Round `size` up to the machine word size, the granularity frames are
/// laid out at.
pub const fn aligned_size(size: usize) -> usize {
    const WORD: usize = std::mem::size_of::<usize>();
    (size + WORD - 1) & !(WORD - 1)
}

/// The child frame laid out `offset` bytes after `this`.
///
/// # Safety
/// `this` must point into a kernel buffer that extends at least
/// `aligned_size(offset) + size_of::<KernelPrefix>()` bytes past it.
pub(crate) unsafe fn child_at<K>(this: *mut K, offset: usize) -> *mut KernelPrefix {
    unsafe { (this as *mut u8).add(aligned_size(offset)) as *mut KernelPrefix }
}

/// An ordinary (non-reduction) kernel frame.
///
/// # Safety
/// Implementors must be `#[repr(C)]` with a [`KernelPrefix`] as their first
/// field, must be bitwise-relocatable, and must reach any children only via
/// offsets from `self`.
pub unsafe trait SingleKernel: Sized {
    /// Process one element.
    ///
    /// # Safety
    /// `dst` and the pointers in `src` must be valid for this kernel's
    /// types.
    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult;

    /// Process `count` strided elements; defaults to a per-element loop.
    ///
    /// # Safety
    /// All pointers must be valid for `count` strided elements.
    unsafe fn strided(
        &mut self,
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
            unsafe { self.single(dst, &src0)? };
            dst = dst.wrapping_offset(dst_stride);
            src0 = src0.wrapping_offset(src0_stride);
        }
        Ok(())
    }

    /// Destroy child frames reached by offset from `self`.
    ///
    /// Invoked by the destructor wrapper on *emplaced* frames only, before
    /// the frame value itself is dropped; a frame value that was never
    /// emplaced has no children, so its plain `Drop` must not walk them.
    ///
    /// # Safety
    /// `self` must be an emplaced frame inside a kernel buffer whose
    /// children (if any) are live or zeroed prefixes.
    unsafe fn destroy_children(&mut self) {}
}

/// A reduction kernel frame (first/followup protocol).
///
/// # Safety
/// As [`SingleKernel`], with a [`ReductionKernelPrefix`] as the first
/// field.
pub unsafe trait ReductionKernel: Sized {
    /// Seed one output cell from one source element.
    ///
    /// # Safety
    /// `dst` and the pointers in `src` must be valid for this kernel's
    /// types.
    unsafe fn single_first(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult;

    /// Seed `count` strided output cells.
    ///
    /// # Safety
    /// All pointers must be valid for `count` strided elements.
    unsafe fn strided_first(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult;

    /// Accumulate `count` strided source elements into seeded cells.
    ///
    /// # Safety
    /// All pointers must be valid for `count` strided elements.
    unsafe fn strided_followup(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_stride: *const isize,
        count: usize,
    ) -> CallResult;

    /// Destroy child frames reached by offset from `self`; see
    /// [`SingleKernel::destroy_children`].
    ///
    /// # Safety
    /// `self` must be an emplaced frame inside a kernel buffer whose
    /// children (if any) are live or zeroed prefixes.
    unsafe fn destroy_children(&mut self) {}
}

pub(crate) unsafe fn single_wrapper<K: SingleKernel>(
    this: *mut KernelPrefix,
    dst: *mut u8,
    src: *const *const u8,
) -> CallResult {
    unsafe { (*(this as *mut K)).single(dst, src) }
}

pub(crate) unsafe fn strided_wrapper<K: SingleKernel>(
    this: *mut KernelPrefix,
    dst: *mut u8,
    dst_stride: isize,
    src: *const *const u8,
    src_stride: *const isize,
    count: usize,
) -> CallResult {
    unsafe { (*(this as *mut K)).strided(dst, dst_stride, src, src_stride, count) }
}

pub(crate) unsafe fn single_first_wrapper<K: ReductionKernel>(
    this: *mut KernelPrefix,
    dst: *mut u8,
    src: *const *const u8,
) -> CallResult {
    unsafe { (*(this as *mut K)).single_first(dst, src) }
}

pub(crate) unsafe fn strided_first_wrapper<K: ReductionKernel>(
    this: *mut KernelPrefix,
    dst: *mut u8,
    dst_stride: isize,
    src: *const *const u8,
    src_stride: *const isize,
    count: usize,
) -> CallResult {
    unsafe { (*(this as *mut K)).strided_first(dst, dst_stride, src, src_stride, count) }
}

pub(crate) unsafe fn strided_followup_wrapper<K: ReductionKernel>(
    this: *mut KernelPrefix,
    dst: *mut u8,
    dst_stride: isize,
    src: *const *const u8,
    src_stride: *const isize,
    count: usize,
) -> CallResult {
    unsafe { (*(this as *mut K)).strided_followup(dst, dst_stride, src, src_stride, count) }
}

pub(crate) unsafe fn destructor_wrapper<K: SingleKernel>(this: *mut KernelPrefix) {
    unsafe {
        (*(this as *mut K)).destroy_children();
        std::ptr::drop_in_place(this as *mut K);
    }
}

pub(crate) unsafe fn reduction_destructor_wrapper<K: ReductionKernel>(this: *mut KernelPrefix) {
    unsafe {
        (*(this as *mut K)).destroy_children();
        std::ptr::drop_in_place(this as *mut K);
    }
}
