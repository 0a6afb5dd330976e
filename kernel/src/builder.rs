//! The packed kernel buffer.
//!
//! A [`KernelBuilder`] owns one contiguous byte region holding a root frame
//! and all of its descendants. Building appends frames top-down; each
//! append may reallocate, so builders hand out *offsets* and callers
//! re-derive frame pointers through [`KernelBuilder::get_at`] after any
//! append. Frames are destroyed bottom-up through the root frame's
//! destructor chain before the storage is released.
//!
//! Packing every frame into one buffer collapses the many small allocations
//! a deeply nested kernel would otherwise make and keeps the call-time
//! pointer chasing inside one cache-friendly region.

use std::alloc::{self, Layout};
use std::mem;
use std::ptr::{self, NonNull};

use crate::error::{AllocationFailureSnafu, Result};
use crate::prefix::{
    aligned_size, destructor_wrapper, reduction_destructor_wrapper, single_first_wrapper, single_wrapper,
    strided_first_wrapper, strided_followup_wrapper, strided_wrapper, CallResult, KernelFn, KernelPrefix,
    KernelRequest, ReductionKernel, ReductionKernelPrefix, SingleKernel,
};

/// Inline storage: 16 machine words, in use until the first growth.
const INLINE_WORDS: usize = 16;

const WORD: usize = mem::size_of::<usize>();

enum Storage {
    /// Zero-initialized inline words. Frames are relocatable, so moving the
    /// builder (and these bytes with it) is a plain memcpy.
    Inline([usize; INLINE_WORDS]),
    Heap { ptr: NonNull<u8>, capacity: usize },
}

/// An appendable packed buffer of kernel frames.
///
/// Invariants:
/// - `size() <= capacity()`, and bytes `[size(), capacity())` are zero, so
///   a parent whose child was never appended still reads an inert prefix;
/// - offsets returned by the `emplace_*` methods stay valid across growth;
/// - dropping (or resetting) the builder runs the root destructor chain
///   before the storage goes away.
pub struct KernelBuilder {
    storage: Storage,
    size: usize,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self { storage: Storage::Inline([0; INLINE_WORDS]), size: 0 }
    }

    /// Current length in bytes; also the offset of the next frame.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Inline(_) => INLINE_WORDS * WORD,
            Storage::Heap { capacity, .. } => *capacity,
        }
    }

    fn data(&mut self) -> *mut u8 {
        match &mut self.storage {
            Storage::Inline(words) => words.as_mut_ptr() as *mut u8,
            Storage::Heap { ptr, .. } => ptr.as_ptr(),
        }
    }

    /// Ensure room for `requested` bytes plus one trailing zeroed prefix,
    /// so that a build aborted after this reservation still leaves every
    /// parent's child slot readable during the destructor walk.
    pub fn ensure_capacity(&mut self, requested: usize) -> Result<()> {
        self.ensure_capacity_leaf(requested + mem::size_of::<KernelPrefix>())
    }

    /// Ensure room for exactly `requested` bytes (leaf frames only).
    ///
    /// Grows by at least 1.5x, relocating the packed frames with a memcpy
    /// and zero-filling the new tail. On allocation failure the builder
    /// destroys everything built so far, reverts to empty inline storage
    /// and reports [`crate::Error::AllocationFailure`].
    pub fn ensure_capacity_leaf(&mut self, requested: usize) -> Result<()> {
        let capacity = self.capacity();
        if requested <= capacity {
            return Ok(());
        }

        let grown = capacity + capacity / 2;
        let new_capacity = aligned_size(requested.max(grown));
        let new_ptr = Layout::from_size_align(new_capacity, WORD)
            .ok()
            .map(|layout| try_alloc(layout))
            .and_then(NonNull::new);

        let Some(new_ptr) = new_ptr else {
            // Self-heal to the empty state: run destructors on what was
            // built, release the old storage, and surface the failure.
            self.destroy_frames();
            self.release_storage();
            self.storage = Storage::Inline([0; INLINE_WORDS]);
            self.size = 0;
            return AllocationFailureSnafu { requested: new_capacity }.fail();
        };

        unsafe {
            ptr::copy_nonoverlapping(self.data(), new_ptr.as_ptr(), capacity);
            ptr::write_bytes(new_ptr.as_ptr().add(capacity), 0, new_capacity - capacity);
        }
        self.release_storage();
        self.storage = Storage::Heap { ptr: new_ptr, capacity: new_capacity };
        tracing::trace!(capacity = new_capacity, "kernel buffer grew");
        Ok(())
    }

    /// Append an ordinary frame, wiring its prefix for `kernreq`.
    ///
    /// Returns the frame's offset, which stays valid across later appends.
    pub fn emplace_back<K: SingleKernel>(&mut self, kernreq: KernelRequest, kernel: K) -> Result<usize> {
        let offset = self.size;
        let frame_size = aligned_size(mem::size_of::<K>());
        self.ensure_capacity(offset + frame_size)?;
        unsafe {
            let frame = self.data().add(offset) as *mut K;
            ptr::write(frame, kernel);
            let prefix = frame as *mut KernelPrefix;
            (*prefix).set_function(match kernreq {
                KernelRequest::Single => KernelFn { single: single_wrapper::<K> },
                KernelRequest::Strided => KernelFn { strided: strided_wrapper::<K> },
            });
            (*prefix).set_destructor(destructor_wrapper::<K>);
        }
        self.size = offset + frame_size;
        Ok(offset)
    }

    /// Append a reduction frame: `first_call` is wired for `kernreq`, the
    /// followup slot is always strided.
    pub fn emplace_back_reduction<K: ReductionKernel>(
        &mut self,
        kernreq: KernelRequest,
        kernel: K,
    ) -> Result<usize> {
        let offset = self.size;
        let frame_size = aligned_size(mem::size_of::<K>());
        self.ensure_capacity(offset + frame_size)?;
        unsafe {
            let frame = self.data().add(offset) as *mut K;
            ptr::write(frame, kernel);
            let prefix = frame as *mut ReductionKernelPrefix;
            (*prefix).base.set_function(match kernreq {
                KernelRequest::Single => KernelFn { single: single_first_wrapper::<K> },
                KernelRequest::Strided => KernelFn { strided: strided_first_wrapper::<K> },
            });
            (*prefix).base.set_destructor(reduction_destructor_wrapper::<K>);
            (*prefix).followup_call = strided_followup_wrapper::<K>;
        }
        self.size = offset + frame_size;
        Ok(offset)
    }

    /// Append a prefix-only leaf frame whose function comes from a dispatch
    /// table. Such frames own nothing and need no destructor.
    pub fn emplace_prefix(&mut self, function: KernelFn) -> Result<usize> {
        let offset = self.size;
        let frame_size = aligned_size(mem::size_of::<KernelPrefix>());
        self.ensure_capacity_leaf(offset + frame_size)?;
        unsafe {
            ptr::write(self.data().add(offset) as *mut KernelPrefix, KernelPrefix::new_leaf(function));
        }
        self.size = offset + frame_size;
        Ok(offset)
    }

    /// Reinterpret the frame at `offset`. The pointer is valid only until
    /// the next append; re-derive it afterwards.
    pub fn get_at<F>(&mut self, offset: usize) -> *mut F {
        debug_assert!(offset + mem::size_of::<F>() <= self.capacity());
        unsafe { self.data().add(offset) as *mut F }
    }

    /// Invoke the root frame under the `single` convention.
    ///
    /// For a reduction kernel built with [`KernelRequest::Single`] this is
    /// the per-output-cell first call.
    ///
    /// # Safety
    /// The buffer must hold a kernel built for `Single`, and the pointers
    /// must be valid for the types it was built from.
    pub unsafe fn run_single(&mut self, dst: *mut u8, src: &[*const u8]) -> CallResult {
        debug_assert!(!self.is_empty());
        let root = self.data() as *mut KernelPrefix;
        unsafe { (*root).single(dst, src.as_ptr()) }
    }

    /// Invoke the root frame under the `strided` convention.
    ///
    /// # Safety
    /// The buffer must hold a kernel built for `Strided`, and the pointers
    /// must be valid for `count` strided elements of its types.
    pub unsafe fn run_strided(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> CallResult {
        debug_assert!(!self.is_empty());
        let root = self.data() as *mut KernelPrefix;
        unsafe { (*root).strided(dst, dst_stride, src.as_ptr(), src_stride.as_ptr(), count) }
    }

    /// Destroy all frames and revert to the empty inline state.
    pub fn reset(&mut self) {
        self.destroy_frames();
        self.release_storage();
        self.storage = Storage::Inline([0; INLINE_WORDS]);
        self.size = 0;
    }

    fn destroy_frames(&mut self) {
        if self.size == 0 {
            return;
        }
        let root = self.data() as *mut KernelPrefix;
        unsafe { KernelPrefix::destroy(root) };
    }

    fn release_storage(&mut self) {
        if let Storage::Heap { ptr, capacity } = self.storage {
            // The layout was validated when this block was allocated.
            unsafe { alloc::dealloc(ptr.as_ptr(), Layout::from_size_align_unchecked(capacity, WORD)) };
            self.storage = Storage::Inline([0; INLINE_WORDS]);
        }
    }
}

impl Drop for KernelBuilder {
    fn drop(&mut self) {
        self.destroy_frames();
        self.release_storage();
    }
}

fn try_alloc(layout: Layout) -> *mut u8 {
    #[cfg(test)]
    if alloc_failure::should_fail() {
        return ptr::null_mut();
    }
    unsafe { alloc::alloc(layout) }
}


// C API for embedding the builder behind a stable ABI. The caller provides
// (and owns) suitably sized and aligned storage for the builder value
// itself; all functions expect a pointer previously initialized by
// `ndkern_buffer_construct`.

/// # Safety
/// `ckb` must point at writable storage of at least
/// `size_of::<KernelBuilder>()` bytes, aligned to a machine word, not
/// currently holding a live builder.
#[no_mangle]
pub unsafe extern "C" fn ndkern_buffer_construct(ckb: *mut KernelBuilder) {
    unsafe { ptr::write(ckb, KernelBuilder::new()) }
}

/// # Safety
/// `ckb` must point at a builder initialized by `ndkern_buffer_construct`;
/// it must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn ndkern_buffer_destruct(ckb: *mut KernelBuilder) {
    unsafe { ptr::drop_in_place(ckb) }
}

/// # Safety
/// `ckb` must point at a live builder.
#[no_mangle]
pub unsafe extern "C" fn ndkern_buffer_reset(ckb: *mut KernelBuilder) {
    unsafe { (*ckb).reset() }
}

/// Returns 0 on success, -1 on allocation failure (the builder is then
/// empty again).
///
/// # Safety
/// `ckb` must point at a live builder.
#[no_mangle]
pub unsafe extern "C" fn ndkern_buffer_ensure_capacity(ckb: *mut KernelBuilder, requested: usize) -> i32 {
    match unsafe { (*ckb).ensure_capacity(requested) } {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Returns 0 on success, -1 on allocation failure (the builder is then
/// empty again).
///
/// # Safety
/// `ckb` must point at a live builder.
#[no_mangle]
pub unsafe extern "C" fn ndkern_buffer_ensure_capacity_leaf(ckb: *mut KernelBuilder, requested: usize) -> i32 {
    match unsafe { (*ckb).ensure_capacity_leaf(requested) } {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
