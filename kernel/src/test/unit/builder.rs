use std::cell::Cell;
use std::mem::{self, MaybeUninit};
use std::ptr;

use crate::builder::{
    alloc_failure, ndkern_buffer_construct, ndkern_buffer_destruct, ndkern_buffer_ensure_capacity,
    ndkern_buffer_reset, KernelBuilder,
};
use crate::error::Error;
use crate::prefix::{aligned_size, child_at, CallResult, KernelPrefix, KernelRequest, SingleKernel};

thread_local! {
    static LIVE: Cell<isize> = const { Cell::new(0) };
}

fn live() -> isize {
    LIVE.with(|c| c.get())
}

/// Leaf frame that writes its payload to dst and counts live instances.
#[repr(C)]
struct TrackedLeaf {
    #[allow(dead_code)]
    prefix: KernelPrefix,
    payload: u64,
}

impl TrackedLeaf {
    fn new(payload: u64) -> Self {
        LIVE.with(|c| c.set(c.get() + 1));
        Self { prefix: KernelPrefix::placeholder(), payload }
    }
}

unsafe impl SingleKernel for TrackedLeaf {
    unsafe fn single(&mut self, dst: *mut u8, _src: *const *const u8) -> CallResult {
        unsafe { ptr::write(dst as *mut u64, self.payload) };
        Ok(())
    }
}

impl Drop for TrackedLeaf {
    fn drop(&mut self) {
        LIVE.with(|c| c.set(c.get() - 1));
    }
}

/// Frame that forwards to its child and destroys it on drop.
#[repr(C)]
struct TrackedParent {
    #[allow(dead_code)]
    prefix: KernelPrefix,
}

impl TrackedParent {
    fn new() -> Self {
        LIVE.with(|c| c.set(c.get() + 1));
        Self { prefix: KernelPrefix::placeholder() }
    }

    fn child(&mut self) -> *mut KernelPrefix {
        unsafe { child_at(self, mem::size_of::<Self>()) }
    }
}

unsafe impl SingleKernel for TrackedParent {
    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) -> CallResult {
        let child = self.child();
        unsafe { (*child).single(dst, src) }
    }

    unsafe fn destroy_children(&mut self) {
        unsafe { KernelPrefix::destroy(self.child()) };
    }
}

impl Drop for TrackedParent {
    fn drop(&mut self) {
        LIVE.with(|c| c.set(c.get() - 1));
    }
}

#[test]
fn starts_inline_and_empty() {
    let ckb = KernelBuilder::new();
    assert!(ckb.is_empty());
    assert_eq!(ckb.size(), 0);
    assert_eq!(ckb.capacity(), 16 * mem::size_of::<usize>());
}

#[test]
fn emplace_and_invoke() {
    let mut ckb = KernelBuilder::new();
    ckb.emplace_back(KernelRequest::Single, TrackedLeaf::new(0xfeed_beef)).unwrap();

    let mut out = 0u64;
    unsafe { ckb.run_single(&mut out as *mut u64 as *mut u8, &[ptr::null()]).unwrap() };
    assert_eq!(out, 0xfeed_beef);

    drop(ckb);
    assert_eq!(live(), 0);
}

#[test]
fn offsets_stay_valid_across_growth() {
    let mut ckb = KernelBuilder::new();
    let inline_capacity = ckb.capacity();

    let offsets: Vec<usize> = (0..32)
        .map(|i| ckb.emplace_back(KernelRequest::Single, TrackedLeaf::new(i as u64)).unwrap())
        .collect();
    assert!(ckb.size() > inline_capacity, "the test must force at least one growth");
    assert!(ckb.capacity() >= inline_capacity * 3 / 2);

    for (i, &offset) in offsets.iter().enumerate() {
        let frame = ckb.get_at::<TrackedLeaf>(offset);
        assert_eq!(unsafe { (*frame).payload }, i as u64);
    }

    drop(ckb);
    assert_eq!(live(), 0);
}

#[test]
fn frame_offsets_are_word_aligned() {
    let mut ckb = KernelBuilder::new();
    for _ in 0..5 {
        let offset = ckb.emplace_back(KernelRequest::Single, TrackedLeaf::new(1)).unwrap();
        assert_eq!(offset, aligned_size(offset));
    }
}

#[test]
fn destructor_chain_runs_on_drop() {
    let mut ckb = KernelBuilder::new();
    ckb.emplace_back(KernelRequest::Single, TrackedParent::new()).unwrap();
    ckb.emplace_back(KernelRequest::Single, TrackedParent::new()).unwrap();
    ckb.emplace_back(KernelRequest::Single, TrackedLeaf::new(7)).unwrap();
    assert_eq!(live(), 3);

    drop(ckb);
    assert_eq!(live(), 0);
}

#[test]
fn reset_destroys_and_reverts_to_inline() {
    let mut ckb = KernelBuilder::new();
    for i in 0..32 {
        ckb.emplace_back(KernelRequest::Single, TrackedLeaf::new(i)).unwrap();
    }
    assert!(ckb.capacity() > 16 * mem::size_of::<usize>());

    ckb.reset();
    assert_eq!(live(), 0);
    assert!(ckb.is_empty());
    assert_eq!(ckb.capacity(), 16 * mem::size_of::<usize>());
}

#[test]
fn allocation_failure_self_heals() {
    let mut ckb = KernelBuilder::new();

    alloc_failure::fail_after(0);
    let result: Result<Vec<usize>, Error> =
        (0..32).map(|_| ckb.emplace_back(KernelRequest::Single, TrackedParent::new())).collect();
    alloc_failure::disarm();

    assert!(matches!(result, Err(Error::AllocationFailure { .. })));
    // Every constructed frame was destroyed during self-healing, including
    // the parents whose children were never appended.
    assert_eq!(live(), 0);
    assert!(ckb.is_empty());
    assert_eq!(ckb.capacity(), 16 * mem::size_of::<usize>());

    // The builder is usable again afterwards.
    ckb.emplace_back(KernelRequest::Single, TrackedLeaf::new(3)).unwrap();
    let mut out = 0u64;
    unsafe { ckb.run_single(&mut out as *mut u64 as *mut u8, &[ptr::null()]).unwrap() };
    assert_eq!(out, 3);
    drop(ckb);
    assert_eq!(live(), 0);
}

#[test]
fn allocation_failure_mid_build_keeps_chain_walkable() {
    // Fail on the second growth: the first growth succeeds, leaving a
    // parent chain in heap storage whose tail child is a zeroed prefix.
    let mut ckb = KernelBuilder::new();
    alloc_failure::fail_after(1);
    let result: Result<Vec<usize>, Error> =
        (0..64).map(|_| ckb.emplace_back(KernelRequest::Single, TrackedParent::new())).collect();
    alloc_failure::disarm();

    assert!(matches!(result, Err(Error::AllocationFailure { .. })));
    assert_eq!(live(), 0);
    assert!(ckb.is_empty());
}

#[test]
fn c_abi_construct_reset_destruct() {
    let mut slot = MaybeUninit::<KernelBuilder>::uninit();
    unsafe {
        ndkern_buffer_construct(slot.as_mut_ptr());
        assert_eq!(ndkern_buffer_ensure_capacity(slot.as_mut_ptr(), 1024), 0);
        assert!((*slot.as_mut_ptr()).capacity() >= 1024);

        ndkern_buffer_reset(slot.as_mut_ptr());
        assert_eq!((*slot.as_mut_ptr()).size(), 0);

        alloc_failure::fail_after(0);
        let status = ndkern_buffer_ensure_capacity(slot.as_mut_ptr(), 1 << 20);
        alloc_failure::disarm();
        assert_eq!(status, -1);
        assert_eq!((*slot.as_mut_ptr()).size(), 0);

        ndkern_buffer_destruct(slot.as_mut_ptr());
    }
}
