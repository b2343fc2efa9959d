#![cfg_attr(coverage_nightly, coverage(off))]

use std::cell::Cell;
use std::ptr;

use crate::{LibcAllocator, RawAllocator};

/// Test double for the underlying allocator: serves requests from libc but can be told to fail
/// upcoming calls and records what it was asked to do.
#[derive(Debug, Default)]
pub(crate) struct FakeAllocator {
    remaining_failures: Cell<usize>,

    malloc_calls: Cell<usize>,
    realloc_calls: Cell<usize>,
    free_calls: Cell<usize>,

    last_requested_size: Cell<Option<usize>>,
    last_block_address: Cell<Option<usize>>,
}

impl FakeAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls to `malloc()` or `realloc()` return null.
    pub(crate) fn fail_next(&self, count: usize) {
        self.remaining_failures.set(count);
    }

    pub(crate) fn malloc_calls(&self) -> usize {
        self.malloc_calls.get()
    }

    pub(crate) fn realloc_calls(&self) -> usize {
        self.realloc_calls.get()
    }

    pub(crate) fn free_calls(&self) -> usize {
        self.free_calls.get()
    }

    /// Size passed to the most recent `malloc()` or `realloc()`, failed or not.
    pub(crate) fn last_requested_size(&self) -> Option<usize> {
        self.last_requested_size.get()
    }

    /// Address of the block returned by the most recent successful `malloc()` or `realloc()`,
    /// or passed to the most recent `free()`.
    pub(crate) fn last_block_address(&self) -> Option<usize> {
        self.last_block_address.get()
    }

    fn should_fail(&self) -> bool {
        let remaining = self.remaining_failures.get();

        if remaining == 0 {
            return false;
        }

        #[expect(clippy::arithmetic_side_effects, reason = "remaining is non-zero here")]
        let left = remaining - 1;

        self.remaining_failures.set(left);
        true
    }

    fn record(&self, requested_size: usize, block: *mut u8) -> *mut u8 {
        self.last_requested_size.set(Some(requested_size));

        if !block.is_null() {
            self.last_block_address.set(Some(block.addr()));
        }

        block
    }
}

fn increment(counter: &Cell<usize>) {
    counter.set(counter.get().wrapping_add(1));
}

// SAFETY: All successful requests are served by libc, which upholds the malloc contract.
unsafe impl RawAllocator for FakeAllocator {
    fn malloc(&self, size: usize) -> *mut u8 {
        increment(&self.malloc_calls);

        if self.should_fail() {
            return self.record(size, ptr::null_mut());
        }

        self.record(size, LibcAllocator.malloc(size))
    }

    unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        increment(&self.realloc_calls);

        if self.should_fail() {
            return self.record(new_size, ptr::null_mut());
        }

        // SAFETY: Forwarding the caller's guarantee.
        let block = unsafe { LibcAllocator.realloc(ptr, new_size) };
        self.record(new_size, block)
    }

    unsafe fn free(&self, ptr: *mut u8) {
        increment(&self.free_calls);

        if !ptr.is_null() {
            self.last_block_address.set(Some(ptr.addr()));
        }

        // SAFETY: Forwarding the caller's guarantee.
        unsafe { LibcAllocator.free(ptr) };
    }
}
