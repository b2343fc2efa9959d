//! Thread-safe variant of the size-tracking allocator.

use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Mutex;
use std::sync::atomic::{self, AtomicUsize};

use crate::constants::{ERR_COUNTER_OVERFLOW, ERR_COUNTER_UNDERFLOW, ERR_POISONED_LOCK};
use crate::{RawAllocator, Result, block};

/// A thread-safe version of [`TrackingAllocator`][crate::TrackingAllocator].
///
/// Calls into the underlying allocator are serialized by an internal lock, so the wrapped
/// allocator does not itself need to be thread-safe. The allocated byte count lives in an
/// atomic and can be read from any thread without taking the lock.
///
/// Header handling, error behavior and the meaning of the counter are identical to
/// [`TrackingAllocator`][crate::TrackingAllocator]. A reallocation applies its size change to
/// the counter in one atomic step, so concurrent readers never observe the old and the new
/// size counted at the same time.
///
/// # Examples
///
/// ```rust
/// use std::thread;
///
/// use header_alloc::{LibcAllocator, SyncTrackingAllocator};
///
/// let allocator = SyncTrackingAllocator::new(LibcAllocator);
///
/// thread::scope(|s| {
///     for _ in 0..4 {
///         s.spawn(|| {
///             let block = allocator.allocate(32).unwrap();
///
///             // SAFETY: The block was allocated by this allocator and is not used afterwards.
///             unsafe { allocator.free(block.as_ptr()) };
///         });
///     }
/// });
///
/// assert_eq!(allocator.allocated_bytes(), 0);
/// ```
pub struct SyncTrackingAllocator<A: RawAllocator> {
    inner: Mutex<A>,

    // Sum of the header values of all live blocks.
    allocated_bytes: AtomicUsize,
}

impl<A: RawAllocator> SyncTrackingAllocator<A> {
    /// Creates a shim over `allocator` with an allocated byte count of zero.
    #[must_use]
    #[inline]
    pub const fn new(allocator: A) -> Self {
        Self {
            inner: Mutex::new(allocator),
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    /// The number of bytes currently allocated through this shim, headers included.
    #[must_use]
    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        // Relaxed is sufficient: the counter is a statistic and orders no other memory.
        self.allocated_bytes.load(atomic::Ordering::Relaxed)
    }

    /// Runs `f` with exclusive access to the underlying allocator.
    ///
    /// # Panics
    ///
    /// Panics if the lock was poisoned by a panic in an earlier call into the allocator.
    pub fn with_underlying<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        let inner = self.inner.lock().expect(ERR_POISONED_LOCK);
        f(&inner)
    }

    /// Allocates a block with room for `requested_size` payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the underlying allocator fails or if the request plus
    /// the header width does not fit into `usize`. The allocated byte count is unchanged.
    ///
    /// [`Error::OutOfMemory`]: crate::Error::OutOfMemory
    pub fn allocate(&self, requested_size: usize) -> Result<NonNull<u8>> {
        let allocated =
            block::allocate(requested_size, |size| self.with_underlying(|a| a.malloc(size)))?;

        self.add_bytes(allocated.total_size);

        Ok(allocated.payload)
    }

    /// Resizes a block to hold `new_requested_size` payload bytes, possibly moving it.
    ///
    /// Behaves like [`TrackingAllocator::reallocate()`][crate::TrackingAllocator::reallocate].
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the underlying allocator fails or if the request plus
    /// the header width does not fit into `usize`. The original block and the allocated byte
    /// count are unchanged.
    ///
    /// With the `checked` feature, returns [`Error::InvalidPointer`] if `ptr` does not carry a
    /// header written by this crate.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by [`allocate()`][Self::allocate] or
    /// [`reallocate()`][Self::reallocate] on this shim that has not yet been released, and no
    /// other thread may be using it concurrently. After a successful call, `ptr` must no
    /// longer be used.
    ///
    /// [`Error::OutOfMemory`]: crate::Error::OutOfMemory
    /// [`Error::InvalidPointer`]: crate::Error::InvalidPointer
    pub unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        new_requested_size: usize,
    ) -> Result<NonNull<u8>> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.allocate(new_requested_size);
        };

        let realloc = |block: *mut u8, size: usize| {
            self.with_underlying(|a| {
                // SAFETY: `block` is the header view of a live block of this allocator.
                unsafe { a.realloc(block, size) }
            })
        };

        // SAFETY: The caller guarantees the payload came from this shim and is live, and we
        // pass the realloc of the same allocator that produced it.
        let resized = unsafe { block::reallocate(payload, new_requested_size, realloc) }?;

        self.resize_bytes(resized.old_total_size, resized.new_total_size);

        Ok(resized.payload)
    }

    /// Releases a block. A null `ptr` is ignored.
    ///
    /// # Panics
    ///
    /// With the `checked` feature, panics if `ptr` does not carry a header written by this
    /// crate. Panics if releasing the block would make the allocated byte count negative,
    /// which can only happen if the safety requirements below were violated.
    ///
    /// When the shim is reached through an [`AllocatorFunctions`][crate::AllocatorFunctions]
    /// bundle, these panics cannot unwind out of the `extern "C"` entry points and abort the
    /// process instead.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by [`allocate()`][Self::allocate] or
    /// [`reallocate()`][Self::reallocate] on this shim that has not yet been released, and no
    /// other thread may be using it concurrently.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        let free = |block: *mut u8| {
            self.with_underlying(|a| {
                // SAFETY: `block` is the header view of a live block of this allocator.
                unsafe { a.free(block) };
            });
        };

        // SAFETY: The caller guarantees the payload came from this shim and is live, and we
        // pass the free of the same allocator that produced it.
        let total_size = unsafe { block::release(payload, free) };

        self.subtract_bytes(total_size);
    }

    fn add_bytes(&self, bytes: usize) {
        self.allocated_bytes
            .fetch_update(atomic::Ordering::Relaxed, atomic::Ordering::Relaxed, |current| {
                current.checked_add(bytes)
            })
            .expect(ERR_COUNTER_OVERFLOW);
    }

    fn subtract_bytes(&self, bytes: usize) {
        self.allocated_bytes
            .fetch_update(atomic::Ordering::Relaxed, atomic::Ordering::Relaxed, |current| {
                current.checked_sub(bytes)
            })
            .expect(ERR_COUNTER_UNDERFLOW);
    }

    fn resize_bytes(&self, old_total_size: usize, new_total_size: usize) {
        let delta = new_total_size.abs_diff(old_total_size);

        if new_total_size >= old_total_size {
            self.add_bytes(delta);
        } else {
            self.subtract_bytes(delta);
        }
    }
}

impl<A: RawAllocator> fmt::Debug for SyncTrackingAllocator<A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTrackingAllocator")
            .field("inner", &"<allocator>")
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

// SAFETY: Payloads are slices of blocks from the wrapped allocator, which upholds the malloc
// contract. HEADER_WIDTH is a multiple of the word size, so payload alignment is preserved.
unsafe impl<A: RawAllocator> RawAllocator for SyncTrackingAllocator<A> {
    #[inline]
    fn malloc(&self, size: usize) -> *mut u8 {
        self.allocate(size).map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        // SAFETY: Forwarding the caller's guarantee.
        let result = unsafe { self.reallocate(ptr, new_size) };

        result.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: Forwarding the caller's guarantee.
        unsafe { Self::free(self, ptr) };
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::fake::FakeAllocator;
    use crate::{Error, HEADER_WIDTH, LibcAllocator};

    assert_impl_all!(SyncTrackingAllocator<LibcAllocator>: Send, Sync);
    // The lock makes a non-thread-safe allocator shareable.
    assert_impl_all!(SyncTrackingAllocator<FakeAllocator>: Send, Sync);

    #[test]
    fn scenario_allocate_grow_free() {
        let allocator = SyncTrackingAllocator::new(FakeAllocator::new());

        let block = allocator.allocate(100).unwrap();
        assert_eq!(allocator.allocated_bytes(), 100 + HEADER_WIDTH);

        // SAFETY: The block is live and came from this shim.
        let block = unsafe { allocator.reallocate(block.as_ptr(), 250) }.unwrap();
        assert_eq!(allocator.allocated_bytes(), 250 + HEADER_WIDTH);

        // SAFETY: Allocated above, not used afterwards.
        unsafe { allocator.free(block.as_ptr()) };
        assert_eq!(allocator.allocated_bytes(), 0);
    }

    #[test]
    fn shrinking_realloc_reduces_counter() {
        let allocator = SyncTrackingAllocator::new(FakeAllocator::new());

        let block = allocator.allocate(500).unwrap();

        // SAFETY: The block is live and came from this shim.
        let block = unsafe { allocator.reallocate(block.as_ptr(), 20) }.unwrap();
        assert_eq!(allocator.allocated_bytes(), 20 + HEADER_WIDTH);

        // SAFETY: Allocated above, not used afterwards.
        unsafe { allocator.free(block.as_ptr()) };
        assert_eq!(allocator.allocated_bytes(), 0);
    }

    #[test]
    fn null_handling() {
        let allocator = SyncTrackingAllocator::new(FakeAllocator::new());

        // SAFETY: Null is always accepted.
        unsafe { allocator.free(ptr::null_mut()) };
        assert_eq!(allocator.allocated_bytes(), 0);

        // SAFETY: Null is always accepted.
        let block = unsafe { allocator.reallocate(ptr::null_mut(), 12) }.unwrap();
        assert_eq!(allocator.allocated_bytes(), 12 + HEADER_WIDTH);
        assert_eq!(allocator.with_underlying(FakeAllocator::malloc_calls), 1);

        // SAFETY: Allocated above, not used afterwards.
        unsafe { allocator.free(block.as_ptr()) };
    }

    #[test]
    fn failures_change_nothing() {
        let allocator = SyncTrackingAllocator::new(FakeAllocator::new());

        allocator.with_underlying(|a| a.fail_next(1));
        assert!(matches!(
            allocator.allocate(64),
            Err(Error::OutOfMemory { requested_size: 64 })
        ));
        assert_eq!(allocator.allocated_bytes(), 0);

        let block = allocator.allocate(64).unwrap();

        allocator.with_underlying(|a| a.fail_next(1));
        // SAFETY: The block is live and came from this shim.
        let result = unsafe { allocator.reallocate(block.as_ptr(), 128) };
        assert!(result.is_err());
        assert_eq!(allocator.allocated_bytes(), 64 + HEADER_WIDTH);

        // SAFETY: The original block is still live after a failed realloc.
        unsafe { allocator.free(block.as_ptr()) };
        assert_eq!(allocator.allocated_bytes(), 0);
    }

    #[test]
    fn concurrent_traffic_conserves_counter() {
        const THREADS: usize = 4;
        const ITERATIONS: usize = 200;

        let allocator = SyncTrackingAllocator::new(FakeAllocator::new());

        thread::scope(|s| {
            for thread_index in 0..THREADS {
                let allocator = &allocator;

                s.spawn(move || {
                    for i in 0..ITERATIONS {
                        let block = allocator.allocate(thread_index + i).unwrap();

                        // SAFETY: The block is live and owned by this thread.
                        let block =
                            unsafe { allocator.reallocate(block.as_ptr(), i * 2 + 1) }.unwrap();

                        // SAFETY: The block is live, owned by this thread, not used afterwards.
                        unsafe { allocator.free(block.as_ptr()) };
                    }
                });
            }
        });

        assert_eq!(allocator.allocated_bytes(), 0);
        assert_eq!(
            allocator.with_underlying(FakeAllocator::free_calls),
            THREADS * ITERATIONS
        );
    }

    #[test]
    fn live_blocks_are_visible_from_other_threads() {
        let allocator = SyncTrackingAllocator::new(LibcAllocator);

        let block = allocator.allocate(1000).unwrap();

        let observed = thread::scope(|s| s.spawn(|| allocator.allocated_bytes()).join().unwrap());
        assert_eq!(observed, 1000 + HEADER_WIDTH);

        // SAFETY: Allocated above, not used afterwards.
        unsafe { allocator.free(block.as_ptr()) };
    }
}
