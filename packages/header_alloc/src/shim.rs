//! Single-threaded size-tracking allocator.

use std::cell::Cell;
use std::fmt;
use std::ptr::{self, NonNull};

use crate::constants::{ERR_COUNTER_OVERFLOW, ERR_COUNTER_UNDERFLOW};
use crate::{RawAllocator, Result, block};

/// An allocator shim that prefixes every block with a size header and keeps a running total
/// of the bytes currently allocated through it.
///
/// The shim wraps any [`RawAllocator`]. Every allocation requests [`HEADER_WIDTH`] more bytes
/// from the underlying allocator than the caller asked for, stores the total size in front of
/// the payload and hands out a pointer to the payload. On [`free()`][Self::free] and
/// [`reallocate()`][Self::reallocate] the header is read back to learn how large the block was,
/// which is what allows the shim to track sizes through a size-free `free()` interface.
///
/// The counter always equals the sum of the total (header-inclusive) sizes of all live blocks.
/// Failed operations leave it unchanged.
///
/// # Thread safety
///
/// This type is not thread-safe and the compiler enforces that: it is not [`Sync`], so it cannot
/// be shared between threads. If the shim is exported to a host via
/// [`AllocatorFunctions`][crate::AllocatorFunctions], the host must ensure that only one thread
/// calls into it at a time. Use [`SyncTrackingAllocator`][crate::SyncTrackingAllocator] if that
/// cannot be guaranteed.
///
/// # Examples
///
/// ```rust
/// use header_alloc::{HEADER_WIDTH, LibcAllocator, TrackingAllocator};
///
/// let allocator = TrackingAllocator::new(LibcAllocator);
///
/// let block = allocator.allocate(100).unwrap();
/// assert_eq!(allocator.allocated_bytes(), 100 + HEADER_WIDTH);
///
/// // SAFETY: The block was allocated by this allocator and has not been released.
/// let block = unsafe { allocator.reallocate(block.as_ptr(), 250) }.unwrap();
/// assert_eq!(allocator.allocated_bytes(), 250 + HEADER_WIDTH);
///
/// // SAFETY: The block was allocated by this allocator and is not used afterwards.
/// unsafe { allocator.free(block.as_ptr()) };
/// assert_eq!(allocator.allocated_bytes(), 0);
/// ```
///
/// [`HEADER_WIDTH`]: crate::HEADER_WIDTH
pub struct TrackingAllocator<A: RawAllocator> {
    inner: A,

    // Sum of the header values of all live blocks.
    allocated_bytes: Cell<usize>,
}

impl<A: RawAllocator> TrackingAllocator<A> {
    /// Creates a shim over `allocator` with an allocated byte count of zero.
    ///
    /// The shim takes ownership of the underlying allocator, so the allocator cannot be swapped
    /// out while blocks carrying headers are still live.
    #[must_use]
    #[inline]
    pub const fn new(allocator: A) -> Self {
        Self {
            inner: allocator,
            allocated_bytes: Cell::new(0),
        }
    }

    /// The number of bytes currently allocated through this shim, headers included.
    #[must_use]
    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.get()
    }

    /// The allocator this shim forwards to.
    #[must_use]
    #[inline]
    pub const fn underlying(&self) -> &A {
        &self.inner
    }

    /// Allocates a block with room for `requested_size` payload bytes.
    ///
    /// The returned pointer is aligned to at least `align_of::<usize>()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the underlying allocator fails or if the request plus
    /// the header width does not fit into `usize`. The allocated byte count is unchanged.
    ///
    /// [`Error::OutOfMemory`]: crate::Error::OutOfMemory
    pub fn allocate(&self, requested_size: usize) -> Result<NonNull<u8>> {
        let allocated = block::allocate(requested_size, |size| self.inner.malloc(size))?;

        self.add_bytes(allocated.total_size);

        Ok(allocated.payload)
    }

    /// Resizes a block to hold `new_requested_size` payload bytes, possibly moving it.
    ///
    /// A null `ptr` makes this identical to [`allocate()`][Self::allocate]. On success the
    /// allocated byte count changes by the difference between the new and the old total size
    /// in a single step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the underlying allocator fails or if the request plus
    /// the header width does not fit into `usize`. The original block stays valid and both its
    /// contents and the allocated byte count are unchanged.
    ///
    /// With the `checked` feature, returns [`Error::InvalidPointer`] if `ptr` does not carry a
    /// header written by this crate.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by [`allocate()`][Self::allocate] or
    /// [`reallocate()`][Self::reallocate] on this shim that has not yet been released.
    /// After a successful call, `ptr` must no longer be used.
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
            // SAFETY: `block` is the header view of a live block of the inner allocator.
            unsafe { self.inner.realloc(block, size) }
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
    /// [`reallocate()`][Self::reallocate] on this shim that has not yet been released.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        let free = |block: *mut u8| {
            // SAFETY: `block` is the header view of a live block of the inner allocator.
            unsafe { self.inner.free(block) };
        };

        // SAFETY: The caller guarantees the payload came from this shim and is live, and we
        // pass the free of the same allocator that produced it.
        let total_size = unsafe { block::release(payload, free) };

        self.subtract_bytes(total_size);
    }

    fn add_bytes(&self, bytes: usize) {
        let updated = self
            .allocated_bytes
            .get()
            .checked_add(bytes)
            .expect(ERR_COUNTER_OVERFLOW);

        self.allocated_bytes.set(updated);
    }

    fn subtract_bytes(&self, bytes: usize) {
        let updated = self
            .allocated_bytes
            .get()
            .checked_sub(bytes)
            .expect(ERR_COUNTER_UNDERFLOW);

        self.allocated_bytes.set(updated);
    }

    fn resize_bytes(&self, old_total_size: usize, new_total_size: usize) {
        let current = self.allocated_bytes.get();
        let delta = new_total_size.abs_diff(old_total_size);

        let updated = if new_total_size >= old_total_size {
            current.checked_add(delta).expect(ERR_COUNTER_OVERFLOW)
        } else {
            current.checked_sub(delta).expect(ERR_COUNTER_UNDERFLOW)
        };

        self.allocated_bytes.set(updated);
    }
}

impl<A: RawAllocator> fmt::Debug for TrackingAllocator<A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingAllocator")
            .field("inner", &"<allocator>")
            .field("allocated_bytes", &self.allocated_bytes.get())
            .finish()
    }
}

// SAFETY: Payloads are slices of blocks from the wrapped allocator, which upholds the malloc
// contract. HEADER_WIDTH is a multiple of the word size, so payload alignment is preserved.
unsafe impl<A: RawAllocator> RawAllocator for TrackingAllocator<A> {
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
