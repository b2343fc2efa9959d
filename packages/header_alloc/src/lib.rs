#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Allocator shim that prefixes every allocation with a size header and keeps a running total
//! of live allocated bytes.
//!
//! The shim sits between callers and a general-purpose allocator with a malloc-style interface
//! (`malloc`, `realloc`, `free` without a size argument). It transparently reserves a small
//! header in front of every block, stores the block's total size there and uses it to keep an
//! exact count of the bytes currently allocated, all without changing what callers observe:
//! null is still returned on failure, `realloc(null, n)` still allocates and `free(null)` is
//! still a no-op.
//!
//! The core functionality includes:
//! - [`TrackingAllocator`] - The size-tracking shim for single-threaded use
//! - [`SyncTrackingAllocator`] - The same shim with an internal lock and an atomic counter
//! - [`RawAllocator`] - The malloc-style interface that shims consume and provide
//! - [`AllocatorFunctions`] - C-compatible form of that interface, for exchanging allocators
//!   with a host runtime
//! - [`install()`] - Wraps the allocator a host has registered for an [`AllocatorDomain`]
//!
//! # Simple usage
//!
//! ```
//! use header_alloc::{HEADER_WIDTH, LibcAllocator, TrackingAllocator};
//!
//! let allocator = TrackingAllocator::new(LibcAllocator);
//!
//! let block = allocator.allocate(100).unwrap();
//! assert_eq!(allocator.allocated_bytes(), 100 + HEADER_WIDTH);
//!
//! // SAFETY: The block was allocated by this allocator and is not used afterwards.
//! unsafe { allocator.free(block.as_ptr()) };
//! assert_eq!(allocator.allocated_bytes(), 0);
//! ```
//!
//! # Header format
//!
//! The header is [`HEADER_WIDTH`] bytes wide and holds the total size of the underlying block
//! (header included) as a big-endian `usize`, regardless of host byte order. The allocated byte
//! count is the sum of these totals, so growing a block from `S1` to `S2` payload bytes
//! changes the count by exactly `S2 - S1`.
//!
//! Payloads are aligned to at least `align_of::<usize>()`. Allocators that guarantee a larger
//! alignment (for example 16 bytes) lose that guarantee for payloads unless it is also
//! satisfied at an offset of [`HEADER_WIDTH`].
//!
//! # Thread safety
//!
//! [`TrackingAllocator`] is designed for one caller at a time and is not [`Sync`]. When it is
//! exported to a host through [`AllocatorFunctions`], the host is responsible for serializing
//! calls. [`SyncTrackingAllocator`] lifts that restriction at the cost of a lock around every
//! call into the underlying allocator.
//!
//! # Caller contracts
//!
//! Passing a pointer to [`TrackingAllocator::free()`] or
//! [`TrackingAllocator::reallocate()`] that was not returned by the same shim is undefined
//! behavior. Enable the `checked` feature to tag every header with a marker that is verified
//! before the header is trusted; foreign pointers are then reported as
//! [`Error::InvalidPointer`] (or cause a panic in `free()`), at the cost of one more word per
//! block.
//!
//! Panics raised inside a shim that a host calls through [`AllocatorFunctions`] abort the
//! process, because a panic cannot unwind out of an `extern "C"` entry point.

mod block;
mod constants;
mod error;
#[cfg(test)]
mod fake;
pub mod header;
mod raw;
mod registry;
mod shim;
mod sync_shim;

pub use error::Error;
pub(crate) use error::Result;
pub use header::HEADER_WIDTH;
pub use raw::*;
pub use registry::*;
pub use shim::*;
pub use sync_shim::*;
