//! The header protocol shared by all tracking allocators: how a request is turned into an
//! underlying allocator call, and how the header is maintained around it.
//!
//! Nothing here touches a byte counter. Callers apply the returned sizes to their own counter
//! only after the operation has succeeded, which is what keeps failed operations from
//! mutating the count.

use std::ptr::NonNull;

use crate::constants::ERR_FOREIGN_POINTER;
use crate::{Error, Result, header};

/// Outcome of a successful allocation.
#[derive(Debug)]
pub(crate) struct Allocated {
    pub(crate) payload: NonNull<u8>,
    pub(crate) total_size: usize,
}

/// Outcome of a successful reallocation.
#[derive(Debug)]
pub(crate) struct Resized {
    pub(crate) payload: NonNull<u8>,
    pub(crate) old_total_size: usize,
    pub(crate) new_total_size: usize,
}

/// Requests a header-carrying block from `malloc` and writes its header.
pub(crate) fn allocate(
    requested_size: usize,
    malloc: impl FnOnce(usize) -> *mut u8,
) -> Result<Allocated> {
    let total_size =
        header::total_size(requested_size).ok_or(Error::OutOfMemory { requested_size })?;

    let block = NonNull::new(malloc(total_size)).ok_or(Error::OutOfMemory { requested_size })?;

    // SAFETY: The underlying allocator returned at least total_size >= HEADER_WIDTH bytes.
    unsafe { header::write(block, total_size) };

    Ok(Allocated {
        // SAFETY: The block is at least HEADER_WIDTH bytes long.
        payload: unsafe { header::to_payload_view(block) },
        total_size,
    })
}

/// Resizes the block behind `payload` via `realloc` and rewrites its header.
///
/// On failure the original block, including its header, is left untouched.
///
/// # Safety
///
/// `payload` must be a live payload pointer produced by this module, and `realloc` must be the
/// reallocation entry point of the allocator that produced it.
pub(crate) unsafe fn reallocate(
    payload: NonNull<u8>,
    new_requested_size: usize,
    realloc: impl FnOnce(*mut u8, usize) -> *mut u8,
) -> Result<Resized> {
    // SAFETY: Forwarding the caller's guarantee.
    let header = unsafe { header::to_header_view(payload) };

    // SAFETY: The header of a live block is readable.
    if !unsafe { header::has_valid_tag(header) } {
        return Err(Error::InvalidPointer {
            address: payload.addr().get(),
        });
    }

    // SAFETY: The header of a live block was written when the block was allocated.
    let old_total_size = unsafe { header::read(header) };

    let new_total_size = header::total_size(new_requested_size).ok_or(Error::OutOfMemory {
        requested_size: new_requested_size,
    })?;

    let block = NonNull::new(realloc(header.as_ptr(), new_total_size)).ok_or(
        Error::OutOfMemory {
            requested_size: new_requested_size,
        },
    )?;

    // SAFETY: The underlying allocator returned at least new_total_size >= HEADER_WIDTH bytes.
    unsafe { header::write(block, new_total_size) };

    Ok(Resized {
        // SAFETY: The block is at least HEADER_WIDTH bytes long.
        payload: unsafe { header::to_payload_view(block) },
        old_total_size,
        new_total_size,
    })
}

/// Releases the block behind `payload` via `free` and returns its total size.
///
/// # Panics
///
/// With the `checked` feature, panics if the header does not carry the expected tag.
///
/// # Safety
///
/// `payload` must be a live payload pointer produced by this module, and `free` must be the
/// release entry point of the allocator that produced it.
pub(crate) unsafe fn release(payload: NonNull<u8>, free: impl FnOnce(*mut u8)) -> usize {
    // SAFETY: Forwarding the caller's guarantee.
    let header = unsafe { header::to_header_view(payload) };

    // SAFETY: The header of a live block is readable.
    let valid = unsafe { header::has_valid_tag(header) };
    assert!(valid, "{ERR_FOREIGN_POINTER}");

    // SAFETY: The header of a live block was written when the block was allocated.
    let total_size = unsafe { header::read(header) };

    free(header.as_ptr());

    total_size
}
