//! Example demonstrating basic usage of `header_alloc`.
//!
//! Wraps the C library allocator in a tracking shim and shows how the allocated byte count
//! follows the live blocks, header included.

use header_alloc::{HEADER_WIDTH, LibcAllocator, TrackingAllocator};

fn main() {
    let allocator = TrackingAllocator::new(LibcAllocator);

    println!("=== header_alloc basic usage ===");
    println!("Header width: {HEADER_WIDTH} bytes\n");

    let block = allocator
        .allocate(100)
        .expect("libc allocator is never exhausted by a 100-byte request");
    println!(
        "After allocate(100):    {} bytes allocated",
        allocator.allocated_bytes()
    );

    // SAFETY: The block was allocated by this allocator and has not been released.
    let block = unsafe { allocator.reallocate(block.as_ptr(), 250) }
        .expect("libc allocator is never exhausted by a 250-byte request");
    println!(
        "After reallocate(250):  {} bytes allocated",
        allocator.allocated_bytes()
    );

    // SAFETY: The block was allocated by this allocator and is not used afterwards.
    unsafe { allocator.free(block.as_ptr()) };
    println!(
        "After free():           {} bytes allocated",
        allocator.allocated_bytes()
    );
}
