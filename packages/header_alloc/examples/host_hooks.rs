//! Example demonstrating how an embedding application hooks the allocator domains of a host
//! runtime so that every allocation the host makes is size-tracked.
//!
//! The "host" here is a minimal stand-in that keeps one active allocator per domain and calls
//! through the C-compatible entry points, the way a real runtime would.

use std::collections::HashMap;

use header_alloc::{
    AllocatorDomain, AllocatorFunctions, AllocatorRegistry, LibcAllocator, RawAllocator, install,
};

#[derive(Debug)]
struct ToyRuntime {
    allocators: HashMap<AllocatorDomain, AllocatorFunctions>,
}

impl ToyRuntime {
    fn new() -> Self {
        let libc = LibcAllocator::functions();

        Self {
            allocators: HashMap::from([
                (AllocatorDomain::Raw, libc),
                (AllocatorDomain::Mem, libc),
                (AllocatorDomain::Object, libc),
            ]),
        }
    }

    /// Pretends to create an object of the given size, returning its storage.
    fn create_object(&self, size: usize) -> *mut u8 {
        self.allocators[&AllocatorDomain::Object].malloc(size)
    }

    /// # Safety
    ///
    /// `object` must have been returned by `create_object()` and not yet destroyed.
    unsafe fn destroy_object(&self, object: *mut u8) {
        // SAFETY: Forwarding the caller's guarantee.
        unsafe { self.allocators[&AllocatorDomain::Object].free(object) };
    }
}

impl AllocatorRegistry for ToyRuntime {
    fn get_allocator(&self, domain: AllocatorDomain) -> AllocatorFunctions {
        self.allocators[&domain]
    }

    fn set_allocator(&mut self, domain: AllocatorDomain, allocator: AllocatorFunctions) {
        self.allocators.insert(domain, allocator);
    }
}

fn main() {
    let mut runtime = ToyRuntime::new();

    // Must happen before the runtime allocates anything in the hooked domains.
    // SAFETY: The runtime has not allocated anything yet and is only used from this thread.
    let mem = unsafe { install(&mut runtime, AllocatorDomain::Mem) };
    // SAFETY: As above.
    let object = unsafe { install(&mut runtime, AllocatorDomain::Object) };

    let objects: Vec<*mut u8> = (1..=5).map(|i| runtime.create_object(i * 32)).collect();

    println!(
        "{} objects alive: {} bytes in the object domain, {} bytes in the mem domain",
        objects.len(),
        object.allocated_bytes(),
        mem.allocated_bytes()
    );

    for o in objects {
        // SAFETY: Each object was created above and is destroyed exactly once.
        unsafe { runtime.destroy_object(o) };
    }

    println!(
        "All objects destroyed: {} bytes in the object domain",
        object.allocated_bytes()
    );
}
