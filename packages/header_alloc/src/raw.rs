use std::ffi::c_void;
use std::fmt;
use std::ptr;

/// A malloc-style allocator with size-free deallocation.
///
/// This is the capability the tracking allocators consume from the allocator they wrap, and
/// also the shape they provide, so a tracking allocator can be used wherever the underlying
/// allocator was.
///
/// Unlike [`std::alloc::GlobalAlloc`], the caller does not need to remember the size of a
/// block in order to release or resize it.
///
/// # Safety
///
/// Implementations must uphold the usual malloc contract:
///
/// * A non-null pointer returned from [`malloc()`][Self::malloc] or
///   [`realloc()`][Self::realloc] points to a block that is readable and writable for at least
///   the requested number of bytes and is aligned to at least `align_of::<usize>()`.
/// * A failed [`realloc()`][Self::realloc] returns null and leaves the original block intact.
/// * Distinct live blocks never overlap.
pub unsafe trait RawAllocator {
    /// Allocates a block of at least `size` bytes, returning null on failure.
    fn malloc(&self, size: usize) -> *mut u8;

    /// Resizes a block to at least `new_size` bytes, possibly moving it.
    ///
    /// A null `ptr` makes this equivalent to [`malloc()`][Self::malloc]. Returns null on
    /// failure, in which case the original block is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block returned by this allocator.
    unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8;

    /// Releases a block. A null `ptr` is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live block returned by this allocator.
    unsafe fn free(&self, ptr: *mut u8);
}

/// Raw `malloc`-style entry point taking an opaque context.
pub type MallocFn = unsafe extern "C" fn(ctx: *mut c_void, size: usize) -> *mut c_void;

/// Raw `realloc`-style entry point taking an opaque context.
pub type ReallocFn =
    unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut c_void, new_size: usize) -> *mut c_void;

/// Raw `free`-style entry point taking an opaque context.
pub type FreeFn = unsafe extern "C" fn(ctx: *mut c_void, ptr: *mut c_void);

/// A C-compatible allocator bundle: three entry points plus an opaque context pointer that is
/// passed unchanged to each of them.
///
/// This is the form in which hosts typically exchange allocator implementations. It is both
/// consumed (via its [`RawAllocator`] implementation) and provided (via
/// [`AllocatorFunctions::from_static()`]) by the tracking allocators.
///
/// # Thread safety
///
/// The bundle is [`Send`] and [`Copy`], so copies of it may end up on any thread. Every
/// constructor requires that the entry points tolerate this.
///
/// # Panics
///
/// The entry points are `extern "C"` functions. If the Rust allocator behind an exported bundle
/// panics, the panic cannot unwind out of the entry point and the process is aborted instead.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct AllocatorFunctions {
    ctx: *mut c_void,
    malloc: MallocFn,
    realloc: ReallocFn,
    free: FreeFn,
}

impl AllocatorFunctions {
    /// Creates a bundle from raw entry points.
    ///
    /// # Safety
    ///
    /// The entry points must implement malloc/realloc/free semantics as described on
    /// [`RawAllocator`] when called with `ctx`, and `ctx` must remain valid for as long as the
    /// bundle (or any copy of it) is used.
    ///
    /// The entry points and `ctx` must be usable from any thread, including concurrently from
    /// several threads at once.
    #[must_use]
    pub const unsafe fn new(
        ctx: *mut c_void,
        malloc: MallocFn,
        realloc: ReallocFn,
        free: FreeFn,
    ) -> Self {
        Self {
            ctx,
            malloc,
            realloc,
            free,
        }
    }

    /// Exports a Rust allocator as a C-compatible bundle.
    ///
    /// The context pointer refers to `allocator` itself and each entry point forwards to the
    /// corresponding [`RawAllocator`] method.
    ///
    /// The resulting entry points may be invoked from any thread the host chooses, including
    /// concurrently. Use [`from_static_unsynchronized()`][Self::from_static_unsynchronized] for
    /// allocators that are not [`Sync`].
    #[must_use]
    pub fn from_static<A: RawAllocator + Send + Sync>(allocator: &'static A) -> Self {
        // SAFETY: `A` is Sync, so calls through a shared reference from any thread are sound.
        unsafe { Self::from_static_unsynchronized(allocator) }
    }

    /// Exports a Rust allocator that is not thread-safe as a C-compatible bundle.
    ///
    /// # Safety
    ///
    /// The caller must ensure that the entry points of the bundle (and of any copy of it) are
    /// never invoked by more than one thread at a time.
    #[must_use]
    pub unsafe fn from_static_unsynchronized<A: RawAllocator + Send>(
        allocator: &'static A,
    ) -> Self {
        Self {
            ctx: ptr::from_ref(allocator).cast_mut().cast(),
            malloc: malloc_trampoline::<A>,
            realloc: realloc_trampoline::<A>,
            free: free_trampoline::<A>,
        }
    }

    /// The opaque context pointer passed to every entry point.
    #[must_use]
    pub const fn ctx(&self) -> *mut c_void {
        self.ctx
    }
}

// SAFETY: The constructors require the entry points and the context to be usable from any
// thread, so moving the bundle to another thread cannot violate anything the pointer promised.
unsafe impl Send for AllocatorFunctions {}

impl fmt::Debug for AllocatorFunctions {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorFunctions")
            .field("ctx", &self.ctx)
            .field("malloc", &self.malloc)
            .field("realloc", &self.realloc)
            .field("free", &self.free)
            .finish()
    }
}

// SAFETY: The constructor's caller guaranteed malloc/realloc/free semantics for `ctx`.
unsafe impl RawAllocator for AllocatorFunctions {
    #[inline]
    fn malloc(&self, size: usize) -> *mut u8 {
        // SAFETY: The constructor's caller guaranteed that `malloc` may be called with `ctx`.
        unsafe { (self.malloc)(self.ctx, size) }.cast()
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        // SAFETY: Our caller guarantees `ptr` is null or a live block from this bundle.
        unsafe { (self.realloc)(self.ctx, ptr.cast(), new_size) }.cast()
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: Our caller guarantees `ptr` is null or a live block from this bundle.
        unsafe { (self.free)(self.ctx, ptr.cast()) }
    }
}

unsafe extern "C" fn malloc_trampoline<A: RawAllocator>(
    ctx: *mut c_void,
    size: usize,
) -> *mut c_void {
    // SAFETY: `ctx` was created from a `&'static A` in `from_static_unsynchronized()`.
    let allocator = unsafe { &*ctx.cast_const().cast::<A>() };

    allocator.malloc(size).cast()
}

unsafe extern "C" fn realloc_trampoline<A: RawAllocator>(
    ctx: *mut c_void,
    ptr: *mut c_void,
    new_size: usize,
) -> *mut c_void {
    // SAFETY: `ctx` was created from a `&'static A` in `from_static_unsynchronized()`.
    let allocator = unsafe { &*ctx.cast_const().cast::<A>() };

    // SAFETY: The host guarantees `ptr` is null or a live block from this bundle.
    unsafe { allocator.realloc(ptr.cast(), new_size) }.cast()
}

unsafe extern "C" fn free_trampoline<A: RawAllocator>(ctx: *mut c_void, ptr: *mut c_void) {
    // SAFETY: `ctx` was created from a `&'static A` in `from_static_unsynchronized()`.
    let allocator = unsafe { &*ctx.cast_const().cast::<A>() };

    // SAFETY: The host guarantees `ptr` is null or a live block from this bundle.
    unsafe { allocator.free(ptr.cast()) }
}

/// The C library's general-purpose allocator (`malloc`, `realloc`, `free`).
///
/// # Examples
///
/// ```rust
/// use header_alloc::{LibcAllocator, TrackingAllocator};
///
/// let allocator = TrackingAllocator::new(LibcAllocator);
/// let block = allocator.allocate(64).unwrap();
///
/// // SAFETY: The block was allocated above and is not used afterwards.
/// unsafe { allocator.free(block.as_ptr()) };
///
/// assert_eq!(allocator.allocated_bytes(), 0);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct LibcAllocator;

impl LibcAllocator {
    /// The C library allocator as a C-compatible bundle.
    #[must_use]
    pub fn functions() -> AllocatorFunctions {
        AllocatorFunctions::from_static(&Self)
    }
}

// SAFETY: libc's malloc family upholds the malloc contract, including fundamental alignment.
unsafe impl RawAllocator for LibcAllocator {
    #[inline]
    fn malloc(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions.
        unsafe { libc::malloc(size) }.cast()
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        // SAFETY: Our caller guarantees `ptr` is null or a live block from malloc/realloc.
        unsafe { libc::realloc(ptr.cast(), new_size) }.cast()
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: Our caller guarantees `ptr` is null or a live block from malloc/realloc.
        unsafe { libc::free(ptr.cast()) }
    }
}
