// A poisoned lock means the process is in an unrecoverable/unsafe state and must exit (we panic).
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - continued execution \
    is not safe because the underlying allocator may be in an inconsistent state";

// The counter is the sum of all live block sizes, which cannot exceed the address space.
pub(crate) const ERR_COUNTER_OVERFLOW: &str = "allocated byte counter overflows usize - \
    this indicates that the underlying allocator handed out more memory than is addressable";

// Only possible if a block was freed twice or a foreign pointer was passed in.
pub(crate) const ERR_COUNTER_UNDERFLOW: &str = "allocated byte counter underflow - a block was \
    released that this allocator never handed out or that was already released";

// Only detected with the `checked` feature.
pub(crate) const ERR_FOREIGN_POINTER: &str =
    "pointer passed to free() was not allocated by this allocator (header tag mismatch)";
