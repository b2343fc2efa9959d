use thiserror::Error;

/// Errors that can occur when allocating or reallocating through a tracking allocator.
///
/// A failed operation never changes the allocated byte counter and never touches the header
/// of a pre-existing block.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The underlying allocator could not satisfy the request, or the request plus the header
    /// width does not fit into `usize`.
    #[error("out of memory: could not allocate {requested_size} bytes plus the size header")]
    OutOfMemory {
        /// The payload size the caller asked for, excluding the header.
        requested_size: usize,
    },

    /// The caller passed a pointer that was not handed out by this allocator.
    ///
    /// Only detected when the `checked` feature is enabled. Without it, passing a foreign
    /// pointer is undefined behavior.
    #[error("pointer {address:#x} was not allocated by this allocator")]
    InvalidPointer {
        /// Address of the payload pointer the caller passed in.
        address: usize,
    },
}

/// A specialized `Result` type for allocator shim operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
