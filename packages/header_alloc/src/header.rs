//! Layout of the size header that precedes every payload handed out by the tracking allocators.
//!
//! The header stores the *total* size of the underlying block (header plus payload) as one
//! big-endian `usize`-wide field, independent of the host byte order:
//!
//! ```text
//! underlying block:  [ size field (BE usize) ][ payload ........................ ]
//!                    ^ header view            ^ payload view (returned to caller)
//! ```
//!
//! With the `checked` feature, one more word holding a fixed tag precedes the size field so
//! that pointers not produced by this crate can be detected before their "size" is trusted.
//!
//! All pointer offsetting between the two views happens in [`to_header_view()`] and
//! [`to_payload_view()`].

use std::ptr::NonNull;

/// Width in bytes of the encoded size field.
pub const SIZE_FIELD_WIDTH: usize = size_of::<usize>();

#[cfg(feature = "checked")]
const TAG_WIDTH: usize = size_of::<usize>();

#[cfg(feature = "checked")]
const HEADER_TAG: usize = 0x5AFE_A110;

/// Width in bytes of the header that precedes every payload.
///
/// This is the difference between the total size requested from the underlying allocator
/// and the payload size requested by the caller.
#[cfg(not(feature = "checked"))]
pub const HEADER_WIDTH: usize = SIZE_FIELD_WIDTH;

/// Width in bytes of the header that precedes every payload.
///
/// This is the difference between the total size requested from the underlying allocator
/// and the payload size requested by the caller.
#[cfg(feature = "checked")]
pub const HEADER_WIDTH: usize = TAG_WIDTH + SIZE_FIELD_WIDTH;

/// The on-memory representation of a size value.
pub type EncodedSize = [u8; SIZE_FIELD_WIDTH];

/// Encodes a size as a big-endian byte sequence.
///
/// The result is identical on every host with the same pointer width.
#[must_use]
#[inline]
pub const fn encode(size: usize) -> EncodedSize {
    size.to_be_bytes()
}

/// Decodes a size previously produced by [`encode()`].
#[must_use]
#[inline]
pub const fn decode(bytes: EncodedSize) -> usize {
    usize::from_be_bytes(bytes)
}

/// Returns the total block size needed to serve a payload of `requested_size` bytes, or `None`
/// if the sum does not fit into `usize`.
#[must_use]
#[inline]
pub const fn total_size(requested_size: usize) -> Option<usize> {
    requested_size.checked_add(HEADER_WIDTH)
}

/// Converts a pointer to the start of an underlying block into the payload pointer that is
/// handed out to callers.
///
/// # Safety
///
/// `header` must point to the start of a block of at least [`HEADER_WIDTH`] bytes.
#[must_use]
#[inline]
pub unsafe fn to_payload_view(header: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: The caller guarantees that the block is at least HEADER_WIDTH bytes long,
    // so the result stays within (or one past the end of) the same allocation.
    unsafe { header.add(HEADER_WIDTH) }
}

/// Converts a payload pointer back into a pointer to the start of its underlying block.
///
/// # Safety
///
/// `payload` must have been produced by [`to_payload_view()`] for a block that is still live.
#[must_use]
#[inline]
pub unsafe fn to_header_view(payload: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: The caller guarantees that the payload sits HEADER_WIDTH bytes past the start
    // of the same allocation.
    unsafe { payload.sub(HEADER_WIDTH) }
}

/// Writes the header of a block whose total size is `total_size` bytes.
///
/// # Safety
///
/// `header` must point to the start of a writable block of at least [`HEADER_WIDTH`] bytes.
#[inline]
pub(crate) unsafe fn write(header: NonNull<u8>, total_size: usize) {
    #[cfg(feature = "checked")]
    {
        // SAFETY: Forwarding the caller's guarantee; the tag occupies the first TAG_WIDTH bytes.
        unsafe {
            header
                .cast::<EncodedSize>()
                .write_unaligned(encode(HEADER_TAG));
        }
    }

    // SAFETY: Forwarding the caller's guarantee; the size field ends exactly at HEADER_WIDTH.
    unsafe {
        size_field(header)
            .cast::<EncodedSize>()
            .write_unaligned(encode(total_size));
    }
}

/// Reads the total block size from the header.
///
/// # Safety
///
/// `header` must point to the start of a block whose header was written by [`write()`].
#[must_use]
#[inline]
pub(crate) unsafe fn read(header: NonNull<u8>) -> usize {
    // SAFETY: Forwarding the caller's guarantee.
    let bytes = unsafe { size_field(header).cast::<EncodedSize>().read_unaligned() };

    decode(bytes)
}

/// Returns whether the header carries the tag written by [`write()`].
///
/// Without the `checked` feature there is no tag and every header is assumed valid.
///
/// # Safety
///
/// `header` must be readable for [`HEADER_WIDTH`] bytes.
#[cfg(feature = "checked")]
#[must_use]
#[inline]
pub(crate) unsafe fn has_valid_tag(header: NonNull<u8>) -> bool {
    // SAFETY: Forwarding the caller's guarantee.
    let tag = unsafe { header.cast::<EncodedSize>().read_unaligned() };

    decode(tag) == HEADER_TAG
}

/// Returns whether the header carries the tag written by [`write()`].
///
/// Without the `checked` feature there is no tag and every header is assumed valid.
///
/// # Safety
///
/// `header` must be readable for [`HEADER_WIDTH`] bytes.
#[cfg(not(feature = "checked"))]
#[must_use]
#[inline]
pub(crate) const unsafe fn has_valid_tag(_header: NonNull<u8>) -> bool {
    true
}

/// # Safety
///
/// `header` must point to the start of a block of at least [`HEADER_WIDTH`] bytes.
#[inline]
unsafe fn size_field(header: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: The size field is the last SIZE_FIELD_WIDTH bytes of the header, which the
    // caller guarantees to be in bounds.
    unsafe { header.add(HEADER_WIDTH - SIZE_FIELD_WIDTH) }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn decode_inverts_encode() {
        for size in [
            0,
            1,
            HEADER_WIDTH,
            0xFF,
            0x100,
            0x1234,
            usize::MAX / 2,
            usize::MAX - 1,
            usize::MAX,
        ] {
            assert_eq!(decode(encode(size)), size);
        }
    }

    #[test]
    fn encoding_is_big_endian() {
        let encoded = encode(0x0102);

        assert_eq!(encoded[SIZE_FIELD_WIDTH - 1], 0x02);
        assert_eq!(encoded[SIZE_FIELD_WIDTH - 2], 0x01);
        assert!(encoded[..SIZE_FIELD_WIDTH - 2].iter().all(|b| *b == 0));
    }

    #[test]
    fn encoding_uses_full_width() {
        assert_eq!(encode(usize::MAX), [0xFF; SIZE_FIELD_WIDTH]);
        assert_eq!(encode(0), [0; SIZE_FIELD_WIDTH]);
    }

    #[test]
    fn header_is_at_least_one_word() {
        assert!(HEADER_WIDTH >= size_of::<usize>());
        assert_eq!(HEADER_WIDTH % size_of::<usize>(), 0);
    }

    #[test]
    fn total_size_adds_header_width() {
        assert_eq!(total_size(0), Some(HEADER_WIDTH));
        assert_eq!(total_size(100), Some(100 + HEADER_WIDTH));
    }

    #[test]
    fn total_size_rejects_overflow() {
        assert_eq!(total_size(usize::MAX), None);
        assert_eq!(total_size(usize::MAX - HEADER_WIDTH + 1), None);
        assert_eq!(total_size(usize::MAX - HEADER_WIDTH), Some(usize::MAX));
    }

    #[test]
    fn views_are_offset_by_header_width() {
        let mut block = [0_u8; HEADER_WIDTH + 16];
        let header = NonNull::from(&mut block).cast::<u8>();

        // SAFETY: The block is longer than HEADER_WIDTH.
        let payload = unsafe { to_payload_view(header) };

        assert_eq!(
            payload.as_ptr() as usize - header.as_ptr() as usize,
            HEADER_WIDTH
        );

        // SAFETY: The payload came from to_payload_view() on a live block.
        let header_again = unsafe { to_header_view(payload) };

        assert_eq!(header_again, header);
    }

    #[test]
    fn write_then_read_returns_total_size() {
        let mut block = [0_u8; HEADER_WIDTH + 8];
        let header = NonNull::from(&mut block).cast::<u8>();

        // SAFETY: The block is longer than HEADER_WIDTH and writable.
        unsafe { write(header, 0xABCD) };

        // SAFETY: The header was just written.
        let size = unsafe { read(header) };

        assert_eq!(size, 0xABCD);

        // SAFETY: The block is readable for HEADER_WIDTH bytes.
        assert!(unsafe { has_valid_tag(header) });
    }

    #[test]
    fn write_stores_size_field_in_big_endian_at_end_of_header() {
        let mut block = [0_u8; HEADER_WIDTH + 8];
        let header = NonNull::from(&mut block).cast::<u8>();

        // SAFETY: The block is longer than HEADER_WIDTH and writable.
        unsafe { write(header, 0x0102) };

        let size_field = &block[HEADER_WIDTH - SIZE_FIELD_WIDTH..HEADER_WIDTH];
        assert_eq!(size_field, encode(0x0102));
    }

    #[test]
    fn write_leaves_payload_untouched() {
        let mut block = [0xAA_u8; HEADER_WIDTH + 8];
        let header = NonNull::from(&mut block).cast::<u8>();

        // SAFETY: The block is longer than HEADER_WIDTH and writable.
        unsafe { write(header, 42) };

        assert!(block[HEADER_WIDTH..].iter().all(|b| *b == 0xAA));
    }

    #[cfg(feature = "checked")]
    #[test]
    fn untagged_header_is_rejected() {
        let mut block = [0_u8; HEADER_WIDTH];
        let header = NonNull::from(&mut block).cast::<u8>();

        // SAFETY: The block is readable for HEADER_WIDTH bytes.
        assert!(!unsafe { has_valid_tag(header) });
    }
}
