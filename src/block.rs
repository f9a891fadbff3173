use std::{mem, ptr::NonNull};

use crate::list::Node;

/// Header size of a block. We need to add the overhead introduced by our
/// [`Node`] structure since a block header is always a node of the registry's
/// linked list.
pub(crate) const BLOCK_HEADER_SIZE: usize = mem::size_of::<Node<Block>>();

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed after this header.
///
/// The following diagram represents the complete header, that is, the block
/// wrapped inside a [`Node`]:
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        |
/// |        prev         |        | -> Header (Node<Block>)
/// +---------------------+        |
/// |        size         |        |
/// |    is_free (1b)     |        |
/// +---------------------+ <------+
/// |       Payload       |        |
/// |         ...         |        |
/// |         ...         |        | -> Addressable content
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// `next` and `prev` order the registry strictly by address: `next` always
/// points at a higher address, `prev` at a lower one. `size` is the usable
/// payload size in bytes, excluding this header, and is always a multiple of
/// [`crate::utils::ALIGNMENT`].
pub(crate) struct Block {
    /// Size of the payload that follows the header.
    pub size: usize,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
}

/// Returns the payload address of a block header. The payload starts
/// immediately after the header.
///
/// ### Safety
/// `node` must point at a live block header inside the managed heap.
pub(crate) unsafe fn payload_of(node: NonNull<Node<Block>>) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(node.as_ptr().cast::<u8>().add(BLOCK_HEADER_SIZE)) }
}

/// Recovers the block header from a payload address previously handed out by
/// the allocator. The header sits at a fixed offset right before the payload.
///
/// ### Safety
/// `payload` must have been produced by [`payload_of`] for a block that is
/// still tracked by the registry.
pub(crate) unsafe fn header_of(payload: NonNull<u8>) -> NonNull<Node<Block>> {
    unsafe { NonNull::new_unchecked(payload.as_ptr().sub(BLOCK_HEADER_SIZE)).cast() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ALIGNMENT;

    #[test]
    fn header_size_is_aligned() {
        assert_eq!(0, BLOCK_HEADER_SIZE % ALIGNMENT);
    }

    #[test]
    fn payload_and_header_are_inverses() {
        let mut storage = [0usize; 16];
        let node = NonNull::new(storage.as_mut_ptr()).unwrap().cast::<Node<Block>>();

        unsafe {
            let payload = payload_of(node);
            assert_eq!(
                BLOCK_HEADER_SIZE,
                payload.as_ptr() as usize - node.as_ptr() as usize
            );
            assert_eq!(node, header_of(payload));
        }
    }
}
