use std::ptr::NonNull;

use crate::{
    block::{BLOCK_HEADER_SIZE, Block, payload_of},
    list::{Link, List, Node},
    utils::ALIGNMENT,
};

/// The block registry: one address-ordered linked list spanning every block,
/// free or in use, currently carved out of the managed heap.
///
/// ```text
///  low addresses                                              high addresses
///  +--------+---------+--------+----------+--------+------------------+
///  | Header | Payload | Header | Payload  | Header |     Payload      |
///  | in use |         | free   | (unused) | in use |                  |
///  +--------+---------+--------+----------+--------+------------------+
///      ^                  ^                   ^
///      head               head.next           head.next.next
/// ```
///
/// There is no separate structure indexing the free blocks. Free ones are
/// identified by [`Block::is_free`] and found by walking the list, trading
/// search cost for metadata simplicity. The registry is the only module that
/// performs block pointer arithmetic; everything else talks in terms of
/// [`Node<Block>`] handles and payload pointers.
pub(crate) struct Registry {
    blocks: List<Block>,
}

impl Registry {
    pub const fn new() -> Self {
        Self { blocks: List::new() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn last(&self) -> Link<Node<Block>> {
        self.blocks.last()
    }

    /// Writes a new trailing block header at `addr` and links it after the
    /// current last block. Used by the heap grower, which always appends at
    /// the high-address end.
    ///
    /// ### Safety
    /// `addr` must be valid for `BLOCK_HEADER_SIZE + block.size` bytes and sit
    /// above every block already tracked.
    pub unsafe fn append_block(&mut self, block: Block, addr: NonNull<u8>) -> NonNull<Node<Block>> {
        unsafe { self.blocks.append(block, addr) }
    }

    /// Best-fit search: walks every block in address order and, among the free
    /// ones large enough for `size`, keeps the one with the smallest payload.
    /// The strict `<` comparison breaks ties in favour of the first (lowest
    /// address) candidate seen.
    pub fn best_fit(&self, size: usize) -> Link<Node<Block>> {
        let mut fit: Link<Node<Block>> = None;
        let mut current = self.blocks.first();

        while let Some(node) = current {
            unsafe {
                let block = &node.as_ref().data;

                if block.is_free && block.size >= size {
                    let smaller = match fit {
                        Some(best) => block.size < best.as_ref().data.size,
                        None => true,
                    };

                    if smaller {
                        fit = Some(node);
                    }
                }

                current = node.as_ref().next;
            }
        }

        fit
    }

    /// Splits `node` into an exact-fit prefix of `target` payload bytes and a
    /// free remainder block, when the remainder is worth tracking.
    ///
    /// The remainder has to host its own header and still offer at least one
    /// alignment unit of payload, otherwise the whole block is handed over
    /// as-is and the extra bytes stay inside the allocated block.
    ///
    /// ### Safety
    /// `node` must be a registry block with `size >= target`, and `target`
    /// must be aligned.
    pub unsafe fn split(&mut self, mut node: NonNull<Node<Block>>, target: usize) {
        unsafe {
            let Some(remainder) = node.as_ref().data.size.checked_sub(target + BLOCK_HEADER_SIZE)
            else {
                return;
            };

            if remainder <= BLOCK_HEADER_SIZE + ALIGNMENT {
                return;
            }

            // The remainder block starts right after the target payload.
            let addr = NonNull::new_unchecked(payload_of(node).as_ptr().add(target));

            self.blocks.insert_after(
                node,
                Block {
                    size: remainder,
                    is_free: true,
                },
                addr,
            );

            node.as_mut().data.size = target;
        }
    }

    /// Tries to merge the given block `node` with the next one on the list.
    /// This can be performed if that next block is free.
    ///
    /// The absorbed neighbour's header and payload both become payload of
    /// `node`, so the size grows by the neighbour's size plus one header.
    ///
    /// ### Safety
    /// `node` must be a registry block.
    pub unsafe fn merge_with_next(&mut self, mut node: NonNull<Node<Block>>) {
        unsafe {
            if let Some(next_node) = node.as_ref().next {
                let next_block = &next_node.as_ref().data;

                if next_block.is_free {
                    node.as_mut().data.size += BLOCK_HEADER_SIZE + next_block.size;

                    // The neighbour is gone as metadata, its bytes now belong
                    // to `node`'s payload.
                    self.blocks.remove(next_node);
                }
            }
        }
    }

    /// Tries to merge the given block `node` with the previous one on the
    /// list. This can be performed if that previous block is free.
    ///
    /// On a merge the previous block absorbs `node`, so the handle is rebound
    /// to the previous block: the caller's "current" block for any further
    /// logic is the surviving one.
    ///
    /// ### Safety
    /// `node` must be a registry block.
    pub unsafe fn merge_with_prev(&mut self, node: &mut NonNull<Node<Block>>) {
        unsafe {
            if let Some(mut prev_node) = node.as_ref().prev {
                if prev_node.as_ref().data.is_free {
                    prev_node.as_mut().data.size += BLOCK_HEADER_SIZE + node.as_ref().data.size;

                    self.blocks.remove(*node);

                    // The current block is now its previous one.
                    *node = prev_node;
                }
            }
        }
    }

    /// Unlinks `node` from the registry without touching its bytes. Used when
    /// the trailing block is handed back to the operating system: its
    /// predecessor becomes the last block, or the registry becomes empty if it
    /// was the only one.
    ///
    /// ### Safety
    /// `node` must be a registry block.
    pub unsafe fn detach(&mut self, node: NonNull<Node<Block>>) {
        unsafe { self.blocks.remove(node) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hand-builds a registry over a local buffer with the given payload
    // sizes and free flags, returning the node handles. The u64 storage
    // keeps every header address 8-byte aligned.
    fn build(
        storage: &mut [u64],
        blocks: &[(usize, bool)],
        registry: &mut Registry,
    ) -> Vec<NonNull<Node<Block>>> {
        let base = storage.as_mut_ptr().cast::<u8>();
        let mut nodes = Vec::new();
        let mut offset = 0;

        for &(size, is_free) in blocks {
            let addr = NonNull::new(unsafe { base.add(offset) }).unwrap();
            nodes.push(unsafe { registry.append_block(Block { size, is_free }, addr) });
            offset += BLOCK_HEADER_SIZE + size;
        }

        assert!(offset <= storage.len() * 8, "test storage too small");
        nodes
    }

    #[test]
    fn best_fit_prefers_smallest_sufficient_block() {
        let mut storage = [0u64; 256];
        let mut registry = Registry::new();

        let nodes = build(
            &mut storage,
            &[(128, true), (64, false), (32, true), (48, true)],
            &mut registry,
        );

        // 32 is the smallest free block that holds 24 bytes.
        assert_eq!(registry.best_fit(24), Some(nodes[2]));
        // 32 is too small for 40, the 48 block wins over the earlier 128.
        assert_eq!(registry.best_fit(40), Some(nodes[3]));
        // Only the 128 block holds 100 bytes.
        assert_eq!(registry.best_fit(100), Some(nodes[0]));
        // Nothing free is big enough.
        assert_eq!(registry.best_fit(256), None);
    }

    #[test]
    fn best_fit_ties_go_to_lowest_address() {
        let mut storage = [0u64; 128];
        let mut registry = Registry::new();

        let nodes = build(&mut storage, &[(64, true), (64, true)], &mut registry);

        assert_eq!(registry.best_fit(64), Some(nodes[0]));
    }

    #[test]
    fn split_carves_free_remainder() {
        let mut storage = [0u64; 64];
        let mut registry = Registry::new();

        let nodes = build(&mut storage, &[(256, true)], &mut registry);

        unsafe {
            registry.split(nodes[0], 64);

            assert_eq!(registry.len(), 2);
            assert_eq!(nodes[0].as_ref().data.size, 64);

            let remainder = nodes[0].as_ref().next.unwrap();
            assert!(remainder.as_ref().data.is_free);
            assert_eq!(remainder.as_ref().data.size, 256 - 64 - BLOCK_HEADER_SIZE);
            assert_eq!(registry.last(), Some(remainder));

            // The remainder header sits right at the end of the new payload.
            assert_eq!(
                remainder.as_ptr() as usize,
                payload_of(nodes[0]).as_ptr() as usize + 64
            );
        }
    }

    #[test]
    fn split_below_threshold_is_a_no_op() {
        let mut storage = [0u64; 32];
        let mut registry = Registry::new();

        // Remainder would be BLOCK_HEADER_SIZE + ALIGNMENT exactly, which is
        // not strictly above the threshold.
        let size = 64 + BLOCK_HEADER_SIZE + BLOCK_HEADER_SIZE + ALIGNMENT;
        let nodes = build(&mut storage, &[(size, true)], &mut registry);

        unsafe {
            registry.split(nodes[0], 64);

            assert_eq!(registry.len(), 1);
            assert_eq!(nodes[0].as_ref().data.size, size);
        }
    }

    #[test]
    fn merges_absorb_neighbours() {
        let mut storage = [0u64; 128];
        let mut registry = Registry::new();

        let nodes = build(
            &mut storage,
            &[(64, true), (32, true), (48, true)],
            &mut registry,
        );

        unsafe {
            let mut current = nodes[1];
            registry.merge_with_next(current);
            assert_eq!(registry.len(), 2);
            assert_eq!(current.as_ref().data.size, 32 + BLOCK_HEADER_SIZE + 48);

            registry.merge_with_prev(&mut current);
            assert_eq!(registry.len(), 1);
            assert_eq!(current, nodes[0]);
            assert_eq!(
                current.as_ref().data.size,
                64 + BLOCK_HEADER_SIZE + 32 + BLOCK_HEADER_SIZE + 48
            );
            assert!(current.as_ref().next.is_none());
            assert_eq!(registry.last(), Some(current));
        }
    }
}
