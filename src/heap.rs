use std::{fmt, ptr, ptr::NonNull};

use crate::{
    block::{BLOCK_HEADER_SIZE, Block, header_of, payload_of},
    kernel::BreakSegment,
    list::Node,
    registry::Registry,
    utils::align,
};

/// Minimum number of bytes requested from the operating system on each heap
/// growth. Growing a whole pool at a time amortizes the syscall across many
/// small allocations.
pub(crate) const MIN_POOL_SIZE: usize = 6 * 1024;

/// Failure reported by the allocating operations.
///
/// A zero-sized request is not a failure; it comes back as `Ok(None)` from
/// the operations themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The operating system refused to grant more address space.
    OutOfMemory,
    /// The element count times element size computation of
    /// [`Heap::allocate_zeroed`] overflowed.
    SizeOverflow,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => f.write_str("out of memory"),
            AllocError::SizeOverflow => f.write_str("allocation size overflow"),
        }
    }
}

impl std::error::Error for AllocError {}

/// The allocator core: one registry of blocks over one growable segment.
///
/// All state lives in this one owner. The methods take `&mut self`, which is
/// the whole concurrency story of the core: a single logical thread of
/// control touches the registry, and multi-threaded use has to put an
/// explicit lock around the entire heap (see [`crate::BrkAlloc`]).
///
/// A request flows through here as follows: normalize the size, scan the
/// registry for a best-fit free block, split it when the leftover is worth
/// tracking, and only when no tracked block fits ask the segment for more
/// address space. Releases mark the block free, coalesce it with free
/// neighbours, and hand the heap's tail back to the operating system when it
/// ends up free.
pub struct Heap<S: BreakSegment> {
    pub(crate) registry: Registry,
    pub(crate) segment: S,
}

// The registry's header pointers all point into the segment the heap owns,
// so the heap moves between threads as one unit.
unsafe impl<S: BreakSegment + Send> Send for Heap<S> {}

impl<S: BreakSegment> Heap<S> {
    pub const fn new(segment: S) -> Self {
        Self {
            registry: Registry::new(),
            segment,
        }
    }

    /// Allocates `size` bytes and returns the payload address.
    ///
    /// A zero `size` is degenerate rather than fatal and yields `Ok(None)`.
    /// The size is rounded up to the alignment unit, so the payload handed
    /// out may be slightly larger than requested.
    ///
    /// ### Safety
    /// Caller must be the only user of this heap's segment.
    pub unsafe fn allocate(&mut self, size: usize) -> Result<Option<NonNull<u8>>, AllocError> {
        if size == 0 {
            return Ok(None);
        }

        let size = align(size);

        // `align` wraps to zero only for sizes within one unit of
        // `usize::MAX`; no segment can back those.
        if size == 0 {
            return Err(AllocError::OutOfMemory);
        }

        let node = if self.registry.is_empty() {
            unsafe { self.extend(size)? }
        } else {
            match self.registry.best_fit(size) {
                Some(mut fit) => unsafe {
                    self.registry.split(fit, size);
                    fit.as_mut().data.is_free = false;
                    fit
                },
                // No tracked block fits, grow past the last block.
                None => unsafe { self.extend(size)? },
            }
        };

        Ok(Some(unsafe { payload_of(node) }))
    }

    /// Allocates room for `count` elements of `elem_size` bytes each and
    /// zero-fills the whole (normalized) payload before returning it.
    ///
    /// Either argument being zero yields `Ok(None)`. The product is computed
    /// with overflow checking and fails closed: a wrapped size would silently
    /// hand out less memory than the caller's arithmetic implies.
    ///
    /// ### Safety
    /// Caller must be the only user of this heap's segment.
    pub unsafe fn allocate_zeroed(
        &mut self,
        count: usize,
        elem_size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        if count == 0 || elem_size == 0 {
            return Ok(None);
        }

        let total = count
            .checked_mul(elem_size)
            .ok_or(AllocError::SizeOverflow)?;
        let total = align(total);

        // Normalization wrapped, the product was within one unit of
        // `usize::MAX`.
        if total == 0 {
            return Err(AllocError::SizeOverflow);
        }

        let payload = unsafe { self.allocate(total)? };

        if let Some(payload) = payload {
            unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };
        }

        Ok(payload)
    }

    /// Resizes the allocation behind `payload` to `new_size` bytes.
    ///
    /// A zero `new_size` behaves exactly like [`release`] and yields
    /// `Ok(None)`; an absent `payload` behaves exactly like [`allocate`].
    /// When the block already holds `new_size` bytes the same pointer comes
    /// back untouched; a block once grown into stays large until it is freed
    /// and re-split by a later allocation. Otherwise the contents move to a
    /// fresh block and the old one is released. If that fresh allocation
    /// fails the old block is left as it was, so nothing is lost.
    ///
    /// [`release`]: Heap::release
    /// [`allocate`]: Heap::allocate
    ///
    /// ### Safety
    /// `payload`, when present, must come from this heap and still be live.
    pub unsafe fn resize(
        &mut self,
        payload: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        if new_size == 0 {
            unsafe { self.release(payload) };
            return Ok(None);
        }

        let Some(payload) = payload else {
            return unsafe { self.allocate(new_size) };
        };

        unsafe {
            let node = header_of(payload);
            let old_size = node.as_ref().data.size;

            if old_size >= new_size {
                return Ok(Some(payload));
            }

            let new_payload = match self.allocate(new_size)? {
                Some(addr) => addr,
                None => return Ok(None),
            };

            ptr::copy_nonoverlapping(payload.as_ptr(), new_payload.as_ptr(), old_size);
            self.release(Some(payload));

            Ok(Some(new_payload))
        }
    }

    /// Releases the allocation behind `payload`. An absent pointer is a
    /// no-op.
    ///
    /// The block is marked free and coalesced with free neighbours. If the
    /// surviving block turns out to be the heap's trailing block it is
    /// detached from the registry and the segment is asked to move its end
    /// back down. A refused shrink is logged and otherwise swallowed: the
    /// registry has already completed the release, so we accept leaking a
    /// little address space to the operating system over corrupting our own
    /// state.
    ///
    /// ### Safety
    /// `payload`, when present, must come from this heap, be live, and never
    /// be used again after this call.
    pub unsafe fn release(&mut self, payload: Option<NonNull<u8>>) {
        let Some(payload) = payload else {
            return;
        };

        unsafe {
            let mut node = header_of(payload);
            node.as_mut().data.is_free = true;

            self.registry.merge_with_next(node);
            self.registry.merge_with_prev(&mut node);

            // A free trailing block goes back to the operating system.
            if node.as_ref().next.is_none() && node.as_ref().data.is_free {
                self.registry.detach(node);

                if let Err(err) = self.segment.shrink(node.cast::<u8>()) {
                    log::error!("failed to return trailing heap space: {err}");
                }
            }
        }
    }

    /// Grows the heap and carves the granted span into an in-use block of
    /// exactly `size` payload bytes, linked after the current last block,
    /// plus a trailing free block when the leftover is big enough to host
    /// its own header.
    ///
    /// The request to the operating system is never smaller than
    /// [`MIN_POOL_SIZE`]. Failure of the underlying call propagates as
    /// [`AllocError::OutOfMemory`] and is not retried.
    unsafe fn extend(&mut self, size: usize) -> Result<NonNull<Node<Block>>, AllocError> {
        let needed = size
            .checked_add(BLOCK_HEADER_SIZE)
            .ok_or(AllocError::OutOfMemory)?;

        let total = if needed > MIN_POOL_SIZE {
            align(needed)
        } else {
            MIN_POOL_SIZE
        };

        if total < needed {
            return Err(AllocError::OutOfMemory);
        }

        let start = unsafe { self.segment.grow(total) }.ok_or(AllocError::OutOfMemory)?;

        log::trace!("heap extended by {total} bytes for a {size} byte block");

        let node = unsafe {
            self.registry.append_block(
                Block {
                    size,
                    is_free: false,
                },
                start,
            )
        };

        // Whatever the pool granted beyond the request becomes a trailing
        // free block, provided it can pay for its own header.
        let remainder = total - size - BLOCK_HEADER_SIZE;

        if remainder > BLOCK_HEADER_SIZE {
            let tail_addr = unsafe { NonNull::new_unchecked(payload_of(node).as_ptr().add(size)) };

            unsafe {
                self.registry.append_block(
                    Block {
                        size: remainder - BLOCK_HEADER_SIZE,
                        is_free: true,
                    },
                    tail_addr,
                );
            }
        }

        Ok(node)
    }
}
