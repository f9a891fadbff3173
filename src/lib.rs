//! # brkalloc
//!
//! A general-purpose dynamic memory allocator over the process break pointer.
//! The heap is one contiguous region whose end coincides with the program
//! break; the allocator grows it with `sbrk(2)` when no tracked block can
//! satisfy a request and moves the break back down with `brk(2)` whenever the
//! trailing block becomes free.
//!
//! Every block carries a header right before the memory handed to the caller,
//! and the headers form one doubly linked list ordered by address:
//!
//! ```text
//! +--------+-----------+--------+-----------+--------+-----------+
//! | Header |  Payload  | Header |  Payload  | Header |  Payload  |
//! | in use |           | free   | (unused)  | in use |           |
//! +--------+-----------+--------+-----------+--------+-----------+
//!     ^ head               ^                    ^ tail            ^ break
//!     |___ next ___________|___ next ___________|
//! ```
//!
//! Free blocks are found with a best-fit scan over that list, split in place
//! when the leftover is worth tracking, and coalesced with free neighbours on
//! release so fragmentation cannot build up between adjacent holes.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use brkalloc::BrkAlloc;
//!
//! #[global_allocator]
//! static ALLOCATOR: BrkAlloc = BrkAlloc::new();
//!
//! fn main() {
//!     // Every heap allocation in the process now goes through the
//!     // break-pointer heap, including the ones the standard library makes.
//!     let greeting = String::from("routed through brkalloc");
//!     println!("{greeting}");
//! }
//! ```
//!
//! The allocator can also be owned directly, which is how the test suite
//! runs it over an in-memory segment instead of the live process break:
//!
//! ```rust,ignore
//! use brkalloc::{FixedSegment, Heap};
//!
//! let mut heap = Heap::new(FixedSegment::new(64 * 1024));
//! let payload = unsafe { heap.allocate(256) }?;
//! ```
//!
//! ## Limitations
//!
//! - Payloads are aligned to 8 bytes. `Layout` alignments above that are not
//!   honoured.
//! - The break-pointer syscalls are POSIX; on other platforms only
//!   [`FixedSegment`] heaps are available.
//! - The core tracks one arena. All global access serializes on one lock.
//! - If a `log` logger is installed *and* this crate is the global
//!   allocator, a logger that allocates while handling the allocator's own
//!   diagnostics will deadlock on that lock. Leave logging uninstalled in
//!   that configuration.

mod block;
mod heap;
mod kernel;
mod list;
mod registry;
mod utils;

pub use heap::{AllocError, Heap};
#[cfg(unix)]
pub use kernel::ProgramBreak;
pub use kernel::{BreakSegment, FixedSegment};

#[cfg(unix)]
use std::{
    alloc::{GlobalAlloc, Layout},
    ptr,
    ptr::NonNull,
};

#[cfg(unix)]
use spin::Mutex;

/// The process-wide allocator: a [`Heap`] over the real program break behind
/// a single lock.
///
/// The lock is a spin mutex because the allocator sits below everything else
/// in the process and cannot call into a blocking lock that might itself
/// allocate. One lock for the whole heap matches the single-arena design;
/// there is nothing finer-grained to protect.
#[cfg(unix)]
pub struct BrkAlloc {
    heap: Mutex<Heap<ProgramBreak>>,
}

#[cfg(unix)]
impl BrkAlloc {
    pub const fn new() -> Self {
        Self {
            heap: Mutex::new(Heap::new(ProgramBreak)),
        }
    }

    /// Allocates `size` bytes. See [`Heap::allocate`].
    ///
    /// ### Safety
    /// The process break must not be moved by anyone else.
    pub unsafe fn allocate(&self, size: usize) -> Result<Option<NonNull<u8>>, AllocError> {
        unsafe { self.heap.lock().allocate(size) }
    }

    /// Allocates zero-filled room for `count` elements of `elem_size` bytes.
    /// See [`Heap::allocate_zeroed`].
    ///
    /// ### Safety
    /// The process break must not be moved by anyone else.
    pub unsafe fn allocate_zeroed(
        &self,
        count: usize,
        elem_size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        unsafe { self.heap.lock().allocate_zeroed(count, elem_size) }
    }

    /// Resizes an allocation. See [`Heap::resize`].
    ///
    /// ### Safety
    /// `payload`, when present, must come from this allocator and be live.
    pub unsafe fn resize(
        &self,
        payload: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        unsafe { self.heap.lock().resize(payload, new_size) }
    }

    /// Releases an allocation. See [`Heap::release`].
    ///
    /// ### Safety
    /// `payload`, when present, must come from this allocator, be live, and
    /// never be used again.
    pub unsafe fn release(&self, payload: Option<NonNull<u8>>) {
        unsafe { self.heap.lock().release(payload) }
    }
}

#[cfg(unix)]
impl Default for BrkAlloc {
    fn default() -> Self {
        Self::new()
    }
}

/// The trait collapses all three outcomes that are not a fresh payload onto
/// the null pointer, exactly as the C allocation routines do.
#[cfg(unix)]
unsafe impl GlobalAlloc for BrkAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { flatten(self.heap.lock().allocate(layout.size())) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        unsafe { flatten(self.heap.lock().allocate_zeroed(layout.size(), 1)) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        unsafe { flatten(self.heap.lock().resize(NonNull::new(ptr), new_size)) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.heap.lock().release(NonNull::new(ptr)) }
    }
}

#[cfg(unix)]
fn flatten(result: Result<Option<NonNull<u8>>, AllocError>) -> *mut u8 {
    match result {
        Ok(Some(payload)) => payload.as_ptr(),
        Ok(None) | Err(_) => ptr::null_mut(),
    }
}
