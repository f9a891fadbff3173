//! Drives the raw allocation surface directly: allocate a few blocks, print
//! where they landed, resize one, and release everything.

use std::ptr::NonNull;

use brkalloc::BrkAlloc;

fn log_alloc(label: &str, addr: NonNull<u8>, size: usize) {
    println!("{label}: {size} bytes at {:?}", addr.as_ptr());
}

fn main() {
    let allocator = BrkAlloc::new();

    unsafe {
        let a = allocator.allocate(64).unwrap().unwrap();
        log_alloc("a", a, 64);

        let b = allocator.allocate_zeroed(16, 8).unwrap().unwrap();
        log_alloc("b", b, 16 * 8);

        let c = allocator.allocate(256).unwrap().unwrap();
        log_alloc("c", c, 256);

        // Growing `b` moves it past `c`, its zeroed contents travel along.
        let b = allocator.resize(Some(b), 1024).unwrap().unwrap();
        log_alloc("b resized", b, 1024);

        allocator.release(Some(a));
        allocator.release(Some(b));
        allocator.release(Some(c));

        // A zero-sized request allocates nothing at all.
        assert_eq!(Ok(None), allocator.allocate(0));
    }
}
