//! This demo is designed to test the `GlobalAlloc` implementation on our
//! allocator: every heap allocation the standard library makes below routes
//! through the break-pointer heap. See [`BrkAlloc`] for the actual trait
//! implementation.

use std::thread;

use brkalloc::BrkAlloc;

#[global_allocator]
static ALLOCATOR: BrkAlloc = BrkAlloc::new();

fn main() {
    // Box example
    let val_box = Box::new(22);
    println!("Box Value: {}, At: {:p}", val_box, val_box);

    // Vec example
    let mut v = Vec::new();
    for i in 0..5 {
        v.push(i * 10);
        println!("Added {}; Capacity: {}; At: {:p}", v[i], v.capacity(), v.as_ptr());
    }

    // String example
    let msg = String::from("Heap Testing");
    println!("\nString '{}' - At: {:p}", msg, msg.as_ptr());

    let p1 = Box::new(2.22);
    let addr_p1 = format!("{:p}", p1);
    println!("P1 Allocated at: {addr_p1}");

    drop(p1);
    println!("P1 Deallocated");

    let p2 = Box::new(2.22);
    println!("P2 at: {:p}", p2);

    // Coalescing example: two adjacent released blocks should merge into a
    // hole big enough for the larger allocation that follows.
    let a = Box::new([0u8; 64]);
    let b = Box::new([0u8; 64]);
    let ptr_a = a.as_ptr();

    drop(a);
    drop(b);

    let c = Box::new([0u8; 128]);
    let ptr_c = c.as_ptr();

    if ptr_a == ptr_c {
        println!("Correctly reused at {ptr_c:p}");
    } else {
        println!("Not reused. A was at {ptr_a:p} and C is at {ptr_c:p}");
    }

    // Threads contend on the allocator's lock rather than corrupting it.
    let t1 = thread::spawn(|| {
        let _ = Box::new(222);
    });

    let t2 = thread::spawn(|| {
        let _ = Box::new(222);
    });

    t1.join().unwrap();
    t2.join().unwrap();
}
