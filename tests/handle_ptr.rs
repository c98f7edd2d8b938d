//! Integration tests for handles and pool pointers.

use std::cell::RefCell;

use objpool::handle::{allocated_handles, set_handle_log_sink, set_handle_strict};
use objpool::sink::buffer_sink;
use objpool::{PoolAllocator, PoolConfig, PoolError, PoolPtr};

fn pool_of<T>() -> PoolAllocator<T> {
    PoolAllocator::new(PoolConfig::debug()).expect("valid configuration")
}

#[test]
fn handle_lifecycle_with_dangling_access() {
    let (sink, contents) = buffer_sink();
    set_handle_log_sink(sink);

    let pool = pool_of::<u64>();
    let handles_before = allocated_handles();

    let mut first = PoolPtr::new_in(10, &pool);
    assert_eq!(allocated_handles(), handles_before + 1);

    let second = first.clone();
    assert_eq!(first.handle().ref_count(), 2);
    assert_eq!(first, second);

    // Explicit free through the first pointer: storage empties, the
    // second pointer still holds its reference.
    first.free().unwrap();
    assert!(first.is_null());
    assert!(second.is_null());
    assert_eq!(second.handle().ref_count(), 1);

    // Dereferencing through the survivor is a dangling access.
    let err = second.try_get().unwrap_err();
    assert!(matches!(err, PoolError::DanglingAccess { .. }));
    let report = String::from_utf8(contents.borrow().clone()).unwrap();
    assert!(report.contains("[Handle]: Attempt to access freed memory. Memory allocated at"));
    assert!(report.contains("tests/handle_ptr.rs"));

    // Dropping the last reference collects the handle.
    drop(second);
    assert_eq!(allocated_handles(), handles_before);

    // The payload pool saw exactly one allocation and one free.
    let stats = pool.stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.deallocations, 1);
    assert_eq!(stats.blocks_in_use, 0);
}

#[test]
fn freeing_a_null_pointer_is_reported() {
    let (sink, contents) = buffer_sink();
    set_handle_log_sink(sink);

    let mut null: PoolPtr<u64> = PoolPtr::null();
    null.free().unwrap();

    let report = String::from_utf8(contents.borrow().clone()).unwrap();
    assert!(report.contains("[Handle]: Attempt to free freed memory. Free attempt at:"));
    assert!(report.contains("tests/handle_ptr.rs"));
}

#[test]
fn strict_handles_raise_double_free() {
    let pool = pool_of::<u64>();
    let mut p = PoolPtr::new_in(1, &pool);
    p.free().unwrap();

    set_handle_strict(true);
    let err = p.free();
    set_handle_strict(false);

    assert!(matches!(err, Err(PoolError::DoubleFree { .. })));
}

#[test]
fn dropping_the_last_reference_without_freeing_is_a_dangling_reference() {
    let (sink, contents) = buffer_sink();
    set_handle_log_sink(sink);

    let pool = pool_of::<u64>();
    let handles_before = allocated_handles();
    {
        let _abandoned = PoolPtr::new_in(3, &pool);
    }

    // The handle was still reclaimed.
    assert_eq!(allocated_handles(), handles_before);
    let report = String::from_utf8(contents.borrow().clone()).unwrap();
    assert!(report.contains("[Handle]: Dangling reference"));

    // The payload itself leaked: freed only when the pool tears down.
    assert_eq!(pool.stats().blocks_in_use, 1);
    assert_eq!(pool.stats().deallocations, 0);
}

#[derive(Default)]
struct Node {
    next: RefCell<PoolPtr<Node>>,
}

#[test]
fn reference_cycles_leak_their_handles() {
    let pool = pool_of::<Node>();
    let handles_before = allocated_handles();

    {
        let a = PoolPtr::new_in(Node::default(), &pool);
        let b = PoolPtr::new_in(Node::default(), &pool);

        // a -> b -> a. Both handles now carry a reference owned by the
        // other node's payload.
        *a.try_get().unwrap().next.borrow_mut() = b.clone();
        *b.try_get().unwrap().next.borrow_mut() = a.clone();

        assert_eq!(a.handle().ref_count(), 2);
        assert_eq!(b.handle().ref_count(), 2);
    }

    // The stack references are gone, but the cycle keeps one reference
    // alive on each handle: this leak is by design, there is no cycle
    // collector.
    assert_eq!(allocated_handles(), handles_before + 2);
    assert_eq!(pool.stats().blocks_in_use, 2);
}

#[test]
fn distinct_allocations_compare_unequal() {
    let pool = pool_of::<u64>();
    let mut a = PoolPtr::new_in(1, &pool);
    let mut b = PoolPtr::new_in(1, &pool);

    assert_ne!(a, b);
    assert_eq!(a, a.clone());

    a.free().unwrap();
    b.free().unwrap();

    // Null pointers all share the sentinel and compare equal.
    assert_eq!(a, b);
    assert_eq!(a, PoolPtr::null());
}

#[test]
fn pointer_free_reports_invalid_pool_status() {
    let (sink, contents) = buffer_sink();
    set_handle_log_sink(sink.clone());

    // The pool shares the sink so both layers report into one stream.
    let pool = PoolAllocator::<u64>::with_sink(sink, PoolConfig::debug()).unwrap();
    let mut p = PoolPtr::new_in(9, &pool);

    // Corrupt the left pad so the pool rejects the free.
    unsafe { p.as_ptr().cast::<u8>().sub(1).write(0) };
    p.free().unwrap();

    let report = String::from_utf8(contents.borrow().clone()).unwrap();
    assert!(report.contains("Pad bytes invalidated for object allocated at"));
    assert!(report.contains("[Handle]: Invalid free attempt failed at:"));

    // The pointer is null afterwards; the block stays allocated and
    // surfaces in the pool's leak accounting.
    assert!(p.is_null());
    assert_eq!(pool.stats().blocks_in_use, 1);
}
