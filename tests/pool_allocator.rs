//! Integration tests for the pool allocator.

use objpool::sink::buffer_sink;
use objpool::{FreeStatus, PoolAllocator, PoolConfig, PoolError};

fn debug_config() -> PoolConfig {
    PoolConfig::debug()
}

#[test]
fn allocate_free_cycle_with_defaults() {
    let pool = PoolAllocator::<u64>::new(debug_config()).expect("valid configuration");

    let block = pool.allocate();
    assert_eq!(block.as_ptr() as usize % 4, 0);

    let status = unsafe { pool.free(block) }.unwrap();
    assert_eq!(status, FreeStatus::Ok);

    let stats = pool.stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.deallocations, 1);
    assert_eq!(stats.blocks_in_use, 0);
    assert_eq!(stats.free_blocks, 1024);
}

#[test]
fn double_free_returns_freed_and_reports() {
    let (sink, contents) = buffer_sink();
    let pool = PoolAllocator::<u64>::with_sink(sink, debug_config()).unwrap();

    let block = pool.allocate();
    unsafe { pool.free(block) }.unwrap();
    assert_eq!(pool.stats().blocks_in_use, 0);

    let status = unsafe { pool.free(block) }.unwrap();
    assert_eq!(status, FreeStatus::AlreadyFreed);
    assert_eq!(status.as_byte(), 0xBB);

    // The gauge is not decremented twice.
    let stats = pool.stats();
    assert_eq!(stats.blocks_in_use, 0);
    assert_eq!(stats.deallocations, 1);

    let report = String::from_utf8(contents.borrow().clone()).unwrap();
    assert!(report.contains("Attempt to free already freed memory from #"));
    assert!(report.contains("in file tests/pool_allocator.rs"));
}

#[test]
fn misaligned_free_returns_align_and_reports() {
    let (sink, contents) = buffer_sink();
    let pool = PoolAllocator::<u64>::with_sink(sink, debug_config()).unwrap();

    let block = pool.allocate();
    let skewed = unsafe { std::ptr::NonNull::new_unchecked(block.as_ptr().byte_add(1)) };

    let status = unsafe { pool.free(skewed) }.unwrap();
    assert_eq!(status, FreeStatus::BadAlignment);
    assert_eq!(status.as_byte(), 0xEE);

    let report = String::from_utf8(contents.borrow().clone()).unwrap();
    assert!(report.contains("Invalid alignment on free from #"));

    unsafe { pool.free(block) }.unwrap();
}

#[test]
fn pad_overrun_cites_the_allocation_callsite() {
    let (sink, contents) = buffer_sink();
    let config = PoolConfig {
        pad_bytes: 2,
        ..debug_config()
    };
    let pool = PoolAllocator::<u64>::with_sink(sink, config).unwrap();

    let alloc_line = line!() + 1;
    let block = pool.allocate();
    unsafe { block.as_ptr().cast::<u8>().sub(1).write(0) };

    let status = unsafe { pool.free(block) }.unwrap();
    assert_eq!(status, FreeStatus::PadCorrupted);
    assert_eq!(status.as_byte(), 0xDD);

    let report = String::from_utf8(contents.borrow().clone()).unwrap();
    let expected = format!(
        "Pad bytes invalidated for object allocated at #{alloc_line} in file tests/pool_allocator.rs"
    );
    assert!(
        report.contains(&expected),
        "report should cite the allocation, got: {report}"
    );
}

#[test]
fn teardown_dumps_surviving_allocations() {
    let (sink, contents) = buffer_sink();
    {
        let pool = PoolAllocator::<u64>::with_sink(sink, debug_config()).unwrap();
        let _first = pool.insert(1);
        let second = pool.insert(2);
        let _third = pool.insert(3);
        unsafe { pool.free(second) }.unwrap();
    }

    let report = String::from_utf8(contents.borrow().clone()).unwrap();
    let leaks: Vec<_> = report
        .lines()
        .filter(|line| line.contains("allocated at line #"))
        .collect();
    assert_eq!(leaks.len(), 2);
    for line in leaks {
        assert!(line.starts_with("8b allocated at line #"));
        assert!(line.ends_with("in file tests/pool_allocator.rs"));
    }
}

#[test]
fn log_file_sink_receives_the_leak_dump() {
    let path = std::env::temp_dir().join(format!("objpool-leaks-{}.log", std::process::id()));
    {
        let pool = PoolAllocator::<u64>::with_log_file(&path, debug_config()).unwrap();
        let _leaked = pool.insert(7);
    }

    let report = std::fs::read_to_string(&path).unwrap();
    assert!(report.contains("8b allocated at line #"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn stats_conservation_across_many_pages() {
    let config = PoolConfig {
        blocks_per_page: 8,
        ..debug_config()
    };
    let pool = PoolAllocator::<u32>::new(config).unwrap();

    let mut live = Vec::new();
    for _ in 0..20 {
        live.push(pool.allocate());
    }
    for block in live.drain(5..) {
        unsafe { pool.free(block) }.unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.pages_in_use, 3);
    assert_eq!(
        stats.free_blocks + stats.blocks_in_use,
        stats.pages_in_use * pool.blocks_per_page()
    );
    assert_eq!(stats.allocations - stats.deallocations, stats.blocks_in_use);
    assert_eq!(stats.most_blocks_in_use, 20);
    assert_eq!(stats.most_pages_in_use, 3);

    for block in live {
        unsafe { pool.free(block) }.unwrap();
    }
}

#[test]
fn boundary_single_block_per_page() {
    let config = PoolConfig {
        blocks_per_page: 1,
        ..debug_config()
    };
    let pool = PoolAllocator::<u64>::new(config).unwrap();

    let a = pool.allocate();
    let b = pool.allocate();
    assert_eq!(pool.stats().pages_in_use, 2);

    unsafe {
        pool.free(a).unwrap();
        pool.free(b).unwrap();
    }
    assert_eq!(pool.stats().free_blocks, 2);
    assert_eq!(pool.stats().blocks_in_use, 0);
}

#[test]
fn boundary_no_pads_and_byte_alignment() {
    let config = PoolConfig {
        pad_bytes: 0,
        alignment: 1,
        blocks_per_page: 4,
        ..debug_config()
    };
    let pool = PoolAllocator::<u8>::new(config).unwrap();

    // Blocks widen to hold the free-list link even for byte payloads.
    assert_eq!(pool.block_size(), core::mem::size_of::<*mut u8>());

    let block = pool.insert(0xA5);
    assert_eq!(unsafe { *block.as_ptr() }, 0xA5);
    let status = unsafe { pool.free(block) }.unwrap();
    assert_eq!(status, FreeStatus::Ok);
}

#[test]
fn strict_pool_raises_validation_failures() {
    let config = PoolConfig::strict();
    let pool = PoolAllocator::<u64>::new(config).unwrap();

    let block = pool.allocate();
    unsafe { pool.free(block) }.unwrap();

    let err = unsafe { pool.free(block) }.unwrap_err();
    assert!(matches!(err, PoolError::DoubleFree { .. }));

    // The failed free changed nothing.
    assert_eq!(pool.stats().deallocations, 1);
    assert_eq!(pool.stats().blocks_in_use, 0);
}

#[test]
fn production_pool_recycles_without_instrumentation() {
    let pool = PoolAllocator::<u64>::new(PoolConfig::production()).unwrap();

    let first = pool.insert(1);
    let addr = first.as_ptr() as usize;
    unsafe { pool.free(first) }.unwrap();

    let second = pool.insert(2);
    assert_eq!(second.as_ptr() as usize, addr, "free blocks are reused");
    assert_eq!(pool.stats().allocations, 0, "no stats without debug checks");

    unsafe { pool.free(second) }.unwrap();
}
