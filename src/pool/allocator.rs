//! Fixed-block pool allocator.
//!
//! The allocator carves raw pages into equally-sized blocks and hands
//! them out through a singly-linked free list threaded through the
//! blocks themselves. While debug checks are enabled every block is
//! wrapped in a chunk carrying a header, pad canaries, and alignment
//! filler, and every free is validated before the block re-enters
//! circulation.
//!
//! ## Invariants
//!
//! - Pages are linked through their first word and freed only at
//!   teardown; block addresses are stable for the pool's lifetime.
//! - A free block's first bytes hold the next-free link; an allocated
//!   block holds a live `T`.
//! - `free_blocks + blocks_in_use == pages_in_use * blocks_per_page`
//!   whenever statistics are maintained.

use core::cell::{Cell, RefCell};
use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use std::alloc::{self, handle_alloc_error, Layout};
use std::io::{self, Write};
use std::path::Path;

use tracing::{debug, trace};

use crate::error::{FreeStatus, PoolError, PoolResult};
use crate::pool::config::PoolConfig;
use crate::pool::layout::{DebugHeader, PageLayout, LINK_SIZE};
use crate::pool::stats::{PoolStats, StatsCells};
use crate::sink::{self, SharedSink};
use crate::utils::{signature, Callsite};

/// Typed fixed-block allocator.
///
/// All operations take `&self`; the pool is single-threaded and uses
/// interior mutability for its lists and counters. Blocks returned by
/// [`allocate`](Self::allocate) stay valid until they are freed or the
/// pool is dropped.
///
/// Dropping the pool releases every page without running destructors
/// for leaked blocks; in debug mode the leak report is written to the
/// configured sink first.
pub struct PoolAllocator<T> {
    layout: PageLayout,
    /// Allocation layout of one page, validated at construction.
    page_alloc: Layout,
    debug_checks: bool,
    strict: Cell<bool>,
    /// Head of the page list; each page's first word links to the next.
    page_list: Cell<*mut u8>,
    /// Head of the free list, threaded through free block bytes.
    free_list: Cell<*mut u8>,
    stats: StatsCells,
    sink: RefCell<Option<SharedSink>>,
    _marker: PhantomData<T>,
}

impl<T> PoolAllocator<T> {
    /// Creates a pool with no log sink.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] when the alignment is not a
    /// power of two, `blocks_per_page` is zero, or the resulting page
    /// size overflows the address space.
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        if !config.alignment.is_power_of_two() {
            return Err(PoolError::InvalidConfig {
                reason: "alignment must be a power of two",
            });
        }
        if config.blocks_per_page == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "blocks_per_page must be non-zero",
            });
        }
        let layout = PageLayout::for_type::<T>(&config).ok_or(PoolError::InvalidConfig {
            reason: "page size overflows the address space",
        })?;
        let page_alloc = Layout::from_size_align(layout.page_size, layout.page_align()).map_err(
            |_| PoolError::InvalidConfig {
                reason: "page size overflows the address space",
            },
        )?;

        Ok(Self {
            layout,
            page_alloc,
            debug_checks: config.debug_checks,
            strict: Cell::new(config.strict),
            page_list: Cell::new(ptr::null_mut()),
            free_list: Cell::new(ptr::null_mut()),
            stats: StatsCells::default(),
            sink: RefCell::new(None),
            _marker: PhantomData,
        })
    }

    /// Creates a pool that reports to `sink`.
    pub fn with_sink(sink: SharedSink, config: PoolConfig) -> PoolResult<Self> {
        let pool = Self::new(config)?;
        *pool.sink.borrow_mut() = Some(sink);
        Ok(pool)
    }

    /// Creates a pool that opens `path` as its log sink.
    ///
    /// The file closes when the pool (and any other clone of the sink)
    /// drops.
    ///
    /// # Errors
    ///
    /// I/O errors from opening the file; configuration errors surface
    /// as [`io::ErrorKind::InvalidInput`].
    pub fn with_log_file(path: impl AsRef<Path>, config: PoolConfig) -> io::Result<Self> {
        let sink = sink::file_sink(path)?;
        Self::with_sink(sink, config).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    /// Allocates one block and returns its address.
    ///
    /// The block is uninitialized (poisoned with the `ALLOCATED`
    /// signature in debug mode); the caller writes a `T` into it. A new
    /// page is created when the free list is empty. Aborts via
    /// [`handle_alloc_error`] if the host allocator cannot provide a
    /// page.
    #[must_use]
    #[track_caller]
    pub fn allocate(&self) -> NonNull<T> {
        self.allocate_with(Callsite::caller())
    }

    /// [`allocate`](Self::allocate) with an explicit callsite.
    #[must_use]
    pub fn allocate_with(&self, callsite: Callsite) -> NonNull<T> {
        if self.free_list.get().is_null() {
            self.create_page();
        }
        let block = self.pop_free();

        if self.debug_checks {
            // SAFETY: `block` came off the free list, so it addresses
            // `block_size` writable bytes inside one of our pages.
            unsafe {
                ptr::write_bytes(block, signature::ALLOCATED, self.layout.block_size);
                self.write_header(block, DebugHeader::live(callsite));
            }
            self.stats.record_allocation();
        }

        // SAFETY: free-list entries are never null and are aligned to
        // the effective boundary, which is at least `align_of::<T>()`.
        unsafe { NonNull::new_unchecked(block.cast::<T>()) }
    }

    /// Allocates a block and moves `value` into it.
    #[must_use]
    #[track_caller]
    pub fn insert(&self, value: T) -> NonNull<T> {
        self.insert_with(value, Callsite::caller())
    }

    /// [`insert`](Self::insert) with an explicit callsite.
    #[must_use]
    pub fn insert_with(&self, value: T, callsite: Callsite) -> NonNull<T> {
        let block = self.allocate_with(callsite);
        // SAFETY: `block` is a fresh, aligned, uninitialized slot.
        unsafe { block.as_ptr().write(value) };
        block
    }

    /// Destroys the value at `ptr` and returns its block to the pool.
    ///
    /// In debug mode the free is validated first: page residency, then
    /// block alignment, then double-free, then pad canaries. A failed
    /// validation is reported to the log sink and returns the matching
    /// status (or, in strict mode, the matching error) without touching
    /// pool state.
    ///
    /// # Safety
    ///
    /// `ptr` must point into a page of this pool (in debug mode a stray
    /// pointer is caught by a debug assertion; in release it is
    /// undefined behavior), and the block must contain a live `T` if
    /// validation passes.
    #[track_caller]
    pub unsafe fn free(&self, ptr: NonNull<T>) -> PoolResult<FreeStatus> {
        // SAFETY: forwarded caller contract.
        unsafe { self.free_with(ptr, Callsite::caller()) }
    }

    /// [`free`](Self::free) with an explicit callsite.
    ///
    /// # Safety
    ///
    /// Same contract as [`free`](Self::free).
    pub unsafe fn free_with(&self, ptr: NonNull<T>, callsite: Callsite) -> PoolResult<FreeStatus> {
        let block = ptr.as_ptr().cast::<u8>();

        if self.debug_checks {
            if let Err((status, error)) = self.validate_free(block, callsite) {
                if self.strict.get() {
                    return Err(error);
                }
                return Ok(status);
            }
        }

        // SAFETY: validation passed (or checks are off and the caller
        // vouches for the pointer); the block holds a live `T`.
        unsafe { ptr::drop_in_place(ptr.as_ptr()) };

        if self.debug_checks {
            // SAFETY: `block` addresses `block_size` bytes inside a
            // page, preceded by its header.
            unsafe {
                ptr::write_bytes(block, signature::FREED, self.layout.block_size);
                ptr::write_bytes(self.header_ptr(block).cast::<u8>(), 0, self.layout.header_size);
            }
            self.stats.record_deallocation();
        }

        self.push_free(block);
        Ok(FreeStatus::Ok)
    }

    /// Reads the debug header of the block at `ptr`.
    ///
    /// Returns `None` when debug checks are off. The header is copied
    /// out; its address inside the page is only aligned to the block
    /// boundary.
    ///
    /// # Safety
    ///
    /// `ptr` must be a block address previously returned by this pool.
    #[must_use]
    pub unsafe fn debug_header(&self, ptr: NonNull<T>) -> Option<DebugHeader> {
        if !self.debug_checks {
            return None;
        }
        // SAFETY: caller guarantees `ptr` is one of our blocks, so the
        // header sits immediately before its left pad.
        Some(unsafe { self.read_header(ptr.as_ptr().cast()) })
    }

    /// Writes one line per still-allocated block to `sink`.
    ///
    /// No-op when debug checks are off.
    pub fn dump_memory_in_use(&self, sink: &mut dyn Write) -> io::Result<()> {
        if !self.debug_checks {
            return Ok(());
        }
        let mut page = self.page_list.get();
        while !page.is_null() {
            for index in 0..self.layout.blocks_per_page {
                // SAFETY: `block_offset` stays inside the page for
                // every slot index.
                let block = unsafe { page.add(self.layout.block_offset(index)) };
                // SAFETY: every slot has a header, zeroed or live.
                let header = unsafe { self.read_header(block) };
                if header.allocated() {
                    let callsite = header.callsite().unwrap_or_default();
                    writeln!(
                        sink,
                        "{}b allocated at line #{} in file {}",
                        self.layout.block_size,
                        callsite.line(),
                        callsite.file()
                    )?;
                }
            }
            // SAFETY: the first word of every page is the next-page link.
            page = unsafe { ptr::read(page.cast::<*mut u8>()) };
        }
        Ok(())
    }

    /// Current statistics. All zeros when debug checks are off.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Storage bytes per block.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.layout.block_size
    }

    /// Blocks carved from each page.
    #[must_use]
    pub fn blocks_per_page(&self) -> usize {
        self.layout.blocks_per_page
    }

    /// Whether this pool validates frees and keeps statistics.
    #[must_use]
    pub fn debug_checks(&self) -> bool {
        self.debug_checks
    }

    /// The pool's log sink, if one is configured.
    #[must_use]
    pub fn log_sink(&self) -> Option<SharedSink> {
        self.sink.borrow().clone()
    }

    /// Installs or replaces the log sink.
    pub fn set_log_sink(&self, sink: SharedSink) {
        *self.sink.borrow_mut() = Some(sink);
    }

    /// Whether validation failures are returned as errors.
    #[must_use]
    pub fn strict(&self) -> bool {
        self.strict.get()
    }

    /// Toggles error-raising mode at runtime.
    pub fn set_strict(&self, strict: bool) {
        self.strict.set(strict);
    }

    /// Lays out a fresh page and pushes its blocks onto the free list.
    fn create_page(&self) {
        // SAFETY: `page_alloc` was validated non-zero-sized at
        // construction.
        let page = unsafe { alloc::alloc(self.page_alloc) };
        if page.is_null() {
            handle_alloc_error(self.page_alloc);
        }

        // SAFETY: all writes below stay inside the `page_size` bytes
        // just allocated; offsets come from the precomputed layout.
        unsafe {
            // Link the page at the head of the page list.
            page.cast::<*mut u8>().write(self.page_list.get());
            self.page_list.set(page);

            let mut cursor = page.add(LINK_SIZE);
            if self.debug_checks {
                ptr::write_bytes(cursor, signature::ALIGN, self.layout.left_align);
            }
            cursor = cursor.add(self.layout.left_align);

            for index in 0..self.layout.blocks_per_page {
                // Header, zeroed, then the left pad canary.
                ptr::write_bytes(cursor, 0, self.layout.header_size);
                cursor = cursor.add(self.layout.header_size);
                if self.debug_checks {
                    ptr::write_bytes(cursor, signature::PAD, self.layout.pad_bytes);
                }
                cursor = cursor.add(self.layout.pad_bytes);

                if self.debug_checks {
                    ptr::write_bytes(cursor, signature::UNALLOCATED, self.layout.block_size);
                }
                self.push_free(cursor);
                cursor = cursor.add(self.layout.block_size);

                // Right pad canary; the trailing chunk omits the
                // inter-chunk filler.
                if self.debug_checks {
                    ptr::write_bytes(cursor, signature::PAD, self.layout.pad_bytes);
                }
                cursor = cursor.add(self.layout.pad_bytes);
                if index + 1 < self.layout.blocks_per_page {
                    if self.debug_checks {
                        ptr::write_bytes(cursor, signature::ALIGN, self.layout.inter_align);
                    }
                    cursor = cursor.add(self.layout.inter_align);
                }
            }
        }

        if self.debug_checks {
            self.stats.record_page(self.layout.blocks_per_page);
        }
        trace!(
            page_size = self.layout.page_size,
            blocks = self.layout.blocks_per_page,
            "created pool page"
        );
    }

    /// Runs the debug validation chain for a free of `block`.
    ///
    /// On failure returns the status byte to hand back in lenient mode
    /// together with the error to raise in strict mode. Checks run in
    /// order: page residency, alignment, double-free, pads; the first
    /// failure wins and nothing is mutated.
    fn validate_free(
        &self,
        block: *mut u8,
        callsite: Callsite,
    ) -> Result<(), (FreeStatus, PoolError)> {
        let addr = block as usize;
        let Some(page) = self.page_containing(addr) else {
            // Caller contract violation: the address is not ours. There
            // is nothing meaningful to validate against.
            debug_assert!(false, "pointer does not belong to this pool");
            return Ok(());
        };

        let offset = addr - page as usize;
        let first = self.layout.first_block_offset();
        if offset < first || (offset - first) % self.layout.inter_chunk_size != 0 {
            self.log(format_args!(
                "Invalid alignment on free from #{} in file {}",
                callsite.line(),
                callsite.file()
            ));
            return Err((
                FreeStatus::BadAlignment,
                PoolError::InvalidAlignment { callsite },
            ));
        }

        // SAFETY: the address is block-aligned within one of our pages,
        // so a header precedes it.
        let header = unsafe { self.read_header(block) };
        if !header.allocated() {
            self.log(format_args!(
                "Attempt to free already freed memory from #{} in file {}",
                callsite.line(),
                callsite.file()
            ));
            return Err((FreeStatus::AlreadyFreed, PoolError::DoubleFree { callsite }));
        }

        let pad = self.layout.pad_bytes;
        // SAFETY: each block is surrounded by `pad_bytes` canary bytes
        // inside the same page.
        let (left, right) = unsafe {
            (
                core::slice::from_raw_parts(block.sub(pad), pad),
                core::slice::from_raw_parts(block.add(self.layout.block_size), pad),
            )
        };
        if left.iter().chain(right).any(|&byte| byte != signature::PAD) {
            // The diagnostic cites the allocation, not the free: the
            // damage happened on the allocating side's watch.
            let allocated_at = header.callsite().unwrap_or_default();
            self.log(format_args!(
                "Pad bytes invalidated for object allocated at #{} in file {}",
                allocated_at.line(),
                allocated_at.file()
            ));
            return Err((
                FreeStatus::PadCorrupted,
                PoolError::PadViolation { allocated_at },
            ));
        }

        Ok(())
    }

    /// Finds the page whose byte range contains `addr`.
    fn page_containing(&self, addr: usize) -> Option<*mut u8> {
        let mut page = self.page_list.get();
        while !page.is_null() {
            if addr.wrapping_sub(page as usize) < self.layout.page_size {
                return Some(page);
            }
            // SAFETY: the first word of every page is the next-page link.
            page = unsafe { ptr::read(page.cast::<*mut u8>()) };
        }
        None
    }

    fn push_free(&self, block: *mut u8) {
        // SAFETY: a block is at least `LINK_SIZE` bytes; the link is
        // stored unaligned because block alignment may be smaller than
        // pointer alignment.
        unsafe { ptr::write_unaligned(block.cast::<*mut u8>(), self.free_list.get()) };
        self.free_list.set(block);
    }

    fn pop_free(&self) -> *mut u8 {
        let head = self.free_list.get();
        debug_assert!(!head.is_null(), "pop from an empty free list");
        // SAFETY: a free block's first bytes hold the next-free link.
        let next = unsafe { ptr::read_unaligned(head.cast::<*mut u8>()) };
        self.free_list.set(next);
        head
    }

    /// Pointer to the header of `block`.
    ///
    /// # Safety
    ///
    /// `block` must be a block address inside one of this pool's pages
    /// and debug checks must be on (otherwise there is no header).
    unsafe fn header_ptr(&self, block: *mut u8) -> *mut DebugHeader {
        // SAFETY: the header sits `pad_bytes + header_size` bytes in
        // front of the block, inside the same page.
        unsafe {
            block
                .sub(self.layout.pad_bytes + self.layout.header_size)
                .cast::<DebugHeader>()
        }
    }

    /// # Safety
    ///
    /// Same contract as [`header_ptr`](Self::header_ptr).
    unsafe fn read_header(&self, block: *mut u8) -> DebugHeader {
        // SAFETY: header addresses are valid but possibly unaligned.
        unsafe { ptr::read_unaligned(self.header_ptr(block)) }
    }

    /// # Safety
    ///
    /// Same contract as [`header_ptr`](Self::header_ptr).
    unsafe fn write_header(&self, block: *mut u8, header: DebugHeader) {
        // SAFETY: header addresses are valid but possibly unaligned.
        unsafe { ptr::write_unaligned(self.header_ptr(block), header) };
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        if let Some(sink) = self.sink.borrow().as_ref() {
            let _ = writeln!(sink.borrow_mut(), "{args}");
        }
    }
}

impl<T> Drop for PoolAllocator<T> {
    fn drop(&mut self) {
        if self.debug_checks {
            if let Some(sink) = self.sink.borrow().clone() {
                let mut sink = sink.borrow_mut();
                let _ = self.dump_memory_in_use(&mut *sink);
                let _ = sink.flush();
            }
            debug!(leaked = self.stats.blocks_in_use.get(), "pool torn down");
        }

        // Leaked blocks do not run destructors; pages go back whole.
        let mut page = self.page_list.get();
        while !page.is_null() {
            // SAFETY: the first word of every page is the next-page
            // link; each page was allocated with `page_alloc`.
            unsafe {
                let next = ptr::read(page.cast::<*mut u8>());
                alloc::dealloc(page, self.page_alloc);
                page = next;
            }
        }
    }
}

impl<T> fmt::Debug for PoolAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("block_size", &self.layout.block_size)
            .field("blocks_per_page", &self.layout.blocks_per_page)
            .field("debug_checks", &self.debug_checks)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
