//! Page layout arithmetic.
//!
//! All derived quantities are computed once at pool construction and
//! consulted by every hot path. A page is laid out as:
//!
//! ```text
//! [page link][left align][hdr][pad][block][pad][align][hdr][pad][block][pad]…
//! ```
//!
//! Headers, pads, and alignment filler exist only while debug checks
//! are enabled; the release layout degenerates to the page link plus a
//! run of blocks.

use core::mem;

use crate::pool::config::PoolConfig;
use crate::utils::align_pad;

/// Size of the page-list and free-list link words.
pub(crate) const LINK_SIZE: usize = mem::size_of::<*mut u8>();

/// Precomputed layout of one page and the chunks inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageLayout {
    /// Storage per block: at least the element size, widened so a free
    /// block can hold the free-list link.
    pub block_size: usize,
    /// Bytes of debug header preceding each block's left pad. Zero when
    /// debug checks are off.
    pub header_size: usize,
    /// Pad canary bytes on each side of a block.
    pub pad_bytes: usize,
    /// Effective block alignment: the configured boundary, raised to
    /// the element's own alignment so references stay well-aligned.
    pub alignment: usize,
    /// Filler between the page link word and the first chunk's header.
    pub left_align: usize,
    /// Filler between a chunk's right pad and the next chunk's header.
    pub inter_align: usize,
    /// Link word + left filler + header + both pads + block.
    pub left_chunk_size: usize,
    /// Block + both pads + inter filler + header: the stride between
    /// consecutive block addresses.
    pub inter_chunk_size: usize,
    /// Total bytes of one page.
    pub page_size: usize,
    /// Blocks carved from each page.
    pub blocks_per_page: usize,
}

impl PageLayout {
    /// Computes the layout for element type `T` under `config`.
    ///
    /// `config` must already be validated (power-of-two alignment,
    /// non-zero `blocks_per_page`). Returns `None` when the page size
    /// overflows the address space.
    pub(crate) fn for_type<T>(config: &PoolConfig) -> Option<Self> {
        let block_size = mem::size_of::<T>().max(LINK_SIZE);
        let header_size = if config.debug_checks {
            mem::size_of::<DebugHeader>()
        } else {
            0
        };
        let pad_bytes = config.pad_bytes;
        let alignment = config.alignment.max(mem::align_of::<T>());

        let left_align = align_pad(LINK_SIZE + header_size + pad_bytes, alignment);
        let inter_align = align_pad(block_size + header_size + 2 * pad_bytes, alignment);

        let left_chunk_size = LINK_SIZE + left_align + header_size + 2 * pad_bytes + block_size;
        let inter_chunk_size = block_size + 2 * pad_bytes + inter_align + header_size;

        let blocks_per_page = config.blocks_per_page;
        let page_size = blocks_per_page
            .checked_mul(inter_chunk_size)?
            .checked_add(LINK_SIZE + left_align)?
            .checked_sub(inter_align)?;
        if page_size > isize::MAX as usize {
            return None;
        }

        Some(Self {
            block_size,
            header_size,
            pad_bytes,
            alignment,
            left_align,
            inter_align,
            left_chunk_size,
            inter_chunk_size,
            page_size,
            blocks_per_page,
        })
    }

    /// Offset of the first block from the page base.
    ///
    /// Equal to `left_chunk_size - pad_bytes - block_size`; the free
    /// validation rejects any address not congruent to this modulo
    /// `inter_chunk_size`.
    #[inline]
    pub(crate) fn first_block_offset(&self) -> usize {
        LINK_SIZE + self.left_align + self.header_size + self.pad_bytes
    }

    /// Offset of block `index` from the page base.
    #[inline]
    pub(crate) fn block_offset(&self, index: usize) -> usize {
        self.first_block_offset() + index * self.inter_chunk_size
    }

    /// Alignment the page allocation itself must satisfy so every block
    /// lands on the effective boundary.
    #[inline]
    pub(crate) fn page_align(&self) -> usize {
        self.alignment.max(mem::align_of::<usize>())
    }
}

/// Per-block bookkeeping written into the page in front of each block's
/// left pad while debug checks are enabled.
///
/// The file name is stored as a raw pointer/length pair so the all-zero
/// state produced by clearing the header is meaningful: a header whose
/// `allocated` flag is clear carries no callsite. Headers are accessed
/// with unaligned reads and writes; their addresses are only aligned to
/// the configured boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DebugHeader {
    allocated: bool,
    file_ptr: *const u8,
    file_len: usize,
    line: u32,
}

impl DebugHeader {
    /// Header for a live block allocated at `callsite`.
    pub(crate) fn live(callsite: crate::Callsite) -> Self {
        let file = callsite.file();
        Self {
            allocated: true,
            file_ptr: file.as_ptr(),
            file_len: file.len(),
            line: callsite.line(),
        }
    }

    /// Whether the block in front of this header is currently allocated.
    #[must_use]
    pub fn allocated(&self) -> bool {
        self.allocated
    }

    /// Callsite of the allocation, if the block is live.
    #[must_use]
    pub fn callsite(&self) -> Option<crate::Callsite> {
        if !self.allocated || self.file_ptr.is_null() {
            return None;
        }
        // SAFETY: a live header's file fields were produced from a
        // `&'static str` in `DebugHeader::live` and are immutable for
        // the process lifetime.
        let file = unsafe {
            core::str::from_utf8_unchecked(core::slice::from_raw_parts(
                self.file_ptr,
                self.file_len,
            ))
        };
        Some(crate::Callsite::new(file, self.line))
    }
}
