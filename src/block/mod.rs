//! Audio blocks and the pool that supplies them.
//!
//! A [`Block`] is an opaque fixed-capacity memory region tagged with its
//! occupied size. Exactly one of the pool, a stream's in-flight slot, a
//! queue slot or the application owns a block at any time; blocks are never
//! aliased. The engine allocates and frees blocks through the [`BlockPool`]
//! trait but does not mandate an allocator; [`SlabPool`] is a ready-made
//! implementation for callers that do not bring their own.

pub mod slab;

pub use slab::SlabPool;

use core::ptr::NonNull;

/// Exclusive handle to a fixed-capacity memory region.
///
/// Carries the occupied size (`len <= capacity`). Blocks must eventually be
/// returned to the pool they came from via [`BlockPool::free`]; dropping a
/// `Block` without doing so leaks the pool slot.
#[derive(Debug)]
pub struct Block {
    ptr: NonNull<u8>,
    capacity: usize,
    len: usize,
}

// SAFETY: a Block is an exclusively owned region; ownership may move
// between thread and interrupt context but is never shared.
unsafe impl Send for Block {}

impl Block {
    /// Wrap a raw region as a block with `len == 0`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `capacity` bytes for as
    /// long as the block (or anything derived from it) is alive, and no
    /// other reference to that region may exist.
    pub unsafe fn from_raw(ptr: NonNull<u8>, capacity: usize) -> Self {
        Block {
            ptr,
            capacity,
            len: 0,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Occupied size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no bytes are occupied.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the occupied size. Clamped to the capacity.
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len = len.min(self.capacity);
    }

    /// Base pointer of the region.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Mutable base pointer of the region.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// The occupied bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: exclusive ownership, len <= capacity.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The whole region, for filling before `set_len`.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: exclusive ownership.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }

    /// Fill the whole region with `value` and mark it fully occupied.
    pub fn fill(&mut self, value: u8) {
        self.bytes_mut().fill(value);
        self.len = self.capacity;
    }
}

/// Fixed-size block allocator supplied by the caller.
///
/// `alloc` and `free` are called from both thread and interrupt context and
/// must be safe there: non-blocking, O(1)-ish, no locks an interrupt could
/// deadlock on.
pub trait BlockPool {
    /// Allocate a block, or `None` when the pool is exhausted.
    fn alloc(&self) -> Option<Block>;

    /// Return a block to the pool.
    fn free(&self, block: Block);

    /// Capacity of every block this pool hands out, in bytes.
    fn block_size(&self) -> usize;
}

impl<T: BlockPool + ?Sized> BlockPool for &T {
    fn alloc(&self) -> Option<Block> {
        (**self).alloc()
    }

    fn free(&self, block: Block) {
        (**self).free(block)
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }
}
