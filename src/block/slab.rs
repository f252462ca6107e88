//! Bitmap slab allocator backing the [`BlockPool`] trait.
//!
//! Tracks which of `N` fixed-size slots are allocated with a single atomic
//! bitmap, so `alloc` and `free` are lock-free and safe to call from
//! interrupt context concurrently with thread context.

use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use super::{Block, BlockPool};

/// Lock-free pool of `N` blocks of `BS` bytes each.
///
/// `N` must be at most 32 (one bitmap bit per slot). Freshly allocated
/// blocks are zeroed.
pub struct SlabPool<const BS: usize, const N: usize> {
    /// Bit i = 1 means slot i is allocated.
    bitmap: AtomicU32,
    storage: UnsafeCell<[[u8; BS]; N]>,
}

// SAFETY: the bitmap serializes slot ownership; storage is only touched
// through slots the caller exclusively claimed or still owns.
unsafe impl<const BS: usize, const N: usize> Sync for SlabPool<BS, N> {}

impl<const BS: usize, const N: usize> SlabPool<BS, N> {
    /// Create a pool with all slots free.
    pub const fn new() -> Self {
        assert!(N >= 1 && N <= 32, "slab pool holds between 1 and 32 blocks");
        assert!(BS > 0, "blocks must not be empty");
        SlabPool {
            bitmap: AtomicU32::new(0),
            storage: UnsafeCell::new([[0u8; BS]; N]),
        }
    }

    /// Number of currently allocated blocks.
    pub fn allocated(&self) -> usize {
        self.bitmap.load(Ordering::Acquire).count_ones() as usize
    }

    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        // SAFETY: slot < N, pointer arithmetic stays inside storage.
        unsafe { (*self.storage.get())[slot].as_mut_ptr() }
    }
}

impl<const BS: usize, const N: usize> Default for SlabPool<BS, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BS: usize, const N: usize> BlockPool for SlabPool<BS, N> {
    fn alloc(&self) -> Option<Block> {
        loop {
            let bitmap = self.bitmap.load(Ordering::Acquire);
            let free = !bitmap;
            if free == 0 {
                return None;
            }
            let slot = free.trailing_zeros() as usize;
            if slot >= N {
                return None;
            }
            let bit = 1u32 << slot;
            match self.bitmap.compare_exchange_weak(
                bitmap,
                bitmap | bit,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let ptr = self.slot_ptr(slot);
                    // SAFETY: the CAS claimed this slot exclusively.
                    unsafe { ptr.write_bytes(0, BS) };
                    let ptr = NonNull::new(ptr)?;
                    // SAFETY: ptr covers BS bytes of exclusively owned storage.
                    return Some(unsafe { Block::from_raw(ptr, BS) });
                }
                Err(_) => continue, // another context raced us, retry
            }
        }
    }

    fn free(&self, block: Block) {
        let base = self.storage.get() as usize;
        let addr = block.as_ptr() as usize;
        debug_assert!(addr >= base && addr < base + BS * N, "foreign block");
        let offset = addr - base;
        debug_assert_eq!(offset % BS, 0, "misaligned block");
        let slot = offset / BS;
        let bit = 1u32 << slot;
        debug_assert!(
            self.bitmap.load(Ordering::Acquire) & bit != 0,
            "double free"
        );
        self.bitmap.fetch_and(!bit, Ordering::Release);
    }

    fn block_size(&self) -> usize {
        BS
    }
}
