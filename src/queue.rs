//! Bounded FIFO handing blocks between thread and interrupt context.
//!
//! The ring keeps one slot empty so full and empty are distinguished by the
//! head/tail indices alone: `head == tail` means empty, advancing head into
//! tail means full. Both operations run inside a critical section rather
//! than taking a lock, because one side executes in interrupt context and
//! must never block.
//!
//! Capacity is bounded by [`MAX_BLOCK_COUNT`]; the portion actually used is
//! set once per configuration while the queue is empty.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::block::Block;
use crate::config::MAX_BLOCK_COUNT;

const SLOTS: usize = MAX_BLOCK_COUNT + 1;

struct Inner {
    slots: [Option<Block>; SLOTS],
    /// Next slot to write. Advanced by push.
    head: usize,
    /// Next slot to read. Advanced by pop.
    tail: usize,
    /// Slots in use this configuration: capacity + 1.
    len: usize,
}

/// Interrupt-safe bounded FIFO of [`Block`]s.
pub struct BlockQueue {
    inner: Mutex<RefCell<Inner>>,
}

impl BlockQueue {
    /// Create an empty queue using the full [`MAX_BLOCK_COUNT`] capacity.
    #[allow(clippy::declare_interior_mut_const)]
    pub const fn new() -> Self {
        const NONE: Option<Block> = None;
        BlockQueue {
            inner: Mutex::new(RefCell::new(Inner {
                slots: [NONE; SLOTS],
                head: 0,
                tail: 0,
                len: SLOTS,
            })),
        }
    }

    /// Set the usable capacity. Must only be called while the queue is
    /// empty; resets the indices.
    pub fn set_capacity(&self, capacity: usize) {
        debug_assert!(capacity >= 1 && capacity <= MAX_BLOCK_COUNT);
        critical_section::with(|cs| {
            let mut q = self.inner.borrow_ref_mut(cs);
            debug_assert!(q.head == q.tail, "resizing a non-empty queue");
            q.head = 0;
            q.tail = 0;
            q.len = capacity.clamp(1, MAX_BLOCK_COUNT) + 1;
        });
    }

    /// Usable capacity in blocks.
    pub fn capacity(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).len - 1)
    }

    /// Append a block. Returns it back when the queue is full.
    pub fn push(&self, block: Block) -> Result<(), Block> {
        critical_section::with(|cs| {
            let mut q = self.inner.borrow_ref_mut(cs);
            let head_next = (q.head + 1) % q.len;
            if head_next == q.tail {
                return Err(block);
            }
            let head = q.head;
            q.slots[head] = Some(block);
            q.head = head_next;
            Ok(())
        })
    }

    /// Remove the oldest block, or `None` when empty.
    pub fn pop(&self) -> Option<Block> {
        critical_section::with(|cs| {
            let mut q = self.inner.borrow_ref_mut(cs);
            if q.head == q.tail {
                return None;
            }
            let tail = q.tail;
            let block = q.slots[tail].take();
            debug_assert!(block.is_some(), "occupied slot was empty");
            q.tail = (tail + 1) % q.len;
            block
        })
    }

    /// Whether the queue holds no blocks.
    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| {
            let q = self.inner.borrow_ref(cs);
            q.head == q.tail
        })
    }

    /// Number of queued blocks.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| {
            let q = self.inner.borrow_ref(cs);
            (q.head + q.len - q.tail) % q.len
        })
    }
}

impl Default for BlockQueue {
    fn default() -> Self {
        Self::new()
    }
}
