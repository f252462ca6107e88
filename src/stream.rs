//! Per-direction stream state and bookkeeping.

use crate::block::BlockPool;
use crate::config::{Direction, StreamConfig};
use crate::flow::FlowControl;
use crate::queue::BlockQueue;

/// Lifecycle of one stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StreamState {
    /// Unconfigured, or configured with a zero frame clock.
    NotReady,
    /// Configured and idle; a START may arm it.
    Ready,
    /// DMA active, blocks flowing.
    Running,
    /// Drain in progress: deliver what is queued, then fall back to Ready.
    Stopping,
    /// A hardware or resource fault occurred; cleared only by PREPARE.
    Error,
}

/// One direction of the device: queue, in-flight block and flags.
///
/// Lives inside the device's critical-section cell; everything here is
/// mutated either by trigger/configure calls or by the completion handler,
/// never concurrently.
pub(crate) struct Stream {
    pub(crate) direction: Direction,
    pub(crate) state: StreamState,
    pub(crate) cfg: Option<StreamConfig>,
    pub(crate) queue: BlockQueue,
    /// Block currently owned by the DMA engine.
    pub(crate) active: Option<crate::block::Block>,
    /// TX only: the repeat policy is currently re-sending the filler.
    pub(crate) underrun: bool,
    /// TX only: retained copy re-sent on underrun under the repeat policy.
    pub(crate) filler: Option<crate::block::Block>,
}

impl Stream {
    pub(crate) const fn new(direction: Direction) -> Self {
        Stream {
            direction,
            state: StreamState::NotReady,
            cfg: None,
            queue: BlockQueue::new(),
            active: None,
            underrun: false,
            filler: None,
        }
    }

    /// The configured block size. Only called on configured streams.
    pub(crate) fn block_size(&self) -> usize {
        self.cfg.map(|c| c.block_size).unwrap_or(0)
    }

    /// Return every queued block (and the TX filler) to the pool and put
    /// the flow counter back to its idle value, releasing any waiter.
    pub(crate) fn drop_queue(&mut self, pool: &dyn BlockPool, flow: &FlowControl) {
        while let Some(block) = self.queue.pop() {
            pool.free(block);
        }
        if let Some(filler) = self.filler.take() {
            pool.free(filler);
        }
        self.underrun = false;
        match self.direction {
            // Readers wait for data that no longer exists.
            Direction::Rx => flow.reset(0),
            // Writers wait for slots, which are all free again.
            _ => flow.reset_to_ceiling(),
        }
    }
}
