//! # duplex-audio-stream
//!
//! A `no_std` block-streaming engine for DMA-driven synchronous serial
//! audio peripherals (I²S and friends). It owns the data plane — block
//! pool, bounded queues, double-buffered DMA hand-off, flow control and
//! the RX/TX stream state machines — while register programming stays
//! behind two small traits the platform implements.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Memory | [`block`] | Fixed-size block pool with owned block handles |
//! | Plumbing | [`queue`] / [`flow`] | Bounded FIFO of blocks, counting flow control |
//! | Hardware | [`hw`] | `SerialPeripheral` and `DmaChannel` traits |
//! | Engine | [`device`] | Streams, triggers, completion handlers |
//! | Settings | [`config`] | Stream configuration and policies |
//!
//! ## Quick start
//!
//! ```ignore
//! use duplex_audio_stream::{Device, Direction, SlabPool, StreamConfig, Trigger};
//!
//! static POOL: SlabPool<512, 8> = SlabPool::new();
//!
//! let device = Device::new(periph, rx_channel, tx_channel, &POOL, false);
//! device.configure(Direction::Rx, &StreamConfig::default())?;
//! device.trigger(Direction::Rx, Trigger::Start)?;
//!
//! // In the DMA completion ISR:
//! device.rx_dma_complete(status);
//!
//! // In a task:
//! let block = device.read(&mut delay)?;
//! process(block.as_slice());
//! device.pool().free(block);
//! ```
//!
//! Completion handlers run in interrupt context; everything they share
//! with the API lives behind a `critical-section` mutex, so the crate
//! works on any target with a `critical-section` implementation.
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `defmt` | no | logging through `defmt` |
//! | `log` | no | logging through `log` |

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

// This mod MUST go first so the logging macros are visible everywhere.
pub(crate) mod fmt;

pub mod block;
pub mod config;
pub mod device;
pub mod error;
pub mod flow;
pub mod hw;
pub mod queue;

mod stream;

pub use block::{Block, BlockPool, SlabPool};
pub use config::{
    ClockPolarity, ClockRole, DataFormat, Direction, OverrunPolicy, StreamConfig, UnderrunPolicy,
};
pub use device::{Counters, Device, Trigger};
pub use error::Error;
pub use hw::{DmaChannel, DmaStatus, SerialPeripheral};
pub use stream::StreamState;
