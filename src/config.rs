//! Stream configuration.
//!
//! A [`StreamConfig`] describes one direction of the peripheral: sample
//! geometry, clocking, block geometry, the read/write timeout and the loss
//! policies. The same config may be applied to both directions at once via
//! [`Direction::Both`] on a full-duplex device.

use crate::error::Error;

/// Upper bound on the per-stream queue depth. The queue storage is sized
/// for this many blocks plus the one always-empty slot.
pub const MAX_BLOCK_COUNT: usize = 16;

/// Addressed direction(s) of a configure or trigger call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Capture: peripheral to memory.
    Rx,
    /// Playback: memory to peripheral.
    Tx,
    /// Both directions as one unit. Requires a full-duplex device.
    Both,
}

/// Frame standard on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataFormat {
    /// Philips I2S.
    I2s,
    /// MSB-justified.
    LeftJustified,
    /// LSB-justified.
    RightJustified,
    /// PCM with a short frame sync.
    PcmShort,
    /// PCM with a long frame sync.
    PcmLong,
}

/// Bit clock polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockPolarity {
    Normal,
    Inverted,
}

/// Who generates the bit and frame clocks. Derived from the slave options,
/// configuration-only: the runtime state machine never consults it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockRole {
    Master,
    Slave,
}

/// What the RX completion handler does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OverrunPolicy {
    /// Data-loss intolerant: the stream faults and stops.
    #[default]
    Fault,
    /// Free the just-completed block and keep running. Trades data
    /// integrity for continuity; the drop is counted.
    Drop,
}

/// What the TX completion handler does when the queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UnderrunPolicy {
    /// Data-loss intolerant: the stream faults and stops.
    #[default]
    Fault,
    /// Re-send a retained copy of the most recently sent block without
    /// signaling the writer. The repeat is counted and a sticky underrun
    /// flag is set until the next real block goes out.
    RepeatLast,
}

/// Configuration for one stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamConfig {
    /// Bits per sample word: 16, 24 or 32.
    pub word_size: u8,
    /// Channels per frame.
    pub channels: u8,
    /// Frame (word select) clock in Hz. Zero disables the direction.
    pub frame_clock_freq: u32,
    /// Frame standard.
    pub format: DataFormat,
    /// Bit clock polarity.
    pub clock_polarity: ClockPolarity,
    /// Frame clock is driven externally.
    pub frame_clock_slave: bool,
    /// Bit clock is driven externally.
    pub bit_clock_slave: bool,
    /// Bytes per block handed to the DMA engine.
    pub block_size: usize,
    /// Queue depth: how many blocks the stream may hold queued.
    pub block_count: usize,
    /// Bound for the read/write flow-control wait, in milliseconds.
    /// Zero means a single non-blocking attempt.
    pub timeout_ms: u32,
    /// RX queue-full policy.
    pub overrun_policy: OverrunPolicy,
    /// TX queue-empty policy.
    pub underrun_policy: UnderrunPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            word_size: 16,
            channels: 2,
            frame_clock_freq: 48_000,
            format: DataFormat::I2s,
            clock_polarity: ClockPolarity::Normal,
            frame_clock_slave: false,
            bit_clock_slave: false,
            block_size: 256,
            block_count: 4,
            timeout_ms: 100,
            overrun_policy: OverrunPolicy::Fault,
            underrun_policy: UnderrunPolicy::Fault,
        }
    }
}

impl StreamConfig {
    /// Clock role derived from the slave options: slave when either clock
    /// is driven externally.
    pub fn role(&self) -> ClockRole {
        if self.frame_clock_slave || self.bit_clock_slave {
            ClockRole::Slave
        } else {
            ClockRole::Master
        }
    }

    /// Bit clock frequency in Hz.
    pub fn bit_clock_freq(&self) -> u32 {
        self.frame_clock_freq * self.word_size as u32 * self.channels as u32
    }

    /// Bytes per frame (all channels, one sample each).
    pub fn frame_bytes(&self) -> usize {
        (self.word_size as usize / 8) * self.channels as usize
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !matches!(self.word_size, 16 | 24 | 32) {
            error!("invalid word size {}", self.word_size);
            return Err(Error::InvalidArgument);
        }
        if self.channels == 0 {
            error!("invalid channel count");
            return Err(Error::InvalidArgument);
        }
        if self.block_count == 0 || self.block_count > MAX_BLOCK_COUNT {
            error!("invalid block count {}", self.block_count);
            return Err(Error::InvalidArgument);
        }
        if self.block_size == 0 || self.block_size % self.frame_bytes() != 0 {
            error!("invalid block size {}", self.block_size);
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}
