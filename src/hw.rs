//! Collaborator interfaces: the DMA engine and the serial peripheral.
//!
//! The engine drives these but never reaches into registers itself. Clock
//! and PLL setup, pin multiplexing and interrupt vector registration stay
//! on the platform side; the platform in turn routes the DMA completion
//! interrupts to [`Device::rx_dma_complete`] / [`Device::tx_dma_complete`]
//! and the peripheral error interrupt to [`Device::error_isr`].
//!
//! [`Device::rx_dma_complete`]: crate::Device::rx_dma_complete
//! [`Device::tx_dma_complete`]: crate::Device::tx_dma_complete
//! [`Device::error_isr`]: crate::Device::error_isr

use crate::config::StreamConfig;

/// Status a DMA channel reports with each completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaStatus {
    /// The programmed transfer finished.
    Complete,
    /// The channel faulted mid-transfer.
    Error,
}

/// Direction a DMA channel moves data in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaDirection {
    PeripheralToMemory,
    MemoryToPeripheral,
}

/// One memory <-> peripheral transfer descriptor.
#[derive(Debug, Clone, Copy)]
pub struct DmaTransfer {
    pub src: *const u8,
    pub dst: *mut u8,
    pub len: usize,
    pub direction: DmaDirection,
}

/// A single DMA channel performing one transfer per arm.
///
/// The completion interrupt belongs to the platform, which forwards it to
/// the device together with a [`DmaStatus`]. The cache hooks are no-ops
/// unless the platform has a data cache to maintain around DMA.
pub trait DmaChannel {
    type Error: core::fmt::Debug;

    /// Program the channel for a fresh transfer.
    fn configure(&mut self, transfer: &DmaTransfer) -> Result<(), Self::Error>;

    /// Arm the programmed transfer.
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Re-point the armed channel at a new buffer, keeping the programmed
    /// direction and geometry.
    fn reload(&mut self, src: *const u8, dst: *mut u8, len: usize) -> Result<(), Self::Error>;

    /// Stop the channel. Safe to call when idle.
    fn stop(&mut self);

    /// Make CPU writes to `ptr..ptr+len` visible to the DMA engine.
    fn clean_cache(&self, _ptr: *const u8, _len: usize) {}

    /// Make DMA writes to `ptr..ptr+len` visible to the CPU.
    fn invalidate_cache(&self, _ptr: *const u8, _len: usize) {}
}

/// Transfer mode programmed into the peripheral at stream start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferMode {
    MasterRx,
    MasterTx,
    MasterFullDuplex,
    SlaveRx,
    SlaveTx,
    SlaveFullDuplex,
}

/// Peripheral-level error flags, read and cleared by the error interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorFlags {
    /// RX data arrived with no room in the peripheral FIFO.
    pub overrun: bool,
    /// The peripheral needed TX data and had none.
    pub underrun: bool,
    /// Frame synchronization was lost.
    pub frame_error: bool,
}

impl ErrorFlags {
    pub fn any(&self) -> bool {
        self.overrun || self.underrun || self.frame_error
    }
}

/// Control surface of the synchronous serial peripheral.
///
/// Mirrors what the engine needs and nothing more; register programming
/// stays behind the implementation.
pub trait SerialPeripheral {
    type Error: core::fmt::Debug;

    /// Program word size, frame standard, clock polarity and the bit clock
    /// derived from `cfg`.
    fn apply_format(&mut self, cfg: &StreamConfig) -> Result<(), Self::Error>;

    /// Select the transfer mode for the upcoming start.
    fn set_transfer_mode(&mut self, mode: TransferMode);

    /// Enable the peripheral (transfers begin once DMA requests are wired).
    fn enable(&mut self);

    /// Disable the peripheral.
    fn disable(&mut self);

    /// Arm / disarm the per-direction DMA request lines.
    fn enable_rx_dma(&mut self);
    fn disable_rx_dma(&mut self);
    fn enable_tx_dma(&mut self);
    fn disable_tx_dma(&mut self);

    /// Arm / disarm the error interrupt sources.
    fn enable_error_interrupts(&mut self);
    fn disable_error_interrupts(&mut self);

    /// Read the current error flags.
    fn error_flags(&mut self) -> ErrorFlags;

    /// Clear the given error flags.
    fn clear_error_flags(&mut self, flags: ErrorFlags);

    /// Address of the data register the DMA engine transfers against.
    fn data_register(&self) -> *mut u8;
}
