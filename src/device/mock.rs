//! Scriptable peripheral and DMA doubles for the device tests.

use core::cell::{Cell, RefCell, UnsafeCell};
use std::boxed::Box;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::config::StreamConfig;
use crate::hw::{DmaChannel, DmaDirection, DmaTransfer, ErrorFlags, SerialPeripheral, TransferMode};

/// A delay source that returns immediately; the tests drive completions by
/// hand, so waits only need to burn their budget.
pub(crate) struct NopDelay;

impl DelayNs for NopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeriphOp {
    ApplyFormat,
    SetMode(TransferMode),
    Enable,
    Disable,
    EnableRxDma,
    DisableRxDma,
    EnableTxDma,
    DisableTxDma,
    EnableErrIrq,
    DisableErrIrq,
    ClearErrors,
}

pub(crate) struct MockPeriph {
    pub(crate) log: Rc<RefCell<Vec<PeriphOp>>>,
    pub(crate) flags: Rc<Cell<ErrorFlags>>,
    pub(crate) fail_format: Rc<Cell<bool>>,
    dr: Box<UnsafeCell<u32>>,
}

impl MockPeriph {
    pub(crate) fn new() -> Self {
        MockPeriph {
            log: Rc::new(RefCell::new(Vec::new())),
            flags: Rc::new(Cell::new(ErrorFlags::default())),
            fail_format: Rc::new(Cell::new(false)),
            dr: Box::new(UnsafeCell::new(0)),
        }
    }

    pub(crate) fn handles(&self) -> (Rc<RefCell<Vec<PeriphOp>>>, Rc<Cell<ErrorFlags>>) {
        (self.log.clone(), self.flags.clone())
    }
}

impl SerialPeripheral for MockPeriph {
    type Error = ();

    fn apply_format(&mut self, _cfg: &StreamConfig) -> Result<(), ()> {
        if self.fail_format.replace(false) {
            return Err(());
        }
        self.log.borrow_mut().push(PeriphOp::ApplyFormat);
        Ok(())
    }

    fn set_transfer_mode(&mut self, mode: TransferMode) {
        self.log.borrow_mut().push(PeriphOp::SetMode(mode));
    }

    fn enable(&mut self) {
        self.log.borrow_mut().push(PeriphOp::Enable);
    }

    fn disable(&mut self) {
        self.log.borrow_mut().push(PeriphOp::Disable);
    }

    fn enable_rx_dma(&mut self) {
        self.log.borrow_mut().push(PeriphOp::EnableRxDma);
    }

    fn disable_rx_dma(&mut self) {
        self.log.borrow_mut().push(PeriphOp::DisableRxDma);
    }

    fn enable_tx_dma(&mut self) {
        self.log.borrow_mut().push(PeriphOp::EnableTxDma);
    }

    fn disable_tx_dma(&mut self) {
        self.log.borrow_mut().push(PeriphOp::DisableTxDma);
    }

    fn enable_error_interrupts(&mut self) {
        self.log.borrow_mut().push(PeriphOp::EnableErrIrq);
    }

    fn disable_error_interrupts(&mut self) {
        self.log.borrow_mut().push(PeriphOp::DisableErrIrq);
    }

    fn error_flags(&mut self) -> ErrorFlags {
        self.flags.get()
    }

    fn clear_error_flags(&mut self, _flags: ErrorFlags) {
        self.flags.set(ErrorFlags::default());
        self.log.borrow_mut().push(PeriphOp::ClearErrors);
    }

    fn data_register(&self) -> *mut u8 {
        self.dr.get() as *mut u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DmaOp {
    Configure {
        src: usize,
        dst: usize,
        len: usize,
        direction: DmaDirection,
    },
    Start,
    Reload {
        src: usize,
        dst: usize,
        len: usize,
    },
    Stop,
}

pub(crate) struct MockDma {
    pub(crate) log: Rc<RefCell<Vec<DmaOp>>>,
    /// Fails the next configure or reload call.
    pub(crate) fail_next: Rc<Cell<bool>>,
}

impl MockDma {
    pub(crate) fn new() -> Self {
        MockDma {
            log: Rc::new(RefCell::new(Vec::new())),
            fail_next: Rc::new(Cell::new(false)),
        }
    }

    pub(crate) fn handles(&self) -> (Rc<RefCell<Vec<DmaOp>>>, Rc<Cell<bool>>) {
        (self.log.clone(), self.fail_next.clone())
    }
}

impl DmaChannel for MockDma {
    type Error = ();

    fn configure(&mut self, transfer: &DmaTransfer) -> Result<(), ()> {
        if self.fail_next.replace(false) {
            return Err(());
        }
        self.log.borrow_mut().push(DmaOp::Configure {
            src: transfer.src as usize,
            dst: transfer.dst as usize,
            len: transfer.len,
            direction: transfer.direction,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<(), ()> {
        self.log.borrow_mut().push(DmaOp::Start);
        Ok(())
    }

    fn reload(&mut self, src: *const u8, dst: *mut u8, len: usize) -> Result<(), ()> {
        if self.fail_next.replace(false) {
            return Err(());
        }
        self.log.borrow_mut().push(DmaOp::Reload {
            src: src as usize,
            dst: dst as usize,
            len,
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.log.borrow_mut().push(DmaOp::Stop);
    }
}
