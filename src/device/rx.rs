//! RX half: arming, the completion handler, and teardown.

use crate::block::BlockPool;
use crate::config::{ClockRole, OverrunPolicy};
use crate::error::Error;
use crate::flow::FlowControl;
use crate::hw::{DmaChannel, DmaDirection, DmaStatus, DmaTransfer, SerialPeripheral, TransferMode};
use crate::stream::{Stream, StreamState};

use super::{rx_disable_path, Inner};

fn mode(role: ClockRole, duplex: bool) -> TransferMode {
    match (role, duplex) {
        (ClockRole::Master, false) => TransferMode::MasterRx,
        (ClockRole::Master, true) => TransferMode::MasterFullDuplex,
        (ClockRole::Slave, false) => TransferMode::SlaveRx,
        (ClockRole::Slave, true) => TransferMode::SlaveFullDuplex,
    }
}

/// Allocate the first capture block and arm the RX DMA channel. Does not
/// enable the peripheral; the caller sequences that, which lets the
/// full-duplex start arm both channels before anything runs.
pub(crate) fn start_dma<P: SerialPeripheral, D: DmaChannel>(
    periph: &mut P,
    dma: &mut D,
    stream: &mut Stream,
    pool: &dyn BlockPool,
    duplex: bool,
) -> Result<(), Error> {
    let cfg = stream.cfg.ok_or(Error::InvalidState)?;
    let mut block = pool.alloc().ok_or(Error::ResourceExhausted)?;
    block.set_len(cfg.block_size);

    periph.set_transfer_mode(mode(cfg.role(), duplex));
    dma.invalidate_cache(block.as_ptr(), cfg.block_size);
    let transfer = DmaTransfer {
        src: periph.data_register() as *const u8,
        dst: block.as_mut_ptr(),
        len: cfg.block_size,
        direction: DmaDirection::PeripheralToMemory,
    };
    if dma.configure(&transfer).and_then(|_| dma.start()).is_err() {
        error!("failed to arm rx dma");
        pool.free(block);
        return Err(Error::HardwareFault);
    }
    stream.active = Some(block);
    Ok(())
}

/// Half-duplex RX start: arm the channel, then bring the peripheral up.
pub(crate) fn start<P: SerialPeripheral, D: DmaChannel>(
    periph: &mut P,
    dma: &mut D,
    stream: &mut Stream,
    pool: &dyn BlockPool,
) -> Result<(), Error> {
    start_dma(periph, dma, stream, pool, false)?;
    periph.enable_rx_dma();
    periph.enable_error_interrupts();
    periph.enable();
    Ok(())
}

/// Tear down the RX half. `other_idle` gates the parts shared with TX:
/// the error interrupt and the peripheral enable stay up while the other
/// direction still runs.
pub(crate) fn disable<P: SerialPeripheral, D: DmaChannel>(
    periph: &mut P,
    dma: &mut D,
    stream: &mut Stream,
    pool: &dyn BlockPool,
    other_idle: bool,
) {
    periph.disable_rx_dma();
    dma.stop();
    if let Some(block) = stream.active.take() {
        pool.free(block);
    }
    if other_idle {
        periph.disable_error_interrupts();
        periph.disable();
    }
}

/// RX DMA completion handler body. Runs with the device lock held.
///
/// Re-arms the channel with a fresh block before the completed one is
/// queued, so the peripheral never waits on the consumer. A full queue is
/// an overrun, resolved per the configured policy.
pub(crate) fn complete<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
    flow: &FlowControl,
    status: DmaStatus,
) {
    if status == DmaStatus::Error {
        error!("rx dma fault");
        inner.rx.state = StreamState::Error;
        rx_disable_path(inner, pool);
        return;
    }

    let Some(done) = inner.rx.active.take() else {
        error!("rx completion with no active block");
        return;
    };

    if inner.rx.state == StreamState::Error {
        // faulted between completions; let the disable path reclaim it
        inner.rx.active = Some(done);
        rx_disable_path(inner, pool);
        return;
    }

    let block_size = inner.rx.block_size();
    let Some(mut fresh) = pool.alloc() else {
        error!("rx block allocation failed");
        pool.free(done);
        inner.rx.state = StreamState::Error;
        rx_disable_path(inner, pool);
        return;
    };
    fresh.set_len(block_size);
    inner.rx_dma.invalidate_cache(fresh.as_ptr(), block_size);

    let src = inner.periph.data_register() as *const u8;
    let dst = fresh.as_mut_ptr();
    let rearm = inner
        .rx_dma
        .reload(src, dst, block_size)
        .and_then(|_| inner.rx_dma.start());
    inner.rx.active = Some(fresh);
    if rearm.is_err() {
        error!("rx dma reload failed");
        pool.free(done);
        inner.rx.state = StreamState::Error;
        rx_disable_path(inner, pool);
        return;
    }

    inner.rx_dma.invalidate_cache(done.as_ptr(), block_size);
    match inner.rx.queue.push(done) {
        Ok(()) => flow.signal(),
        Err(done) => {
            let policy = inner.rx.cfg.map(|c| c.overrun_policy).unwrap_or_default();
            match policy {
                OverrunPolicy::Drop => {
                    // newest-loses: the completed block is discarded, the
                    // consumer is not signaled
                    pool.free(done);
                    inner.counters.rx_overruns_dropped += 1;
                }
                OverrunPolicy::Fault => {
                    error!("rx overrun: queue full");
                    pool.free(done);
                    inner.rx.state = StreamState::Error;
                    rx_disable_path(inner, pool);
                }
            }
        }
    }
}
