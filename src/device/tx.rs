//! TX half: arming, the completion handler, and teardown.

use crate::block::{Block, BlockPool};
use crate::config::{ClockRole, UnderrunPolicy};
use crate::error::Error;
use crate::flow::FlowControl;
use crate::hw::{DmaChannel, DmaDirection, DmaStatus, DmaTransfer, SerialPeripheral, TransferMode};
use crate::stream::{Stream, StreamState};

use super::{tx_disable_path, Inner};

fn mode(role: ClockRole, duplex: bool) -> TransferMode {
    match (role, duplex) {
        (ClockRole::Master, false) => TransferMode::MasterTx,
        (ClockRole::Master, true) => TransferMode::MasterFullDuplex,
        (ClockRole::Slave, false) => TransferMode::SlaveTx,
        (ClockRole::Slave, true) => TransferMode::SlaveFullDuplex,
    }
}

fn silence(pool: &dyn BlockPool, len: usize) -> Option<Block> {
    let mut block = pool.alloc()?;
    block.fill(0);
    block.set_len(len);
    Some(block)
}

/// Arm the TX DMA channel with the first block.
///
/// An empty queue is not an error at start time: one block of silence goes
/// out instead, which lets an application START and then stream writes in
/// without racing the bit clock.
pub(crate) fn start_dma<P: SerialPeripheral, D: DmaChannel>(
    periph: &mut P,
    dma: &mut D,
    stream: &mut Stream,
    pool: &dyn BlockPool,
    flow: &FlowControl,
    duplex: bool,
) -> Result<(), Error> {
    let cfg = stream.cfg.ok_or(Error::InvalidState)?;

    if cfg.underrun_policy == UnderrunPolicy::RepeatLast {
        // Reserve the filler up front so an underrun cannot fail on
        // allocation mid-stream.
        let filler = silence(pool, cfg.block_size).ok_or(Error::ResourceExhausted)?;
        stream.filler = Some(filler);
    }
    stream.underrun = false;

    let block = match stream.queue.pop() {
        Some(block) => {
            flow.signal();
            block
        }
        None => match cfg.underrun_policy {
            UnderrunPolicy::RepeatLast => {
                stream.underrun = true;
                match stream.filler.take() {
                    Some(filler) => filler,
                    None => return Err(Error::ResourceExhausted),
                }
            }
            UnderrunPolicy::Fault => match silence(pool, cfg.block_size) {
                Some(block) => block,
                None => return Err(Error::ResourceExhausted),
            },
        },
    };

    periph.set_transfer_mode(mode(cfg.role(), duplex));
    dma.clean_cache(block.as_ptr(), block.len());
    let transfer = DmaTransfer {
        src: block.as_ptr(),
        dst: periph.data_register(),
        len: block.len(),
        direction: DmaDirection::MemoryToPeripheral,
    };
    if dma.configure(&transfer).and_then(|_| dma.start()).is_err() {
        error!("failed to arm tx dma");
        pool.free(block);
        if let Some(filler) = stream.filler.take() {
            pool.free(filler);
        }
        return Err(Error::HardwareFault);
    }
    stream.active = Some(block);
    Ok(())
}

/// Half-duplex TX start: arm the channel, then bring the peripheral up.
pub(crate) fn start<P: SerialPeripheral, D: DmaChannel>(
    periph: &mut P,
    dma: &mut D,
    stream: &mut Stream,
    pool: &dyn BlockPool,
    flow: &FlowControl,
) -> Result<(), Error> {
    start_dma(periph, dma, stream, pool, flow, false)?;
    periph.enable_tx_dma();
    periph.enable_error_interrupts();
    periph.enable();
    Ok(())
}

/// Tear down the TX half. `other_idle` gates the parts shared with RX.
pub(crate) fn disable<P: SerialPeripheral, D: DmaChannel>(
    periph: &mut P,
    dma: &mut D,
    stream: &mut Stream,
    pool: &dyn BlockPool,
    other_idle: bool,
) {
    periph.disable_tx_dma();
    dma.stop();
    if let Some(block) = stream.active.take() {
        pool.free(block);
    }
    if let Some(filler) = stream.filler.take() {
        pool.free(filler);
    }
    if other_idle {
        periph.disable_error_interrupts();
        periph.disable();
    }
}

/// TX DMA completion handler body. Runs with the device lock held.
///
/// Recycles the just-sent block (or retains it as the repeat copy), then
/// re-arms with the next queued block, finishes a drain if the queue is
/// empty, or applies the underrun policy.
pub(crate) fn complete<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
    flow: &FlowControl,
    status: DmaStatus,
) {
    if status == DmaStatus::Error {
        error!("tx dma fault");
        inner.tx.state = StreamState::Error;
        tx_disable_path(inner, pool);
        return;
    }

    let Some(sent) = inner.tx.active.take() else {
        error!("tx completion with no active block");
        return;
    };

    let policy = inner.tx.cfg.map(|c| c.underrun_policy).unwrap_or_default();
    if policy == UnderrunPolicy::RepeatLast {
        if inner.tx.underrun {
            // the filler itself just went out; keep it for the next repeat
            inner.tx.filler = Some(sent);
        } else if let Some(old) = inner.tx.filler.replace(sent) {
            pool.free(old);
        }
    } else {
        pool.free(sent);
    }

    if inner.tx.state == StreamState::Error {
        // faulted between completions
        tx_disable_path(inner, pool);
        return;
    }

    let next = match inner.tx.queue.pop() {
        Some(block) => {
            inner.tx.underrun = false;
            flow.signal();
            block
        }
        None => {
            if inner.tx.state == StreamState::Stopping {
                debug!("tx drain complete");
                inner.tx.state = StreamState::Ready;
                tx_disable_path(inner, pool);
                return;
            }
            match policy {
                UnderrunPolicy::RepeatLast => {
                    let Some(filler) = inner.tx.filler.take() else {
                        error!("tx repeat: no filler retained");
                        inner.tx.state = StreamState::Error;
                        tx_disable_path(inner, pool);
                        return;
                    };
                    // the writer is not signaled for a repeated block
                    inner.tx.underrun = true;
                    inner.counters.tx_underruns_repeated += 1;
                    filler
                }
                UnderrunPolicy::Fault => {
                    error!("tx underrun: queue empty");
                    inner.tx.state = StreamState::Error;
                    tx_disable_path(inner, pool);
                    return;
                }
            }
        }
    };

    inner.tx_dma.clean_cache(next.as_ptr(), next.len());
    let dst = inner.periph.data_register();
    let rearm = inner
        .tx_dma
        .reload(next.as_ptr(), dst, next.len())
        .and_then(|_| inner.tx_dma.start());
    inner.tx.active = Some(next);
    if rearm.is_err() {
        error!("tx dma reload failed");
        inner.tx.state = StreamState::Error;
        tx_disable_path(inner, pool);
    }
}
