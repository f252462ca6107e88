//! Full-duplex coupling: both directions armed, stopped and faulted as a
//! unit.

use crate::block::BlockPool;
use crate::error::Error;
use crate::flow::FlowControl;
use crate::hw::{DmaChannel, SerialPeripheral};
use crate::stream::StreamState;

use super::{rx, tx, Inner, Trigger};

/// Tear both directions down and decouple them. Used by STOP/DROP and by
/// the fault paths.
pub(crate) fn disable<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
) {
    inner.periph.disable_rx_dma();
    inner.periph.disable_tx_dma();
    inner.periph.disable_error_interrupts();
    inner.rx_dma.stop();
    inner.tx_dma.stop();
    if let Some(block) = inner.rx.active.take() {
        pool.free(block);
    }
    if let Some(block) = inner.tx.active.take() {
        pool.free(block);
    }
    if let Some(filler) = inner.tx.filler.take() {
        pool.free(filler);
    }
    inner.periph.disable();
    inner.duplex_active = false;
}

/// Arm both directions. RX first, so a TX arming failure can roll RX back
/// before the peripheral ever runs; on any failure neither channel is
/// left armed and both streams keep their prior state.
fn start<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
    tx_flow: &FlowControl,
) -> Result<(), Error> {
    let Inner {
        periph,
        rx_dma,
        tx_dma,
        rx,
        tx,
        ..
    } = inner;

    rx::start_dma(periph, rx_dma, rx, pool, true)?;
    if let Err(e) = tx::start_dma(periph, tx_dma, tx, pool, tx_flow, true) {
        rx_dma.stop();
        if let Some(block) = rx.active.take() {
            pool.free(block);
        }
        return Err(e);
    }

    inner.periph.enable_rx_dma();
    inner.periph.enable_tx_dma();
    inner.periph.enable_error_interrupts();
    inner.periph.enable();
    inner.duplex_active = true;
    Ok(())
}

/// Trigger dispatch for [`Direction::Both`]. Every command is
/// all-or-nothing across the pair; DRAIN degrades to STOP because the RX
/// side cannot drain and the pair must come down together.
///
/// [`Direction::Both`]: crate::config::Direction::Both
pub(crate) fn trigger<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
    rx_flow: &FlowControl,
    tx_flow: &FlowControl,
    cmd: Trigger,
) -> Result<(), Error> {
    match cmd {
        Trigger::Start => {
            if inner.rx.state != StreamState::Ready || inner.tx.state != StreamState::Ready {
                error!("duplex start: invalid state");
                return Err(Error::InvalidState);
            }
            debug_assert!(inner.rx.active.is_none() && inner.tx.active.is_none());
            start(inner, pool, tx_flow)?;
            inner.rx.state = StreamState::Running;
            inner.tx.state = StreamState::Running;
            Ok(())
        }
        Trigger::Stop | Trigger::Drain => {
            if inner.rx.state != StreamState::Running || inner.tx.state != StreamState::Running {
                error!("duplex stop: invalid state");
                return Err(Error::InvalidState);
            }
            disable(inner, pool);
            inner.rx.drop_queue(pool, rx_flow);
            inner.tx.drop_queue(pool, tx_flow);
            inner.rx.state = StreamState::Ready;
            inner.tx.state = StreamState::Ready;
            Ok(())
        }
        Trigger::Drop => {
            if inner.rx.state == StreamState::NotReady || inner.tx.state == StreamState::NotReady {
                error!("duplex drop: invalid state");
                return Err(Error::InvalidState);
            }
            disable(inner, pool);
            inner.rx.drop_queue(pool, rx_flow);
            inner.tx.drop_queue(pool, tx_flow);
            inner.rx.state = StreamState::Ready;
            inner.tx.state = StreamState::Ready;
            Ok(())
        }
        Trigger::Prepare => {
            if inner.rx.state != StreamState::Error || inner.tx.state != StreamState::Error {
                error!("duplex prepare: invalid state");
                return Err(Error::InvalidState);
            }
            // An error-interrupt fault leaves both channels armed and the
            // pair coupled until a completion runs the disable path.
            if inner.duplex_active {
                disable(inner, pool);
            }
            inner.rx.drop_queue(pool, rx_flow);
            inner.tx.drop_queue(pool, tx_flow);
            inner.rx.state = StreamState::Ready;
            inner.tx.state = StreamState::Ready;
            Ok(())
        }
    }
}
