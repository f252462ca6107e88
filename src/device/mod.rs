//! The streaming device: one RX stream, one TX stream, and the control
//! surface the application drives them with.
//!
//! All state shared with the interrupt-context completion handlers lives in
//! a single `critical_section::Mutex<RefCell<..>>`; every operation holds
//! the critical section only briefly and never blocks inside it. The flow
//! counters are atomic and sit outside, so the bounded waits in
//! [`read`](Device::read)/[`write`](Device::write) poll them without
//! masking interrupts for the duration.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;

use crate::block::{Block, BlockPool};
use crate::config::{Direction, StreamConfig};
use crate::error::Error;
use crate::flow::FlowControl;
use crate::hw::{DmaChannel, DmaStatus, SerialPeripheral};
use crate::stream::{Stream, StreamState};

mod duplex;
mod rx;
mod tx;

#[cfg(test)]
pub(crate) mod mock;


/// How long one iteration of a flow-control wait sleeps.
const POLL_PERIOD_US: u32 = 100;

/// Commands accepted by [`Device::trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    /// Arm the stream. Legal only from `Ready`.
    Start,
    /// Disarm immediately, discarding queued blocks. Legal only from
    /// `Running`.
    Stop,
    /// TX: let queued blocks play out, then stop. RX: identical to
    /// [`Trigger::Stop`] (there is nothing queued-but-unreceived to wait
    /// for). Legal only from `Running`.
    Drain,
    /// Disarm and discard unconditionally. Legal from any state except
    /// `NotReady`.
    Drop,
    /// Clear a fault. Legal only from `Error`; does not re-arm.
    Prepare,
}

/// Per-device event counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counters {
    /// Peripheral error interrupts taken.
    pub err_irqs: u32,
    /// Peripheral-reported RX overruns.
    pub periph_overruns: u32,
    /// Peripheral-reported TX underruns.
    pub periph_underruns: u32,
    /// Peripheral-reported frame errors.
    pub frame_errors: u32,
    /// Completed RX blocks discarded under [`OverrunPolicy::Drop`].
    ///
    /// [`OverrunPolicy::Drop`]: crate::config::OverrunPolicy::Drop
    pub rx_overruns_dropped: u32,
    /// Filler re-sends under [`UnderrunPolicy::RepeatLast`].
    ///
    /// [`UnderrunPolicy::RepeatLast`]: crate::config::UnderrunPolicy::RepeatLast
    pub tx_underruns_repeated: u32,
}

pub(crate) struct Inner<P, D> {
    pub(crate) periph: P,
    pub(crate) rx_dma: D,
    pub(crate) tx_dma: D,
    pub(crate) rx: Stream,
    pub(crate) tx: Stream,
    /// Both directions were armed as one unit and are still coupled.
    pub(crate) duplex_active: bool,
    pub(crate) counters: Counters,
}

/// A full- or half-duplex streaming device.
///
/// Generic over the serial peripheral `P`, the DMA channel type `D` (one
/// channel instance per direction) and the block pool `B`.
pub struct Device<P, D, B> {
    inner: Mutex<RefCell<Inner<P, D>>>,
    pool: B,
    rx_flow: FlowControl,
    tx_flow: FlowControl,
    full_duplex: bool,
}

impl<P, D, B> Device<P, D, B>
where
    P: SerialPeripheral,
    D: DmaChannel,
    B: BlockPool,
{
    /// Create a device. `full_duplex` fixes whether [`Direction::Both`]
    /// operations are available; it cannot change afterwards.
    pub fn new(periph: P, rx_dma: D, tx_dma: D, pool: B, full_duplex: bool) -> Self {
        Device {
            inner: Mutex::new(RefCell::new(Inner {
                periph,
                rx_dma,
                tx_dma,
                rx: Stream::new(Direction::Rx),
                tx: Stream::new(Direction::Tx),
                duplex_active: false,
                counters: Counters::default(),
            })),
            pool,
            rx_flow: FlowControl::new(),
            tx_flow: FlowControl::new(),
            full_duplex,
        }
    }

    /// The block pool backing this device.
    pub fn pool(&self) -> &B {
        &self.pool
    }

    /// Whether this device couples RX and TX.
    pub fn is_full_duplex(&self) -> bool {
        self.full_duplex
    }

    /// Current RX stream state.
    pub fn rx_state(&self) -> StreamState {
        critical_section::with(|cs| self.inner.borrow_ref(cs).rx.state)
    }

    /// Current TX stream state.
    pub fn tx_state(&self) -> StreamState {
        critical_section::with(|cs| self.inner.borrow_ref(cs).tx.state)
    }

    /// Whether the TX repeat policy is currently substituting the filler.
    pub fn tx_underrun(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).tx.underrun)
    }

    /// Snapshot of the event counters.
    pub fn counters(&self) -> Counters {
        critical_section::with(|cs| self.inner.borrow_ref(cs).counters)
    }

    /// Configure the addressed stream(s).
    ///
    /// Legal while the stream is `NotReady` or `Ready`. A zero
    /// `frame_clock_freq` disables the direction (state `NotReady`).
    /// Reconfiguring discards blocks still queued under the previous
    /// geometry. Failure leaves the stream untouched.
    pub fn configure(&self, dir: Direction, cfg: &StreamConfig) -> Result<(), Error> {
        critical_section::with(|cs| {
            let inner = &mut *self.inner.borrow_ref_mut(cs);
            let pool: &dyn BlockPool = &self.pool;
            match dir {
                Direction::Rx => {
                    configure_one(&mut inner.periph, &mut inner.rx, pool, &self.rx_flow, cfg)
                }
                Direction::Tx => {
                    configure_one(&mut inner.periph, &mut inner.tx, pool, &self.tx_flow, cfg)
                }
                Direction::Both => {
                    if !self.full_duplex {
                        error!("configure: device is not full duplex");
                        return Err(Error::InvalidState);
                    }
                    // All-or-nothing: every check, including the peripheral
                    // accepting the format, before either stream is touched.
                    check_configurable(&inner.rx)?;
                    check_configurable(&inner.tx)?;
                    if cfg.frame_clock_freq == 0 {
                        unconfigure(&mut inner.rx, pool, &self.rx_flow);
                        unconfigure(&mut inner.tx, pool, &self.tx_flow);
                        return Ok(());
                    }
                    check_geometry(cfg, pool)?;
                    if inner.periph.apply_format(cfg).is_err() {
                        error!("peripheral rejected format");
                        return Err(Error::HardwareFault);
                    }
                    apply_config(&mut inner.rx, pool, &self.rx_flow, cfg);
                    apply_config(&mut inner.tx, pool, &self.tx_flow, cfg);
                    Ok(())
                }
            }
        })
    }

    /// Apply a trigger command to the addressed stream(s).
    ///
    /// The state check and the transition happen inside one critical
    /// section, so a trigger cannot race the completion handler observing
    /// the same state. Invalid transitions fail with no side effect.
    pub fn trigger(&self, dir: Direction, cmd: Trigger) -> Result<(), Error> {
        critical_section::with(|cs| {
            let inner = &mut *self.inner.borrow_ref_mut(cs);
            let pool: &dyn BlockPool = &self.pool;
            match dir {
                Direction::Rx => trigger_rx(inner, pool, &self.rx_flow, cmd),
                Direction::Tx => trigger_tx(inner, pool, &self.tx_flow, cmd),
                Direction::Both => {
                    if !self.full_duplex {
                        error!("trigger: device is not full duplex");
                        return Err(Error::InvalidState);
                    }
                    duplex::trigger(inner, pool, &self.rx_flow, &self.tx_flow, cmd)
                }
            }
        })
    }

    /// Take one received block, waiting up to the configured timeout.
    ///
    /// The caller becomes the block's owner and must eventually return it
    /// to [`Device::pool`].
    pub fn read(&self, delay: &mut impl DelayNs) -> Result<Block, Error> {
        let timeout_ms = critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            match inner.rx.state {
                StreamState::NotReady | StreamState::Error => {
                    error!("read: invalid state");
                    Err(Error::InvalidState)
                }
                _ => Ok(inner.rx.cfg.map(|c| c.timeout_ms).unwrap_or(0)),
            }
        })?;

        self.wait(Direction::Rx, timeout_ms, delay)?;

        critical_section::with(|cs| self.inner.borrow_ref(cs).rx.queue.pop()).ok_or_else(|| {
            // the counter said a block was queued
            error!("read: queue empty despite signal");
            Error::ResourceExhausted
        })
    }

    /// Queue one block for transmission, waiting up to the configured
    /// timeout for a free slot. Ownership transfers to the stream on
    /// success; on failure the block comes back with the error.
    pub fn write(&self, block: Block, delay: &mut impl DelayNs) -> Result<(), (Error, Block)> {
        let timeout_ms = critical_section::with(|cs| {
            let inner = self.inner.borrow_ref(cs);
            match inner.tx.state {
                StreamState::Ready | StreamState::Running => {
                    Ok(inner.tx.cfg.map(|c| c.timeout_ms).unwrap_or(0))
                }
                _ => {
                    error!("write: invalid state");
                    Err(Error::InvalidState)
                }
            }
        });
        let timeout_ms = match timeout_ms {
            Ok(t) => t,
            Err(e) => return Err((e, block)),
        };

        if let Err(e) = self.wait(Direction::Tx, timeout_ms, delay) {
            return Err((e, block));
        }

        critical_section::with(|cs| self.inner.borrow_ref(cs).tx.queue.push(block)).map_err(|b| {
            // the counter said a slot was free
            error!("write: queue full despite free slot");
            (Error::ResourceExhausted, b)
        })
    }

    /// RX DMA completion entry point. Call from the RX channel's
    /// completion interrupt with the reported status.
    pub fn rx_dma_complete(&self, status: DmaStatus) {
        critical_section::with(|cs| {
            let inner = &mut *self.inner.borrow_ref_mut(cs);
            rx::complete(inner, &self.pool, &self.rx_flow, status);
        })
    }

    /// TX DMA completion entry point. Call from the TX channel's
    /// completion interrupt with the reported status.
    pub fn tx_dma_complete(&self, status: DmaStatus) {
        critical_section::with(|cs| {
            let inner = &mut *self.inner.borrow_ref_mut(cs);
            tx::complete(inner, &self.pool, &self.tx_flow, status);
        })
    }

    /// Peripheral error interrupt entry point.
    ///
    /// Reads and clears the error flags, counts them, and moves the
    /// affected stream(s) to `Error`. Hardware stays armed until the next
    /// DMA completion observes the error state and runs the disable path.
    pub fn error_isr(&self) {
        critical_section::with(|cs| {
            let inner = &mut *self.inner.borrow_ref_mut(cs);
            let flags = inner.periph.error_flags();
            inner.counters.err_irqs += 1;
            if flags.overrun {
                inner.counters.periph_overruns += 1;
            }
            if flags.underrun {
                inner.counters.periph_underruns += 1;
            }
            if flags.frame_error {
                inner.counters.frame_errors += 1;
            }
            inner.periph.clear_error_flags(flags);
            error!("peripheral error interrupt");

            let fault_rx = inner.duplex_active
                || matches!(inner.rx.state, StreamState::Running | StreamState::Stopping);
            let fault_tx = inner.duplex_active
                || matches!(inner.tx.state, StreamState::Running | StreamState::Stopping);
            if fault_rx {
                inner.rx.state = StreamState::Error;
            }
            if fault_tx {
                inner.tx.state = StreamState::Error;
            }
        })
    }

    /// Bounded flow-control wait: poll the counter, give up on timeout, or
    /// early when the stream was stopped/faulted under the waiter.
    fn wait(
        &self,
        dir: Direction,
        timeout_ms: u32,
        delay: &mut impl DelayNs,
    ) -> Result<(), Error> {
        let flow = match dir {
            Direction::Rx => &self.rx_flow,
            _ => &self.tx_flow,
        };
        let epoch = flow.epoch();
        let mut budget_us = timeout_ms as u64 * 1000;
        loop {
            if flow.try_take() {
                return Ok(());
            }
            if flow.epoch() != epoch {
                // a STOP/DROP reset the counter under us
                return Err(Error::InvalidState);
            }
            let state = critical_section::with(|cs| {
                let inner = self.inner.borrow_ref(cs);
                match dir {
                    Direction::Rx => inner.rx.state,
                    _ => inner.tx.state,
                }
            });
            let still_valid = match dir {
                Direction::Rx => !matches!(state, StreamState::NotReady | StreamState::Error),
                _ => matches!(state, StreamState::Ready | StreamState::Running),
            };
            if !still_valid {
                return Err(Error::InvalidState);
            }
            if budget_us == 0 {
                return Err(Error::Timeout);
            }
            let step = (POLL_PERIOD_US as u64).min(budget_us) as u32;
            delay.delay_us(step);
            budget_us -= step as u64;
        }
    }
}

fn check_configurable(stream: &Stream) -> Result<(), Error> {
    match stream.state {
        StreamState::NotReady | StreamState::Ready => Ok(()),
        _ => {
            error!("configure: invalid state");
            Err(Error::InvalidState)
        }
    }
}

fn configure_one<P: SerialPeripheral>(
    periph: &mut P,
    stream: &mut Stream,
    pool: &dyn BlockPool,
    flow: &FlowControl,
    cfg: &StreamConfig,
) -> Result<(), Error> {
    check_configurable(stream)?;

    if cfg.frame_clock_freq == 0 {
        unconfigure(stream, pool, flow);
        return Ok(());
    }

    check_geometry(cfg, pool)?;
    if periph.apply_format(cfg).is_err() {
        error!("peripheral rejected format");
        return Err(Error::HardwareFault);
    }
    apply_config(stream, pool, flow, cfg);
    Ok(())
}

fn check_geometry(cfg: &StreamConfig, pool: &dyn BlockPool) -> Result<(), Error> {
    cfg.validate()?;
    if cfg.block_size > pool.block_size() {
        error!("block size {} exceeds pool blocks", cfg.block_size);
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

/// Zero frame clock disables the direction.
fn unconfigure(stream: &mut Stream, pool: &dyn BlockPool, flow: &FlowControl) {
    stream.drop_queue(pool, flow);
    stream.cfg = None;
    stream.state = StreamState::NotReady;
}

/// Mutation tail of a configure: only reached once every check passed.
fn apply_config(stream: &mut Stream, pool: &dyn BlockPool, flow: &FlowControl, cfg: &StreamConfig) {
    // Discard anything queued under the previous geometry.
    stream.drop_queue(pool, flow);
    stream.queue.set_capacity(cfg.block_count);
    match stream.direction {
        Direction::Rx => flow.configure(0, cfg.block_count),
        _ => flow.configure(cfg.block_count, cfg.block_count),
    }
    stream.cfg = Some(*cfg);
    stream.underrun = false;
    stream.state = StreamState::Ready;
}

fn trigger_rx<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
    flow: &FlowControl,
    cmd: Trigger,
) -> Result<(), Error> {
    match cmd {
        Trigger::Start => {
            if inner.rx.state != StreamState::Ready {
                error!("rx start: invalid state");
                return Err(Error::InvalidState);
            }
            debug_assert!(inner.rx.active.is_none());
            rx::start(&mut inner.periph, &mut inner.rx_dma, &mut inner.rx, pool)?;
            inner.rx.state = StreamState::Running;
            Ok(())
        }
        // RX has no queued-but-unreceived data to wait for, so DRAIN is an
        // immediate stop-and-drop.
        Trigger::Stop | Trigger::Drain => {
            if inner.rx.state != StreamState::Running {
                error!("rx stop: invalid state");
                return Err(Error::InvalidState);
            }
            rx_disable_half(inner, pool);
            inner.rx.drop_queue(pool, flow);
            inner.rx.state = StreamState::Ready;
            Ok(())
        }
        Trigger::Drop => {
            if inner.rx.state == StreamState::NotReady {
                error!("rx drop: invalid state");
                return Err(Error::InvalidState);
            }
            rx_disable_half(inner, pool);
            inner.rx.drop_queue(pool, flow);
            inner.rx.state = StreamState::Ready;
            Ok(())
        }
        Trigger::Prepare => {
            if inner.rx.state != StreamState::Error {
                error!("rx prepare: invalid state");
                return Err(Error::InvalidState);
            }
            // An error-interrupt fault leaves the channel armed until the
            // next completion; do not hand a Ready stream to a live DMA.
            if inner.rx.active.is_some() {
                rx_disable_half(inner, pool);
            }
            inner.rx.drop_queue(pool, flow);
            inner.rx.state = StreamState::Ready;
            Ok(())
        }
    }
}

fn trigger_tx<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
    flow: &FlowControl,
    cmd: Trigger,
) -> Result<(), Error> {
    match cmd {
        Trigger::Start => {
            if inner.tx.state != StreamState::Ready {
                error!("tx start: invalid state");
                return Err(Error::InvalidState);
            }
            debug_assert!(inner.tx.active.is_none());
            tx::start(&mut inner.periph, &mut inner.tx_dma, &mut inner.tx, pool, flow)?;
            inner.tx.state = StreamState::Running;
            Ok(())
        }
        Trigger::Stop => {
            if inner.tx.state != StreamState::Running {
                error!("tx stop: invalid state");
                return Err(Error::InvalidState);
            }
            tx_disable_half(inner, pool);
            inner.tx.drop_queue(pool, flow);
            inner.tx.state = StreamState::Ready;
            Ok(())
        }
        Trigger::Drain => {
            if inner.tx.state != StreamState::Running {
                error!("tx drain: invalid state");
                return Err(Error::InvalidState);
            }
            // The completion handler finishes the drain once the queue
            // empties.
            inner.tx.state = StreamState::Stopping;
            Ok(())
        }
        Trigger::Drop => {
            if inner.tx.state == StreamState::NotReady {
                error!("tx drop: invalid state");
                return Err(Error::InvalidState);
            }
            tx_disable_half(inner, pool);
            inner.tx.drop_queue(pool, flow);
            inner.tx.state = StreamState::Ready;
            Ok(())
        }
        Trigger::Prepare => {
            if inner.tx.state != StreamState::Error {
                error!("tx prepare: invalid state");
                return Err(Error::InvalidState);
            }
            // See the RX PREPARE arm: the channel may still be armed.
            if inner.tx.active.is_some() || inner.tx.filler.is_some() {
                tx_disable_half(inner, pool);
            }
            inner.tx.drop_queue(pool, flow);
            inner.tx.state = StreamState::Ready;
            Ok(())
        }
    }
}

/// Disable RX in half-duplex context, leaving shared hardware alone while
/// TX still runs.
fn rx_disable_half<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
) {
    let tx_idle = !matches!(
        inner.tx.state,
        StreamState::Running | StreamState::Stopping
    );
    rx::disable(
        &mut inner.periph,
        &mut inner.rx_dma,
        &mut inner.rx,
        pool,
        tx_idle,
    );
}

/// TX counterpart of [`rx_disable_half`].
fn tx_disable_half<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
) {
    let rx_idle = !matches!(
        inner.rx.state,
        StreamState::Running | StreamState::Stopping
    );
    tx::disable(
        &mut inner.periph,
        &mut inner.tx_dma,
        &mut inner.tx,
        pool,
        rx_idle,
    );
}

/// Disable path used by the RX completion handler: when the streams are
/// coupled, a fault on one side takes both down.
pub(crate) fn rx_disable_path<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
) {
    if inner.duplex_active {
        error!("rx fault: disabling both directions");
        inner.tx.state = StreamState::Error;
        duplex::disable(inner, pool);
    } else {
        rx_disable_half(inner, pool);
    }
}

/// TX counterpart of [`rx_disable_path`].
pub(crate) fn tx_disable_path<P: SerialPeripheral, D: DmaChannel>(
    inner: &mut Inner<P, D>,
    pool: &dyn BlockPool,
) {
    if inner.duplex_active {
        error!("tx fault: disabling both directions");
        inner.rx.state = StreamState::Error;
        duplex::disable(inner, pool);
    } else {
        tx_disable_half(inner, pool);
    }
}
