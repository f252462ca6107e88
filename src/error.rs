/// Errors reported by the streaming engine.
///
/// Configuration and trigger errors are returned synchronously with no side
/// effect. Faults detected inside a completion handler are not returned to
/// anyone directly; they move the stream to [`StreamState::Error`] and
/// surface on the next `read`/`write`/`trigger` call.
///
/// [`StreamState::Error`]: crate::StreamState::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Malformed configuration (word size, block geometry, ...).
    InvalidArgument,
    /// Trigger, read or write issued in a state that does not allow it.
    InvalidState,
    /// Block pool exhausted, or a queue slot was missing where the
    /// flow-control accounting said one existed.
    ResourceExhausted,
    /// A bounded flow-control wait exceeded the configured timeout.
    Timeout,
    /// A collaborator (DMA engine or serial peripheral) reported a fault.
    HardwareFault,
}
