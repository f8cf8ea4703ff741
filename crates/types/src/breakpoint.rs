// Path: crates/types/src/breakpoint.rs
//! The breakpoint flag polled by the WASM engine.

/// An atomic flag observed by the engine at safe points; any non-`None`
/// value forces the engine to abort at the next opportunity.
///
/// The discriminants are stable because the engine binding stores the flag
/// in a shared atomic cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Breakpoint {
    /// Execution proceeds normally.
    None = 0,
    /// A non-recoverable failure was recorded; abort and report `ExecutionFailed`.
    ExecutionFailed = 1,
    /// The contract registered an asynchronous call; abort and let the host
    /// process it.
    AsyncCall = 2,
    /// The contract signalled a user error via `signalError`.
    SignalError = 3,
    /// The metering context exhausted the gas provided.
    OutOfGas = 4,
}

impl Breakpoint {
    /// Decodes a raw cell value; unknown values collapse to `ExecutionFailed`
    /// so a corrupted flag can never be mistaken for success.
    pub fn from_u64(raw: u64) -> Self {
        match raw {
            0 => Breakpoint::None,
            1 => Breakpoint::ExecutionFailed,
            2 => Breakpoint::AsyncCall,
            3 => Breakpoint::SignalError,
            4 => Breakpoint::OutOfGas,
            _ => Breakpoint::ExecutionFailed,
        }
    }

    /// Encodes the flag for storage in the shared cell.
    pub fn as_u64(self) -> u64 {
        self as u64
    }
}

/// A shared, thread-safe cell holding the current [`Breakpoint`].
///
/// One cell is created per instance start; the supervising task holds a clone
/// so a timeout can request cancellation while the worker is inside the
/// engine.
#[derive(Debug, Default)]
pub struct BreakpointCell(std::sync::atomic::AtomicU64);

impl BreakpointCell {
    /// Creates a cell in the `None` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a breakpoint value.
    pub fn set(&self, value: Breakpoint) {
        self.0.store(value.as_u64(), std::sync::atomic::Ordering::SeqCst);
    }

    /// Loads the current breakpoint value.
    pub fn get(&self) -> Breakpoint {
        Breakpoint::from_u64(self.0.load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_raw_values_are_execution_failed() {
        assert_eq!(Breakpoint::from_u64(99), Breakpoint::ExecutionFailed);
    }

    #[test]
    fn cell_roundtrip() {
        let cell = BreakpointCell::new();
        assert_eq!(cell.get(), Breakpoint::None);
        cell.set(Breakpoint::OutOfGas);
        assert_eq!(cell.get(), Breakpoint::OutOfGas);
    }
}
