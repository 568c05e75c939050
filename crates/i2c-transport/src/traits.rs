use crate::{BusAddress, BusInfo, Result};

/// A minimal blocking I2C bus interface.
///
/// Every call is a complete transaction with start/stop framing; at most one
/// transaction is in flight per bus.
pub trait I2cBus {
    /// Open a bus by name (e.g., "i2c-1", "/dev/i2c-1", "mock0").
    fn open(name: &str) -> Result<Self>
    where
        Self: Sized;

    /// Attempt to list available buses for this backend.
    fn list() -> Result<Vec<BusInfo>>
    where
        Self: Sized;

    /// Whether the underlying controller is ready to carry transactions.
    fn is_ready(&self) -> bool;

    /// Write `bytes` to the device at `addr` in a single transaction.
    fn write(&mut self, addr: BusAddress, bytes: &[u8]) -> Result<()>;

    /// Write `out`, then read `input.len()` bytes back under a repeated start.
    fn write_read(&mut self, addr: BusAddress, out: &[u8], input: &mut [u8]) -> Result<()>;
}
