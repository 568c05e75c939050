//! Register framing on top of the raw bus: a one-byte register pointer followed by a
//! two-byte big-endian word.

use crate::{Register, RegisterError};
use i2c_transport::{BusAddress, I2cBus};
use tracing::trace;

/// Width of every register on the device.
pub const REGISTER_WIDTH: usize = 2;
/// Largest payload accepted by [`write_register`].
pub const MAX_PAYLOAD: usize = REGISTER_WIDTH;

/// Two bytes read from the device, tagged with the register they came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RawRegisterValue {
    register: Register,
    bytes: [u8; REGISTER_WIDTH],
}

impl RawRegisterValue {
    /// Only for values that did not come off the bus (offline decode, tests).
    pub fn from_bytes(register: Register, bytes: [u8; REGISTER_WIDTH]) -> Self {
        Self { register, bytes }
    }

    pub fn register(&self) -> Register {
        self.register
    }

    pub fn bytes(&self) -> [u8; REGISTER_WIDTH] {
        self.bytes
    }

    pub fn word(&self) -> u16 {
        u16::from_be_bytes(self.bytes)
    }
}

pub fn read_register<B: I2cBus>(
    bus: &mut B,
    addr: BusAddress,
    register: Register,
) -> Result<RawRegisterValue, RegisterError> {
    let mut bytes = [0u8; REGISTER_WIDTH];
    bus.write_read(addr, &[register.addr()], &mut bytes)
        .map_err(|source| RegisterError::Read { register, source })?;
    trace!(%addr, %register, "read {:02X} {:02X}", bytes[0], bytes[1]);
    Ok(RawRegisterValue { register, bytes })
}

pub fn write_register<B: I2cBus>(
    bus: &mut B,
    addr: BusAddress,
    register: Register,
    payload: &[u8],
) -> Result<(), RegisterError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(RegisterError::PayloadTooLong {
            register,
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let mut frame = [0u8; 1 + MAX_PAYLOAD];
    frame[0] = register.addr();
    frame[1..=payload.len()].copy_from_slice(payload);
    bus.write(addr, &frame[..=payload.len()])
        .map_err(|source| RegisterError::Write { register, source })?;
    trace!(%addr, %register, len = payload.len(), "wrote register");
    Ok(())
}
