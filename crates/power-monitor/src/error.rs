use crate::Register;
use i2c_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("failed to read register {register}: {source}")]
    Read {
        register: Register,
        #[source]
        source: TransportError,
    },
    #[error("failed to write register {register}: {source}")]
    Write {
        register: Register,
        #[source]
        source: TransportError,
    },
    #[error("payload for register {register} is {len} bytes, at most {max} allowed")]
    PayloadTooLong {
        register: Register,
        len: usize,
        max: usize,
    },
    #[error("device not initialized; refusing to read {0}")]
    NotInitialized(Register),
}

impl RegisterError {
    pub fn register(&self) -> Register {
        match self {
            RegisterError::Read { register, .. }
            | RegisterError::Write { register, .. }
            | RegisterError::PayloadTooLong { register, .. } => *register,
            RegisterError::NotInitialized(register) => *register,
        }
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("bus {bus} is not ready")]
    BusNotReady { bus: String },
    #[error("unexpected {register}: found 0x{found:04X}, expected 0x{expected:04X}")]
    IdentityMismatch {
        register: Register,
        expected: u16,
        found: u16,
    },
    #[error("identification failed: {0}")]
    Identify(#[from] RegisterError),
}
