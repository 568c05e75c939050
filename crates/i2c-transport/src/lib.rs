//! i2c-transport: blocking I2C bus abstractions
//!
//! This crate provides the [`I2cBus`] trait and the types needed to address devices on a
//! two-wire bus, with feature-gated backends. The default build enables a `mock` backend so
//! that binaries and tests run on any host without an I2C adapter.

mod types;
pub use types::{BusAddress, BusInfo};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::I2cBus;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, Transaction};

#[cfg(feature = "rppal")]
mod rppal_bus;

#[cfg(feature = "rppal")]
pub use rppal_bus::RppalBus;
