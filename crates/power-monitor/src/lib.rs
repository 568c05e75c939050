//! power-monitor: INA260 current/voltage/power telemetry over I2C
//!
//! Layers, bottom up: register framing on any [`i2c_transport::I2cBus`], the [`Ina260`]
//! device handle, pure decoders from raw words to physical units, and a [`PollLoop`]
//! that samples the device at a fixed cadence on an injected [`Clock`].

mod registers;
pub use registers::{
    Averaging, ConversionConfig, ConversionTime, OperatingMode, Register, UnsupportedSetting,
    INA260_DIE_ID, TI_MANUFACTURER_ID,
};

mod error;
pub use error::{InitError, RegisterError};

pub mod access;
pub use access::{RawRegisterValue, MAX_PAYLOAD, REGISTER_WIDTH};

mod decode;
pub use decode::{
    decode, decode_bus_voltage, decode_current, decode_power, Reading, TelemetryKind,
    TelemetryRecord, TelemetryValue, BUS_VOLTAGE_LSB_MV, CURRENT_LSB_MA, POWER_LSB_MW,
};

mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

mod device;
pub use device::{ExpectedIdentity, Identity, Ina260, DEFAULT_ADDRESS, DEFAULT_SETTLE};

mod sink;
pub use sink::{JsonLinesSink, LineSink, MemorySink, SinkEvent, TelemetrySink};

mod poll;
pub use poll::{PollLoop, PollState, PollStats, DEFAULT_INTERVAL};

mod loader;
pub use loader::{load_config_file, parse_config, MonitorConfig};

mod metrics;
pub use metrics::{MetricsHub, MonitorMetrics};
