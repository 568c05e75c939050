use crate::{RawRegisterValue, Register};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Current LSB in mA.
pub const CURRENT_LSB_MA: f64 = 1.25;
/// Bus voltage LSB in mV.
pub const BUS_VOLTAGE_LSB_MV: f64 = 1.25;
/// Power LSB in mW.
pub const POWER_LSB_MW: u32 = 10;

/// Registers that carry a physical measurement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    Current,
    BusVoltage,
    Power,
}

impl TelemetryKind {
    /// Order in which one poll round reads the device.
    pub const POLL_ORDER: [TelemetryKind; 3] = [
        TelemetryKind::Current,
        TelemetryKind::BusVoltage,
        TelemetryKind::Power,
    ];

    pub fn register(self) -> Register {
        match self {
            TelemetryKind::Current => Register::Current,
            TelemetryKind::BusVoltage => Register::BusVoltage,
            TelemetryKind::Power => Register::Power,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            TelemetryKind::Current => "mA",
            TelemetryKind::BusVoltage => "mV",
            TelemetryKind::Power => "mW",
        }
    }

    pub fn name(self) -> &'static str {
        self.register().name()
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Current in mA: two's-complement word times 1.25.
pub fn decode_current(bytes: [u8; 2]) -> f64 {
    f64::from(i16::from_be_bytes(bytes)) * CURRENT_LSB_MA
}

/// Bus voltage in mV. The word is read as signed like the current register; the device
/// never reports a negative bus voltage, so only words at or above 0x8000 differ from an
/// unsigned read.
pub fn decode_bus_voltage(bytes: [u8; 2]) -> f64 {
    f64::from(i16::from_be_bytes(bytes)) * BUS_VOLTAGE_LSB_MV
}

/// Power in mW: unsigned word times 10.
pub fn decode_power(bytes: [u8; 2]) -> u32 {
    u32::from(u16::from_be_bytes(bytes)) * POWER_LSB_MW
}

/// A decoded register value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reading {
    CurrentMilliAmps(f64),
    BusVoltageMilliVolts(f64),
    PowerMilliWatts(u32),
    Configuration(u16),
    ManufacturerId(u16),
    DieId(u16),
}

impl Reading {
    pub fn kind(&self) -> Option<TelemetryKind> {
        match self {
            Reading::CurrentMilliAmps(_) => Some(TelemetryKind::Current),
            Reading::BusVoltageMilliVolts(_) => Some(TelemetryKind::BusVoltage),
            Reading::PowerMilliWatts(_) => Some(TelemetryKind::Power),
            _ => None,
        }
    }

    pub fn value(&self) -> TelemetryValue {
        match *self {
            Reading::CurrentMilliAmps(v) | Reading::BusVoltageMilliVolts(v) => {
                TelemetryValue::F64(v)
            }
            Reading::PowerMilliWatts(v) => TelemetryValue::U32(v),
            Reading::Configuration(w) | Reading::ManufacturerId(w) | Reading::DieId(w) => {
                TelemetryValue::U32(u32::from(w))
            }
        }
    }
}

/// Decode a raw value with the decoder that matches the register it was read from.
pub fn decode(raw: &RawRegisterValue) -> Reading {
    let bytes = raw.bytes();
    match raw.register() {
        Register::Current => Reading::CurrentMilliAmps(decode_current(bytes)),
        Register::BusVoltage => Reading::BusVoltageMilliVolts(decode_bus_voltage(bytes)),
        Register::Power => Reading::PowerMilliWatts(decode_power(bytes)),
        Register::Configuration => Reading::Configuration(raw.word()),
        Register::ManufacturerId => Reading::ManufacturerId(raw.word()),
        Register::DieId => Reading::DieId(raw.word()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    F64(f64),
    U32(u32),
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::F64(v) => write!(f, "{v:.2}"),
            TelemetryValue::U32(v) => write!(f, "{v}"),
        }
    }
}

/// One emitted sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub kind: TelemetryKind,
    pub register: u8,
    pub value: TelemetryValue,
    pub unit: String,
    pub raw: String,
    pub seq: u64,
    /// Milliseconds since the poll loop's clock started.
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl TelemetryRecord {
    pub fn new(
        kind: TelemetryKind,
        raw: &RawRegisterValue,
        reading: Reading,
        seq: u64,
        elapsed: Duration,
        ts: Option<OffsetDateTime>,
    ) -> Self {
        let [hi, lo] = raw.bytes();
        Self {
            kind,
            register: raw.register().addr(),
            value: reading.value(),
            unit: kind.unit().to_string(),
            raw: format!("{hi:02X}{lo:02X}"),
            seq,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            ts: ts.and_then(|t| {
                t.format(&time::format_description::well_known::Rfc3339)
                    .ok()
            }),
        }
    }
}
