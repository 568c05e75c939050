use core::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// INA260 register map. Every register is 16 bits, transferred big-endian.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Register {
    Configuration = 0x00,
    Current = 0x01,
    BusVoltage = 0x02,
    Power = 0x03,
    ManufacturerId = 0xFE,
    DieId = 0xFF,
}

impl Register {
    pub const ALL: [Register; 6] = [
        Register::Configuration,
        Register::Current,
        Register::BusVoltage,
        Register::Power,
        Register::ManufacturerId,
        Register::DieId,
    ];

    pub fn addr(self) -> u8 {
        self as u8
    }

    pub fn from_addr(addr: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.addr() == addr)
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Configuration => "configuration",
            Register::Current => "current",
            Register::BusVoltage => "bus_voltage",
            Register::Power => "power",
            Register::ManufacturerId => "manufacturer_id",
            Register::DieId => "die_id",
        }
    }

    /// Parse a register by name or by address ("current", "0x01").
    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim();
        if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            return u8::from_str_radix(hex, 16).ok().and_then(Self::from_addr);
        }
        let lower = t.to_ascii_lowercase();
        match lower.as_str() {
            "config" | "configuration" => Some(Register::Configuration),
            "current" => Some(Register::Current),
            "voltage" | "bus_voltage" => Some(Register::BusVoltage),
            "power" => Some(Register::Power),
            "manufacturer" | "manufacturer_id" => Some(Register::ManufacturerId),
            "die" | "die_id" | "chip_id" => Some(Register::DieId),
            _ => None,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.addr())
    }
}

/// Manufacturer ID reported by TI parts ("TI" in ASCII).
pub const TI_MANUFACTURER_ID: u16 = 0x5449;
/// Die ID of the INA260 (device 0x227, revision 0).
pub const INA260_DIE_ID: u16 = 0x2270;

#[derive(Debug, Error)]
#[error("unsupported {setting}: {value}")]
pub struct UnsupportedSetting {
    pub setting: &'static str,
    pub value: u32,
}

/// Number of samples averaged per conversion result (AVG, bits 11..9).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Averaging {
    X1,
    X4,
    X16,
    X64,
    X128,
    X256,
    X512,
    X1024,
}

impl Averaging {
    const TABLE: [(Averaging, u16); 8] = [
        (Averaging::X1, 1),
        (Averaging::X4, 4),
        (Averaging::X16, 16),
        (Averaging::X64, 64),
        (Averaging::X128, 128),
        (Averaging::X256, 256),
        (Averaging::X512, 512),
        (Averaging::X1024, 1024),
    ];

    pub fn count(self) -> u16 {
        Self::TABLE[self.code() as usize].1
    }

    fn code(self) -> u16 {
        self as u16
    }

    fn from_code(code: u16) -> Self {
        Self::TABLE[(code & 0b111) as usize].0
    }
}

impl TryFrom<u16> for Averaging {
    type Error = UnsupportedSetting;

    fn try_from(count: u16) -> Result<Self, Self::Error> {
        Self::TABLE
            .iter()
            .find(|(_, n)| *n == count)
            .map(|(a, _)| *a)
            .ok_or(UnsupportedSetting {
                setting: "averaging count",
                value: u32::from(count),
            })
    }
}

impl From<Averaging> for u16 {
    fn from(a: Averaging) -> u16 {
        a.count()
    }
}

/// ADC conversion time (VBUSCT bits 8..6, ISHCT bits 5..3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ConversionTime {
    Us140,
    Us204,
    Us332,
    Us588,
    Us1100,
    Us2116,
    Us4156,
    Us8244,
}

impl ConversionTime {
    const TABLE: [(ConversionTime, u32); 8] = [
        (ConversionTime::Us140, 140),
        (ConversionTime::Us204, 204),
        (ConversionTime::Us332, 332),
        (ConversionTime::Us588, 588),
        (ConversionTime::Us1100, 1100),
        (ConversionTime::Us2116, 2116),
        (ConversionTime::Us4156, 4156),
        (ConversionTime::Us8244, 8244),
    ];

    pub fn micros(self) -> u32 {
        Self::TABLE[self.code() as usize].1
    }

    fn code(self) -> u16 {
        self as u16
    }

    fn from_code(code: u16) -> Self {
        Self::TABLE[(code & 0b111) as usize].0
    }
}

impl TryFrom<u32> for ConversionTime {
    type Error = UnsupportedSetting;

    fn try_from(us: u32) -> Result<Self, Self::Error> {
        Self::TABLE
            .iter()
            .find(|(_, t)| *t == us)
            .map(|(c, _)| *c)
            .ok_or(UnsupportedSetting {
                setting: "conversion time (us)",
                value: us,
            })
    }
}

impl From<ConversionTime> for u32 {
    fn from(c: ConversionTime) -> u32 {
        c.micros()
    }
}

/// Operating mode (MODE, bits 2..0).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    PowerDown,
    CurrentTriggered,
    VoltageTriggered,
    BothTriggered,
    CurrentContinuous,
    VoltageContinuous,
    Continuous,
}

impl OperatingMode {
    fn code(self) -> u16 {
        match self {
            OperatingMode::PowerDown => 0b000,
            OperatingMode::CurrentTriggered => 0b001,
            OperatingMode::VoltageTriggered => 0b010,
            OperatingMode::BothTriggered => 0b011,
            OperatingMode::CurrentContinuous => 0b101,
            OperatingMode::VoltageContinuous => 0b110,
            OperatingMode::Continuous => 0b111,
        }
    }

    fn from_code(code: u16) -> Self {
        match code & 0b111 {
            0b001 => OperatingMode::CurrentTriggered,
            0b010 => OperatingMode::VoltageTriggered,
            0b011 => OperatingMode::BothTriggered,
            0b101 => OperatingMode::CurrentContinuous,
            0b110 => OperatingMode::VoltageContinuous,
            0b111 => OperatingMode::Continuous,
            // 0b000 and 0b100 are both power-down
            _ => OperatingMode::PowerDown,
        }
    }
}

/// Contents of the configuration register.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    #[serde(default = "default_averaging")]
    pub averaging: Averaging,
    #[serde(default = "default_conversion_time")]
    pub bus_conversion_us: ConversionTime,
    #[serde(default = "default_conversion_time")]
    pub current_conversion_us: ConversionTime,
    #[serde(default = "default_mode")]
    pub mode: OperatingMode,
}

fn default_averaging() -> Averaging {
    Averaging::X128
}

fn default_conversion_time() -> ConversionTime {
    ConversionTime::Us1100
}

fn default_mode() -> OperatingMode {
    OperatingMode::Continuous
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            averaging: default_averaging(),
            bus_conversion_us: default_conversion_time(),
            current_conversion_us: default_conversion_time(),
            mode: default_mode(),
        }
    }
}

impl ConversionConfig {
    /// Bits 14..12 are reserved and read back as 0b110.
    const RESERVED: u16 = 0b110 << 12;

    pub fn to_bits(&self) -> u16 {
        Self::RESERVED
            | self.averaging.code() << 9
            | self.bus_conversion_us.code() << 6
            | self.current_conversion_us.code() << 3
            | self.mode.code()
    }

    pub fn from_bits(bits: u16) -> Self {
        Self {
            averaging: Averaging::from_code(bits >> 9),
            bus_conversion_us: ConversionTime::from_code(bits >> 6),
            current_conversion_us: ConversionTime::from_code(bits >> 3),
            mode: OperatingMode::from_code(bits),
        }
    }

    /// Payload for a configuration register write.
    pub fn payload(&self) -> [u8; 2] {
        self.to_bits().to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_payload() {
        // 128 averages, 1.1 ms conversions, continuous current and voltage
        assert_eq!(ConversionConfig::default().payload(), [0x69, 0x27]);
    }

    #[test]
    fn test_power_on_default_readback() {
        let cfg = ConversionConfig::from_bits(0x6127);
        assert_eq!(cfg.averaging, Averaging::X1);
        assert_eq!(cfg.bus_conversion_us, ConversionTime::Us1100);
        assert_eq!(cfg.current_conversion_us, ConversionTime::Us1100);
        assert_eq!(cfg.mode, OperatingMode::Continuous);
    }

    #[test]
    fn test_custom_config_bits() {
        let cfg = ConversionConfig {
            averaging: Averaging::X1024,
            bus_conversion_us: ConversionTime::Us140,
            current_conversion_us: ConversionTime::Us8244,
            mode: OperatingMode::CurrentTriggered,
        };
        assert_eq!(cfg.to_bits(), 0x6000 | 0b111 << 9 | 0b111 << 3 | 0b001);
    }

    #[test]
    fn test_register_lookup() {
        assert_eq!(Register::from_addr(0x02), Some(Register::BusVoltage));
        assert_eq!(Register::from_addr(0x04), None);
        assert_eq!(Register::parse("0xFE"), Some(Register::ManufacturerId));
        assert_eq!(Register::parse("voltage"), Some(Register::BusVoltage));
        assert_eq!(Register::parse("chip_id"), Some(Register::DieId));
        assert_eq!(Register::parse("shunt"), None);
    }

    #[test]
    fn test_unsupported_settings_rejected() {
        assert!(Averaging::try_from(100).is_err());
        assert_eq!(Averaging::try_from(64).unwrap(), Averaging::X64);
        assert!(ConversionTime::try_from(1000).is_err());
        assert_eq!(ConversionTime::try_from(588).unwrap().micros(), 588);
    }
}
