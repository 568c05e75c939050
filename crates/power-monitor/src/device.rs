use crate::access::{read_register, write_register};
use crate::{
    decode, Clock, ConversionConfig, InitError, RawRegisterValue, Reading, Register,
    RegisterError, TelemetryKind, INA260_DIE_ID, TI_MANUFACTURER_ID,
};
use i2c_transport::{BusAddress, I2cBus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Address with A0 and A1 tied to GND.
pub const DEFAULT_ADDRESS: u8 = 0x40;
/// Register contents are not valid until this long after a configuration write.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Identification words the device is expected to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedIdentity {
    #[serde(default = "default_manufacturer_id")]
    pub manufacturer_id: u16,
    #[serde(default = "default_die_id")]
    pub die_id: u16,
}

fn default_manufacturer_id() -> u16 {
    TI_MANUFACTURER_ID
}

fn default_die_id() -> u16 {
    INA260_DIE_ID
}

impl Default for ExpectedIdentity {
    fn default() -> Self {
        Self {
            manufacturer_id: TI_MANUFACTURER_ID,
            die_id: INA260_DIE_ID,
        }
    }
}

/// What the device reported about itself at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer_id: u16,
    pub die_id: u16,
    /// Configuration word as read back, which may differ from the one written.
    pub config_word: u16,
}

impl Identity {
    pub fn config(&self) -> ConversionConfig {
        ConversionConfig::from_bits(self.config_word)
    }

    pub fn matches(&self, expected: &ExpectedIdentity) -> bool {
        self.manufacturer_id == expected.manufacturer_id && self.die_id == expected.die_id
    }

    /// Fail with the first identification register that differs from `expected`.
    pub fn check(&self, expected: &ExpectedIdentity) -> Result<(), InitError> {
        let checks = [
            (
                Register::ManufacturerId,
                expected.manufacturer_id,
                self.manufacturer_id,
            ),
            (Register::DieId, expected.die_id, self.die_id),
        ];
        for (register, want, found) in checks {
            if found != want {
                return Err(InitError::IdentityMismatch {
                    register,
                    expected: want,
                    found,
                });
            }
        }
        Ok(())
    }
}

/// Handle to one INA260 on a bus.
///
/// Owns the bus for its whole life; every register operation goes through it in
/// sequence. Telemetry registers can only be read once [`Ina260::initialize`] has
/// completed the settling delay.
pub struct Ina260<B> {
    bus: B,
    bus_name: String,
    address: BusAddress,
    config: ConversionConfig,
    settle: Duration,
    ready: bool,
    configured: bool,
}

impl<B: I2cBus> Ina260<B> {
    pub fn new(bus: B, bus_name: impl Into<String>, address: BusAddress) -> Self {
        Self {
            bus,
            bus_name: bus_name.into(),
            address,
            config: ConversionConfig::default(),
            settle: DEFAULT_SETTLE,
            ready: false,
            configured: false,
        }
    }

    pub fn with_config(mut self, config: ConversionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether the last configuration write was acknowledged.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Check the bus, write the configuration register and wait out the settling delay.
    ///
    /// A bus that is not ready fails before anything is written. A failed configuration
    /// write is logged and not retried; the device keeps its previous configuration and
    /// initialization still completes.
    pub fn initialize<C: Clock>(&mut self, clock: &mut C) -> Result<(), InitError> {
        if !self.bus.is_ready() {
            return Err(InitError::BusNotReady {
                bus: self.bus_name.clone(),
            });
        }

        let payload = self.config.payload();
        match write_register(
            &mut self.bus,
            self.address,
            Register::Configuration,
            &payload,
        ) {
            Ok(()) => {
                self.configured = true;
                info!(
                    address = %self.address,
                    config = %format!("0x{:04X}", self.config.to_bits()),
                    "configured INA260"
                );
            }
            Err(e) => {
                self.configured = false;
                warn!(address = %self.address, error = %e, "configuration write failed");
            }
        }

        let settle_ms = u64::try_from(self.settle.as_millis()).unwrap_or(u64::MAX);
        debug!(settle_ms, "waiting for device to settle");
        clock.sleep(self.settle);
        self.ready = true;
        Ok(())
    }

    fn read(&mut self, register: Register) -> Result<RawRegisterValue, RegisterError> {
        read_register(&mut self.bus, self.address, register)
    }

    fn read_telemetry(&mut self, kind: TelemetryKind) -> Result<RawRegisterValue, RegisterError> {
        let register = kind.register();
        if !self.ready {
            return Err(RegisterError::NotInitialized(register));
        }
        self.read(register)
    }

    pub fn read_manufacturer_id(&mut self) -> Result<RawRegisterValue, RegisterError> {
        self.read(Register::ManufacturerId)
    }

    pub fn read_chip_id(&mut self) -> Result<RawRegisterValue, RegisterError> {
        self.read(Register::DieId)
    }

    pub fn read_configuration(&mut self) -> Result<RawRegisterValue, RegisterError> {
        self.read(Register::Configuration)
    }

    pub fn read_current(&mut self) -> Result<RawRegisterValue, RegisterError> {
        self.read_telemetry(TelemetryKind::Current)
    }

    pub fn read_voltage(&mut self) -> Result<RawRegisterValue, RegisterError> {
        self.read_telemetry(TelemetryKind::BusVoltage)
    }

    pub fn read_power(&mut self) -> Result<RawRegisterValue, RegisterError> {
        self.read_telemetry(TelemetryKind::Power)
    }

    /// Read any register by name. Telemetry registers still require initialization.
    pub fn read_register(&mut self, register: Register) -> Result<RawRegisterValue, RegisterError> {
        match register {
            Register::Current => self.read_current(),
            Register::BusVoltage => self.read_voltage(),
            Register::Power => self.read_power(),
            other => self.read(other),
        }
    }

    /// Read the register behind `kind` and decode it with the matching decoder.
    pub fn sample(
        &mut self,
        kind: TelemetryKind,
    ) -> Result<(RawRegisterValue, Reading), RegisterError> {
        let raw = self.read_telemetry(kind)?;
        Ok((raw, decode(&raw)))
    }

    /// Read back manufacturer ID, die ID and configuration.
    pub fn identify(&mut self) -> Result<Identity, RegisterError> {
        Ok(Identity {
            manufacturer_id: self.read_manufacturer_id()?.word(),
            die_id: self.read_chip_id()?.word(),
            config_word: self.read_configuration()?.word(),
        })
    }

    /// Read the identification registers and compare them against `expected`.
    pub fn verify_identity(&mut self, expected: &ExpectedIdentity) -> Result<(), InitError> {
        self.identify()?.check(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use i2c_transport::{MockBus, Transaction};

    fn addr() -> BusAddress {
        BusAddress::new(DEFAULT_ADDRESS).unwrap()
    }

    fn device() -> Ina260<MockBus> {
        let mut bus = MockBus::new("mock0");
        bus.set_register(addr(), 0xFE, &[0x54, 0x49]);
        bus.set_register(addr(), 0xFF, &[0x22, 0x70]);
        bus.set_register(addr(), 0x01, &[0x00, 0x0A]);
        bus.set_register(addr(), 0x02, &[0x01, 0x00]);
        bus.set_register(addr(), 0x03, &[0x00, 0x05]);
        Ina260::new(bus, "mock0", addr())
    }

    #[test]
    fn test_initialize_writes_config_then_settles() {
        let mut dev = device();
        let mut clock = ManualClock::new();
        dev.initialize(&mut clock).unwrap();

        assert!(dev.is_ready());
        assert!(dev.is_configured());
        assert_eq!(clock.sleeps(), &[Duration::from_millis(500)]);
        assert_eq!(
            dev.bus().transactions(),
            &[Transaction::Write {
                addr: 0x40,
                data: vec![0x00, 0x69, 0x27],
            }]
        );
    }

    #[test]
    fn test_not_ready_bus_writes_nothing() {
        let mut dev = device();
        dev.bus_mut().set_ready(false);
        let mut clock = ManualClock::new();

        let err = dev.initialize(&mut clock).unwrap_err();
        assert!(matches!(err, InitError::BusNotReady { ref bus } if bus == "mock0"));
        assert!(dev.bus().transactions().is_empty());
        assert!(clock.sleeps().is_empty());
        assert!(!dev.is_ready());
    }

    #[test]
    fn test_failed_config_write_still_settles() {
        let mut dev = device();
        dev.bus_mut().inject_fault(addr(), 0x00);
        let mut clock = ManualClock::new();

        dev.initialize(&mut clock).unwrap();
        assert!(!dev.is_configured());
        assert!(dev.is_ready());
        assert_eq!(clock.sleeps(), &[Duration::from_millis(500)]);
        // Not retried
        assert_eq!(dev.bus().transactions().len(), 1);
    }

    #[test]
    fn test_telemetry_refused_before_initialize() {
        let mut dev = device();
        let err = dev.read_current().unwrap_err();
        assert!(matches!(err, RegisterError::NotInitialized(Register::Current)));
        assert!(dev.bus().transactions().is_empty());

        // Identification is allowed at any time
        assert_eq!(dev.read_manufacturer_id().unwrap().word(), TI_MANUFACTURER_ID);
    }

    #[test]
    fn test_named_reads_hit_their_registers() {
        let mut dev = device();
        dev.initialize(&mut ManualClock::new()).unwrap();

        assert_eq!(dev.read_current().unwrap().register(), Register::Current);
        assert_eq!(dev.read_voltage().unwrap().register(), Register::BusVoltage);
        assert_eq!(dev.read_power().unwrap().register(), Register::Power);
        assert_eq!(dev.read_chip_id().unwrap().word(), INA260_DIE_ID);
        assert_eq!(dev.read_configuration().unwrap().word(), 0x6927);
    }

    #[test]
    fn test_one_failure_does_not_affect_other_reads() {
        let mut dev = device();
        dev.initialize(&mut ManualClock::new()).unwrap();
        dev.bus_mut().inject_fault(addr(), 0x01);

        assert!(dev.read_current().is_err());
        assert!(dev.read_voltage().is_ok());
        assert!(dev.read_power().is_ok());
        assert!(dev.read_current().is_ok());
    }

    #[test]
    fn test_sample_pairs_read_and_decode() {
        let mut dev = device();
        dev.initialize(&mut ManualClock::new()).unwrap();

        let (_, current) = dev.sample(TelemetryKind::Current).unwrap();
        let (_, voltage) = dev.sample(TelemetryKind::BusVoltage).unwrap();
        let (raw, power) = dev.sample(TelemetryKind::Power).unwrap();
        assert_eq!(current, Reading::CurrentMilliAmps(12.5));
        assert_eq!(voltage, Reading::BusVoltageMilliVolts(320.0));
        assert_eq!(power, Reading::PowerMilliWatts(50));
        assert_eq!(raw.register(), Register::Power);
    }

    #[test]
    fn test_verify_identity() {
        let mut dev = device();
        dev.verify_identity(&ExpectedIdentity::default()).unwrap();

        let wrong = ExpectedIdentity {
            manufacturer_id: TI_MANUFACTURER_ID,
            die_id: 0x2260,
        };
        let err = dev.verify_identity(&wrong).unwrap_err();
        assert!(matches!(
            err,
            InitError::IdentityMismatch {
                register: Register::DieId,
                expected: 0x2260,
                found: 0x2270,
            }
        ));
    }

    #[test]
    fn test_identify_reads_back_configuration() {
        let mut dev = device();
        dev.initialize(&mut ManualClock::new()).unwrap();

        let id = dev.identify().unwrap();
        assert_eq!(id.manufacturer_id, TI_MANUFACTURER_ID);
        assert_eq!(id.die_id, INA260_DIE_ID);
        assert_eq!(id.config_word, 0x6927);
        assert_eq!(id.config(), ConversionConfig::default());
        assert!(id.matches(&ExpectedIdentity::default()));
    }

    #[test]
    fn test_identify_fails_on_first_bad_read() {
        let mut dev = device();
        dev.bus_mut().inject_fault(addr(), 0xFF);
        let err = dev.identify().unwrap_err();
        assert_eq!(err.register(), Register::DieId);
    }

    #[test]
    fn test_identity_check_names_first_mismatch() {
        let id = Identity {
            manufacturer_id: 0x0000,
            die_id: 0x2260,
            config_word: 0x6927,
        };
        let err = id.check(&ExpectedIdentity::default()).unwrap_err();
        assert!(matches!(
            err,
            InitError::IdentityMismatch {
                register: Register::ManufacturerId,
                expected: TI_MANUFACTURER_ID,
                found: 0x0000,
            }
        ));
        assert!(!id.matches(&ExpectedIdentity::default()));
    }

    #[test]
    fn test_huge_settle_delay_is_not_truncated() {
        let mut dev = device().with_settle_delay(Duration::MAX);
        let mut clock = ManualClock::new();
        dev.initialize(&mut clock).unwrap();
        assert_eq!(clock.sleeps(), &[Duration::MAX]);
        assert!(dev.is_ready());
    }

    #[test]
    fn test_custom_config_and_settle() {
        let config = ConversionConfig {
            averaging: crate::Averaging::X4,
            ..ConversionConfig::default()
        };
        let mut dev = device()
            .with_config(config)
            .with_settle_delay(Duration::from_millis(20));
        let mut clock = ManualClock::new();
        dev.initialize(&mut clock).unwrap();

        assert_eq!(clock.sleeps(), &[Duration::from_millis(20)]);
        assert_eq!(
            dev.bus().register(addr(), 0x00),
            Some(&config.payload()[..])
        );
    }
}
