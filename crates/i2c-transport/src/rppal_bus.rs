use crate::{BusAddress, BusInfo, I2cBus, Result, TransportError};
use rppal::i2c::I2c;
use std::fs;
use tracing::{debug, warn};

/// Linux `/dev/i2c-N` controller on a Raspberry Pi, via rppal.
pub struct RppalBus {
    bus: u8,
    i2c: I2c,
    selected: Option<BusAddress>,
}

impl RppalBus {
    pub fn with_bus(bus: u8) -> Result<Self> {
        let i2c = I2c::with_bus(bus).map_err(|e| match e {
            rppal::i2c::Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                TransportError::InterfaceNotFound(format!("i2c-{bus}"))
            }
            other => TransportError::Io(other.to_string()),
        })?;
        Ok(Self {
            bus,
            i2c,
            selected: None,
        })
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    fn select(&mut self, addr: BusAddress) -> Result<()> {
        if self.selected == Some(addr) {
            return Ok(());
        }
        self.i2c
            .set_slave_address(u16::from(addr.raw()))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        debug!(bus = self.bus, %addr, "selected slave address");
        self.selected = Some(addr);
        Ok(())
    }
}

/// Accepts "1", "i2c-1" or "/dev/i2c-1".
fn parse_bus_number(name: &str) -> Option<u8> {
    let t = name.trim();
    let t = t.strip_prefix("/dev/").unwrap_or(t);
    let t = t.strip_prefix("i2c-").unwrap_or(t);
    t.parse::<u8>().ok()
}

impl I2cBus for RppalBus {
    fn open(name: &str) -> Result<Self> {
        let bus = parse_bus_number(name)
            .ok_or_else(|| TransportError::InterfaceNotFound(name.to_string()))?;
        Self::with_bus(bus)
    }

    fn list() -> Result<Vec<BusInfo>> {
        let mut out = Vec::new();
        for entry in fs::read_dir("/dev").map_err(|e| TransportError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| TransportError::Io(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("i2c-") {
                out.push(BusInfo {
                    name: format!("/dev/{name}"),
                    driver: "i2cdev".to_string(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn is_ready(&self) -> bool {
        // The controller is open once construction succeeds
        true
    }

    fn write(&mut self, addr: BusAddress, bytes: &[u8]) -> Result<()> {
        self.select(addr)?;
        let n = self
            .i2c
            .write(bytes)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        if n != bytes.len() {
            warn!(bus = self.bus, %addr, written = n, len = bytes.len(), "short write");
            return Err(TransportError::Io(format!(
                "short write to {addr}: {n} of {} bytes",
                bytes.len()
            )));
        }
        Ok(())
    }

    fn write_read(&mut self, addr: BusAddress, out: &[u8], input: &mut [u8]) -> Result<()> {
        self.select(addr)?;
        self.i2c
            .write_read(out, input)
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bus_number() {
        assert_eq!(parse_bus_number("1"), Some(1));
        assert_eq!(parse_bus_number("i2c-1"), Some(1));
        assert_eq!(parse_bus_number("/dev/i2c-22"), Some(22));
        assert_eq!(parse_bus_number("mock0"), None);
    }
}
