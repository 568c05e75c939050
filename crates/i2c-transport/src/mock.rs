use crate::{BusAddress, BusInfo, I2cBus, Result, TransportError};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One transaction as seen on the mock bus, for test verification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Transaction {
    Write {
        addr: u8,
        data: Vec<u8>,
    },
    WriteRead {
        addr: u8,
        out: Vec<u8>,
        read_len: usize,
    },
}

/// A simple in-process mock bus. Each bus instance is independent.
///
/// Devices are modelled as register files addressed by a one-byte pointer: the first
/// byte of every write selects the register and any remaining bytes are stored there,
/// and a write-read returns the contents of the selected register. Transactions to an
/// address with no attached device are NACKed.
pub struct MockBus {
    name: String,
    ready: bool,
    devices: HashMap<u8, HashMap<u8, Vec<u8>>>,
    faults: HashSet<(u8, u8)>,
    log: Vec<Transaction>,
}

impl MockBus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ready: true,
            devices: HashMap::new(),
            faults: HashSet::new(),
            log: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Attach an empty device at `addr`.
    pub fn attach(&mut self, addr: BusAddress) {
        self.devices.entry(addr.raw()).or_default();
    }

    /// Preload a register, attaching the device if needed.
    pub fn set_register(&mut self, addr: BusAddress, reg: u8, data: &[u8]) {
        self.devices
            .entry(addr.raw())
            .or_default()
            .insert(reg, data.to_vec());
    }

    pub fn register(&self, addr: BusAddress, reg: u8) -> Option<&[u8]> {
        self.devices
            .get(&addr.raw())
            .and_then(|regs| regs.get(&reg))
            .map(Vec::as_slice)
    }

    /// Make the next transaction that selects `reg` on `addr` fail once.
    pub fn inject_fault(&mut self, addr: BusAddress, reg: u8) {
        self.faults.insert((addr.raw(), reg));
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.log
    }

    pub fn clear_transactions(&mut self) {
        self.log.clear();
    }

    fn check(&mut self, addr: u8, reg: Option<u8>) -> Result<()> {
        if !self.ready {
            return Err(TransportError::Io(format!("{} is not ready", self.name)));
        }
        if !self.devices.contains_key(&addr) {
            return Err(TransportError::Nack { addr });
        }
        if let Some(reg) = reg {
            if self.faults.remove(&(addr, reg)) {
                debug!(bus = %self.name, addr, reg, "injected fault fired");
                return Err(TransportError::Io(format!(
                    "injected fault at 0x{addr:02X} register 0x{reg:02X}"
                )));
            }
        }
        Ok(())
    }
}

impl I2cBus for MockBus {
    fn open(name: &str) -> Result<Self> {
        Ok(Self::new(name))
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn write(&mut self, addr: BusAddress, bytes: &[u8]) -> Result<()> {
        let raw = addr.raw();
        self.log.push(Transaction::Write {
            addr: raw,
            data: bytes.to_vec(),
        });
        self.check(raw, bytes.first().copied())?;
        if let Some((&reg, payload)) = bytes.split_first() {
            if !payload.is_empty() {
                self.set_register(addr, reg, payload);
            }
        }
        Ok(())
    }

    fn write_read(&mut self, addr: BusAddress, out: &[u8], input: &mut [u8]) -> Result<()> {
        let raw = addr.raw();
        self.log.push(Transaction::WriteRead {
            addr: raw,
            out: out.to_vec(),
            read_len: input.len(),
        });
        let reg = out.first().copied();
        self.check(raw, reg)?;
        input.fill(0);
        if let Some(stored) = reg.and_then(|r| self.register(addr, r)) {
            for (dst, src) in input.iter_mut().zip(stored) {
                *dst = *src;
            }
        }
        Ok(())
    }
}
