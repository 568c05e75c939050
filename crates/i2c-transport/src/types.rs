use core::fmt;

/// 7-bit I2C device address
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BusAddress(u8);

impl BusAddress {
    pub const MAX: u8 = 0x7F;

    pub fn new(addr7: u8) -> Option<Self> {
        if addr7 <= Self::MAX {
            Some(Self(addr7))
        } else {
            None
        }
    }

    pub fn raw(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{raw:02X}", raw = self.0)
    }
}

#[derive(Clone, Debug)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}
