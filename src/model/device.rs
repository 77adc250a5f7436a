//! Device Model
//!
//! Descriptors for peripherals enumerated by a transport.

use btleplug::api::BDAddr;
use std::fmt;

/// Represents a discovered Bluetooth device.
///
/// Contains:
/// - Device name (if available)
/// - Bluetooth address (MAC)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceDescriptor {
    /// The advertised name of the device, empty if unknown.
    pub name: String,
    /// The unique Bluetooth address of the device.
    pub address: BDAddr,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, address: BDAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

/// Policy picking one device out of the enumerated candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceSelector {
    /// The first device in transport enumeration order.
    #[default]
    First,
    /// The first device whose advertised name matches exactly.
    ByName(String),
}

impl DeviceSelector {
    pub fn from_name(name: Option<String>) -> Self {
        match name {
            Some(name) => DeviceSelector::ByName(name),
            None => DeviceSelector::First,
        }
    }

    pub fn select<'a>(&self, candidates: &'a [DeviceDescriptor]) -> Option<&'a DeviceDescriptor> {
        match self {
            DeviceSelector::First => candidates.first(),
            DeviceSelector::ByName(name) => candidates.iter().find(|d| &d.name == name),
        }
    }
}
