//! Heart Rate Measurement Model
//!
//! This module decodes the Bluetooth LE Heart Rate Measurement characteristic
//! (0x2A37) into an immutable [`Reading`]. The byte layout is fixed by the
//! Bluetooth SIG:
//! - byte 0: flags
//! - 1 or 2 bytes: heart rate value (little-endian)
//! - optional 2 bytes: energy expended
//! - remaining bytes: RR intervals, 2 bytes each

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Helper macro to check if a specific bit is set in a byte.
macro_rules! is_bit_set {
    ($byte:expr, $pos:expr) => {
        ($byte & (1 << $pos)) != 0
    };
}

/// Helper macro to extract a `u16` value in little-endian format from a byte slice.
macro_rules! get_u16_little_endian {
    ($slice:expr, $lsb:expr) => {
        (($slice[1 + $lsb] as u16) << 8) | $slice[$lsb] as u16
    };
}

/// Error returned when a payload cannot be decoded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is shorter than its own flags require.
    #[error("payload too short: {actual} bytes, flags require at least {required}")]
    TooShort { required: usize, actual: usize },
}

/// Sensor contact state, bits 1-2 of the flag byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ContactStatus {
    /// Raw value 0: the sensor has no contact detection.
    NotSupported,
    /// Raw value 1: also means no contact detection, kept distinct from 0.
    NotSupported2,
    /// Raw value 2: contact detection supported, no skin contact.
    NoContact,
    /// Raw value 3: contact detection supported, skin contact.
    Contact,
}

impl ContactStatus {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => ContactStatus::NotSupported,
            1 => ContactStatus::NotSupported2,
            2 => ContactStatus::NoContact,
            _ => ContactStatus::Contact,
        }
    }

    /// Checks if the sensor supports contact detection at all.
    pub fn is_supported(&self) -> bool {
        matches!(self, ContactStatus::NoContact | ContactStatus::Contact)
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactStatus::NotSupported | ContactStatus::NotSupported2 => {
                write!(f, "not supported")
            }
            ContactStatus::NoContact => write!(f, "no contact"),
            ContactStatus::Contact => write!(f, "contact"),
        }
    }
}

/// Presence and encoding flags of a measurement.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ReadingFlags(u8);

impl ReadingFlags {
    pub fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// The raw flag byte as received.
    pub fn raw(&self) -> u8 {
        self.0
    }

    /// Checks if the heart rate value uses 16-bit representation.
    pub fn is_short(&self) -> bool {
        is_bit_set!(self.0, 0)
    }

    /// Checks if energy expenditure data is present.
    pub fn has_energy_expended(&self) -> bool {
        is_bit_set!(self.0, 3)
    }

    /// Checks if RR intervals are present.
    pub fn has_rr_intervals(&self) -> bool {
        is_bit_set!(self.0, 4)
    }

    pub fn contact_status(&self) -> ContactStatus {
        ContactStatus::from_bits(self.0 >> 1)
    }

    /// Minimum payload length for the heart rate field alone.
    fn min_len(&self) -> usize {
        if self.is_short() {
            3
        } else {
            2
        }
    }
}

/// A decoded Heart Rate Measurement notification.
///
/// Only ever built by [`Reading::decode`], so every instance is complete with
/// respect to its own flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Reading {
    flags: ReadingFlags,
    contact_status: ContactStatus,
    beats_per_minute: u16,
    energy_expended: Option<u16>,
    rr_intervals: Vec<u16>,
}

impl Reading {
    /// Decodes a raw Heart Rate Measurement payload.
    ///
    /// Fails with [`DecodeError::TooShort`] when the payload does not hold the
    /// fields its flag byte announces. An odd trailing byte in the RR interval
    /// section is ignored.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let Some(&raw_flags) = data.first() else {
            return Err(DecodeError::TooShort {
                required: 2,
                actual: 0,
            });
        };
        let flags = ReadingFlags::new(raw_flags);

        let required = flags.min_len();
        if data.len() < required {
            return Err(DecodeError::TooShort {
                required,
                actual: data.len(),
            });
        }

        let mut offset = 1;
        let mut beats_per_minute = 0;
        if data.len() > 1 {
            if flags.is_short() {
                beats_per_minute = get_u16_little_endian!(data, offset);
                offset += 2;
            } else {
                beats_per_minute = data[offset] as u16;
                offset += 1;
            }
        }

        let energy_expended = if flags.has_energy_expended() {
            if data.len() < offset + 2 {
                return Err(DecodeError::TooShort {
                    required: offset + 2,
                    actual: data.len(),
                });
            }
            let value = get_u16_little_endian!(data, offset);
            offset += 2;
            Some(value)
        } else {
            None
        };

        let rr_intervals = if flags.has_rr_intervals() {
            data[offset..]
                .chunks_exact(2)
                .map(|chunk| get_u16_little_endian!(chunk, 0))
                .collect()
        } else {
            Vec::new()
        };

        Ok(Reading {
            flags,
            contact_status: flags.contact_status(),
            beats_per_minute,
            energy_expended,
            rr_intervals,
        })
    }

    pub fn flags(&self) -> ReadingFlags {
        self.flags
    }

    pub fn contact_status(&self) -> ContactStatus {
        self.contact_status
    }

    /// Heart rate in beats per minute.
    pub fn beats_per_minute(&self) -> u16 {
        self.beats_per_minute
    }

    /// Energy expended in kilojoules, if the sensor reported it.
    pub fn energy_expended(&self) -> Option<u16> {
        self.energy_expended
    }

    /// RR intervals in units of 1/1024 second.
    pub fn rr_intervals(&self) -> &[u16] {
        &self.rr_intervals
    }

    /// RR intervals converted to milliseconds.
    pub fn rr_intervals_ms(&self) -> Vec<f64> {
        self.rr_intervals
            .iter()
            .map(|&rr| rr as f64 * 1000f64 / 1024f64)
            .collect()
    }
}

impl fmt::Display for Reading {
    /// Formats the measurement as a human-readable string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "============================")?;
        writeln!(f, "Heart Rate Measurement:")?;
        writeln!(f, "----------------------------")?;
        writeln!(f, "Flags: 0b{:08b}", self.flags.raw())?;
        writeln!(f, "Heart Rate Value: {} bpm", self.beats_per_minute)?;
        if self.flags.has_rr_intervals() {
            let rr_intervals = self
                .rr_intervals_ms()
                .iter()
                .map(|rr| format!("{:.2} ms", rr))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "RR Intervals: [{}]", rr_intervals)?;
        } else {
            writeln!(f, "RR Intervals: None")?;
        }
        if let Some(energy) = self.energy_expended {
            writeln!(f, "Energy Expended: {} kJ", energy)?;
        }
        writeln!(f, "Sensor Contact: {}", self.contact_status)
    }
}
