//! # SN CRC8 Implementation
//!
//! CRC-8 checksum used to protect SN protocol frames.
//!
//! **Polynomial**: 0x4D (x^8 + x^6 + x^3 + x^2 + 1)
//! **Initial Value**: 0x00

use crate::error::{BridgeError, Result};

/// SN CRC8 polynomial
pub const SN_CRC8_POLY: u8 = 0x4D;

/// Precomputed CRC8 lookup table for the SN polynomial
const SN_CRC8_TABLE: [u8; 256] = generate_crc8_table(SN_CRC8_POLY);

/// Generate a CRC8 lookup table at compile time
const fn generate_crc8_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ poly;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate the SN CRC8 of a whole slice using the compile-time table
///
/// # Examples
///
/// ```
/// use sn_bridge::sn::crc::crc8_sn;
///
/// assert_eq!(crc8_sn(b"123456789"), 0xC3);
/// ```
pub fn crc8_sn(data: &[u8]) -> u8 {
    fold(&SN_CRC8_TABLE, data)
}

fn fold(table: &[u8; 256], data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| table[(crc ^ byte) as usize])
}

/// Table-driven CRC8 engine
///
/// The table is built once on construction and never mutated afterwards, so
/// an engine can be shared freely between threads.
#[derive(Clone)]
pub struct Crc8 {
    table: [u8; 256],
}

impl std::fmt::Debug for Crc8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc8")
            .field("poly", &format_args!("0x{:02X}", self.table[1]))
            .finish()
    }
}

impl Default for Crc8 {
    fn default() -> Self {
        Self { table: SN_CRC8_TABLE }
    }
}

impl Crc8 {
    /// Build an engine for an arbitrary CRC8 polynomial
    pub fn new(poly: u8) -> Self {
        Self {
            table: generate_crc8_table(poly),
        }
    }

    /// Checksum over `bytes[start..end]`
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidRange`] unless `start <= end <= bytes.len()`.
    pub fn checksum(&self, bytes: &[u8], start: usize, end: usize) -> Result<u8> {
        if start > end || end > bytes.len() {
            return Err(BridgeError::InvalidRange {
                start,
                end,
                len: bytes.len(),
            });
        }

        Ok(fold(&self.table, &bytes[start..end]))
    }

    /// Checksum over a whole slice
    pub fn compute(&self, bytes: &[u8]) -> u8 {
        fold(&self.table, bytes)
    }
}

/// Bitwise CRC8 (slow, for verifying the table)
#[cfg(test)]
fn crc8_slow(poly: u8, data: &[u8]) -> u8 {
    let mut crc: u8 = 0;

    for &byte in data {
        crc ^= byte;

        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ poly;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
