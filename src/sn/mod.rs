//! # SN Protocol Module
//!
//! Implementation of the SN framed binary protocol spoken by the device.
//!
//! This module handles:
//! - CRC8 checksum calculation (polynomial 0x4D)
//! - Frame layout, protocol ID limits and length classes
//! - Frame synchronization and validation on a raw serial stream

pub mod crc;
pub mod framer;
pub mod protocol;
