//! # SN Bridge Library
//!
//! Forward SN protocol frames between a serial device and a UDP endpoint.
//!
//! This library provides the byte-stream framer that extracts CRC-checked
//! SN frames from a serial port, and the reconnecting UDP transport that
//! forwards them and returns the peer's datagrams to the device.

pub mod config;
pub mod error;
pub mod serial;
pub mod sn;
pub mod udp;
