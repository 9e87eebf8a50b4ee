//! # SN Protocol Constants and Types
//!
//! Wire format of an SN frame:
//!
//! ```text
//! ProtocolID (1 byte, 0x81..=0xBF) | Payload ((ID & 0x3F) + 1 bytes) | CRC8 (1 byte)
//! ```

use bytes::Bytes;

use super::crc::crc8_sn;
use crate::error::{BridgeError, Result};

/// Protocol IDs must be strictly above this value
pub const SN_ID_LIMIT_LOW: u8 = 0x80;

/// Highest valid protocol ID
pub const SN_ID_LIMIT_HIGH: u8 = 0xBF;

/// Low bits of the protocol ID selecting the length class
pub const SN_LENGTH_MASK: u8 = 0x3F;

/// Fixed bytes around the payload (protocol ID + CRC)
pub const SN_FRAME_OVERHEAD: usize = 2;

/// Largest possible frame (ID 0xBF)
pub const SN_MAX_FRAME_SIZE: usize = SN_LENGTH_MASK as usize + 3;

/// Capacity of the framer receive buffer
pub const SN_RECEIVE_BUFFER_SIZE: usize = 1024;

/// Whether `byte` can start an SN frame
pub fn is_valid_protocol_id(byte: u8) -> bool {
    byte > SN_ID_LIMIT_LOW && byte <= SN_ID_LIMIT_HIGH
}

/// Total frame length announced by a protocol ID (ID + payload + CRC)
pub fn expected_frame_length(protocol_id: u8) -> usize {
    (protocol_id & SN_LENGTH_MASK) as usize + 3
}

/// A complete, CRC-validated SN frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
}

impl Frame {
    /// Build a frame from a protocol ID and payload, appending the CRC8
    ///
    /// # Errors
    ///
    /// Returns error if the ID is outside `0x81..=0xBF` or the payload length
    /// does not match the length class of the ID.
    ///
    /// # Examples
    ///
    /// ```
    /// use sn_bridge::sn::protocol::Frame;
    ///
    /// let frame = Frame::encode(0x81, &[0x01, 0x02]).unwrap();
    /// assert_eq!(frame.as_bytes(), &[0x81, 0x01, 0x02, 0xB3]);
    /// ```
    pub fn encode(protocol_id: u8, payload: &[u8]) -> Result<Self> {
        if !is_valid_protocol_id(protocol_id) {
            return Err(BridgeError::Protocol(format!(
                "Invalid protocol ID: 0x{:02X}",
                protocol_id
            )));
        }

        let expected_payload = expected_frame_length(protocol_id) - SN_FRAME_OVERHEAD;
        if payload.len() != expected_payload {
            return Err(BridgeError::Protocol(format!(
                "Payload for ID 0x{:02X} must be {} bytes, got {}",
                protocol_id,
                expected_payload,
                payload.len()
            )));
        }

        let mut frame = Vec::with_capacity(payload.len() + SN_FRAME_OVERHEAD);
        frame.push(protocol_id);
        frame.extend_from_slice(payload);
        frame.push(crc8_sn(&frame));

        Ok(Self {
            bytes: Bytes::from(frame),
        })
    }

    /// Validate a complete frame received from elsewhere
    ///
    /// # Errors
    ///
    /// Returns error if the ID is invalid, the length does not match the
    /// ID's length class, or the CRC trailer is wrong.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(&protocol_id) = data.first() else {
            return Err(BridgeError::Protocol("Empty frame".to_string()));
        };

        if !is_valid_protocol_id(protocol_id) {
            return Err(BridgeError::Protocol(format!(
                "Invalid protocol ID: 0x{:02X}",
                protocol_id
            )));
        }

        let expected = expected_frame_length(protocol_id);
        if data.len() != expected {
            return Err(BridgeError::Protocol(format!(
                "Frame length mismatch: expected {} bytes, got {}",
                expected,
                data.len()
            )));
        }

        let calculated = crc8_sn(&data[..expected - 1]);
        let received = data[expected - 1];
        if calculated != received {
            return Err(BridgeError::Protocol(format!(
                "CRC mismatch: expected 0x{:02X}, got 0x{:02X}",
                calculated, received
            )));
        }

        Ok(Self::from_validated(data))
    }

    /// Wrap bytes the framer already validated
    pub(crate) fn from_validated(data: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    pub fn protocol_id(&self) -> u8 {
        self.bytes[0]
    }

    /// Bytes between the protocol ID and the CRC
    pub fn payload(&self) -> &[u8] {
        &self.bytes[1..self.bytes.len() - 1]
    }

    pub fn crc(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Space separated hex dump of at most `limit` leading bytes
    pub fn to_hex(&self, limit: usize) -> String {
        self.bytes
            .iter()
            .take(limit)
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
