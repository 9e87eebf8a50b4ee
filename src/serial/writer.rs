//! Outbound half of the serial link
//!
//! The bridge only ever needs to push a complete datagram to the device, so
//! the capability is a single `write`. Received bytes come in through the
//! `AsyncRead` half handed to [`SerialBridge::run`](super::SerialBridge::run).

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncWriteExt, WriteHalf};

/// Something that accepts bytes for the serial device
#[async_trait]
pub trait SerialWrite: Send {
    /// Write `data` in full and push it out to the device
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Write half of an open serial port
pub struct SerialWriter {
    port: WriteHalf<tokio_serial::SerialStream>,
}

impl SerialWriter {
    pub fn new(port: WriteHalf<tokio_serial::SerialStream>) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialWrite for SerialWriter {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await?;
        self.port.flush().await
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every write; clones share the same log
    #[derive(Clone, Default)]
    pub struct RecordingWriter {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_with: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl RecordingWriter {
        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }

        /// Make every following write fail with `kind`
        pub fn fail_with(&self, kind: io::ErrorKind) {
            *self.fail_with.lock().unwrap() = Some(kind);
        }
    }

    #[async_trait]
    impl SerialWrite for RecordingWriter {
        async fn write(&mut self, data: &[u8]) -> io::Result<()> {
            if let Some(kind) = *self.fail_with.lock().unwrap() {
                return Err(io::Error::new(kind, "device rejected write"));
            }
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }
}
