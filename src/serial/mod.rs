//! # Serial Communication Module
//!
//! Connects the device's serial port to the SN framer and the UDP transport.
//!
//! This module handles:
//! - Opening the serial port (8N1, no flow control)
//! - Feeding received byte chunks into the framer
//! - Writing datagrams from the UDP peer to the port, verbatim
//! - Passing non-frame bytes on as raw text

pub mod writer;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use self::writer::SerialWrite;
use crate::error::{BridgeError, Result};
use crate::sn::framer::{FrameSink, RawSink, SnFramer};
use crate::udp::InboundHandler;

/// Open a serial port with SN settings
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/ttyUSB0")
/// * `baud_rate` - Line speed
pub fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| BridgeError::Serial(format!("Failed to open {}: {}", path, e)))?;

    info!("Opened serial port {} at {} baud", path, baud_rate);
    Ok(port)
}

/// Fallback sink printing non-frame bytes as text
#[derive(Debug, Default)]
pub struct LogRawSink {
    bytes_delivered: u64,
}

impl LogRawSink {
    pub fn bytes_delivered(&self) -> u64 {
        self.bytes_delivered
    }
}

impl RawSink for LogRawSink {
    fn deliver_raw(&mut self, bytes: &[u8]) {
        self.bytes_delivered += bytes.len() as u64;
        debug!(target: "sn_bridge::raw", "{}", String::from_utf8_lossy(bytes));
    }
}

/// Hands datagrams from the UDP receive loop to the serial writer
///
/// The queue is bounded; when the serial side falls behind, new datagrams
/// are dropped and counted instead of piling up.
#[derive(Debug)]
pub struct ChannelInbound {
    tx: mpsc::Sender<Bytes>,
    dropped: AtomicU64,
}

impl ChannelInbound {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Datagrams discarded because the write queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl InboundHandler for ChannelInbound {
    fn on_datagram(&self, data: Bytes) {
        match self.tx.try_send(data) {
            Ok(()) => {}
            Err(TrySendError::Full(data)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Serial write queue full, dropping {} byte datagram", data.len());
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Serial writer gone, dropping inbound datagram");
            }
        }
    }
}

/// Drives one serial port: reads into the framer, writes inbound datagrams
pub struct SerialBridge<F: FrameSink, R: RawSink, W: SerialWrite> {
    framer: SnFramer<F, R>,
    writer: W,
    read_buffer_size: usize,
    datagrams_written: u64,
    write_errors: u64,
}

impl<F: FrameSink, R: RawSink, W: SerialWrite> SerialBridge<F, R, W> {
    pub fn new(framer: SnFramer<F, R>, writer: W, read_buffer_size: usize) -> Self {
        Self {
            framer,
            writer,
            read_buffer_size: read_buffer_size.max(1),
            datagrams_written: 0,
            write_errors: 0,
        }
    }

    pub fn framer(&self) -> &SnFramer<F, R> {
        &self.framer
    }

    pub fn datagrams_written(&self) -> u64 {
        self.datagrams_written
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }

    /// Run until `shutdown` resolves or the serial port reaches EOF
    ///
    /// Serial reads are processed strictly one after another, which is the
    /// only thing that touches the framer.
    ///
    /// # Errors
    ///
    /// Returns error if reading from the serial port fails.
    pub async fn run<Rd, S>(
        &mut self,
        mut reader: Rd,
        mut inbound: mpsc::Receiver<Bytes>,
        shutdown: S,
    ) -> Result<()>
    where
        Rd: AsyncRead + Unpin,
        S: Future<Output = ()>,
    {
        let mut buf = vec![0u8; self.read_buffer_size];
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        warn!("Serial port closed");
                        return Ok(());
                    }
                    Ok(n) => self.framer.append_bytes(&buf[..n]),
                    Err(e) => {
                        return Err(BridgeError::Serial(format!("Read failed: {}", e)));
                    }
                },
                Some(datagram) = inbound.recv() => self.write_inbound(&datagram).await,
                _ = &mut shutdown => {
                    info!("Serial bridge stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn write_inbound(&mut self, datagram: &[u8]) {
        match self.writer.write(datagram).await {
            Ok(()) => self.datagrams_written += 1,
            Err(e) => {
                self.write_errors += 1;
                warn!("Failed to write {} bytes to serial port: {}", datagram.len(), e);
            }
        }
    }
}
