//! # UDP Transport Module
//!
//! Forwards SN frames to a single UDP peer and hands datagrams received from
//! it back to the serial side.
//!
//! This module handles:
//! - Connection state machine (Disconnected, Connecting, Connected)
//! - One background receive loop per established connection
//! - Reconnection with exponential backoff on a single timer
//! - Idempotent shutdown

pub mod backoff;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use self::backoff::Backoff;
use crate::config::UdpConfig;
use crate::error::{BridgeError, Result};
use crate::sn::framer::FrameSink;
use crate::sn::protocol::Frame;

/// Largest datagram accepted from the peer
pub const UDP_RECEIVE_BUFFER_SIZE: usize = 512;

/// Receiver of datagrams arriving from the UDP peer
pub trait InboundHandler: Send + Sync {
    fn on_datagram(&self, data: Bytes);
}

/// Connection state of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub connections: u64,
    /// Sockets closed, by error or by `disconnect`
    pub disconnects: u64,
    pub reconnects_scheduled: u64,
    pub last_scheduled_delay: Option<Duration>,
    pub frames_sent: u64,
    pub send_errors: u64,
    pub datagrams_received: u64,
}

struct Connection {
    state: ConnectionState,
    socket: Option<Arc<UdpSocket>>,
    peer: Option<SocketAddr>,
    backoff: Backoff,
    last_connected_at: Option<Instant>,
    /// Bumped on every open and close; a receive loop only runs while its
    /// generation is current
    generation: u64,
    stats: TransportStats,
}

struct ReconnectTimer {
    ticket: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    config: UdpConfig,
    inbound: Arc<dyn InboundHandler>,
    connection: Mutex<Connection>,
    reconnect: Mutex<Option<ReconnectTimer>>,
    next_ticket: AtomicU64,
    closed: AtomicBool,
    runtime: Handle,
}

impl Inner {
    fn lock_connection(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_reconnect(&self) -> MutexGuard<'_, Option<ReconnectTimer>> {
        self.reconnect.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        let conn = self.lock_connection();
        conn.state == ConnectionState::Connected && conn.generation == generation
    }
}

/// Reconnecting UDP client
///
/// Cloning yields another handle to the same connection. Background tasks
/// only hold weak references, so dropping every handle stops them too.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl UdpTransport {
    /// Create a disconnected transport
    ///
    /// # Errors
    ///
    /// Returns error when called outside a tokio runtime.
    pub fn new(config: UdpConfig, inbound: Arc<dyn InboundHandler>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| BridgeError::Runtime(e.to_string()))?;

        info!("SN frame forwarding through UDP is enabled");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                inbound,
                connection: Mutex::new(Connection {
                    state: ConnectionState::Disconnected,
                    socket: None,
                    peer: None,
                    backoff: Backoff::default(),
                    last_connected_at: None,
                    generation: 0,
                    stats: TransportStats::default(),
                }),
                reconnect: Mutex::new(None),
                next_ticket: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                runtime,
            }),
        })
    }

    /// Configured peer as `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.inner.config.host, self.inner.config.port)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_connection().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Resolved peer address of the current or last connection
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.lock_connection().peer
    }

    /// Delay the next scheduled reconnect would use
    pub fn reconnect_interval(&self) -> Duration {
        self.inner.lock_connection().backoff.current()
    }

    pub fn stats(&self) -> TransportStats {
        self.inner.lock_connection().stats
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.lock_reconnect().is_some()
    }

    /// Open the socket and start the receive loop
    ///
    /// Does nothing if a connection is already up or being opened. On
    /// failure the transport stays Disconnected and a reconnect is scheduled.
    ///
    /// # Errors
    ///
    /// Returns the bind, resolve or connect error, or
    /// [`BridgeError::TransportClosed`] after [`disconnect`](Self::disconnect).
    pub async fn connect(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BridgeError::TransportClosed);
        }

        {
            let mut conn = self.inner.lock_connection();
            if conn.state != ConnectionState::Disconnected {
                return Ok(());
            }
            conn.state = ConnectionState::Connecting;
            conn.stats.connect_attempts += 1;
        }

        let endpoint = self.endpoint();
        info!("Connecting UDP client to {}", endpoint);

        let opened = self.open_socket().await;

        let mut conn = self.inner.lock_connection();
        if self.inner.closed.load(Ordering::Acquire) {
            conn.state = ConnectionState::Disconnected;
            return Err(BridgeError::TransportClosed);
        }

        match opened {
            Ok((socket, peer)) => {
                let socket = Arc::new(socket);
                conn.state = ConnectionState::Connected;
                conn.socket = Some(Arc::clone(&socket));
                conn.peer = Some(peer);
                conn.last_connected_at = Some(Instant::now());
                conn.generation += 1;
                conn.stats.connections += 1;

                let generation = conn.generation;
                let poll = Duration::from_millis(self.inner.config.recv_poll_interval_ms);
                self.inner.runtime.spawn(receive_loop(
                    Arc::downgrade(&self.inner),
                    socket,
                    generation,
                    poll,
                ));

                info!("Connected UDP client to {} ({})", endpoint, peer);
                Ok(())
            }
            Err(e) => {
                warn!("Unable to connect UDP client to {}: {}", endpoint, e);
                conn.state = ConnectionState::Disconnected;
                conn.stats.connect_failures += 1;
                self.schedule_reconnect(&mut conn);
                Err(e)
            }
        }
    }

    /// Best-effort, non-blocking transmit to the peer
    ///
    /// Returns false when nothing was sent: not connected, socket buffer
    /// full, or an I/O error (which also tears the connection down and
    /// schedules a reconnect).
    pub fn send(&self, data: &[u8]) -> bool {
        let (socket, generation) = {
            let conn = self.inner.lock_connection();
            match (&conn.socket, conn.state) {
                (Some(socket), ConnectionState::Connected) => (Arc::clone(socket), conn.generation),
                _ => return false,
            }
        };

        match socket.try_send(data) {
            Ok(_) => {
                self.inner.lock_connection().stats.frames_sent += 1;
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("UDP socket busy, dropping {} bytes", data.len());
                self.inner.lock_connection().stats.send_errors += 1;
                false
            }
            Err(e) => {
                warn!("UDP send failed: {}", e);
                self.inner.lock_connection().stats.send_errors += 1;
                self.disconnect_on_error(generation);
                false
            }
        }
    }

    /// Close the transport for good
    ///
    /// Cancels any pending reconnect and closes the socket. Safe to call
    /// repeatedly and from any task.
    pub fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::Release);

        let pending = self.inner.lock_reconnect().take();
        if let Some(timer) = pending {
            timer.handle.abort();
        }

        let mut conn = self.inner.lock_connection();
        if conn.state == ConnectionState::Connected {
            close_socket(&mut conn);
            info!("Disconnected UDP client from {}", self.endpoint());
        }
        conn.state = ConnectionState::Disconnected;
    }

    /// Tear down connection `generation` after an I/O error
    ///
    /// Only the first caller for a given generation has any effect.
    fn disconnect_on_error(&self, generation: u64) {
        let mut conn = self.inner.lock_connection();
        if conn.state != ConnectionState::Connected || conn.generation != generation {
            return;
        }

        close_socket(&mut conn);

        let stable_after = Duration::from_secs(self.inner.config.stable_after_secs);
        if conn
            .last_connected_at
            .is_some_and(|at| at.elapsed() > stable_after)
        {
            conn.backoff.reset();
        }

        self.schedule_reconnect(&mut conn);
    }

    /// Arm the single reconnect timer, replacing any pending one
    fn schedule_reconnect(&self, conn: &mut Connection) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }

        let delay = conn.backoff.next_delay();
        conn.stats.reconnects_scheduled += 1;
        conn.stats.last_scheduled_delay = Some(delay);
        info!("UDP reconnect attempt scheduled after {} seconds", delay.as_secs());

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        let weak = Arc::downgrade(&self.inner);

        let mut slot = self.inner.lock_reconnect();
        if let Some(previous) = slot.take() {
            previous.handle.abort();
        }

        let handle = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut slot = inner.lock_reconnect();
                if !matches!(slot.as_ref(), Some(timer) if timer.ticket == ticket) {
                    return;
                }
                slot.take();
            }

            let transport = UdpTransport { inner };
            if let Err(e) = transport.connect().await {
                debug!("UDP reconnect attempt failed: {}", e);
            }
        });

        *slot = Some(ReconnectTimer { ticket, handle });
    }

    async fn open_socket(&self) -> Result<(UdpSocket, SocketAddr)> {
        let config = &self.inner.config;

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await?
            .collect();
        let peer = addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| BridgeError::AddressResolution(self.endpoint()))?;

        let local = match &config.bind_address {
            Some(addr) => addr
                .parse::<SocketAddr>()
                .map_err(|e| BridgeError::AddressResolution(format!("{}: {}", addr, e)))?,
            None => match peer {
                SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
            },
        };

        let socket = bind_reusable(local)?;
        socket.connect(peer).await?;

        // try_send only succeeds once the reactor has seen the socket writable
        socket.writable().await?;

        Ok((socket, peer))
    }
}

impl FrameSink for UdpTransport {
    fn forward_frame(&mut self, frame: &Frame) {
        self.send(frame.as_bytes());
    }
}

/// Non-blocking datagram socket bound to `local` with address reuse enabled
fn bind_reusable(local: SocketAddr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;

    Ok(UdpSocket::from_std(socket.into())?)
}

fn close_socket(conn: &mut Connection) {
    conn.socket = None;
    conn.state = ConnectionState::Disconnected;
    conn.generation += 1;
    conn.stats.disconnects += 1;
}

/// Deliver datagrams from `socket` while `generation` is the live connection
async fn receive_loop(
    inner: Weak<Inner>,
    socket: Arc<UdpSocket>,
    generation: u64,
    poll: Duration,
) {
    let mut buf = [0u8; UDP_RECEIVE_BUFFER_SIZE];

    loop {
        let inbound = match inner.upgrade() {
            Some(inner) if inner.is_current(generation) => Arc::clone(&inner.inbound),
            _ => break,
        };

        match tokio::time::timeout(poll, socket.recv(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(len)) => {
                if let Some(inner) = inner.upgrade() {
                    inner.lock_connection().stats.datagrams_received += 1;
                }
                inbound.on_datagram(Bytes::copy_from_slice(&buf[..len]));
            }
            Ok(Err(e)) => {
                warn!("UDP receive failed: {}", e);
                if let Some(inner) = inner.upgrade() {
                    UdpTransport { inner }.disconnect_on_error(generation);
                }
                break;
            }
        }
    }

    debug!("UDP receive loop for connection {} exited", generation);
}
