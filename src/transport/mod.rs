//! UDP transport between the two fixed endpoints
//!
//! One connectionless socket per process, bound to the local machine on
//! the well-known port and aimed at the single remote peer. The link is
//! best-effort by design: no acknowledgments, no sequencing, no
//! retransmission. Receives never block; the streaming loops poll.
//!
//! The two boxes rarely power on together, so the first one up must wait
//! for its partner's name to become resolvable. That wait is a cancellable
//! retry loop with capped backoff rather than a hard spin.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::constants::{MAX_CHUNK_BYTES, RECV_BUFFER_BYTES, UDP_PORT};
use crate::error::TransportError;

/// Hostname-to-address resolution seam.
///
/// Production uses the system resolver; tests inject doubles that fail a
/// scripted number of times or return fixed addresses.
pub trait Resolve {
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr>;
}

/// System resolver backed by `ToSocketAddrs`
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl Resolve for DnsResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address for host"))
    }
}

/// Cooperative cancellation flag for the peer wait.
///
/// Cloned into a signal handler or another thread; raising it makes
/// `Transport::configure` return instead of retrying forever.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Backoff schedule for remote-endpoint resolution retries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial: Duration,
    /// Ceiling the delay doubles up to
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(5),
        }
    }
}

/// Result of a non-blocking receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    /// One datagram's payload
    Data(Bytes),
    /// Nothing queued; the caller keeps its own pace
    WouldBlock,
}

/// The process-lifetime UDP endpoint pair.
///
/// Owns the socket and both resolved addresses. Configured once at
/// startup, torn down once at shutdown; the streaming loops borrow it in
/// between.
#[derive(Debug)]
pub struct Transport {
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    remote_host: String,
}

impl Transport {
    /// Resolve and bind the local endpoint, then wait for the remote
    /// name to resolve, on the well-known port.
    ///
    /// Local resolution or bind failure is fatal. Remote resolution is
    /// retried with backoff until it succeeds or `cancel` is raised;
    /// on first boot this can wait an unbounded time for the partner
    /// machine to appear.
    pub fn configure<R: Resolve>(
        local_host: &str,
        remote_host: &str,
        resolver: &R,
        cancel: &CancelToken,
    ) -> Result<Self, TransportError> {
        Self::configure_with(
            local_host,
            remote_host,
            UDP_PORT,
            RetryPolicy::default(),
            resolver,
            cancel,
        )
    }

    /// `configure` with an explicit port and retry schedule.
    pub fn configure_with<R: Resolve>(
        local_host: &str,
        remote_host: &str,
        port: u16,
        retry: RetryPolicy,
        resolver: &R,
        cancel: &CancelToken,
    ) -> Result<Self, TransportError> {
        let local_addr =
            resolver
                .resolve(local_host, port)
                .map_err(|source| TransportError::LocalResolution {
                    host: local_host.to_string(),
                    source,
                })?;

        let socket = open_socket(local_addr)?;
        let local_addr = socket.local_addr().map_err(TransportError::SocketOpen)?;
        info!(%local_addr, "bound local endpoint");

        let remote_addr = resolve_remote(remote_host, port, retry, resolver, cancel)?;
        info!(%remote_addr, "peer resolved");

        Ok(Self {
            socket: Some(socket),
            local_addr,
            remote_addr,
            remote_host: remote_host.to_string(),
        })
    }

    /// Fire-and-forget send of one chunk to the peer.
    ///
    /// Returns the byte count the socket accepted. No retry on error;
    /// the caller decides whether a dropped chunk matters.
    pub fn send(&self, chunk: &[u8]) -> Result<usize, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        socket
            .send_to(chunk, self.remote_addr)
            .map_err(TransportError::Send)
    }

    /// Non-blocking receive of one chunk.
    ///
    /// Returns `WouldBlock` immediately when nothing is queued so the
    /// playback loop never stalls on the socket. Datagrams longer than
    /// `max_len` are truncated to it.
    pub fn recv_chunk(&self, max_len: usize) -> Result<RecvOutcome, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        let mut buf = vec![0u8; max_len.min(MAX_CHUNK_BYTES)];
        match socket.recv_from(&mut buf) {
            Ok((len, _peer)) => {
                buf.truncate(len);
                Ok(RecvOutcome::Data(Bytes::from(buf)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(RecvOutcome::WouldBlock),
            Err(e) => Err(TransportError::Receive(e)),
        }
    }

    /// Release the socket. Safe to call more than once; later calls are
    /// no-ops, and later send/receive calls report `Closed`.
    pub fn teardown(&mut self) {
        if let Some(socket) = self.socket.take() {
            debug!(local = %self.local_addr, "transport torn down");
            drop(socket);
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }
}

/// Open the UDP socket non-blocking with the oversized receive buffer,
/// then bind it.
fn open_socket(local_addr: SocketAddr) -> Result<UdpSocket, TransportError> {
    let socket = Socket::new(
        Domain::for_address(local_addr),
        Type::DGRAM,
        Some(Protocol::UDP),
    )
    .map_err(TransportError::SocketOpen)?;

    // Burst absorption: the receiver may fall behind by whole buffer
    // windows while clocking words out.
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
        warn!(error = %e, "could not set receive buffer size, continuing with OS default");
    }
    socket
        .set_nonblocking(true)
        .map_err(TransportError::SocketOpen)?;
    socket
        .bind(&local_addr.into())
        .map_err(|source| TransportError::Bind {
            addr: local_addr,
            source,
        })?;

    Ok(socket.into())
}

/// Retry remote resolution until it succeeds or the token is raised.
///
/// Sleeps in short slices so cancellation stays responsive through the
/// longer backoff delays.
fn resolve_remote<R: Resolve>(
    remote_host: &str,
    port: u16,
    retry: RetryPolicy,
    resolver: &R,
    cancel: &CancelToken,
) -> Result<SocketAddr, TransportError> {
    let mut delay = retry.initial;
    let mut attempts: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled(remote_host.to_string()));
        }

        match resolver.resolve(remote_host, port) {
            Ok(addr) => return Ok(addr),
            Err(e) => {
                attempts += 1;
                info!(
                    peer = remote_host,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "waiting for peer"
                );
            }
        }

        let mut remaining = delay;
        let slice = Duration::from_millis(50);
        while !remaining.is_zero() {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled(remote_host.to_string()));
            }
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining -= step;
        }

        delay = (delay * 2).min(retry.max);
    }
}
