//! Blocking UDP transport bound to one local interface

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Receive timeout of a single `read`
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Receive buffer size; large enough for jumbo frames
pub const MAX_DATAGRAM_LEN: usize = 9000;

/// Kernel receive buffer requested for unicast sessions
const RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid prefix length {0}, expected 0..=32")]
    InvalidPrefix(u8),
    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),
    #[error("failed to {context}: {source}")]
    Socket {
        context: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("receive timed out")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(e),
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Address of the local interface to bind
    pub local_ip: String,
    /// CIDR prefix length of the local subnet
    pub prefix: u8,
    /// Local port to bind (0 picks an ephemeral port)
    pub local_port: u16,
    /// Destination address; the limited broadcast address selects a broadcast session
    pub remote_ip: String,
    pub remote_port: u16,
    pub read_timeout: Duration,
}

impl TransportConfig {
    /// Broadcast session on `port`, bound to `local_ip:port`
    pub fn new(local_ip: impl Into<String>, prefix: u8, port: u16) -> Self {
        Self {
            local_ip: local_ip.into(),
            prefix,
            local_port: port,
            remote_ip: Ipv4Addr::BROADCAST.to_string(),
            remote_port: port,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_remote(mut self, remote_ip: impl Into<String>, remote_port: u16) -> Self {
        self.remote_ip = remote_ip.into();
        self.remote_port = remote_port;
        self
    }

    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = local_port;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

/// Netmask with `prefix` leading one bits, host byte order
pub fn netmask_from_prefix(prefix: u8) -> Option<u32> {
    match prefix {
        0 => Some(0),
        1..=32 => Some(u32::MAX << (32 - prefix)),
        _ => None,
    }
}

/// Parse a dotted IPv4 string into a host-order integer
pub fn string_to_addr(ip: &str) -> Result<u32, TransportError> {
    ip.trim()
        .parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| TransportError::InvalidAddress(ip.to_string()))
}

/// Format a host-order integer as a dotted IPv4 string
pub fn addr_to_string(addr: u32) -> String {
    Ipv4Addr::from(addr).to_string()
}

/// Resolve the destination of a session
///
/// A remote equal to the limited broadcast address or to the directed
/// broadcast address of the local subnet makes this a broadcast session,
/// pinned to the directed broadcast address. Returns the remote address and
/// whether the session is a broadcast session.
pub fn resolve_remote(local: u32, netmask: u32, remote: u32) -> (u32, bool) {
    let subnet_broadcast = local | !netmask;
    if remote == u32::from(Ipv4Addr::BROADCAST) || remote == subnet_broadcast {
        (subnet_broadcast, true)
    } else {
        (remote, false)
    }
}

/// How broadcast replies reach the transport
#[derive(Debug)]
enum ReceivePath {
    /// The primary socket sees every reply
    Primary,
    /// Broadcast replies arrive on a second socket bound to the limited
    /// broadcast address, needed where a unicast-bound socket does not
    /// receive broadcast datagrams
    BroadcastSocket(UdpSocket),
}

impl ReceivePath {
    fn select(broadcast: bool, port: u16, read_timeout: Duration) -> Self {
        if !broadcast || cfg!(windows) {
            return Self::Primary;
        }

        match open_broadcast_socket(port, read_timeout) {
            Ok(socket) => Self::BroadcastSocket(socket),
            Err(e) => {
                warn!(error = %e, port, "Broadcast receive socket unavailable, broadcast replies may be missed");
                Self::Primary
            }
        }
    }
}

fn open_socket(read_timeout: Duration) -> Result<Socket, TransportError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(|source| {
        TransportError::Socket {
            context: "create socket",
            source,
        }
    })?;

    // A zero timeout means "block forever" to the OS
    let timeout = read_timeout.max(Duration::from_millis(1));
    if let Err(e) = socket.set_read_timeout(Some(timeout)) {
        warn!(error = %e, "Failed to set receive timeout");
    }
    Ok(socket)
}

fn open_broadcast_socket(port: u16, read_timeout: Duration) -> Result<UdpSocket, TransportError> {
    let socket = open_socket(read_timeout)?;
    if let Err(e) = socket.set_reuse_address(true) {
        warn!(error = %e, "Failed to set SO_REUSEADDR on broadcast socket");
    }
    if let Err(e) = socket.set_broadcast(true) {
        warn!(error = %e, "Failed to set SO_BROADCAST on broadcast socket");
    }

    let addr = SocketAddrV4::new(Ipv4Addr::BROADCAST, port);
    socket
        .bind(&SockAddr::from(addr))
        .map_err(|source| TransportError::Socket {
            context: "bind broadcast socket",
            source,
        })?;
    Ok(socket.into())
}

/// UDP endpoint bound to one local interface
///
/// Owns its sockets exclusively; they are closed when the transport is dropped.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    receive: ReceivePath,
    local: SocketAddrV4,
    netmask: u32,
    remote: SocketAddrV4,
    broadcast: bool,
}

impl UdpTransport {
    /// Open and bind the transport's sockets
    pub fn bind(config: &TransportConfig) -> Result<Self, TransportError> {
        let netmask =
            netmask_from_prefix(config.prefix).ok_or(TransportError::InvalidPrefix(config.prefix))?;
        let local_ip = string_to_addr(&config.local_ip)?;
        let requested_remote = string_to_addr(&config.remote_ip)?;

        let (remote_ip, broadcast) = resolve_remote(local_ip, netmask, requested_remote);
        if local_ip & netmask != remote_ip & netmask {
            warn!(
                local = %addr_to_string(local_ip),
                remote = %addr_to_string(remote_ip),
                "Remote address is in a different network"
            );
        }

        let socket = open_socket(config.read_timeout)?;
        if broadcast {
            if let Err(e) = socket.set_broadcast(true) {
                warn!(error = %e, "Failed to set SO_BROADCAST");
            }
        } else if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
            warn!(error = %e, "Failed to set SO_RCVBUF");
        }

        // Bind to the interface address even for datagrams, so traffic goes
        // through the intended physical interface
        let bind_addr = SocketAddrV4::new(Ipv4Addr::from(local_ip), config.local_port);
        socket
            .bind(&SockAddr::from(bind_addr))
            .map_err(|source| TransportError::Socket {
                context: "bind socket",
                source,
            })?;
        let socket: UdpSocket = socket.into();

        let local = match socket.local_addr() {
            Ok(SocketAddr::V4(addr)) => addr,
            _ => bind_addr,
        };

        let receive = ReceivePath::select(broadcast, local.port(), config.read_timeout);

        debug!(
            local = %local,
            remote = %addr_to_string(remote_ip),
            port = config.remote_port,
            broadcast,
            "UDP transport bound"
        );

        Ok(Self {
            socket,
            receive,
            local,
            netmask,
            remote: SocketAddrV4::new(Ipv4Addr::from(remote_ip), config.remote_port),
            broadcast,
        })
    }

    /// Send one datagram to the remote address
    ///
    /// Broadcast sessions first send to the limited broadcast address, for
    /// networks that filter directed subnet broadcasts.
    pub fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let limited = self.broadcast.then(|| {
            let limited = SocketAddrV4::new(Ipv4Addr::BROADCAST, self.remote.port());
            self.socket.send_to(data, limited).inspect_err(|e| {
                debug!(error = %e, "Limited broadcast send failed");
            })
        });

        let directed = self.socket.send_to(data, self.remote);
        match &directed {
            Ok(sent) => trace!(remote = %self.remote, len = sent, "Sent datagram"),
            Err(e) => debug!(remote = %self.remote, error = %e, "Send failed"),
        }
        delivered(limited, directed)
    }

    /// Receive one datagram, waiting at most the read timeout per socket
    ///
    /// `buf` is resized to the received length. Returns
    /// [`TransportError::Timeout`] when nothing arrived.
    pub fn read(&self, buf: &mut Vec<u8>) -> Result<usize, TransportError> {
        buf.resize(MAX_DATAGRAM_LEN, 0);

        let result = match (recv(&self.socket, buf), &self.receive) {
            (Err(_), ReceivePath::BroadcastSocket(rx)) => recv(rx, buf),
            (result, _) => result,
        };

        match result {
            Ok(len) => {
                buf.truncate(len);
                Ok(len)
            }
            Err(e) => {
                buf.clear();
                Err(e)
            }
        }
    }

    /// Bound local address, host byte order
    pub fn local_addr(&self) -> u32 {
        u32::from(*self.local.ip())
    }

    /// Bound local socket address, including the port actually assigned
    pub fn local_socket_addr(&self) -> SocketAddrV4 {
        self.local
    }

    /// Subnet mask derived from the prefix, host byte order
    pub fn netmask(&self) -> u32 {
        self.netmask
    }

    /// Resolved destination of `write`
    pub fn remote_addr(&self) -> SocketAddrV4 {
        self.remote
    }

    pub fn is_broadcast(&self) -> bool {
        self.broadcast
    }
}

/// Outcome of a write: sent if any of its datagrams went out
fn delivered(
    limited: Option<io::Result<usize>>,
    directed: io::Result<usize>,
) -> Result<usize, TransportError> {
    match (limited, directed) {
        (_, Ok(sent)) | (Some(Ok(sent)), Err(_)) => Ok(sent),
        (_, Err(e)) => Err(e.into()),
    }
}

fn recv(socket: &UdpSocket, buf: &mut [u8]) -> Result<usize, TransportError> {
    let (len, from) = socket.recv_from(buf)?;
    trace!(from = %from, len, "Received datagram");
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_peer() -> UdpSocket {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        peer
    }

    fn unicast_config(peer: &UdpSocket) -> TransportConfig {
        TransportConfig::new("127.0.0.1", 8, 0)
            .with_remote("127.0.0.1", peer.local_addr().unwrap().port())
            .with_read_timeout(Duration::from_millis(50))
    }

    /// First non-loopback IPv4 interface with a broadcast address
    fn broadcast_interface() -> Option<(Ipv4Addr, u8)> {
        use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};

        NetworkInterface::show()
            .ok()?
            .into_iter()
            .flat_map(|iface| iface.addr)
            .find_map(|addr| match addr {
                Addr::V4(v4) if !v4.ip.is_loopback() && v4.broadcast.is_some() => {
                    let prefix = u32::from(v4.netmask?).count_ones() as u8;
                    (prefix < 31).then_some((v4.ip, prefix))
                }
                _ => None,
            })
    }

    #[test]
    fn test_netmask_has_prefix_leading_ones() {
        for prefix in 0..=32u8 {
            let mask = netmask_from_prefix(prefix).unwrap();
            assert_eq!(mask.leading_ones(), prefix as u32, "prefix {prefix}");
            assert_eq!(mask.count_ones(), prefix as u32, "prefix {prefix}");
        }
        assert_eq!(netmask_from_prefix(24), Some(0xFFFF_FF00));
        assert_eq!(netmask_from_prefix(33), None);
    }

    #[test]
    fn test_address_conversions() {
        assert_eq!(string_to_addr("192.168.1.10").unwrap(), 0xC0A8_010A);
        assert_eq!(addr_to_string(0xFFFF_FF00), "255.255.255.0");
        assert!(matches!(
            string_to_addr("192.168.1"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_resolve_remote() {
        let local = string_to_addr("192.168.1.100").unwrap();
        let mask = netmask_from_prefix(24).unwrap();
        let directed = string_to_addr("192.168.1.255").unwrap();

        assert_eq!(resolve_remote(local, mask, u32::MAX), (directed, true));
        assert_eq!(resolve_remote(local, mask, directed), (directed, true));

        let unicast = string_to_addr("192.168.1.20").unwrap();
        assert_eq!(resolve_remote(local, mask, unicast), (unicast, false));
    }

    #[test]
    fn test_bind_rejects_invalid_config() {
        let err = UdpTransport::bind(&TransportConfig::new("127.0.0.1", 33, 0)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidPrefix(33)));

        let err = UdpTransport::bind(&TransportConfig::new("localhost", 8, 0)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));

        let config = TransportConfig::new("127.0.0.1", 8, 0).with_remote("nowhere", 1);
        let err = UdpTransport::bind(&config).unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));
    }

    #[test]
    fn test_unicast_write_and_read() {
        let peer = loopback_peer();
        let transport = UdpTransport::bind(&unicast_config(&peer)).unwrap();
        assert!(!transport.is_broadcast());
        assert_eq!(transport.local_addr(), u32::from(Ipv4Addr::LOCALHOST));
        assert_eq!(transport.netmask(), 0xFF00_0000);

        assert_eq!(transport.write(b"hello").unwrap(), 5);
        let mut buf = [0u8; 64];
        let (len, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, SocketAddr::V4(transport.local_socket_addr()));

        peer.send_to(b"world!", from).unwrap();
        let mut reply = Vec::new();
        assert_eq!(transport.read(&mut reply).unwrap(), 6);
        assert_eq!(reply, b"world!");
    }

    #[test]
    fn test_read_times_out_when_idle() {
        let peer = loopback_peer();
        let transport = UdpTransport::bind(&unicast_config(&peer)).unwrap();

        let mut buf = vec![1, 2, 3];
        let err = transport.read(&mut buf).unwrap_err();
        assert!(err.is_timeout());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_write_succeeds_if_any_datagram_went_out() {
        let refused = || Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));

        assert_eq!(delivered(None, Ok(24)).unwrap(), 24);
        assert_eq!(delivered(Some(refused()), Ok(24)).unwrap(), 24);
        assert_eq!(delivered(Some(Ok(24)), refused()).unwrap(), 24);
        assert!(matches!(
            delivered(Some(refused()), refused()),
            Err(TransportError::Io(_))
        ));
        assert!(matches!(delivered(None, refused()), Err(TransportError::Io(_))));
    }

    #[test]
    fn test_broadcast_session_round_trip() {
        let Some((ip, prefix)) = broadcast_interface() else {
            eprintln!("no broadcast-capable IPv4 interface, skipping");
            return;
        };

        let peer = UdpSocket::bind("0.0.0.0:0").unwrap();
        peer.set_broadcast(true).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let peer_port = peer.local_addr().unwrap().port();

        let config = TransportConfig::new(ip.to_string(), prefix, 0)
            .with_remote("255.255.255.255", peer_port)
            .with_read_timeout(Duration::from_millis(50));
        let transport = UdpTransport::bind(&config).unwrap();

        let netmask = netmask_from_prefix(prefix).unwrap();
        let directed = Ipv4Addr::from(u32::from(ip) | !netmask);
        assert!(transport.is_broadcast());
        assert_eq!(transport.remote_addr(), SocketAddrV4::new(directed, peer_port));

        assert_eq!(transport.write(b"ping").unwrap(), 4);
        let mut buf = [0u8; 64];
        let (len, _) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"ping");

        // Broadcast reply to the transport's port, as sensors answer scans
        let client_port = transport.local_socket_addr().port();
        peer.send_to(b"pong", (Ipv4Addr::BROADCAST, client_port))
            .unwrap();

        let mut reply = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            match transport.read(&mut reply) {
                Ok(_) => break,
                Err(e) => assert!(e.is_timeout(), "{e}"),
            }
        }
        assert_eq!(reply, b"pong");
    }

    #[test]
    fn test_io_error_classification() {
        let timeout: TransportError = io::Error::new(io::ErrorKind::TimedOut, "t").into();
        assert!(timeout.is_timeout());
        let would_block: TransportError = io::Error::new(io::ErrorKind::WouldBlock, "w").into();
        assert!(would_block.is_timeout());
        let refused: TransportError =
            io::Error::new(io::ErrorKind::ConnectionRefused, "r").into();
        assert!(!refused.is_timeout());
    }
}
