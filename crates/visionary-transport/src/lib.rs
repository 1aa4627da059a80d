//! Visionary Transport - UDP transport for AutoIP telegrams
//!
//! This crate wraps a blocking UDP socket bound to one local interface and
//! handles the broadcast cases AutoIP relies on: directed and limited
//! broadcast sends, and receiving broadcast replies on platforms that do not
//! deliver them to a unicast-bound socket.

pub mod transport;

pub use transport::{
    addr_to_string, netmask_from_prefix, resolve_remote, string_to_addr, TransportConfig,
    TransportError, UdpTransport, DEFAULT_READ_TIMEOUT, MAX_DATAGRAM_LEN,
};
