//! AutoIP client bound to one local interface

use rand::Rng;
use std::net::SocketAddrV4;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use visionary_core::{DeviceInfo, MacAddress, ProtocolGeneration};
use visionary_transport::{TransportConfig, TransportError, UdpTransport};

use crate::assign::{AssignRequest, IpConfig};
use crate::config::AutoIpConfig;
use crate::scanner::ScanSession;

#[derive(Error, Debug)]
pub enum AutoIpError {
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Discovers Visionary sensors and assigns their network configuration
///
/// Each client exclusively owns its sockets; scans on several interfaces use
/// one client per interface.
#[derive(Debug)]
pub struct VisionaryAutoIp {
    transport: UdpTransport,
    timeout: Duration,
    read_timeout: Duration,
}

impl VisionaryAutoIp {
    /// Bind to `interface_ip` with default settings
    ///
    /// `prefix` is the CIDR prefix length of the interface's subnet and
    /// determines the directed broadcast address used for scans.
    pub fn new(interface_ip: &str, prefix: u8) -> Result<Self, AutoIpError> {
        Self::with_config(interface_ip, prefix, &AutoIpConfig::default())
    }

    pub fn with_config(
        interface_ip: &str,
        prefix: u8,
        config: &AutoIpConfig,
    ) -> Result<Self, AutoIpError> {
        let mut transport_config = TransportConfig::new(interface_ip, prefix, config.port)
            .with_remote(config.remote.as_str(), config.port)
            .with_read_timeout(config.read_timeout());
        if let Some(local_port) = config.local_port {
            transport_config = transport_config.with_local_port(local_port);
        }

        let transport = UdpTransport::bind(&transport_config)?;
        info!(
            local = %transport.local_socket_addr(),
            remote = %transport.remote_addr(),
            "AutoIP client ready"
        );

        Ok(Self {
            transport,
            timeout: config.timeout(),
            read_timeout: config.read_timeout(),
        })
    }

    /// Broadcast a discovery request and collect every answering device
    ///
    /// Blocks for the full configured timeout. Each device appears once, in
    /// order of its first reply; an empty list means nothing answered.
    pub fn scan(&mut self) -> Vec<DeviceInfo> {
        ScanSession::new(next_telegram_id()).run(&self.transport, self.timeout, self.read_timeout)
    }

    /// Apply `config` to the device with MAC address `target`
    ///
    /// Returns `true` once the device confirmed and the settle time has
    /// passed, `false` if no confirmation arrived within the timeout.
    pub fn assign(
        &mut self,
        target: MacAddress,
        generation: ProtocolGeneration,
        config: &IpConfig,
    ) -> bool {
        AssignRequest::new(target, generation, config).run(
            &self.transport,
            next_telegram_id(),
            self.timeout,
            self.read_timeout,
        )
    }

    /// Local socket address the client is bound to
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.transport.local_socket_addr()
    }

    /// Destination of scan and assign requests
    pub fn remote_addr(&self) -> SocketAddrV4 {
        self.transport.remote_addr()
    }
}

fn next_telegram_id() -> u32 {
    rand::rng().random()
}
