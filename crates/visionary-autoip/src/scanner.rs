//! Network scan: broadcast one discovery request and collect device reports

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use visionary_core::report::decode_binary_report;
use visionary_core::telegram::{encode_discovery, xml_document};
use visionary_core::xml::decode_xml_report;
use visionary_core::{CodecError, DeviceInfo, MacAddress, Reply};
use visionary_transport::{UdpTransport, MAX_DATAGRAM_LEN};

/// Why a reply did not produce a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    /// Reply to a different request
    ForeignTelegram { expected: u32, received: u32 },
    /// Device already reported in this scan
    Duplicate(MacAddress),
    /// Reply that is not a device report
    NotAReport,
    Invalid(CodecError),
}

/// State of one scan, keyed by its telegram id
#[derive(Debug)]
pub struct ScanSession {
    telegram_id: u32,
    seen: HashSet<MacAddress>,
    devices: Vec<DeviceInfo>,
}

impl ScanSession {
    pub fn new(telegram_id: u32) -> Self {
        Self {
            telegram_id,
            seen: HashSet::new(),
            devices: Vec::new(),
        }
    }

    pub fn telegram_id(&self) -> u32 {
        self.telegram_id
    }

    /// Devices collected so far, in order of first reply
    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn into_devices(self) -> Vec<DeviceInfo> {
        self.devices
    }

    /// Discovery request for this session
    pub fn request(&self, local: Ipv4Addr, netmask: Ipv4Addr) -> Vec<u8> {
        encode_discovery(self.telegram_id, local, netmask)
    }

    /// Process one received datagram
    ///
    /// Returns the newly discovered device, or why the datagram was dropped.
    pub fn accept(&mut self, datagram: &[u8]) -> Result<&DeviceInfo, Discard> {
        let reply = Reply::parse(datagram).map_err(|e| match e {
            CodecError::UnknownReply(_) | CodecError::TooShort { .. } => Discard::NotAReport,
            other => Discard::Invalid(other),
        })?;

        let received = reply.telegram_id().ok_or(Discard::NotAReport)?;
        if received != self.telegram_id {
            return Err(Discard::ForeignTelegram {
                expected: self.telegram_id,
                received,
            });
        }

        let info = match reply {
            Reply::BinaryReport { body, .. } => decode_binary_report(body),
            Reply::XmlReport {
                declared_len,
                payload,
                ..
            } => xml_document(declared_len, payload).and_then(decode_xml_report),
            Reply::IpConfigAck => return Err(Discard::NotAReport),
        }
        .map_err(Discard::Invalid)?;

        if !self.seen.insert(info.mac_address) {
            return Err(Discard::Duplicate(info.mac_address));
        }

        let index = self.devices.len();
        self.devices.push(info);
        Ok(&self.devices[index])
    }

    /// Send the request and collect replies until `timeout` has elapsed
    ///
    /// Receive errors are logged; the devices collected up to that point are
    /// still returned.
    pub fn run(
        mut self,
        transport: &UdpTransport,
        timeout: Duration,
        retry_delay: Duration,
    ) -> Vec<DeviceInfo> {
        let local = Ipv4Addr::from(transport.local_addr());
        let netmask = Ipv4Addr::from(transport.netmask());

        info!(
            local = %local,
            remote = %transport.remote_addr(),
            telegram_id = self.telegram_id,
            "Starting AutoIP scan"
        );

        if let Err(e) = transport.write(&self.request(local, netmask)) {
            warn!(error = %e, "Failed to send discovery request");
            return Vec::new();
        }

        let deadline = Instant::now() + timeout;
        let mut buf = Vec::with_capacity(MAX_DATAGRAM_LEN);

        while Instant::now() < deadline {
            match transport.read(&mut buf) {
                Ok(_) => match self.accept(&buf) {
                    Ok(device) => debug!(
                        mac = %device.mac_address,
                        ip = %device.ip_address,
                        ident = %device.device_ident,
                        "Discovered device"
                    ),
                    Err(reason) => debug!(?reason, "Discarded reply"),
                },
                Err(e) if e.is_timeout() => {}
                Err(e) => {
                    debug!(error = %e, "Receive failed");
                    thread::sleep(retry_delay);
                }
            }
        }

        if self.devices.is_empty() {
            warn!(local = %local, "Scan finished without any device reply");
        } else {
            info!(found = self.devices.len(), "Scan complete");
        }
        self.into_devices()
    }
}
