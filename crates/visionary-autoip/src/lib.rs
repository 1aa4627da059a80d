//! Visionary AutoIP - sensor discovery and IP assignment
//!
//! [`VisionaryAutoIp`] binds to one local interface, broadcasts AutoIP scan
//! requests and collects the devices that answer, and pushes a new network
//! configuration to a single device identified by its MAC address.
//!
//! ```no_run
//! use visionary_autoip::VisionaryAutoIp;
//!
//! let mut client = VisionaryAutoIp::new("192.168.1.100", 24)?;
//! for device in client.scan() {
//!     println!("{} at {}", device.mac_address, device.ip_address);
//! }
//! # Ok::<(), visionary_autoip::AutoIpError>(())
//! ```

pub mod assign;
pub mod client;
pub mod config;
pub mod scanner;

pub use assign::{AssignRequest, IpConfig};
pub use client::{AutoIpError, VisionaryAutoIp};
pub use config::AutoIpConfig;
pub use scanner::{Discard, ScanSession};
