//! Visionary Core - Core types and AutoIP wire codec
//!
//! This crate provides the foundational types for Visionary sensor discovery:
//! - Device records reported by sensors answering an AutoIP scan
//! - A bounds-checked byte reader for untrusted binary replies
//! - AutoIP telegram framing (discovery and IP configuration requests)
//! - Binary (CoLa-2) and XML (CoLa-1) device report decoding

pub mod device;
pub mod reader;
pub mod report;
pub mod telegram;
pub mod visionary_type;
pub mod xml;

pub use device::{AuthGeneration, DeviceInfo, MacAddress, MacParseError, ProtocolGeneration};
pub use reader::{ByteReader, CodecError};
pub use telegram::{Reply, AUTOIP_PORT, MIN_REPLY_LEN};
pub use visionary_type::{VisionaryType, VisionaryTypeError};
