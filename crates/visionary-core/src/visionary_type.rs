//! Visionary product types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown Visionary type: {0}")]
pub struct VisionaryTypeError(pub String);

/// Visionary product family
///
/// Names only contain the product type, not the version. Spaces in the
/// official product names are replaced by underscores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VisionaryType {
    #[serde(rename = "Visionary-S")]
    VisionaryS,
    #[serde(rename = "Visionary-T_Mini")]
    VisionaryTMini,
}

impl VisionaryType {
    pub const ALL: [VisionaryType; 2] = [Self::VisionaryS, Self::VisionaryTMini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VisionaryS => "Visionary-S",
            Self::VisionaryTMini => "Visionary-T_Mini",
        }
    }

    /// All known product type names
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.as_str()).collect()
    }

    /// Match the device identifier a sensor reports during a scan
    ///
    /// Identifiers carry variant suffixes ("Visionary-T Mini CX"), so this is
    /// a prefix match after replacing spaces with underscores.
    pub fn from_device_ident(ident: &str) -> Option<Self> {
        let normalized = ident.trim().replace(' ', "_");
        Self::ALL
            .into_iter()
            .find(|t| normalized.starts_with(t.as_str()))
    }
}

impl fmt::Display for VisionaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisionaryType {
    type Err = VisionaryTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| VisionaryTypeError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for t in VisionaryType::ALL {
            assert_eq!(t.to_string().parse::<VisionaryType>().unwrap(), t);
        }
        assert_eq!(VisionaryType::names(), vec!["Visionary-S", "Visionary-T_Mini"]);
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let err = "Visionary-X".parse::<VisionaryType>().unwrap_err();
        assert_eq!(err, VisionaryTypeError("Visionary-X".to_string()));
    }

    #[test]
    fn test_from_device_ident() {
        assert_eq!(
            VisionaryType::from_device_ident("Visionary-T Mini CX"),
            Some(VisionaryType::VisionaryTMini)
        );
        assert_eq!(
            VisionaryType::from_device_ident("Visionary-S CX"),
            Some(VisionaryType::VisionaryS)
        );
        assert_eq!(VisionaryType::from_device_ident("TiM781"), None);
    }
}
