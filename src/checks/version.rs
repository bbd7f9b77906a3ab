//! Platform Version Parsing
//!
//! vCenter and ESXi report dotted versions ("7.0.2", "6.7.0.44000"), VMs
//! report hardware versions as "vmx-15" or "VMX_15".

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Dotted platform version compared component-wise
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Parses up to three numeric components; build suffixes are ignored
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::VersionParse("empty version string".into()));
        }

        let mut parts = [0u32; 3];
        for (idx, component) in trimmed.split('.').take(3).enumerate() {
            let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                return Err(Error::VersionParse(format!("invalid version: {}", s)));
            }
            parts[idx] = digits
                .parse()
                .map_err(|_| Error::VersionParse(format!("invalid version: {}", s)))?;
        }

        Ok(Version::new(parts[0], parts[1], parts[2]))
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parse a VM hardware version such as "vmx-15" or "VMX_15"
pub fn parse_hardware_version(s: &str) -> Result<u32> {
    let lower = s.trim().to_ascii_lowercase();
    let number = lower
        .strip_prefix("vmx-")
        .or_else(|| lower.strip_prefix("vmx_"))
        .ok_or_else(|| Error::VersionParse(format!("invalid hardware version: {}", s)))?;
    number
        .parse()
        .map_err(|_| Error::VersionParse(format!("invalid hardware version: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_versions() {
        assert_eq!("7.0.2".parse::<Version>().unwrap(), Version::new(7, 0, 2));
        assert_eq!("6.5".parse::<Version>().unwrap(), Version::new(6, 5, 0));
        assert_eq!("7.0.3.00100".parse::<Version>().unwrap(), Version::new(7, 0, 3));
        assert_eq!("8.0.1u2".parse::<Version>().unwrap(), Version::new(8, 0, 1));
    }

    #[test]
    fn test_version_ordering() {
        let minimum = Version::new(6, 7, 3);
        assert!("6.5.0".parse::<Version>().unwrap() < minimum);
        assert!("6.7.2".parse::<Version>().unwrap() < minimum);
        assert!("6.7.3".parse::<Version>().unwrap() >= minimum);
        assert!("7.0.0".parse::<Version>().unwrap() > minimum);
        assert!("6.10.0".parse::<Version>().unwrap() > minimum);
    }

    #[test]
    fn test_invalid_versions() {
        assert_matches!("".parse::<Version>(), Err(Error::VersionParse(_)));
        assert_matches!("latest".parse::<Version>(), Err(Error::VersionParse(_)));
    }

    #[test]
    fn test_hardware_versions() {
        assert_eq!(parse_hardware_version("vmx-15").unwrap(), 15);
        assert_eq!(parse_hardware_version("VMX_13").unwrap(), 13);
        assert_matches!(parse_hardware_version("15"), Err(Error::VersionParse(_)));
        assert_matches!(parse_hardware_version("vmx-"), Err(Error::VersionParse(_)));
    }
}
