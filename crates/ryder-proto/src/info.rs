// ── INFO response layout ──
//
// bytes 0..5  magic "ryder"
// bytes 5..8  firmware major / minor / patch
// byte  8     reserved
// byte  9     initialized flag (non-zero = seeded)

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Marker every Ryder INFO response starts with.
pub const INFO_MAGIC: &[u8; 5] = b"ryder";

const VERSION_OFFSET: usize = 5;
const INITIALIZED_OFFSET: usize = 9;

/// Firmware version triple as reported by INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FirmwareVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidVersion(s.to_owned());
        let mut parts = s.trim().split('.').map(|p| p.parse::<u8>().map_err(|_| invalid()));
        let (Some(major), Some(minor), Some(patch), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        Ok(Self::new(major?, minor?, patch?))
    }
}

/// Device metadata captured when the session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware: FirmwareVersion,
    pub initialized: bool,
}

impl DeviceInfo {
    /// Parse the raw INFO output block.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if !bytes.starts_with(INFO_MAGIC) {
            let found = bytes.get(..INFO_MAGIC.len()).unwrap_or(bytes);
            return Err(Error::BadMagic {
                found: String::from_utf8_lossy(found).into_owned(),
            });
        }

        let (Some(version), Some(&initialized)) = (
            bytes.get(VERSION_OFFSET..VERSION_OFFSET + 3),
            bytes.get(INITIALIZED_OFFSET),
        ) else {
            return Err(Error::MalformedInfo { len: bytes.len() });
        };

        Ok(Self {
            firmware: FirmwareVersion::new(version[0], version[1], version[2]),
            initialized: initialized != 0,
        })
    }
}
