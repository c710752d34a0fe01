use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_DEVICE_ADDRESS: DeviceAddress =
    DeviceAddress::Mac([0xda, 0x81, 0x90, 0xcb, 0xf3, 0x22]);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' is neither a MAC address nor a peripheral UUID")]
pub struct AddressError(pub String);

/// Identifies the peripheral to connect to.
///
/// Linux and Windows expose peripherals by MAC, macOS only hands out
/// per-host UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAddress {
    Mac([u8; 6]),
    Platform(Uuid),
}

impl Default for DeviceAddress {
    fn default() -> Self {
        DEFAULT_DEVICE_ADDRESS
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(mac) = parse_mac(s) {
            return Ok(DeviceAddress::Mac(mac));
        }
        Uuid::parse_str(s)
            .map(DeviceAddress::Platform)
            .map_err(|_| AddressError(s.to_string()))
    }
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let digits: String = match s.len() {
        12 => s.to_string(),
        17 => {
            let sep = s.as_bytes()[2];
            if sep != b':' && sep != b'-' {
                return None;
            }
            let parts: Vec<&str> = s.split(sep as char).collect();
            if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
                return None;
            }
            parts.concat()
        }
        _ => return None,
    };

    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let mut mac = [0u8; 6];
    for (i, byte) in mac.iter_mut().enumerate() {
        let pair = digits.get(i * 2..i * 2 + 2)?;
        *byte = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(mac)
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Mac(b) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            ),
            DeviceAddress::Platform(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_address() {
        assert_eq!(DeviceAddress::default().to_string(), "da:81:90:cb:f3:22");
    }

    #[test]
    fn test_parse_mac_forms() {
        let expected = DeviceAddress::Mac([0xda, 0x81, 0x90, 0xcb, 0xf3, 0x22]);
        assert_eq!("da:81:90:cb:f3:22".parse::<DeviceAddress>().unwrap(), expected);
        assert_eq!("DA-81-90-CB-F3-22".parse::<DeviceAddress>().unwrap(), expected);
        assert_eq!("DA8190CBF322".parse::<DeviceAddress>().unwrap(), expected);
        assert_eq!(" da:81:90:cb:f3:22\n".parse::<DeviceAddress>().unwrap(), expected);
    }

    #[test]
    fn test_parse_platform_uuid() {
        let s = "5f1c2a3b-4d5e-6f70-8192-a3b4c5d6e7f8";
        let address: DeviceAddress = s.parse().unwrap();
        assert!(matches!(address, DeviceAddress::Platform(_)));
        assert_eq!(address.to_string(), s);
    }

    #[test]
    fn test_reject_garbage() {
        for bad in ["", "da:81:90:cb:f3", "da:81:90:cb:f3:zz", "da:81-90:cb:f3:22", "heart strap"] {
            assert!(bad.parse::<DeviceAddress>().is_err(), "{bad} should not parse");
        }
    }
}
