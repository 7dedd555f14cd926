//! Bluetooth MAC address and the D-Bus object paths derived from it.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::Deref,
    str::FromStr,
};

use dbus::Path;

use crate::error::{Error, ErrorKind};

/// A 48-bit Bluetooth device address.
///
/// The canonical textual form is upper-case, colon-separated hexadecimal, e.g.
/// `AA:BB:CC:DD:EE:FF`.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address(pub [u8; 6]);

impl Deref for Address {
    type Target = [u8; 6];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// The argument did not look like a Bluetooth address.
#[derive(Debug, Clone)]
pub struct InvalidAddress(pub String);

impl fmt::Display for InvalidAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid Bluetooth address: {}", &self.0)
    }
}

impl std::error::Error for InvalidAddress {}

impl FromStr for Address {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, InvalidAddress> {
        let fields = s
            .split(':')
            .map(|s| u8::from_str_radix(s, 16).map_err(|_| InvalidAddress(s.to_string())))
            .collect::<Result<Vec<_>, InvalidAddress>>()?;
        Ok(Self(fields.try_into().map_err(|_| InvalidAddress(s.to_string()))?))
    }
}

impl From<InvalidAddress> for Error {
    fn from(err: InvalidAddress) -> Self {
        Error::with_message(ErrorKind::AdapterError, err.to_string())
    }
}

/// Derives the D-Bus object path of the device with the given address under the given adapter,
/// e.g. `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`.
pub fn device_path(adapter_path: &str, address: Address) -> Path<'static> {
    let suffix = address.to_string().replace(':', "_");
    Path::new(format!("{adapter_path}/dev_{suffix}")).expect("well-formed adapter path and address yield a well-formed path")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lower_and_upper_case() {
        let lower: Address = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let upper: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn display_is_canonical_upper_case() {
        let addr: Address = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!("AA:BB:CC:DD:EE".parse::<Address>().is_err());
        assert!("AA:BB:CC:DD:EE:FF:00".parse::<Address>().is_err());
    }

    #[test]
    fn rejects_non_hex_field() {
        assert!("ZZ:BB:CC:DD:EE:FF".parse::<Address>().is_err());
    }

    #[test]
    fn derives_canonical_device_path() {
        let addr: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let path = device_path("/org/bluez/hci0", addr);
        assert_eq!(&*path, "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF");
    }
}
