//! Error taxonomy and process exit codes.

use std::{fmt, str::FromStr};

pub(crate) const ERR_PREFIX: &str = "org.bluez.Error.";

/// Error produced by any component of this tool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Detailed message, if the underlying failure provided one.
    pub message: String,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, message: String::new() }
    }

    pub(crate) fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

/// Classification of a failure.
#[derive(Clone, Debug, displaydoc::Display, Eq, PartialEq, strum::EnumString)]
#[non_exhaustive]
pub enum ErrorKind {
    /// no access to the system bus or a privileged daemon method
    #[strum(disabled)]
    PermissionError,
    /// adapter missing, or Powered/Pairable could not be set
    #[strum(disabled)]
    AdapterError,
    /// target device was not seen within the discovery time bound
    #[strum(disabled)]
    DiscoveryError,
    /// connect or pair failed in a way not classified as a stale bond
    #[strum(disabled)]
    PairingError,
    /// the remote device appears to have lost its half of the bond
    #[strum(disabled)]
    BondInvalid,
    /// Bluetooth operation not authorized
    NotAuthorized,
    /// Bluetooth operation not permitted
    NotPermitted,
    /// Bluetooth authentication failed
    AuthenticationFailed,
    /// Bluetooth authentication canceled
    AuthenticationCanceled,
    /// Bluetooth authentication rejected
    AuthenticationRejected,
    /// Bluetooth authentication timeout
    AuthenticationTimeout,
    /// Bluetooth connection attempt failed
    ConnectionAttemptFailed,
    /// Bluetooth device already connected
    AlreadyConnected,
    /// Bluetooth device already exists
    AlreadyExists,
    /// Bluetooth device does not exist
    DoesNotExist,
    /// Bluetooth operation failed
    Failed,
    /// Bluetooth operation in progress
    InProgress,
    /// Bluetooth operation not available
    NotAvailable,
    /// Bluetooth operation not supported
    NotSupported,
    /// Bluetooth device not ready
    NotReady,
    /// an unexpected failure occurred
    #[strum(disabled)]
    Unexpected,
    /// internal error: {0}
    #[strum(disabled)]
    Internal(InternalErrorKind),
}

impl ErrorKind {
    /// Whether a `Connect` failure of this kind, observed against a device whose `Paired`
    /// property reads true, indicates that the remote has lost its half of the bond.
    ///
    /// The exact BlueZ error text that reports a lost bond varies across daemon versions, so
    /// every kind *except* the two that indicate we cannot trust the daemon's view of the device
    /// at all is treated as `BondInvalid`.
    pub(crate) fn is_stale_bond_signal(&self) -> bool {
        !matches!(self, ErrorKind::PermissionError | ErrorKind::AdapterError)
    }

    /// The stable process exit code for this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::PermissionError => 4,
            ErrorKind::AdapterError => 3,
            ErrorKind::DiscoveryError | ErrorKind::PairingError | ErrorKind::BondInvalid => 2,
            _ => 2,
        }
    }
}

/// Internal error kind: most likely caused by an incompatibility between this tool and the
/// running daemon's version.
#[derive(Clone, Debug, displaydoc::Display, Eq, PartialEq)]
#[non_exhaustive]
pub enum InternalErrorKind {
    /// D-Bus error {0}
    DBus(String),
    /// lost connection to the system bus
    DBusConnectionLost,
    /// I/O error: {0}
    Io(String),
    /// key {0} is missing from the managed-object dictionary
    MissingKey(String),
    /// invalid Bluetooth adapter name: {0}
    InvalidName(String),
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<dbus::Error> for Error {
    fn from(err: dbus::Error) -> Self {
        log::trace!("DBus error {}: {}", err.name().unwrap_or_default(), err.message().unwrap_or_default());

        if err.name() == Some("org.freedesktop.DBus.Error.AccessDenied") {
            return Self::with_message(ErrorKind::PermissionError, err.message().unwrap_or_default());
        }

        let kind = match err.name().and_then(|name| name.strip_prefix(ERR_PREFIX)).and_then(|s| ErrorKind::from_str(s).ok()) {
            Some(kind) => kind,
            None => ErrorKind::Internal(InternalErrorKind::DBus(err.name().unwrap_or_default().to_string())),
        };
        Self { kind, message: err.message().unwrap_or_default().to_string() }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self { kind: ErrorKind::Internal(InternalErrorKind::Io(err.to_string())), message: String::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_maps_to_permission_error() {
        let dbus_err = dbus::Error::new_custom("org.freedesktop.DBus.Error.AccessDenied", "nope");
        let err: Error = dbus_err.into();
        assert_eq!(err.kind, ErrorKind::PermissionError);
    }

    #[test]
    fn known_bluez_error_name_is_classified() {
        let dbus_err = dbus::Error::new_custom("org.bluez.Error.AuthenticationFailed", "wrong pin");
        let err: Error = dbus_err.into();
        assert_eq!(err.kind, ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn unknown_error_name_becomes_internal() {
        let dbus_err = dbus::Error::new_custom("org.bluez.Error.SomeFutureThing", "huh");
        let err: Error = dbus_err.into();
        assert!(matches!(err.kind, ErrorKind::Internal(InternalErrorKind::DBus(_))));
    }

    #[test]
    fn only_permission_and_adapter_errors_are_not_stale_bond_signals() {
        assert!(!ErrorKind::PermissionError.is_stale_bond_signal());
        assert!(!ErrorKind::AdapterError.is_stale_bond_signal());
        assert!(ErrorKind::AuthenticationFailed.is_stale_bond_signal());
        assert!(ErrorKind::ConnectionAttemptFailed.is_stale_bond_signal());
        assert!(ErrorKind::Unexpected.is_stale_bond_signal());
    }

    #[test]
    fn exit_codes_stay_within_the_stable_taxonomy() {
        for kind in [
            ErrorKind::PermissionError,
            ErrorKind::AdapterError,
            ErrorKind::DiscoveryError,
            ErrorKind::PairingError,
            ErrorKind::BondInvalid,
            ErrorKind::Unexpected,
            ErrorKind::Internal(InternalErrorKind::DBusConnectionLost),
        ] {
            assert!((0..=4).contains(&kind.exit_code()));
        }
    }
}
