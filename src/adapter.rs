//! Adapter discovery and the `Powered`/`Pairable` idempotent setters.

use dbus::Path;

use crate::{
    bus::BusSession,
    error::{Error, ErrorKind, InternalErrorKind, Result},
};

pub(crate) const INTERFACE: &str = "org.bluez.Adapter1";
const PREFIX: &str = "/org/bluez/";

/// Handle to the chosen adapter. Holds only its object path; every read/write goes back through
/// the shared `BusSession`.
#[derive(Clone, Debug)]
pub struct AdapterController {
    bus: BusSession,
    path: Path<'static>,
}

impl AdapterController {
    /// Enumerates managed objects and picks the first path exposing `Adapter1`.
    pub async fn locate(bus: BusSession) -> Result<Self> {
        let objects = bus.managed_objects().await?;
        let path = objects
            .into_iter()
            .find(|(path, ifaces)| path.starts_with(PREFIX) && ifaces.contains_key(INTERFACE))
            .map(|(path, _)| path)
            .ok_or_else(|| Error::with_message(ErrorKind::AdapterError, "no Bluetooth adapter found on the system bus"))?;

        Ok(Self { bus, path })
    }

    pub fn path(&self) -> &Path<'static> {
        &self.path
    }

    /// Reads the daemon's reported adapter software version; informational only. BlueZ does not
    /// expose this as a dedicated field, so `Modalias` (which carries firmware/driver identifiers
    /// on most controllers) stands in for it. Not every adapter exposes the property, and that
    /// case alone resolves to `"unknown"` rather than an error; any other failure to read it
    /// (the property interface rejecting the read, a lost connection, and so on) is a genuine
    /// adapter error.
    pub async fn read_version(&self) -> Result<String> {
        match self.bus.get_property(&self.path, INTERFACE, "Modalias").await {
            Ok(modalias) => Ok(modalias),
            Err(err) if is_unknown_property(&err) => Ok(String::from("unknown")),
            Err(err) => Err(Error::with_message(ErrorKind::AdapterError, format!("adapter version unreadable: {err}"))),
        }
    }

    /// Sets `Powered` true if it is not already, then re-reads to confirm.
    pub async fn ensure_powered(&self) -> Result<()> {
        self.ensure_bool_property("Powered").await
    }

    /// Sets `Pairable` true if it is not already, then re-reads to confirm.
    pub async fn ensure_pairable(&self) -> Result<()> {
        self.ensure_bool_property("Pairable").await
    }

    async fn ensure_bool_property(&self, name: &str) -> Result<()> {
        let current: bool = self.bus.get_property(&self.path, INTERFACE, name).await?;
        if current {
            return Ok(());
        }

        self.bus.set_property(&self.path, INTERFACE, name, true).await?;
        let confirmed: bool = self.bus.get_property(&self.path, INTERFACE, name).await?;
        if !confirmed {
            return Err(Error::with_message(ErrorKind::AdapterError, format!("{name} remained false after being set")));
        }
        Ok(())
    }
}

/// Whether `err` is the freedesktop Properties error for a property the interface doesn't
/// define, the only `Modalias` read failure `read_version` treats as benign.
fn is_unknown_property(err: &Error) -> bool {
    matches!(&err.kind, ErrorKind::Internal(InternalErrorKind::DBus(name)) if name.ends_with("UnknownProperty") || name.ends_with("InvalidArgs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_and_prefix_are_bluez_constants() {
        assert_eq!(INTERFACE, "org.bluez.Adapter1");
        assert_eq!(PREFIX, "/org/bluez/");
    }

    #[test]
    fn unknown_property_is_recognized_as_benign() {
        let err = Error::with_message(ErrorKind::Internal(InternalErrorKind::DBus("org.freedesktop.DBus.Error.UnknownProperty".into())), "no such property");
        assert!(is_unknown_property(&err));
    }

    #[test]
    fn other_dbus_failures_are_not_treated_as_benign() {
        let err = Error::with_message(ErrorKind::Internal(InternalErrorKind::DBusConnectionLost), "gone");
        assert!(!is_unknown_property(&err));
    }
}
