//! The target device: existence/state queries, the connect-then-pair sequence, trust, removal.

use dbus::Path;

use crate::{
    address::Address,
    agent::{PairingAgent, RegisteredAgent},
    bus::BusSession,
    config::defaults,
    error::{Error, ErrorKind, Result},
};

pub(crate) const INTERFACE: &str = "org.bluez.Device1";
const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";

/// Outcome of `verify()`: whether the existing bond still lets the peripheral be reached.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BondState {
    Valid,
    Invalid,
}

#[derive(Clone, Debug)]
pub struct DeviceController {
    bus: BusSession,
    adapter_path: Path<'static>,
    device_path: Path<'static>,
    address: Address,
}

impl DeviceController {
    pub fn new(bus: BusSession, adapter_path: Path<'static>, device_path: Path<'static>, address: Address) -> Self {
        Self { bus, adapter_path, device_path, address }
    }

    pub fn path(&self) -> &Path<'static> {
        &self.device_path
    }

    /// Authoritative existence check via managed-objects enumeration: a successful property read
    /// is not proof the object is real, so this never substitutes a `get_property` call for this
    /// check.
    pub async fn exists(&self) -> Result<bool> {
        let objects = self.bus.managed_objects().await?;
        Ok(objects.get(&self.device_path).is_some_and(|ifaces| ifaces.contains_key(INTERFACE)))
    }

    pub async fn is_paired(&self) -> Result<bool> {
        self.bus.get_property(&self.device_path, INTERFACE, "Paired").await
    }

    pub async fn is_trusted(&self) -> Result<bool> {
        self.bus.get_property(&self.device_path, INTERFACE, "Trusted").await
    }

    /// Removes the device object (and with it, any bond BlueZ holds for it) from the adapter.
    /// Idempotent: a missing-device error from an already-removed device is swallowed.
    pub async fn remove(&self) -> Result<()> {
        let result: Result<()> = self.bus.call_method(&self.adapter_path, ADAPTER_INTERFACE, "RemoveDevice", (self.device_path.clone(),)).await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind == ErrorKind::DoesNotExist => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Attempts `connect_with_retry()` followed by `Disconnect`. A connect failure classified as
    /// a stale-bond signal (anything but a permission/adapter error, since the exact BlueZ error
    /// text that reports a lost bond varies across daemon versions) resolves to `Invalid` rather
    /// than propagating, since that is exactly the condition the orchestrator repairs by removing
    /// and re-pairing.
    pub async fn verify(&self) -> Result<BondState> {
        match self.connect_with_retry().await {
            Ok(()) => {
                self.disconnect_best_effort().await;
                Ok(BondState::Valid)
            }
            Err(err) if err.kind.is_stale_bond_signal() => Ok(BondState::Invalid),
            Err(err) => Err(err),
        }
    }

    async fn disconnect_best_effort(&self) {
        let result: Result<()> = self.bus.call_method(&self.device_path, INTERFACE, "Disconnect", ()).await;
        if let Err(err) = result {
            log::trace!("Disconnect after verify failed (non-fatal): {err}");
        }
    }

    /// Up to `CONNECT_RETRIES` attempts at `Device1.Connect`, with a progressive linear backoff
    /// between attempts, specifically to ride out the `le-connection-abort-by-local` RF race that
    /// follows discovery. Any other error is returned immediately without retrying.
    pub async fn connect_with_retry(&self) -> Result<()> {
        let mut attempt = 1;
        loop {
            let result: Result<()> = self.bus.call_method(&self.device_path, INTERFACE, "Connect", ()).await;
            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt < defaults::CONNECT_RETRIES && is_transient_connect_error(&err) => {
                    let delay = defaults::CONNECT_RETRY_BASE_DELAY * attempt;
                    log::trace!("Connect attempt {attempt} failed with transient error, retrying after {delay:?}: {err}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Registers `agent`, connects, then pairs. The agent is unregistered on every exit path.
    pub async fn pair(&self, agent: PairingAgent) -> Result<()> {
        let token = {
            let mut crossroads = self.bus.crossroads().await;
            RegisteredAgent::register_interface(&mut crossroads)
        };
        let handle = RegisteredAgent::register(agent, &self.bus, token).await?;

        let result = async {
            // BLE SMP runs over an existing L2CAP link; pairing without connecting first causes
            // the daemon to attempt BR/EDR paging and fail with Page Timeout on BLE-only
            // peripherals.
            self.connect_with_retry().await?;
            self.call_pair().await
        }
        .await;

        handle.release().await;
        result
    }

    async fn call_pair(&self) -> Result<()> {
        self.bus.call_method(&self.device_path, INTERFACE, "Pair", ()).await
    }

    /// Sets `Trusted = true` if it is not already. Never called unless `Paired` has just been
    /// observed true; the orchestrator's call ordering enforces that.
    pub async fn trust(&self) -> Result<()> {
        if self.is_trusted().await? {
            return Ok(());
        }
        self.bus.set_property(&self.device_path, INTERFACE, "Trusted", true).await
    }
}

/// Whether `err` matches the RF-timing race BlueZ reports immediately after discovery, the only
/// condition `connect_with_retry` retries.
fn is_transient_connect_error(err: &Error) -> bool {
    err.message.contains(defaults::TRANSIENT_CONNECT_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_error_is_recognized_by_message_substring() {
        let err = Error::with_message(ErrorKind::Unexpected, "org.bluez.Error.Failed: le-connection-abort-by-local");
        assert!(is_transient_connect_error(&err));
    }

    #[test]
    fn unrelated_errors_are_not_transient() {
        let err = Error::with_message(ErrorKind::AuthenticationFailed, "Authentication Failed");
        assert!(!is_transient_connect_error(&err));
    }

    #[test]
    fn interface_constants_match_bluez() {
        assert_eq!(INTERFACE, "org.bluez.Device1");
        assert_eq!(ADAPTER_INTERFACE, "org.bluez.Adapter1");
    }
}
