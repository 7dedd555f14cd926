//! Drives adapter discovery, watching for the target device's `InterfacesAdded` signal.

use std::collections::HashMap;

use dbus::{
    arg::{PropMap, RefArg, Variant},
    message::SignalArgs,
    nonblock::stdintf::org_freedesktop_dbus::ObjectManagerInterfacesAdded,
    strings::BusName,
    Path,
};
use futures::StreamExt;
use lazy_static::lazy_static;
use tokio::time::timeout;

use crate::{
    address::{device_path, Address},
    adapter::INTERFACE as ADAPTER_INTERFACE,
    bus::{BusSession, SERVICE_NAME},
    config::defaults,
    error::{Error, ErrorKind, Result},
};

const DEVICE_INTERFACE: &str = "org.bluez.Device1";

lazy_static! {
    static ref SERVICE_BUS_NAME: BusName<'static> = BusName::new(SERVICE_NAME).expect("org.bluez is a well-formed bus name");
}

pub struct DiscoveryEngine {
    bus: BusSession,
}

impl DiscoveryEngine {
    pub fn new(bus: BusSession) -> Self {
        Self { bus }
    }

    /// Sets a BLE-only discovery filter, subscribes to `InterfacesAdded` before starting the
    /// scan, waits for the target's signal, then stops discovery and lets the scan state settle.
    pub async fn discover(&self, adapter_path: &Path<'static>, target: Address) -> Result<Path<'static>> {
        let target_path = device_path(adapter_path, target);

        self.set_le_filter(adapter_path).await?;

        let rule = ObjectManagerInterfacesAdded::match_rule(Some(&SERVICE_BUS_NAME), None).static_clone();
        let (_match_guard, stream) = self.bus.add_match(rule).await?;

        log::trace!("{adapter_path}: {ADAPTER_INTERFACE}.StartDiscovery ()");
        self.bus.call_method::<_, ()>(adapter_path, ADAPTER_INTERFACE, "StartDiscovery", ()).await?;
        let guard = DiscoveryGuard::new(self.bus.clone(), adapter_path.clone());

        let found = timeout(defaults::DISCOVERY_TIMEOUT, Self::wait_for_target(stream, &target_path)).await;

        guard.stop().await;

        match found {
            Ok(true) => {
                tokio::time::sleep(defaults::SETTLE_DELAY).await;
                Ok(target_path)
            }
            Ok(false) => Err(Error::with_message(ErrorKind::DiscoveryError, format!("discovery stream ended before {target} was seen"))),
            Err(_) => Err(Error::with_message(ErrorKind::DiscoveryError, format!("timed out waiting for {target} to be discovered"))),
        }
    }

    async fn set_le_filter(&self, adapter_path: &Path<'static>) -> Result<()> {
        let mut filter: PropMap = HashMap::new();
        filter.insert("Transport".to_string(), Variant(Box::new("le".to_string()) as Box<dyn RefArg>));
        self.bus.call_method(adapter_path, ADAPTER_INTERFACE, "SetDiscoveryFilter", (filter,)).await
    }

    /// Reads signals until one names the target path with `Device1` among its interfaces, or the
    /// stream ends. Tolerates and ignores every other path/interface combination, since the
    /// signal handler is edge-triggered and spurious signals for unrelated objects are expected.
    async fn wait_for_target(stream: impl futures::Stream<Item = dbus::Message>, target_path: &Path<'static>) -> bool {
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            let Some(ObjectManagerInterfacesAdded { object, interfaces }) = ObjectManagerInterfacesAdded::from_message(&msg) else {
                continue;
            };
            if &object == target_path && interfaces.contains_key(DEVICE_INTERFACE) {
                return true;
            }
        }
        false
    }
}

/// Ensures `StopDiscovery` is issued even if the `discover()` future is dropped mid-wait (e.g. a
/// terminal signal cancels the orchestrator). Mirrors `AgentHandle`'s armed-guard/Drop pairing in
/// `agent.rs`: the normal path calls `stop()` explicitly and disarms the guard, so the `Drop`
/// fallback only fires on cancellation.
struct DiscoveryGuard {
    bus: BusSession,
    adapter_path: Path<'static>,
    armed: bool,
}

impl DiscoveryGuard {
    fn new(bus: BusSession, adapter_path: Path<'static>) -> Self {
        Self { bus, adapter_path, armed: true }
    }

    async fn stop(mut self) {
        self.armed = false;
        Self::do_stop(&self.bus, &self.adapter_path).await;
    }

    async fn do_stop(bus: &BusSession, adapter_path: &Path<'static>) {
        log::trace!("{adapter_path}: {ADAPTER_INTERFACE}.StopDiscovery ()");
        let result: Result<()> = bus.call_method(adapter_path, ADAPTER_INTERFACE, "StopDiscovery", ()).await;
        if let Err(err) = result {
            log::trace!("StopDiscovery failed (discovery may already be stopped): {err}");
        }
    }
}

impl Drop for DiscoveryGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let bus = self.bus.clone();
        let adapter_path = self.adapter_path.clone();
        tokio::spawn(async move { Self::do_stop(&bus, &adapter_path).await });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_interface_constant_matches_bluez() {
        assert_eq!(DEVICE_INTERFACE, "org.bluez.Device1");
    }

    #[test]
    fn service_bus_name_constructs() {
        assert_eq!(&*SERVICE_BUS_NAME as &str, SERVICE_NAME);
    }
}
