//! The system bus session: connection setup, method-call/property helpers, and the local
//! D-Bus object registry the pairing agent is exported into.

use std::{collections::HashMap, sync::Arc};

use dbus::{
    arg::{AppendAll, PropMap, ReadAll},
    message::MatchRule,
    nonblock::{stdintf::org_freedesktop_dbus::ObjectManager, Proxy, SyncConnection},
    Message, Path,
};
use dbus_crossroads::Crossroads;
use dbus_tokio::connection;
use futures::{lock::Mutex, StreamExt};
use tokio::task::{spawn_blocking, JoinHandle};

use crate::error::{Error, ErrorKind, InternalErrorKind, Result};

pub(crate) const SERVICE_NAME: &str = "org.bluez";
pub(crate) const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Shared state of the bus connection and the local object registry.
pub(crate) struct BusSessionInner {
    pub connection: Arc<SyncConnection>,
    pub crossroads: Mutex<Crossroads>,
    dbus_task: JoinHandle<connection::IOResourceError>,
}

impl Drop for BusSessionInner {
    fn drop(&mut self) {
        self.dbus_task.abort();
    }
}

/// A handle to the system bus, shared by every component that needs to call into `bluetoothd`.
#[derive(Clone)]
pub struct BusSession {
    pub(crate) inner: Arc<BusSessionInner>,
}

impl BusSession {
    /// Connects to the system bus and starts the dispatch loop for our exported objects.
    pub async fn connect() -> Result<Self> {
        let (resource, connection) = spawn_blocking(connection::new_system_sync)
            .await
            .map_err(|err| Error::with_message(ErrorKind::Internal(InternalErrorKind::DBusConnectionLost), err.to_string()))?
            .map_err(Error::from)?;
        let dbus_task = tokio::spawn(resource);
        log::trace!("connected to system bus as {}", connection.unique_name());

        let mut crossroads = Crossroads::new();
        crossroads.set_async_support(Some((connection.clone(), Box::new(|x| { tokio::spawn(x); }))));

        let inner = Arc::new(BusSessionInner { connection: connection.clone(), crossroads: Mutex::new(crossroads), dbus_task });

        let mc_callback = connection.add_match(MatchRule::new_method_call()).await.map_err(Error::from)?;
        let weak_inner = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let (_token, mut stream) = mc_callback.msg_stream();
            while let Some(msg) = stream.next().await {
                let Some(inner) = weak_inner.upgrade() else { return };
                let mut crossroads = inner.crossroads.lock().await;
                let _ = crossroads.handle_message(msg, &*inner.connection);
            }
        });

        Ok(Self { inner })
    }

    fn proxy<'a>(&'a self, path: &'a Path<'static>) -> Proxy<'a, &'a SyncConnection> {
        Proxy::new(SERVICE_NAME, path, TIMEOUT, &*self.inner.connection)
    }

    /// Calls a method on `path`/`interface` and logs the request and its outcome at trace level.
    pub async fn call_method<A, R>(&self, path: &Path<'static>, interface: &str, method: &str, args: A) -> Result<R>
    where
        A: AppendAll + std::fmt::Debug,
        R: ReadAll + std::fmt::Debug + 'static,
    {
        log::trace!("{path}: {interface}.{method} {args:?}");
        let result = self.proxy(path).method_call(interface, method, args).await;
        log::trace!("{path}: {interface}.{method} (...) -> {result:?}");
        Ok(result?)
    }

    /// Reads a property, logging at trace level.
    pub async fn get_property<R>(&self, path: &Path<'static>, interface: &str, name: &str) -> Result<R>
    where
        R: for<'b> dbus::arg::Get<'b> + std::fmt::Debug + 'static,
    {
        use dbus::nonblock::stdintf::org_freedesktop_dbus::Properties;
        let value = self.proxy(path).get(interface, name).await?;
        log::trace!("{path}: {interface}.{name} = {value:?}");
        Ok(value)
    }

    /// Sets a property, logging at trace level.
    pub async fn set_property<T>(&self, path: &Path<'static>, interface: &str, name: &str, value: T) -> Result<()>
    where
        T: dbus::arg::Arg + dbus::arg::Append + std::fmt::Debug,
    {
        use dbus::nonblock::stdintf::org_freedesktop_dbus::Properties;
        log::trace!("{path}: {interface}.{name} := {value:?}");
        self.proxy(path).set(interface, name, value).await?;
        Ok(())
    }

    /// Returns every object currently managed by `org.bluez`, keyed by path, with each value
    /// listing the interfaces (and properties) it exposes.
    ///
    /// This is the authoritative source of device/adapter existence: the daemon's introspection
    /// XML is not reliable across versions, so existence must never be inferred from a
    /// successful property read alone.
    pub async fn managed_objects(&self) -> Result<HashMap<Path<'static>, HashMap<String, PropMap>>> {
        let proxy = Proxy::new(SERVICE_NAME, "/", TIMEOUT, &*self.inner.connection);
        Ok(proxy.get_managed_objects().await?)
    }

    /// Installs a match rule for raw messages and returns a stream of matching messages paired
    /// with a guard that keeps the match registered.
    ///
    /// The guard must be held for as long as the stream is read: the underlying match handle
    /// deregisters itself when dropped. Used by the discovery engine to watch for
    /// `InterfacesAdded` signals installed *before* `StartDiscovery` is issued.
    pub async fn add_match(&self, rule: MatchRule<'static>) -> Result<(impl Send + 'static, impl futures::Stream<Item = Message>)> {
        let token = self.inner.connection.add_match(rule).await.map_err(Error::from)?;
        Ok(token.msg_stream())
    }

    pub(crate) fn connection(&self) -> &Arc<SyncConnection> {
        &self.inner.connection
    }

    pub(crate) async fn crossroads(&self) -> futures::lock::MutexGuard<'_, Crossroads> {
        self.inner.crossroads.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_service_name_are_sane() {
        assert_eq!(SERVICE_NAME, "org.bluez");
        assert!(TIMEOUT.as_secs() > 0);
    }
}
