//! The transient pairing agent: a D-Bus object exported into the daemon's callback space for the
//! duration of a single pairing attempt.

use std::{fmt, marker::PhantomData, sync::Arc};

use dbus::{nonblock::Proxy, Path};
use dbus_crossroads::{Context, Crossroads, IfaceBuilder, IfaceToken};
use futures::Future;

use crate::{
    bus::{BusSession, SERVICE_NAME, TIMEOUT},
    error::Result,
    pin::Pin,
};

const INTERFACE: &str = "org.bluez.Agent1";
const MANAGER_INTERFACE: &str = "org.bluez.AgentManager1";
const MANAGER_PATH: &str = "/org/bluez";

/// Fixed object path this tool exports its agent at. At most one agent is ever registered per
/// process, so there is no need to make this unique per instance.
pub(crate) const AGENT_PATH: &str = "/io/github/blebond/agent1";

/// The transient pairing agent. Auto-approves everything except the PIN/passkey requests, which
/// it answers from the held `Pin`.
pub struct PairingAgent {
    pin: Pin,
}

impl PairingAgent {
    pub fn new(pin: Pin) -> Self {
        Self { pin }
    }
}

/// Wraps a `PairingAgent` for D-Bus export.
pub(crate) struct RegisteredAgent {
    agent: PairingAgent,
}

impl RegisteredAgent {
    pub(crate) fn register_interface(cr: &mut Crossroads) -> IfaceToken<Arc<Self>> {
        cr.register(INTERFACE, |ib: &mut IfaceBuilder<Arc<Self>>| {
            ib.method_with_cr_async("RequestPinCode", ("device",), ("value",), |ctx, cr, (_device,): (Path<'static>,)| {
                method_call(ctx, cr, |reg: Arc<Self>| async move { Ok((reg.agent.pin.as_str().to_string(),)) })
            });
            ib.method_with_cr_async("RequestPasskey", ("device",), ("value",), |ctx, cr, (_device,): (Path<'static>,)| {
                method_call(ctx, cr, |reg: Arc<Self>| async move { Ok((reg.agent.pin.as_passkey(),)) })
            });
            ib.method_with_cr_async(
                "DisplayPasskey",
                ("device", "passkey", "entered"),
                (),
                |ctx, cr, (_device, _passkey, _entered): (Path<'static>, u32, u16)| {
                    method_call(ctx, cr, |_reg: Arc<Self>| async move { Ok(()) })
                },
            );
            ib.method_with_cr_async("RequestConfirmation", ("device", "passkey"), (), |ctx, cr, (_device, _passkey): (Path<'static>, u32)| {
                method_call(ctx, cr, |_reg: Arc<Self>| async move { Ok(()) })
            });
            ib.method_with_cr_async("AuthorizeService", ("device", "uuid"), (), |ctx, cr, (_device, _uuid): (Path<'static>, String)| {
                method_call(ctx, cr, |_reg: Arc<Self>| async move { Ok(()) })
            });
            ib.method_with_cr_async("Cancel", (), (), |ctx, cr, ()| {
                method_call(ctx, cr, |_reg: Arc<Self>| async move {
                    log::trace!("agent: Cancel");
                    Ok(())
                })
            });
            ib.method_with_cr_async("Release", (), (), |ctx, cr, ()| {
                method_call(ctx, cr, |_reg: Arc<Self>| async move {
                    log::trace!("agent: Release");
                    Ok(())
                })
            });
        })
    }

    /// Exports the agent object, registers it with the daemon's agent manager, and returns a
    /// handle that unregisters and unexports it on drop.
    pub(crate) async fn register(agent: PairingAgent, bus: &BusSession, token: IfaceToken<Arc<Self>>) -> Result<AgentHandle> {
        let path = Path::new(AGENT_PATH).expect("AGENT_PATH is a well-formed object path");

        {
            let mut cr = bus.crossroads().await;
            cr.insert(path.clone(), &[token], Arc::new(Self { agent }));
        }

        log::trace!("registering pairing agent at {path}");
        let proxy = Proxy::new(SERVICE_NAME, MANAGER_PATH, TIMEOUT, bus.connection().clone());
        if let Err(err) = proxy.method_call::<(), _, _, _>(MANAGER_INTERFACE, "RegisterAgent", (path.clone(), "KeyboardDisplay")).await {
            // Unexport what we just inserted; registration failed so no unregister is needed.
            let mut cr = bus.crossroads().await;
            let _: Option<Arc<Self>> = cr.remove(&path);
            return Err(err.into());
        }

        Ok(AgentHandle { path, bus: bus.clone(), armed: true })
    }
}

/// Handle to a registered agent. Dropping it unregisters and unexports the agent; this is the
/// only path by which the agent leaves the registered state, so every exit path (success,
/// failure, cancellation) converges through `Drop`.
pub struct AgentHandle {
    path: Path<'static>,
    bus: BusSession,
    armed: bool,
}

impl AgentHandle {
    /// Unregisters and unexports the agent, consuming the handle. Equivalent to dropping it, but
    /// lets the orchestrator observe and log failures explicitly instead of swallowing them in a
    /// `Drop` impl.
    pub async fn release(mut self) {
        self.armed = false;
        self.teardown().await;
    }

    async fn teardown(&self) {
        log::trace!("unregistering pairing agent at {}", self.path);
        let proxy = Proxy::new(SERVICE_NAME, MANAGER_PATH, TIMEOUT, self.bus.connection().clone());
        let result: std::result::Result<(), dbus::Error> = proxy.method_call(MANAGER_INTERFACE, "UnregisterAgent", (self.path.clone(),)).await;
        if let Err(err) = result {
            log::trace!("UnregisterAgent failed (agent may already be gone): {err}");
        }

        let mut cr = self.bus.crossroads().await;
        let _: Option<Arc<RegisteredAgent>> = cr.remove(&self.path);
    }
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentHandle {{ {} }}", self.path)
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Best-effort synchronous fallback if `release()` was never called: spawn the async
        // teardown rather than block, since `Drop` cannot be async. The orchestrator always
        // calls `release()` explicitly on every exit path, so this is a backstop, not the
        // primary path.
        let path = self.path.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let proxy = Proxy::new(SERVICE_NAME, MANAGER_PATH, TIMEOUT, bus.connection().clone());
            let _: std::result::Result<(), dbus::Error> = proxy.method_call(MANAGER_INTERFACE, "UnregisterAgent", (path.clone(),)).await;
            let mut cr = bus.crossroads().await;
            let _: Option<Arc<RegisteredAgent>> = cr.remove(&path);
        });
    }
}

type DbusResult<T> = std::result::Result<T, dbus::MethodErr>;

/// Pulls the `Arc<T>` stored at the context's path out of the crossroads registry and runs `f`
/// against a clone of it, logging the call and its result at trace level.
fn method_call<T, R, F>(mut ctx: Context, cr: &mut Crossroads, f: impl FnOnce(Arc<T>) -> F) -> impl Future<Output = PhantomData<R>>
where
    T: Send + Sync + 'static,
    R: dbus::arg::AppendAll + fmt::Debug,
    F: Future<Output = DbusResult<R>> + Send + 'static,
{
    let data_ref: &mut Arc<T> = cr.data_mut(ctx.path()).unwrap();
    let data = data_ref.clone();
    async move {
        log::trace!("{}: {}.{} (...)", ctx.path(), ctx.interface().map(|i| i.to_string()).unwrap_or_default(), ctx.method());
        let result = f(data).await;
        log::trace!(
            "{}: {}.{} (...) -> {:?}",
            ctx.path(),
            ctx.interface().map(|i| i.to_string()).unwrap_or_default(),
            ctx.method(),
            &result
        );
        ctx.reply(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_path_is_well_formed() {
        assert!(Path::new(AGENT_PATH).is_ok());
    }

    #[test]
    fn pairing_agent_answers_from_the_held_pin() {
        let pin = Pin::new("123456").unwrap();
        let agent = PairingAgent::new(pin);
        assert_eq!(agent.pin.as_passkey(), 123456);
        assert_eq!(agent.pin.as_str(), "123456");
    }
}
