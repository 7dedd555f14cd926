//! The bond-management state machine: composes the bus session, adapter, discovery, agent, and
//! device components into the full run-to-completion flow and maps the result to an `Outcome`.

use crate::{
    adapter::AdapterController,
    address::{device_path, Address},
    agent::PairingAgent,
    bus::BusSession,
    cli::Config,
    device::{BondState, DeviceController},
    discovery::DiscoveryEngine,
    error::{Error, ErrorKind, Result},
    output::OutputWriter,
    pin::{InteractivePin, Pin, PinSource, StaticPin},
};

/// Result of one run, translated to an exit code by `Outcome::exit_code`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    Verified,
    Paired,
    NoBond,
    PairingFailed,
    AdapterError,
    PermissionError,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Verified | Outcome::Paired => 0,
            Outcome::NoBond => 1,
            Outcome::PairingFailed => 2,
            Outcome::AdapterError => 3,
            Outcome::PermissionError => 4,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Outcome::Verified => "verified",
            Outcome::Paired => "paired",
            Outcome::NoBond => "no bond",
            Outcome::PairingFailed => "pairing failed",
            Outcome::AdapterError => "adapter error",
            Outcome::PermissionError => "permission denied",
        };
        f.write_str(text)
    }
}

/// Maps a failure's `ErrorKind` to the `Outcome` any step of the run fails with. This is the only
/// place that maps a kind to an exit code; every other component just returns an `Error`.
fn outcome_for_error(kind: &ErrorKind) -> Outcome {
    match kind {
        ErrorKind::PermissionError => Outcome::PermissionError,
        ErrorKind::AdapterError => Outcome::AdapterError,
        _ => Outcome::PairingFailed,
    }
}

/// Runs the full flow for one invocation. Returns the outcome directly rather than `Result`:
/// every failure this function can observe has an assigned exit code, so there is no case left
/// for the caller to additionally classify.
pub async fn run(config: &Config, output: &OutputWriter) -> Outcome {
    match run_inner(config, output).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let outcome = outcome_for_error(&err.kind);
            eprintln!("{err}");
            outcome
        }
    }
}

async fn run_inner(config: &Config, output: &OutputWriter) -> Result<Outcome> {
    output.line("Target", config.target);

    // Step 1: open the bus session.
    let bus = BusSession::connect().await.map_err(classify_bus_connect_failure)?;

    // Step 2: locate the adapter, read the daemon version, and ensure powered/pairable.
    let adapter = AdapterController::locate(bus.clone()).await?;
    output.line("Adapter", adapter.path());

    let version = adapter.read_version().await?;
    output.line("Version", version);

    adapter.ensure_powered().await?;
    output.line("Powered", true);

    adapter.ensure_pairable().await?;
    output.line("Pairable", true);

    let device_path = device_path(adapter.path(), config.target);
    let device = DeviceController::new(bus.clone(), adapter.path().clone(), device_path, config.target);

    // Step 3: force-repair removes unconditionally and skips straight to discovery.
    if config.force_repair {
        log::debug!("force-repair requested: removing any existing device object before pairing");
        output.trace("force-repair: removing any existing device object");
        device.remove().await?;
        return pair_and_trust(config, output, &bus, &adapter, &device).await;
    }

    // Step 4: an unknown device skips straight to discovery.
    if !device.exists().await? {
        log::debug!("device state: unknown -> new");
        output.line("Bond", "absent");
        return pair_and_trust(config, output, &bus, &adapter, &device).await;
    }

    // Step 5: a known but never-paired device also skips to discovery.
    if !device.is_paired().await? {
        log::debug!("device state: known -> new (never paired)");
        output.line("Bond", "unpaired");
        return pair_and_trust(config, output, &bus, &adapter, &device).await;
    }

    // Step 6: verify the existing bond with a probe connect.
    match device.verify().await? {
        BondState::Valid => {
            log::debug!("device state: paired -> bonded (verify succeeded)");
            output.line("Bond", "valid");
            finish(config, output, &device).await
        }
        BondState::Invalid => {
            log::debug!("device state: paired -> stale (verify failed, bond invalid)");
            output.line("Bond", "stale");
            if config.check_only {
                // `RemoveDevice` is a repair action, not a check; `--check-only` reports the
                // stale bond as no-bond without touching daemon state.
                return Ok(Outcome::NoBond);
            }
            device.remove().await?;
            pair_and_trust(config, output, &bus, &adapter, &device).await
        }
    }
}

/// Step 7 onward: either stop short for `--check-only`, or discover and pair, then fall through
/// to trust assertion.
async fn pair_and_trust(
    config: &Config,
    output: &OutputWriter,
    bus: &BusSession,
    adapter: &AdapterController,
    device: &DeviceController,
) -> Result<Outcome> {
    if config.check_only {
        return Ok(Outcome::NoBond);
    }

    let pin = acquire_pin(config)?;

    let discovery = DiscoveryEngine::new(bus.clone());
    output.trace("starting discovery");
    discovery.discover(adapter.path(), config.target).await?;

    device.pair(PairingAgent::new(pin)).await?;

    output.line("Bond", "established");
    let outcome = finish(config, output, device).await?;
    Ok(match outcome {
        Outcome::Verified => Outcome::Paired,
        other => other,
    })
}

/// Step 8-9: assert trust if not already set, and report success.
async fn finish(_config: &Config, output: &OutputWriter, device: &DeviceController) -> Result<Outcome> {
    device.trust().await?;
    output.line("Trusted", true);
    Ok(Outcome::Verified)
}

/// A bus-open failure that isn't an access-denied response is an adapter-availability problem
/// (the daemon is down or unreachable), not a pairing failure, so it is reclassified as
/// `AdapterError` here before it reaches `outcome_for_error`.
fn classify_bus_connect_failure(err: Error) -> Error {
    match err.kind {
        ErrorKind::PermissionError => err,
        _ => Error::with_message(ErrorKind::AdapterError, format!("could not open the system bus: {err}")),
    }
}

fn acquire_pin(config: &Config) -> Result<Pin> {
    match &config.pin {
        Some(pin) => StaticPin::new(pin.clone()).pin(),
        None => InteractivePin.pin(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_stable_contract() {
        assert_eq!(Outcome::Verified.exit_code(), 0);
        assert_eq!(Outcome::Paired.exit_code(), 0);
        assert_eq!(Outcome::NoBond.exit_code(), 1);
        assert_eq!(Outcome::PairingFailed.exit_code(), 2);
        assert_eq!(Outcome::AdapterError.exit_code(), 3);
        assert_eq!(Outcome::PermissionError.exit_code(), 4);
    }

    #[test]
    fn permission_and_adapter_kinds_map_to_their_own_outcomes() {
        assert_eq!(outcome_for_error(&ErrorKind::PermissionError), Outcome::PermissionError);
        assert_eq!(outcome_for_error(&ErrorKind::AdapterError), Outcome::AdapterError);
    }

    #[test]
    fn every_other_kind_maps_to_pairing_failed() {
        assert_eq!(outcome_for_error(&ErrorKind::DiscoveryError), Outcome::PairingFailed);
        assert_eq!(outcome_for_error(&ErrorKind::BondInvalid), Outcome::PairingFailed);
        assert_eq!(outcome_for_error(&ErrorKind::Unexpected), Outcome::PairingFailed);
    }

    #[test]
    fn bus_connect_permission_error_passes_through_unchanged() {
        let err = Error::with_message(ErrorKind::PermissionError, "access denied");
        let classified = classify_bus_connect_failure(err);
        assert_eq!(classified.kind, ErrorKind::PermissionError);
    }

    #[test]
    fn bus_connect_other_failures_become_adapter_errors() {
        let err = Error::with_message(ErrorKind::Internal(crate::error::InternalErrorKind::DBusConnectionLost), "no bus");
        let classified = classify_bus_connect_failure(err);
        assert_eq!(classified.kind, ErrorKind::AdapterError);
    }

    #[test]
    fn acquire_pin_prefers_the_configured_pin_over_prompting() {
        let config = Config { target: Address::default(), pin: Some(Pin::new("123456").unwrap()), check_only: false, force_repair: false, verbose: false };
        let pin = acquire_pin(&config).unwrap();
        assert_eq!(pin.as_str(), "123456");
    }
}
