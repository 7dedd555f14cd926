//! Command-line surface.

use clap::Parser;

use crate::{address::Address, pin::Pin};

#[derive(Parser)]
#[clap(name = "blebond", version, about = "Guarantee a BLE bond with a remote peripheral before GATT use")]
pub struct Cli {
    /// Target Bluetooth address, e.g. AA:BB:CC:DD:EE:FF.
    pub mac: Address,

    /// Non-interactive PIN for pairing. Without this, the PIN is prompted for interactively.
    #[clap(long)]
    pub pin: Option<String>,

    /// Only check whether a valid bond exists; never pair. Exits 0 or 1.
    #[clap(long, conflicts_with = "force_repair")]
    pub check_only: bool,

    /// Remove any existing bond before pairing, skipping the verify step.
    #[clap(long, conflicts_with = "check_only")]
    pub force_repair: bool,

    /// Emit a diagnostic line for every D-Bus call.
    #[clap(short, long)]
    pub verbose: bool,
}

/// Immutable run configuration, built from the parsed CLI.
pub struct Config {
    pub target: Address,
    pub pin: Option<Pin>,
    pub check_only: bool,
    pub force_repair: bool,
    pub verbose: bool,
}

impl TryFrom<Cli> for Config {
    type Error = crate::error::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let pin = cli.pin.map(Pin::new).transpose()?;
        Ok(Self { target: cli.mac, pin, check_only: cli.check_only, force_repair: cli.force_repair, verbose: cli.verbose })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn check_only_and_force_repair_conflict() {
        let result = Cli::try_parse_from(["blebond", "AA:BB:CC:DD:EE:FF", "--check-only", "--force-repair"]);
        assert!(result.is_err());
    }

    #[test]
    fn minimal_invocation_parses() {
        let cli = Cli::try_parse_from(["blebond", "AA:BB:CC:DD:EE:FF"]).unwrap();
        assert!(!cli.check_only);
        assert!(!cli.force_repair);
        assert!(!cli.verbose);
        assert!(cli.pin.is_none());
    }

    #[test]
    fn config_rejects_malformed_pin() {
        let cli = Cli::try_parse_from(["blebond", "AA:BB:CC:DD:EE:FF", "--pin", "not-digits"]).unwrap();
        assert!(Config::try_from(cli).is_err());
    }
}
