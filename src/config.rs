//! Tunable constants.
//!
//! Kept as named `const` items rather than literals scattered through `discovery.rs`/
//! `device.rs`, so a future CLI flag could override them without touching call sites.

use std::time::Duration;

pub mod defaults {
    use super::Duration;

    /// How long `discover()` waits for an `InterfacesAdded` signal naming the target device.
    pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Pause after `StopDiscovery` before the caller proceeds, to let the daemon release scan
    /// state. Without this delay the subsequent connect attempt observes the
    /// `le-connection-abort-by-local` race.
    pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

    /// Maximum number of `Connect` attempts in `connect_with_retry`.
    pub const CONNECT_RETRIES: u32 = 5;

    /// Base delay for the progressive linear backoff between connect attempts: attempt `k`
    /// waits `CONNECT_RETRY_BASE_DELAY * k`.
    pub const CONNECT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

    /// BlueZ error text that identifies the RF-timing race immediately after discovery.
    pub const TRANSIENT_CONNECT_ERROR: &str = "le-connection-abort-by-local";
}
