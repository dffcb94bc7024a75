/// Slot 0 of the server table is reserved and never issued to a server.
pub(crate) const RESERVED_SLOT_INDEX: u32 = 0;

/// Prefix for environment variable configuration overrides,
/// e.g. `ROSTER__UPDATER__CONCURRENT_RPCS=8`.
pub(crate) const CONFIG_ENV_PREFIX: &str = "ROSTER";

/// Namespace under which this crate's prometheus metrics are registered.
pub(crate) const METRICS_NAMESPACE: &str = "d_roster";
