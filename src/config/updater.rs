use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Parameters of the background dissemination engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpdaterConfig {
    /// Size of the update dispatch pool: at most this many update RPCs are
    /// in flight across the whole cluster at any instant.
    #[serde(default = "default_concurrent_rpcs")]
    pub concurrent_rpcs: usize,

    /// Per-RPC deadline in nanoseconds. On expiry the RPC is dropped and
    /// the target becomes eligible for re-dispatch immediately.
    #[serde(default = "default_rpc_timeout_ns")]
    pub rpc_timeout_ns: u64,

    /// Alarm threshold for the committed-update backlog. A single
    /// unreachable subscriber can grow the backlog without bound; crossing
    /// this threshold logs a warning and raises a gauge, but batches are
    /// never dropped.
    #[serde(default = "default_history_high_water")]
    pub history_high_water: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            concurrent_rpcs: default_concurrent_rpcs(),
            rpc_timeout_ns: default_rpc_timeout_ns(),
            history_high_water: default_history_high_water(),
        }
    }
}

impl UpdaterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrent_rpcs == 0 {
            return Err(Error::InvalidConfig("concurrent_rpcs must be greater than 0".into()));
        }

        if self.rpc_timeout_ns == 0 {
            return Err(Error::InvalidConfig("rpc_timeout_ns must be greater than 0".into()));
        }

        if self.history_high_water == 0 {
            return Err(Error::InvalidConfig(
                "history_high_water must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

fn default_concurrent_rpcs() -> usize {
    5
}
// 10ms
fn default_rpc_timeout_ns() -> u64 {
    10_000_000
}
fn default_history_high_water() -> usize {
    1000
}
