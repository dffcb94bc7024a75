use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// gRPC/HTTP2 connection parameters for update RPCs.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing TCP connections in milliseconds
    /// Default: 20ms (suitable for LAN environments)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// Maximum duration for completing gRPC requests in milliseconds
    /// Default: 100ms
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    /// TCP keepalive duration in seconds
    /// Default: 3600s (1 hour, OS may enforce minimum values)
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_in_secs: u64,

    /// HTTP2 keepalive ping interval in seconds
    /// Default: 300s (5 minutes)
    #[serde(default = "default_h2_keepalive_interval")]
    pub http2_keep_alive_interval_in_secs: u64,

    /// HTTP2 keepalive timeout in seconds
    /// Default: 20s (must be < interval)
    #[serde(default = "default_h2_keepalive_timeout")]
    pub http2_keep_alive_timeout_in_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: default_request_timeout(),
            tcp_keepalive_in_secs: default_tcp_keepalive(),
            http2_keep_alive_interval_in_secs: default_h2_keepalive_interval(),
            http2_keep_alive_timeout_in_secs: default_h2_keepalive_timeout(),
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 {
            return Err(Error::InvalidConfig(
                "connect_timeout_in_ms must be greater than 0".into(),
            ));
        }

        if self.request_timeout_in_ms == 0 {
            return Err(Error::InvalidConfig(
                "request_timeout_in_ms must be greater than 0".into(),
            ));
        }

        if self.http2_keep_alive_timeout_in_secs >= self.http2_keep_alive_interval_in_secs {
            return Err(Error::InvalidConfig(format!(
                "http2 keepalive timeout {}s should be less than interval {}s",
                self.http2_keep_alive_timeout_in_secs, self.http2_keep_alive_interval_in_secs
            )));
        }

        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    20
}
fn default_request_timeout() -> u64 {
    100
}
fn default_tcp_keepalive() -> u64 {
    3600
}
fn default_h2_keepalive_interval() -> u64 {
    300
}
fn default_h2_keepalive_timeout() -> u64 {
    20
}
