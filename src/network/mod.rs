//! RPC client interface consumed by the dissemination engine.
//!
//! The updater never talks to a transport directly: it is handed an
//! [`UpdateRpcFactory`] at construction time and drives the returned
//! [`UpdateRpc`] handles through a poll/wait/cancel lifecycle. This keeps
//! the dependency one-way: the server list knows the factory, the factory
//! knows nothing about the server list.
pub mod grpc;

pub use grpc::GrpcUpdateRpcFactory;

#[cfg(test)]
use mockall::automock;

use crate::list::ServerId;
use crate::proto::ServerListPayload;
use crate::NetworkError;

/// One in-flight cluster-view update RPC.
///
/// Whoever starts an `UpdateRpc` owns its completion: exactly one of
/// `wait` or `cancel` must be invoked before the handle is dropped.
#[cfg_attr(test, automock)]
pub trait UpdateRpc: Send {
    /// True once the RPC has completed (successfully or not) and `wait`
    /// will not block.
    fn is_ready(&self) -> bool;

    /// Block until completion and surface the outcome.
    ///
    /// # Errors
    /// - [`NetworkError::ServerNotUp`] if the target left the cluster
    ///   during/after the call; the updater absorbs this and retries.
    /// - Any other error is fatal for the dissemination engine.
    fn wait(&mut self) -> std::result::Result<(), NetworkError>;

    /// Abort the RPC. Safe to call at any point of the lifecycle.
    fn cancel(&mut self);
}

/// Source of [`UpdateRpc`]s, injected into the server list.
#[cfg_attr(test, automock)]
pub trait UpdateRpcFactory: Send + Sync {
    /// Start pushing `payload` to the server at `service_locator`.
    /// Returns immediately; completion is observed through the handle.
    fn begin_update(
        &self,
        target: ServerId,
        service_locator: &str,
        payload: &ServerListPayload,
    ) -> Box<dyn UpdateRpc>;
}
