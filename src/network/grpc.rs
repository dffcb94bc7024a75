//! gRPC-backed implementation of the update RPC interface.
//!
//! Bridges the updater's poll-style lifecycle onto tonic: each update is a
//! unary call spawned onto a caller-provided tokio runtime, observed
//! through its `JoinHandle`. Channels are established lazily per service
//! locator and cached per slot, so repeated updates to the same server
//! reuse one HTTP2 connection.

use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tonic::codegen::http;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tonic::Code;
use tracing::debug;
use tracing::warn;

use crate::list::ServerId;
use crate::network::UpdateRpc;
use crate::network::UpdateRpcFactory;
use crate::proto::ServerListPayload;
use crate::proto::UpdateServerListResponse;
use crate::ConnectionConfig;
use crate::NetworkError;

const UPDATE_SERVER_LIST_PATH: &str = "/droster.Membership/UpdateServerList";

/// [`UpdateRpcFactory`] speaking gRPC over tonic channels.
pub struct GrpcUpdateRpcFactory {
    handle: Handle,
    config: ConnectionConfig,
    // Keyed by slot index; the locator is kept so a slot reused by a new
    // incarnation under a different address drops the stale channel.
    channels: DashMap<u32, (String, Channel)>,
}

impl GrpcUpdateRpcFactory {
    /// `handle` is the tokio runtime the unary calls run on; the caller
    /// keeps that runtime alive for as long as updates may be in flight.
    pub fn new(
        handle: Handle,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            handle,
            config,
            channels: DashMap::new(),
        }
    }

    fn channel_for(
        &self,
        target: ServerId,
        service_locator: &str,
    ) -> std::result::Result<Channel, NetworkError> {
        if let Some(cached) = self.channels.get(&target.slot_index()) {
            if cached.0 == service_locator {
                return Ok(cached.1.clone());
            }
        }

        let endpoint = Endpoint::from_shared(service_locator.to_string())
            .map_err(|err| {
                warn!("invalid service locator {}: {}", service_locator, err);
                NetworkError::ConnectError(err.to_string())
            })?
            .connect_timeout(Duration::from_millis(self.config.connect_timeout_in_ms))
            .timeout(Duration::from_millis(self.config.request_timeout_in_ms))
            .tcp_keepalive(Some(Duration::from_secs(self.config.tcp_keepalive_in_secs)))
            .http2_keep_alive_interval(Duration::from_secs(
                self.config.http2_keep_alive_interval_in_secs,
            ))
            .keep_alive_timeout(Duration::from_secs(self.config.http2_keep_alive_timeout_in_secs));

        let channel = endpoint.connect_lazy();
        self.channels
            .insert(target.slot_index(), (service_locator.to_string(), channel.clone()));
        Ok(channel)
    }
}

impl UpdateRpcFactory for GrpcUpdateRpcFactory {
    fn begin_update(
        &self,
        target: ServerId,
        service_locator: &str,
        payload: &ServerListPayload,
    ) -> Box<dyn UpdateRpc> {
        let request = payload.clone();
        let task: JoinHandle<std::result::Result<UpdateServerListResponse, tonic::Status>> =
            match self.channel_for(target, service_locator) {
                Ok(channel) => self.handle.spawn(async move {
                    let mut grpc = tonic::client::Grpc::new(channel);
                    grpc.ready()
                        .await
                        .map_err(|err| tonic::Status::unavailable(format!("connect failed: {err}")))?;
                    let codec: tonic::codec::ProstCodec<ServerListPayload, UpdateServerListResponse> =
                        tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(UPDATE_SERVER_LIST_PATH);
                    let response = grpc.unary(tonic::Request::new(request), path, codec).await?;
                    Ok(response.into_inner())
                }),
                Err(err) => {
                    let status = tonic::Status::unavailable(err.to_string());
                    self.handle.spawn(async move { Err(status) })
                }
            };

        Box::new(GrpcUpdateRpc {
            target,
            handle: self.handle.clone(),
            task: Some(task),
        })
    }
}

/// One spawned unary call, observed through its `JoinHandle`.
struct GrpcUpdateRpc {
    target: ServerId,
    handle: Handle,
    task: Option<JoinHandle<std::result::Result<UpdateServerListResponse, tonic::Status>>>,
}

impl UpdateRpc for GrpcUpdateRpc {
    fn is_ready(&self) -> bool {
        self.task.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }

    fn wait(&mut self) -> std::result::Result<(), NetworkError> {
        let task = match self.task.take() {
            Some(task) => task,
            None => return Ok(()),
        };

        match self.handle.block_on(task) {
            Ok(Ok(response)) => {
                debug!(
                    "server {} acknowledged server list v{}",
                    self.target, response.current_version
                );
                Ok(())
            }
            // A target that has crashed or been removed answers NOT_FOUND.
            Ok(Err(status)) if status.code() == Code::NotFound => {
                Err(NetworkError::ServerNotUp(self.target))
            }
            Ok(Err(status)) => Err(NetworkError::TonicStatusError(Box::new(status))),
            Err(join_err) => Err(NetworkError::TaskFailed(join_err)),
        }
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for GrpcUpdateRpc {
    fn drop(&mut self) {
        self.cancel();
    }
}
