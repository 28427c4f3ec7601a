// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The service host: accepts TCP connections and serves calls against a [`Registry`].
//!
//! Each accepted connection is served by its own task until the peer hangs up or the host is
//! shut down through its [cancellation token](Host::shutdown_token). Every request on a
//! connection is in turn spawned as its own task, so a slow handler does not hold up the
//! connection's other calls.

use crate::{
    protocol::{CallError, Dispatch, DispatchRequest, DispatchResponse, Payload},
    registry::Registry,
    DEFAULT_PORT,
};
use futures::prelude::*;
use std::{
    fmt, io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tarpc::{
    context,
    serde_transport::{self, tcp},
    server::{self, BaseChannel, Channel},
    tokio_serde::formats::Json,
    ClientMessage, Response,
};
use tokio::net::TcpStream;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info_span, Instrument};

type ServerCodec = Json<ClientMessage<DispatchRequest>, Response<DispatchResponse>>;

type ServerTransport = serde_transport::Transport<
    TcpStream,
    ClientMessage<DispatchRequest>,
    Response<DispatchResponse>,
    ServerCodec,
>;

type Listener = tcp::Incoming<
    ClientMessage<DispatchRequest>,
    Response<DispatchResponse>,
    ServerCodec,
    fn() -> ServerCodec,
>;

/// The frame limit of [`Config::default`], the length-delimited codec's own default.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Settings of a [`Host`].
#[derive(Clone, Debug)]
pub struct Config {
    /// The address to listen on.
    pub listen_addr: SocketAddr,
    /// The largest frame the length-delimited codec accepts, in bytes. A peer announcing a
    /// longer frame has its connection closed.
    pub max_frame_length: usize,
    /// Settings of each connection's channel.
    pub channel: server::Config,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: (Ipv4Addr::UNSPECIFIED, DEFAULT_PORT).into(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            channel: server::Config::default(),
        }
    }
}

/// Fatal errors of a [`Host`].
#[derive(thiserror::Error, Debug)]
pub enum HostError {
    /// The listener could not be bound.
    #[error("could not listen on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// The listener failed to accept a connection.
    #[error("could not accept a connection")]
    Accept(#[source] io::Error),
}

/// Serves the calls of one connection.
#[derive(Clone)]
struct DispatchServer {
    registry: Arc<Registry>,
}

impl Dispatch for DispatchServer {
    async fn invoke(
        self,
        _: context::Context,
        call_name: String,
        args: Payload,
    ) -> Result<Payload, CallError> {
        let response = self.registry.dispatch(&call_name, args).await;
        match &response {
            Ok(_) => tracing::info!(%call_name, "CallComplete"),
            Err(e) => tracing::warn!(%call_name, "CallFailed: {}", e),
        }
        response
    }
}

/// A bound listener plus the registry it serves.
pub struct Host {
    config: Config,
    registry: Arc<Registry>,
    listener: Listener,
    shutdown: CancellationToken,
    connections: TaskTracker,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("local_addr", &self.listener.local_addr())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Binds `config.listen_addr`. Calls are served once [`run`](Host::run) is awaited.
    pub async fn bind(config: Config, registry: Registry) -> Result<Self, HostError> {
        let mut listener: Listener =
            tcp::listen(config.listen_addr, ServerCodec::default as fn() -> ServerCodec)
                .await
                .map_err(|source| HostError::Bind {
                    addr: config.listen_addr,
                    source,
                })?;
        listener.config_mut().max_frame_length(config.max_frame_length);
        Ok(Host {
            config,
            registry: Arc::new(registry),
            listener,
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
        })
    }

    /// Returns the address being listened on.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Returns a token that, once cancelled, stops the host and closes its connections.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until shutdown, spawning a task to serve each one.
    ///
    /// Returns once the host is shut down and every connection task has finished. A failed
    /// accept shuts the host down and is returned as [`HostError::Accept`].
    pub async fn run(self) -> Result<(), HostError> {
        let Host {
            config,
            registry,
            mut listener,
            shutdown,
            connections,
        } = self;
        tracing::info!(
            addr = %listener.local_addr(),
            services = ?registry.services(),
            "Listening"
        );
        for service in registry.services() {
            tracing::info!(service, methods = ?registry.methods(service), "ServiceMethods");
        }

        let result = loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break Ok(()),
                accepted = listener.next() => accepted,
            };
            let transport = match accepted {
                Some(Ok(transport)) => transport,
                Some(Err(e)) => break Err(HostError::Accept(e)),
                None => break Ok(()),
            };
            let peer = match transport.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    tracing::warn!("Dropping connection without a peer address: {}", e);
                    continue;
                }
            };
            tracing::info!(%peer, "AcceptConnection");
            let channel = BaseChannel::new(config.channel.clone(), transport);
            let server = DispatchServer {
                registry: registry.clone(),
            };
            connections.spawn(
                serve_connection(channel, server, shutdown.child_token())
                    .instrument(info_span!("Connection", %peer)),
            );
        };

        if result.is_err() {
            tracing::debug!("Accept failed; shutting down");
        }
        shutdown.cancel();
        connections.close();
        connections.wait().await;
        tracing::info!("Stopped");
        result
    }
}

async fn serve_connection(
    channel: BaseChannel<DispatchRequest, DispatchResponse, ServerTransport>,
    server: DispatchServer,
    shutdown: CancellationToken,
) {
    let requests = channel.execute(server.serve()).for_each(spawn);
    tokio::select! {
        () = requests => tracing::info!("ConnectionClosed"),
        () = shutdown.cancelled() => tracing::info!("ConnectionShutdown"),
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}
