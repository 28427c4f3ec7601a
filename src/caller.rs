// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The service caller: one connection to a host, calls issued by name.

use crate::protocol::{CallError, DispatchClient};
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use tarpc::{
    client::{self, RpcError},
    context,
    serde_transport::tcp,
    tokio_serde::formats::Json,
};
use tokio::net::ToSocketAddrs;

/// Errors of a [`Caller`].
#[derive(thiserror::Error, Debug)]
pub enum CallerError {
    /// The connection to the host could not be established.
    #[error("could not connect to the host")]
    Connect(#[source] io::Error),
    /// The request could not be encoded.
    #[error("could not encode the request")]
    Encode(#[source] serde_json::Error),
    /// The call did not complete, e.g. because the connection broke.
    #[error("the call did not complete")]
    Rpc(#[from] RpcError),
    /// The host rejected or failed the call.
    #[error("the host could not serve the call")]
    Dispatch(#[from] CallError),
    /// The response could not be decoded as the expected type.
    #[error("could not decode the response")]
    Decode(#[source] serde_json::Error),
}

/// A connection to a host.
#[derive(Clone, Debug)]
pub struct Caller {
    client: DispatchClient,
}

impl Caller {
    /// Connects to the host at `addr`. Fails immediately if nothing listens there.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, CallerError> {
        let mut transport = tcp::connect(addr, Json::default);
        transport.config_mut().max_frame_length(usize::MAX);
        let transport = transport.await.map_err(CallerError::Connect)?;
        let client = DispatchClient::new(client::Config::default(), transport).spawn();
        Ok(Caller { client })
    }

    /// Calls the method registered under `call_name` with `request` and waits for the reply.
    #[tracing::instrument(skip(self, request))]
    pub async fn call<Req, Resp>(&self, call_name: &str, request: &Req) -> Result<Resp, CallerError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let args = serde_json::to_value(request).map_err(CallerError::Encode)?;
        let reply = self
            .client
            .invoke(context::current(), call_name.to_owned(), args)
            .await??;
        serde_json::from_value(reply).map_err(CallerError::Decode)
    }
}
