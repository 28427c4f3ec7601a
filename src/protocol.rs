// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The message shape shared by hosts and callers.
//!
//! Every call crosses the wire as a single [`Dispatch::invoke`] carrying a call name and an
//! encoded argument [`Payload`]. The host resolves the call name against its
//! [`Registry`](crate::registry::Registry); the typed request and response records never appear
//! in the tarpc service itself.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The encoded form of a request or response record.
pub type Payload = serde_json::Value;

/// The transport-level service. Hosts implement it by dispatching into a registry.
#[tarpc::service]
pub trait Dispatch {
    /// Invokes the method registered under `call_name` with the encoded `args`.
    async fn invoke(call_name: String, args: Payload) -> Result<Payload, CallError>;
}

/// Why a host could not produce a reply for a call.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallError {
    /// The call name is not of the form `service.method`.
    #[error("service/method request ill-formed: {0:?}")]
    MalformedCallName(String),
    /// No service is registered under the requested name.
    #[error("can't find service {0:?}")]
    UnknownService(String),
    /// The service exists but does not declare the requested method.
    #[error("can't find method {method:?} on service {service:?}")]
    UnknownMethod { service: String, method: String },
    /// The arguments could not be decoded as the method's request type.
    #[error("invalid arguments for {call_name}: {reason}")]
    InvalidArgs { call_name: String, reason: String },
    /// The handler ran and returned an error.
    #[error("{call_name} failed: {reason}")]
    Handler { call_name: String, reason: String },
    /// The handler's reply could not be encoded.
    #[error("could not encode reply of {call_name}: {reason}")]
    Encode { call_name: String, reason: String },
}

/// A call name split into the service namespace and the method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallName {
    /// Everything before the last `.`, e.g. `rpc.echoservice`.
    pub service: String,
    /// Everything after the last `.`, e.g. `Hello`.
    pub method: String,
}

impl CallName {
    /// Splits `call_name` at its last `.`. Both halves must be non-empty.
    pub fn parse(call_name: &str) -> Result<Self, CallError> {
        match call_name.rsplit_once('.') {
            Some((service, method)) if !service.is_empty() && !method.is_empty() => Ok(CallName {
                service: service.to_owned(),
                method: method.to_owned(),
            }),
            _ => Err(CallError::MalformedCallName(call_name.to_owned())),
        }
    }
}

impl fmt::Display for CallName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.method)
    }
}

#[cfg(test)]
mod tests {
    use super::{CallError, CallName};
    use assert_matches::assert_matches;

    #[test]
    fn parse_splits_on_last_dot() {
        let call_name = CallName::parse("rpc.echoservice.Hello").unwrap();
        assert_eq!(call_name.service, "rpc.echoservice");
        assert_eq!(call_name.method, "Hello");
        assert_eq!(call_name.to_string(), "rpc.echoservice.Hello");
    }

    #[test]
    fn parse_rejects_missing_halves() {
        for bad in ["Hello", "", ".Hello", "rpc.echoservice."] {
            assert_matches!(
                CallName::parse(bad),
                Err(CallError::MalformedCallName(ref s)) if s == bad
            );
        }
    }

    #[test]
    fn call_error_survives_the_wire() -> anyhow::Result<()> {
        let err = CallError::UnknownMethod {
            service: "rpc.echoservice".into(),
            method: "Goodbye".into(),
        };
        let decoded: CallError = serde_json::from_str(&serde_json::to_string(&err)?)?;
        assert_eq!(decoded, err);
        assert_eq!(
            decoded.to_string(),
            r#"can't find method "Goodbye" on service "rpc.echoservice""#
        );
        Ok(())
    }
}
