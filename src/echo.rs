// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The echo service: one method, `Hello`, that greets a name.

use crate::registry::{Methods, RegisterError, Service};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The namespace [`EchoService`] registers under.
pub const SERVICE_NAME: &str = "rpc.echoservice";

/// The call name of [`EchoService::hello`].
pub const HELLO: &str = "rpc.echoservice.Hello";

/// Request of `Hello`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReq {
    pub name: String,
}

/// Response of `Hello`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRsp {
    pub reply: String,
}

// Dependencies of the service, such as a database or an upstream client, would be fields here.
#[derive(Clone, Debug, Default)]
pub struct EchoService;

impl EchoService {
    /// Returns a greeting for `req.name`.
    pub async fn hello(self: Arc<Self>, req: HelloReq) -> anyhow::Result<HelloRsp> {
        Ok(HelloRsp {
            reply: greeting(&req.name),
        })
    }
}

impl Service for EchoService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    fn methods(methods: &mut Methods<Self>) -> Result<(), RegisterError> {
        methods.add("Hello", EchoService::hello)
    }
}

fn greeting(name: &str) -> String {
    format!("hello {name}!")
}

#[cfg(test)]
mod tests {
    use super::{EchoService, HelloReq, HelloRsp, HELLO};
    use crate::registry::Registry;
    use serde_json::json;
    use std::sync::Arc;

    async fn hello(name: &str) -> String {
        Arc::new(EchoService)
            .hello(HelloReq { name: name.into() })
            .await
            .unwrap()
            .reply
    }

    #[tokio::test]
    async fn greets_by_name() {
        assert_eq!(hello("Lee").await, "hello Lee!");
        assert_eq!(hello("").await, "hello !");
        assert_eq!(hello("世界 and friends").await, "hello 世界 and friends!");
    }

    #[tokio::test]
    async fn hello_through_registry() -> anyhow::Result<()> {
        let mut registry = Registry::default();
        registry.register(EchoService)?;
        assert_eq!(registry.services(), ["rpc.echoservice"]);

        let reply = registry.dispatch(HELLO, json!({"name": "Lee"})).await?;
        assert_eq!(reply, json!({"reply": "hello Lee!"}));
        let reply: HelloRsp = serde_json::from_value(reply)?;
        assert_eq!(reply.reply, "hello Lee!");
        Ok(())
    }
}
