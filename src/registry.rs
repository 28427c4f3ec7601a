// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Named services and the dispatch of call names into them.

use crate::protocol::{CallError, CallName, Payload};
use futures::{
    future::{self, BoxFuture},
    prelude::*,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

/// A handler object whose methods can be called by name.
///
/// The object is shared by every connection of a host, so it should not need mutable access to
/// itself; dependencies such as database handles or upstream clients go in its fields.
pub trait Service: Send + Sync + Sized + 'static {
    /// The namespace used by [`Registry::register`].
    fn name(&self) -> &str;

    /// Declares the methods callable on this service.
    fn methods(methods: &mut Methods<Self>) -> Result<(), RegisterError>;
}

/// Why a service could not be registered.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegisterError {
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("service already defined: {0:?}")]
    DuplicateService(String),
    #[error("service {0:?} has no methods")]
    NoMethods(String),
    #[error("invalid method name {0:?}: must be non-empty and contain no '.'")]
    InvalidMethodName(String),
    #[error("method already defined: {0:?}")]
    DuplicateMethod(String),
}

/// Failure of a single method invocation, before it is attributed to a call name.
enum Failure {
    InvalidArgs(String),
    Handler(String),
    Encode(String),
}

impl Failure {
    fn into_call_error(self, call_name: &CallName) -> CallError {
        let call_name = call_name.to_string();
        match self {
            Failure::InvalidArgs(reason) => CallError::InvalidArgs { call_name, reason },
            Failure::Handler(reason) => CallError::Handler { call_name, reason },
            Failure::Encode(reason) => CallError::Encode { call_name, reason },
        }
    }
}

type Method<S> =
    Box<dyn Fn(Arc<S>, Payload) -> BoxFuture<'static, Result<Payload, Failure>> + Send + Sync>;

/// The methods of a service `S`, keyed by method name.
pub struct Methods<S> {
    handlers: BTreeMap<String, Method<S>>,
}

impl<S> Default for Methods<S> {
    fn default() -> Self {
        Methods {
            handlers: BTreeMap::new(),
        }
    }
}

impl<S> fmt::Debug for Methods<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl<S> Methods<S>
where
    S: Send + Sync + 'static,
{
    /// Adds a method named `name`.
    ///
    /// The handler receives the service object and the decoded request. Its arguments are
    /// decoded from, and its reply encoded to, the call's [`Payload`].
    pub fn add<Req, Resp, F, Fut>(&mut self, name: &str, handler: F) -> Result<(), RegisterError>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Arc<S>, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        if name.is_empty() || name.contains('.') {
            return Err(RegisterError::InvalidMethodName(name.to_owned()));
        }
        if self.handlers.contains_key(name) {
            return Err(RegisterError::DuplicateMethod(name.to_owned()));
        }
        let method: Method<S> = Box::new(move |receiver: Arc<S>, args: Payload| {
            call_handler::<S, Req, Resp, F, Fut>(&handler, receiver, args)
        });
        self.handlers.insert(name.to_owned(), method);
        Ok(())
    }

    /// Returns the method names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Decodes `args`, runs `handler` and encodes its reply.
fn call_handler<S, Req, Resp, F, Fut>(
    handler: &F,
    receiver: Arc<S>,
    args: Payload,
) -> BoxFuture<'static, Result<Payload, Failure>>
where
    Req: DeserializeOwned,
    Resp: Serialize + Send + 'static,
    F: Fn(Arc<S>, Req) -> Fut,
    Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
{
    let request = match serde_json::from_value::<Req>(args) {
        Ok(request) => request,
        Err(e) => return future::ready(Err(Failure::InvalidArgs(e.to_string()))).boxed(),
    };
    let response = handler(receiver, request);
    async move {
        let response = response
            .await
            .map_err(|e| Failure::Handler(format!("{e:#}")))?;
        serde_json::to_value(response).map_err(|e| Failure::Encode(e.to_string()))
    }
    .boxed()
}

/// A registered service with its type erased.
trait Invoke: Send + Sync {
    fn method_names(&self) -> Vec<&str>;

    fn invoke(
        &self,
        method: &str,
        args: Payload,
    ) -> Option<BoxFuture<'static, Result<Payload, Failure>>>;
}

struct Registered<S> {
    receiver: Arc<S>,
    methods: Methods<S>,
}

impl<S> Invoke for Registered<S>
where
    S: Send + Sync + 'static,
{
    fn method_names(&self) -> Vec<&str> {
        self.methods.names().collect()
    }

    fn invoke(
        &self,
        method: &str,
        args: Payload,
    ) -> Option<BoxFuture<'static, Result<Payload, Failure>>> {
        let handler = self.methods.handlers.get(method)?;
        Some(handler(self.receiver.clone(), args))
    }
}

/// The services a host dispatches calls into.
///
/// A registry is built up front, then handed to a [`Host`](crate::host::Host), which shares it
/// read-only between all of its connections.
#[derive(Default)]
pub struct Registry {
    services: HashMap<String, Box<dyn Invoke>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.services.iter().map(|(k, v)| (k, v.method_names())))
            .finish()
    }
}

impl Registry {
    /// Registers `service` under its own [name](Service::name).
    pub fn register<S: Service>(&mut self, service: S) -> Result<(), RegisterError> {
        let name = service.name().to_owned();
        self.register_name(name, service)
    }

    /// Registers `service` under `name` instead of its own name.
    pub fn register_name<S: Service>(
        &mut self,
        name: impl Into<String>,
        service: S,
    ) -> Result<(), RegisterError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegisterError::EmptyServiceName);
        }
        if self.services.contains_key(&name) {
            return Err(RegisterError::DuplicateService(name));
        }
        let mut methods = Methods::default();
        S::methods(&mut methods)?;
        if methods.handlers.is_empty() {
            return Err(RegisterError::NoMethods(name));
        }
        tracing::debug!(service = %name, ?methods, "RegisterService");
        self.services.insert(
            name,
            Box::new(Registered {
                receiver: Arc::new(service),
                methods,
            }),
        );
        Ok(())
    }

    /// Returns the registered service names in sorted order.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the method names of `service` in sorted order, if it is registered.
    pub fn methods(&self, service: &str) -> Option<Vec<&str>> {
        self.services.get(service).map(|s| s.method_names())
    }

    /// Resolves `call_name` and runs the matching method with `args`.
    pub async fn dispatch(&self, call_name: &str, args: Payload) -> Result<Payload, CallError> {
        let call_name = CallName::parse(call_name)?;
        let service = self
            .services
            .get(&call_name.service)
            .ok_or_else(|| CallError::UnknownService(call_name.service.clone()))?;
        let response = service
            .invoke(&call_name.method, args)
            .ok_or_else(|| CallError::UnknownMethod {
                service: call_name.service.clone(),
                method: call_name.method.clone(),
            })?;
        response.await.map_err(|f| f.into_call_error(&call_name))
    }
}

#[cfg(test)]
mod tests {
    use super::{Methods, RegisterError, Registry, Service};
    use crate::protocol::CallError;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::{collections::HashMap, sync::Arc};

    struct Arith {
        offset: i64,
    }

    impl Arith {
        async fn add(self: Arc<Self>, (x, y): (i64, i64)) -> anyhow::Result<i64> {
            Ok(x + y + self.offset)
        }

        async fn div(self: Arc<Self>, (x, y): (i64, i64)) -> anyhow::Result<i64> {
            x.checked_div(y)
                .ok_or_else(|| anyhow::anyhow!("divide by zero"))
        }

        /// JSON object keys must be strings, so the reply cannot be encoded.
        async fn pairs(
            self: Arc<Self>,
            (x, y): (i64, i64),
        ) -> anyhow::Result<HashMap<(i64, i64), i64>> {
            Ok(HashMap::from([((x, y), x * y + self.offset)]))
        }
    }

    impl Service for Arith {
        fn name(&self) -> &str {
            "Arith"
        }

        fn methods(methods: &mut Methods<Self>) -> Result<(), RegisterError> {
            methods.add("Add", Arith::add)?;
            methods.add("Div", Arith::div)?;
            methods.add("Pairs", Arith::pairs)
        }
    }

    struct Empty;

    impl Service for Empty {
        fn name(&self) -> &str {
            "Empty"
        }

        fn methods(_: &mut Methods<Self>) -> Result<(), RegisterError> {
            Ok(())
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::default();
        registry.register(Arith { offset: 0 }).unwrap();
        registry
    }

    #[tokio::test]
    async fn dispatch_runs_registered_method() -> anyhow::Result<()> {
        let registry = registry();
        assert_eq!(registry.dispatch("Arith.Add", json!([2, 3])).await?, json!(5));
        assert_eq!(registry.dispatch("Arith.Div", json!([9, 3])).await?, json!(3));
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_uses_the_registered_receiver() -> anyhow::Result<()> {
        let mut registry = Registry::default();
        registry.register_name("Shifted", Arith { offset: 100 })?;
        assert_eq!(registry.dispatch("Shifted.Add", json!([1, 1])).await?, json!(102));
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_unknown_service() {
        assert_matches!(
            registry().dispatch("Nope.Add", json!([1, 2])).await,
            Err(CallError::UnknownService(ref s)) if s == "Nope"
        );
    }

    #[tokio::test]
    async fn dispatch_unknown_method() {
        assert_matches!(
            registry().dispatch("Arith.Mul", json!([1, 2])).await,
            Err(CallError::UnknownMethod { ref service, ref method })
                if service == "Arith" && method == "Mul"
        );
    }

    #[tokio::test]
    async fn dispatch_malformed_call_name() {
        assert_matches!(
            registry().dispatch("ArithAdd", json!([1, 2])).await,
            Err(CallError::MalformedCallName(_))
        );
    }

    #[tokio::test]
    async fn dispatch_invalid_args() {
        assert_matches!(
            registry().dispatch("Arith.Add", json!({"x": 1})).await,
            Err(CallError::InvalidArgs { ref call_name, .. }) if call_name == "Arith.Add"
        );
    }

    #[tokio::test]
    async fn dispatch_handler_error() {
        assert_matches!(
            registry().dispatch("Arith.Div", json!([1, 0])).await,
            Err(CallError::Handler { ref call_name, ref reason })
                if call_name == "Arith.Div" && reason == "divide by zero"
        );
    }

    #[tokio::test]
    async fn dispatch_unencodable_reply() {
        assert_matches!(
            registry().dispatch("Arith.Pairs", json!([2, 3])).await,
            Err(CallError::Encode { ref call_name, .. }) if call_name == "Arith.Pairs"
        );
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = registry();
        assert_eq!(
            registry.register(Arith { offset: 1 }),
            Err(RegisterError::DuplicateService("Arith".into()))
        );
        assert_eq!(registry.services(), ["Arith"]);
    }

    #[test]
    fn register_rejects_empty_services() {
        let mut registry = Registry::default();
        assert_eq!(
            registry.register(Empty),
            Err(RegisterError::NoMethods("Empty".into()))
        );
        assert_eq!(
            registry.register_name("", Arith { offset: 0 }),
            Err(RegisterError::EmptyServiceName)
        );
        assert!(registry.services().is_empty());
    }

    #[test]
    fn methods_reject_bad_names() {
        let mut methods = Methods::<Arith>::default();
        assert_eq!(
            methods.add("", Arith::add),
            Err(RegisterError::InvalidMethodName("".into()))
        );
        assert_eq!(
            methods.add("Arith.Add", Arith::add),
            Err(RegisterError::InvalidMethodName("Arith.Add".into()))
        );
        methods.add("Add", Arith::add).unwrap();
        assert_eq!(
            methods.add("Add", Arith::div),
            Err(RegisterError::DuplicateMethod("Add".into()))
        );
    }

    #[test]
    fn lists_services_and_methods() {
        let mut registry = registry();
        registry.register_name("Other", Arith { offset: 0 }).unwrap();
        assert_eq!(registry.services(), ["Arith", "Other"]);
        assert_eq!(registry.methods("Arith"), Some(vec!["Add", "Div", "Pairs"]));
        assert_eq!(registry.methods("Missing"), None);
    }
}
