// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! A minimal named-method RPC exchange over TCP.
//!
//! A [`Host`](host::Host) serves the services of a [`Registry`](registry::Registry); a
//! [`Caller`](caller::Caller) connects to it and calls methods by their call name, a service
//! namespace and a method name joined by a dot, such as `rpc.echoservice.Hello`. Framing,
//! request routing and serialization are tarpc's; requests and replies travel as JSON.
//!
//! ```no_run
//! use micro_rpc::{
//!     caller::Caller,
//!     echo::{EchoService, HelloReq, HelloRsp, HELLO},
//!     host::{self, Host},
//!     registry::Registry,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut registry = Registry::default();
//! registry.register(EchoService)?;
//! let host = Host::bind(host::Config::default(), registry).await?;
//! tokio::spawn(host.run());
//!
//! let caller = Caller::connect(("127.0.0.1", micro_rpc::DEFAULT_PORT)).await?;
//! let reply: HelloRsp = caller.call(HELLO, &HelloReq { name: "Lee".into() }).await?;
//! assert_eq!(reply.reply, "hello Lee!");
//! # Ok(())
//! # }
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*, EnvFilter};

pub mod caller;
pub mod echo;
pub mod host;
pub mod protocol;
pub mod registry;

/// The port hosts listen on and callers dial unless told otherwise.
pub const DEFAULT_PORT: u16 = 6666;

/// Keeps span export alive. Call [`Telemetry::shutdown`] before exiting to flush it.
#[must_use]
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// Flushes and stops span export, if it was enabled.
    pub fn shutdown(self) -> anyhow::Result<()> {
        if let Some(tracer_provider) = self.tracer_provider {
            tracer_provider.shutdown()?;
        }
        Ok(())
    }
}

/// Initializes a tracing subscriber that logs to stdout, filtered by `RUST_LOG` (default `info`).
///
/// With `otlp` set, spans are also exported to an OpenTelemetry collector over OTLP/gRPC, at the
/// endpoint given by the standard `OTEL_EXPORTER_OTLP_ENDPOINT` variable.
pub fn init_tracing(service_name: &'static str, otlp: bool) -> anyhow::Result<Telemetry> {
    let tracer_provider = if otlp {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .build()?;
        let tracer_provider = SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(service_name).build())
            .with_batch_exporter(exporter)
            .build();
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        Some(tracer_provider)
    } else {
        None
    };
    let otel_layer = tracer_provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(service_name)));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_span_events(FmtSpan::NEW | FmtSpan::CLOSE))
        .with(otel_layer)
        .try_init()?;

    Ok(Telemetry { tracer_provider })
}
