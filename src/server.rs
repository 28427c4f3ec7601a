// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use micro_rpc::{
    echo::EchoService,
    host::{self, Host},
    init_tracing,
    registry::Registry,
    DEFAULT_PORT,
};
use std::net::{IpAddr, Ipv4Addr};

#[derive(Parser)]
struct Flags {
    /// Sets the port number to listen on.
    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Also exports spans to the OTLP collector at OTEL_EXPORTER_OTLP_ENDPOINT.
    #[clap(long)]
    otlp: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    let telemetry = init_tracing("micro-rpc server", flags.otlp)?;

    if let Err(e) = serve(flags.port).await {
        tracing::error!("{:?}", e);
        telemetry.shutdown()?;
        std::process::exit(1);
    }
    telemetry.shutdown()
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let mut registry = Registry::default();
    registry.register(EchoService)?;

    let config = host::Config {
        listen_addr: (IpAddr::V4(Ipv4Addr::UNSPECIFIED), port).into(),
        ..Default::default()
    };
    let host = Host::bind(config, registry).await?;

    let shutdown = host.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl-C");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    host.run().await?;
    Ok(())
}
