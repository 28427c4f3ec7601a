// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use micro_rpc::{
    caller::Caller,
    echo::{HelloReq, HelloRsp, HELLO},
    init_tracing, DEFAULT_PORT,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Parser)]
struct Flags {
    /// Sets the server address to connect to.
    #[clap(long, default_value_t = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT))]
    server_addr: SocketAddr,
    /// Sets the name to say hello to.
    #[clap(long, default_value = "Lee")]
    name: String,
    /// Sets the method to call.
    #[clap(long, default_value = HELLO)]
    call_name: String,
    /// Also exports spans to the OTLP collector at OTEL_EXPORTER_OTLP_ENDPOINT.
    #[clap(long)]
    otlp: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    let telemetry = init_tracing("micro-rpc client", flags.otlp)?;

    let reply = async move {
        let caller = Caller::connect(flags.server_addr).await?;
        let reply: HelloRsp = caller
            .call(&flags.call_name, &HelloReq { name: flags.name })
            .await?;
        anyhow::Ok(reply)
    }
    .await;

    match reply {
        Ok(reply) => {
            tracing::info!("rpc reply: {:?}", reply);
            telemetry.shutdown()
        }
        Err(e) => {
            tracing::error!("{:?}", e);
            telemetry.shutdown()?;
            std::process::exit(1);
        }
    }
}
