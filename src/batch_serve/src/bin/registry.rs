#![deny(warnings)]
use batch_serve::{
    config::{parse_duration, RegistryConfig},
    grpc::{registry_server::RegistryServer, RegistryService},
};
use clap::{value_t, App, Arg};
use std::error::Error;
use tonic::transport::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let matches = App::new("Batch Serve Registry")
        .about("Discovery broker handing out live request servers")
        .arg(
            Arg::with_name("listen")
                .short("l")
                .help("Address the gRPC server binds")
                .default_value("127.0.0.1:7070")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("liveness_ttl")
                .short("t")
                .help("Servers not refreshed within this window are no longer handed out, use value[s|ms|us|ns]")
                .default_value("10s")
                .takes_value(true),
        )
        .get_matches();

    let mut builder = env_logger::Builder::from_default_env();
    builder.format_timestamp_micros().init();
    let config = RegistryConfig {
        listen: value_t!(matches, "listen", std::net::SocketAddr)?,
        liveness_ttl: parse_duration(matches.value_of("liveness_ttl").unwrap_or_default())?,
    };

    let registry = registry::Registry::new(config.liveness_ttl);
    log::info!(
        "Registry on {}, liveness ttl {:?}",
        config.listen,
        registry.liveness_ttl()
    );
    println!("registry is ready");
    Server::builder()
        .add_service(RegistryServer::new(RegistryService::new(registry)))
        .serve_with_shutdown(config.listen, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;
    Ok(())
}
