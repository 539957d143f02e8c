#![deny(warnings)]
use batch_serve::{
    config::{parse_duration, ServerConfig},
    grpc::{infer_server::InferServer, InferService, RemoteRegistry},
    keep_registered, RequestServer,
};
use clap::{value_t, App, Arg, ArgMatches};
use engine::demo::Histogram;
use registry::Address;
use std::{error::Error, sync::Arc};
use tokio::sync::oneshot;
use tonic::transport::Server;

fn duration(matches: &ArgMatches, name: &str) -> Result<std::time::Duration, Box<dyn Error>> {
    let value = matches.value_of(name).unwrap_or_default();
    Ok(parse_duration(value)?)
}

fn config(matches: &ArgMatches) -> Result<ServerConfig, Box<dyn Error>> {
    let mut config = ServerConfig::default();
    config.listen = value_t!(matches, "listen", std::net::SocketAddr)?;
    config.advertise = match matches.value_of("advertise") {
        Some(advertise) => advertise.parse()?,
        None => Address::new(config.listen.ip().to_string(), config.listen.port()),
    };
    config.registry = match matches.value_of("registry") {
        Some("disable") | None => None,
        Some(url) => Some(url.to_string()),
    };
    config.request_timeout = duration(matches, "request_timeout")?;
    config.heartbeat_interval = duration(matches, "heartbeat")?;
    config.registry_timeout = duration(matches, "registry_timeout")?;
    config.batching.max_batch_size = value_t!(matches, "max_batch_size", usize)?;
    config.batching.max_batch_wait = duration(matches, "max_batch_wait")?;
    config.batching.max_concurrent_batches = value_t!(matches, "max_concurrent_batches", usize)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let matches = App::new("Batch Serve Server")
        .about("Request server batching calls onto one inference engine")
        .arg(
            Arg::with_name("listen")
                .short("l")
                .help("Address the gRPC server binds")
                .default_value("127.0.0.1:8080")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("advertise")
                .short("a")
                .help("host:port registered for clients to dial, defaults to the listen address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("registry")
                .short("r")
                .help("Registry url, set \"disable\" to run unregistered")
                .default_value("http://127.0.0.1:7070")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("max_batch_size")
                .short("b")
                .help("Seal a batch once it holds this many requests")
                .default_value("8")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("max_batch_wait")
                .short("w")
                .help("Seal a batch this long after its first request, use value[s|ms|us|ns], e.g. 20ms")
                .default_value("20ms")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("max_concurrent_batches")
                .short("c")
                .help("Batches running against the engine at once")
                .default_value("1")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("request_timeout")
                .short("t")
                .help("Longest a caller waits for its result")
                .default_value("1s")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("heartbeat")
                .short("H")
                .help("Registration refresh period, keep it well below the registry's liveness ttl")
                .default_value("3s")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("registry_timeout")
                .long("registry-timeout")
                .help("Deadline for one registration call, keep it below the heartbeat period")
                .default_value("1s")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("labels")
                .short("L")
                .help("Comma separated labels of the reference classifier")
                .default_value("cat,dog,bird,fish")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("fixed_cost")
                .long("fixed-cost")
                .help("Engine latency paid once per batch")
                .default_value("5ms")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("per_item_cost")
                .long("per-item-cost")
                .help("Engine latency paid per batch member")
                .default_value("1ms")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("warmup")
                .long("warmup")
                .help("Warm up runs per batch size before profiling, 0 disables profiling")
                .default_value("1")
                .takes_value(true),
        )
        .get_matches();

    let mut builder = env_logger::Builder::from_default_env();
    builder.format_timestamp_micros().init();
    let config = config(&matches)?;

    let labels: Vec<String> = matches
        .value_of("labels")
        .unwrap_or_default()
        .split(',')
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    let histogram = Histogram::new(labels)?
        .fixed_cost(duration(&matches, "fixed_cost")?)
        .per_item_cost(duration(&matches, "per_item_cost")?);
    let model = engine::Builder::new()
        .warmup_times(value_t!(matches, "warmup", usize)?)
        .warmup_input(b"warmup".to_vec())
        .max_batch_size(config.batching.max_batch_size)
        .build_function(move || Ok(Box::new(histogram)))
        .build()?;
    let handle = orchestrator::Builder::new()
        .config(config.batching.clone())
        .model(model)
        .build()?
        .run()?;
    let server = RequestServer::new(handle.clone(), config.request_timeout);

    let heartbeat = config.registry.as_ref().map(|url| {
        let discovery = Arc::new(RemoteRegistry::new(url.clone(), config.registry_timeout));
        let (stop_tx, stop_rx) = oneshot::channel();
        let address = config.advertise.clone();
        let interval = config.heartbeat_interval;
        let task = tokio::spawn(async move {
            keep_registered(discovery.as_ref(), address, interval, stop_rx).await
        });
        (stop_tx, task)
    });

    log::info!("Serving on {}, advertised as {}", config.listen, config.advertise);
    println!("service is ready");
    Server::builder()
        .add_service(InferServer::new(InferService::new(server)))
        .serve_with_shutdown(config.listen, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;

    log::info!("Shutting down");
    if let Some((stop_tx, task)) = heartbeat {
        let _ = stop_tx.send(());
        task.await?;
    }
    tokio::task::spawn_blocking(move || handle.shutdown()).await??;
    Ok(())
}
