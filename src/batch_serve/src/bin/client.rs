#![deny(warnings)]
use batch_serve::{
    config::{parse_duration, RouterConfig},
    grpc::{GrpcConnector, RemoteRegistry},
    Router,
};
use clap::{value_t, App, Arg, ArgMatches};
use std::{
    error::Error,
    fs::File,
    io::prelude::*,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

type Client = Router<RemoteRegistry, GrpcConnector>;

fn duration(matches: &ArgMatches, name: &str) -> Result<Duration, Box<dyn Error>> {
    Ok(parse_duration(matches.value_of(name).unwrap_or_default())?)
}

/// Send `requests` calls one after another, printing one JSON line per result.
async fn closed_loop(
    router: Arc<Client>,
    input: Arc<Vec<u8>>,
    requests: usize,
    done: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
) {
    for _ in 0..requests {
        let s = Instant::now();
        let line = match router.infer(&input).await {
            Ok(predictions) => {
                done.fetch_add(1, Ordering::SeqCst);
                log::debug!("done {:?}", s.elapsed());
                serde_json::to_string(&predictions)
            }
            Err(e) => {
                failed.fetch_add(1, Ordering::SeqCst);
                serde_json::to_string(&e.payload())
            }
        };
        match line {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Failed to encode result: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let matches = App::new("Batch Serve Client")
        .about("Resolves a server through the registry, then calls it directly")
        .arg(
            Arg::with_name("registry")
                .short("r")
                .help("Registry url")
                .default_value("http://127.0.0.1:7070")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("input")
                .short("i")
                .help("Path to the payload sent with every request")
                .required(true)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("requests")
                .short("n")
                .help("Requests sent by each concurrent caller")
                .default_value("1")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("concurrency")
                .short("c")
                .help("Concurrent callers sharing one router")
                .default_value("1")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("cache_ttl")
                .long("cache-ttl")
                .help("How long a resolved address is reused, use value[s|ms|us|ns]")
                .default_value("30s")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("attempts")
                .short("a")
                .help("Attempts per call, first one included")
                .default_value("3")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("backoff")
                .long("backoff")
                .help("First retry delay, doubled per retry")
                .default_value("50ms")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("send_timeout")
                .long("send-timeout")
                .help("Deadline for one direct send or registry call")
                .default_value("2s")
                .takes_value(true),
        )
        .get_matches();

    let mut builder = env_logger::Builder::from_default_env();
    builder.format_timestamp_micros().init();
    let config = RouterConfig {
        cache_ttl: duration(&matches, "cache_ttl")?,
        max_attempts: value_t!(matches, "attempts", usize)?,
        backoff: duration(&matches, "backoff")?,
        send_timeout: duration(&matches, "send_timeout")?,
        ..RouterConfig::default()
    };
    let input = {
        let mut buf = vec![];
        let mut f = File::open(matches.value_of("input").unwrap_or_default())?;
        f.read_to_end(&mut buf)?;
        Arc::new(buf)
    };
    let requests = value_t!(matches, "requests", usize)?;
    let concurrency = value_t!(matches, "concurrency", usize)?;

    let registry_url = matches.value_of("registry").unwrap_or_default();
    let router = Arc::new(Router::new(
        RemoteRegistry::new(registry_url, config.send_timeout),
        GrpcConnector::new(config.send_timeout),
        config,
    ));
    let done = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let callers: Vec<_> = (0..concurrency)
        .map(|_| {
            tokio::spawn(closed_loop(
                router.clone(),
                input.clone(),
                requests,
                done.clone(),
                failed.clone(),
            ))
        })
        .collect();
    for caller in callers {
        caller.await?;
    }
    eprintln!(
        "done/failed {}/{} in {:?}",
        done.load(Ordering::SeqCst),
        failed.load(Ordering::SeqCst),
        start.elapsed()
    );
    Ok(())
}
