use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use scanbroker::{
    completion_hook, Coordinator, CoordinatorClient, CoordinatorService, MemoryRecord,
    MemoryStore, ScanConfig, ScanDescriptor, WorkerPool, WorkerStub,
};
use serde_json::json;

const DEFAULT_ROWS: u64 = 10_000;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_SIZE: usize = 250;
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:0";
const DEFAULT_LOG_DIRECTIVE: &str = "warn";

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let bar = build_progress_bar(args.rows);
    bar.println(format!(
        "Scanning {} rows with {} workers (queue size {})",
        args.rows, args.workers, args.queue_size
    ));

    let store = Arc::new(seed_store(args.rows)?);
    let config = ScanConfig::builder()
        .descriptor(ScanDescriptor::new().conditions("active").order("id asc"))
        .queue_size(args.queue_size)
        .locked_queue_wait(Duration::from_millis(10))
        .empty_queue_wait(Duration::from_millis(100))
        .build()?;

    let summary_bar = bar.clone();
    let coordinator = Coordinator::open(store.clone(), config)
        .await?
        .with_completion_hook(completion_hook(move |summary| async move {
            summary_bar.println(format!(
                "Scan complete: {} rows in {} refills ({} locked, {} empty signals)",
                summary.total,
                summary.telemetry.refills,
                summary.telemetry.locked_signals,
                summary.telemetry.empty_signals
            ));
            Ok::<(), anyhow::Error>(())
        }));
    let coordinator = Arc::new(coordinator);
    bar.set_length(coordinator.session().limit);

    let mut service = CoordinatorService::new(coordinator, args.listen_addr)
        .with_termination_grace(Duration::from_millis(500));
    let local_addr = service.start().await?;
    let endpoint = format!("http://{local_addr}");
    bar.println(format!("Coordinator listening on {endpoint}"));

    let mut stubs = Vec::with_capacity(args.workers);
    for index in 0..args.workers {
        let client = Arc::new(CoordinatorClient::new(endpoint.clone())?);
        let stub = WorkerStub::connect(client, store.clone())
            .await
            .with_context(|| format!("worker {index} failed to connect"))?
            .with_name(format!("demo-worker-{index}"));
        stubs.push(stub);
    }

    let started = Instant::now();
    let worker_bar = bar.clone();
    let report = WorkerPool::new(stubs)
        .run(move |_worker, record: MemoryRecord| {
            let bar = worker_bar.clone();
            async move {
                ensure!(
                    record.attributes["active"] == json!(true),
                    "record {} should not match the scan",
                    record.id
                );
                bar.inc(1);
                Ok(())
            }
        })
        .await;

    let service_result = service.run().await;
    match report {
        Ok(report) => {
            bar.finish_with_message("done");
            print_summary(&bar, report.processed(), &report.per_worker, started.elapsed());
        }
        Err(err) => {
            bar.abandon_with_message("workers aborted");
            return Err(err);
        }
    }
    service_result
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    scanbroker::init_tracing();
}

/// Every third row is inactive and excluded by the `active` condition.
fn seed_store(rows: u64) -> Result<MemoryStore> {
    let store = MemoryStore::new().with_condition("active", |record| {
        record.attributes["active"] == json!(true)
    });
    for id in 1..=rows {
        store.insert(MemoryRecord::new(
            id,
            json!({ "active": id % 3 != 0, "payload": format!("row-{id}") }),
        ))?;
    }
    Ok(store)
}

fn build_progress_bar(rows: u64) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(rows), ProgressDrawTarget::stdout_with_hz(12));
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows ({per_sec:.2} rows/s) ETA {eta_precise}",
    )
    .expect("valid progress bar template")
    .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_summary(bar: &ProgressBar, processed: u64, per_worker: &[u64], elapsed: Duration) {
    let seconds = elapsed.as_secs_f64();
    let rate = if seconds > 0.0 {
        processed as f64 / seconds
    } else {
        0.0
    };

    bar.println(format!(
        "Processed {processed} rows in {seconds:.2}s [{rate:.2} rows/s]; per worker: {per_worker:?}"
    ));
}

struct ExampleArgs {
    rows: u64,
    workers: usize,
    queue_size: usize,
    listen_addr: SocketAddr,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        let rows = parse_env_with_default::<u64>("SCANBROKER_ROWS", DEFAULT_ROWS)?;
        let workers = parse_env_with_default::<usize>("SCANBROKER_WORKERS", DEFAULT_WORKERS)?;
        let queue_size =
            parse_env_with_default::<usize>("SCANBROKER_QUEUE_SIZE", DEFAULT_QUEUE_SIZE)?;
        let listen_addr = read_env_or_default("SCANBROKER_LISTEN_ADDR", DEFAULT_LISTEN_ADDR);
        let listen_addr = SocketAddr::from_str(&listen_addr)
            .with_context(|| format!("invalid SCANBROKER_LISTEN_ADDR '{listen_addr}'"))?;

        ensure!(workers > 0, "SCANBROKER_WORKERS must be greater than 0");
        ensure!(queue_size > 0, "SCANBROKER_QUEUE_SIZE must be greater than 0");

        Ok(Self {
            rows,
            workers,
            queue_size,
            listen_addr,
        })
    }
}

fn read_env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
