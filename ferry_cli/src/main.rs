mod samples;

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use ferry_core::telemetry::TelemetryEvent;
use ferry_core::{ChannelRegistry, Context, RegistryConfig, Value};
use ferry_runtime::{extract, register_channel_builtins, Builtins, Session};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Ferry demo driver options
#[derive(Parser)]
struct Opts {
    /// Number of worker contexts
    #[arg(short, long, default_value = "3")]
    workers: usize,

    /// Messages each worker answers before shutting down
    #[arg(short, long, default_value = "6")]
    rounds: usize,

    /// Registry configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the initial registry capacity
    #[arg(long)]
    initial_capacity: Option<usize>,

    /// Print telemetry events as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

fn load_config(opts: &Opts) -> Result<RegistryConfig> {
    let mut config = match &opts.config {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            serde_json::from_reader(file).with_context(|| format!("reading {}", path.display()))?
        }
        None => RegistryConfig::default(),
    };
    if let Some(capacity) = opts.initial_capacity {
        config.initial_capacity = capacity;
    }
    Ok(config)
}

/// Answers every message with `list(<kind>, <message>)` until it receives NULL.
fn run_worker(builtins: Arc<Builtins>, session: Session, key: i64) -> Result<usize> {
    let id = builtins.call(&session, "channel.get", vec![Value::int(key as i32)])?;
    let mut handled = 0;
    loop {
        let message = builtins.call(&session, "channel.receive", vec![id.clone()])?;
        if message.is_null() {
            break;
        }
        debug!(context = session.context.name(), kind = %message.kind(), "worker got message");
        let reply = Value::list(vec![Value::string(message.kind().type_name()), message]);
        builtins.call(&session, "channel.send", vec![id.clone(), reply])?;
        handled += 1;
    }
    builtins.call(&session, "channel.close", vec![id])?;
    Ok(handled)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    let config = load_config(&opts)?;
    let registry = Arc::new(ChannelRegistry::with_config(config)?);
    if opts.json {
        registry.set_telemetry_sink(Box::new(|event: TelemetryEvent| {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        }));
    }

    let builtins = Arc::new(Builtins::new());
    let exported = register_channel_builtins(&builtins);
    debug!(?exported, "builtins registered");

    let master = Session::new(Arc::new(Context::new("master")), registry.clone());
    let mut workers = Vec::new();
    for index in 0..opts.workers {
        let key = 100 + index as i64;
        let id = builtins.call(&master, "channel.create", vec![Value::int(key as i32)])?;
        let session = Session::new(Arc::new(Context::new(format!("worker-{}", index))), registry.clone());
        let builtins = builtins.clone();
        let worker = thread::Builder::new()
            .name(format!("worker-{}", index))
            .spawn(move || run_worker(builtins, session, key))?;
        workers.push((index, id, worker));
    }
    info!(workers = opts.workers, capacity = registry.capacity(), "workers started");

    for round in 0..opts.rounds {
        for (index, id, _) in &workers {
            let message = samples::message(&master.context, *index, round);
            builtins.call(&master, "channel.send", vec![id.clone(), message])?;
        }
        for (index, id, _) in &workers {
            let reply = builtins.call(&master, "channel.receive", vec![id.clone()])?;
            let parts = reply.list_elements().unwrap_or_default();
            let (kind, echoed) = match parts.as_slice() {
                [kind, echoed] => (kind.clone(), echoed.clone()),
                _ => return Err(anyhow!("worker-{} sent a malformed reply", index)),
            };
            let kind = extract::string(&kind).map_err(|e| anyhow!("worker-{}: {}", index, e))?;
            if !opts.json {
                println!(
                    "round {} worker-{}: {} -> {}",
                    round,
                    index,
                    kind,
                    samples::summary(&master.context, &echoed)
                );
            }
        }
    }

    for (_, id, _) in &workers {
        builtins.call(&master, "channel.send", vec![id.clone(), Value::null()])?;
    }
    for (index, id, worker) in workers {
        let handled = worker
            .join()
            .map_err(|_| anyhow!("worker-{} panicked", index))??;
        builtins.call(&master, "channel.close", vec![id])?;
        info!(worker = index, handled, "worker finished");
    }
    info!(live = registry.live_channels(), "done");
    Ok(())
}
