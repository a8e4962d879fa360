use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use trpool::fatal::abort_on_unrecoverable;
use trpool::logging::init_tracing;
use trpool::{ClientId, Kind, KindTable, PoolConfig, PoolError, TransitionPool};

type Pool = TransitionPool<Arc<KindTable>>;

/// Deepest nesting the scripted sequence reaches (Map through Enable).
const SCRIPT_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Run,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Options {
    scenario: Scenario,
    clients: u32,
    cycles: u32,
    work: Duration,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("Usage: trpool-sim <run|fatal> [--clients N] [--cycles N] [--work-us N]");
            eprintln!();
            eprintln!("Scenarios:");
            eprintln!("  run      Drive a producer and N clients through a scripted sequence");
            eprintln!("  fatal    Reserve an out-of-order begin and abort with a pool dump");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --clients <n>    Clients, the last one attaching late [default: 3]");
            eprintln!("  --cycles <n>     Calib cycles in the run [default: 10]");
            eprintln!("  --work-us <n>    Per-transition work of client 0, scaled per client [default: 200]");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(&options) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut scenario: Option<Scenario> = None;
    let mut clients = 3;
    let mut cycles = 10;
    let mut work_us = 200;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--clients" => {
                i += 1;
                clients = parse_number(args.get(i), "--clients")?;
            }
            "--cycles" => {
                i += 1;
                cycles = parse_number(args.get(i), "--cycles")?;
            }
            "--work-us" => {
                i += 1;
                work_us = parse_number(args.get(i), "--work-us")?;
            }
            "--help" | "-h" => return Err("".to_string()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => {
                if scenario.is_some() {
                    return Err(format!("unexpected argument: {arg}"));
                }
                scenario = Some(match arg {
                    "run" => Scenario::Run,
                    "fatal" => Scenario::Fatal,
                    other => return Err(format!("unknown scenario '{other}'")),
                });
            }
        }
        i += 1;
    }

    if clients > trpool::MAX_CLIENTS {
        return Err(format!("--clients must be at most {}", trpool::MAX_CLIENTS));
    }

    Ok(Options {
        scenario: scenario.ok_or("missing required argument: <run|fatal>")?,
        clients,
        cycles,
        work: Duration::from_micros(u64::from(work_us)),
    })
}

fn parse_number(value: Option<&String>, flag: &str) -> Result<u32, String> {
    value
        .ok_or_else(|| format!("{flag} requires a value"))?
        .parse()
        .map_err(|_| format!("{flag} expects a non-negative integer"))
}

fn run(options: &Options) -> Result<()> {
    let config = PoolConfig::from_env().context("reading pool configuration")?;
    let table = Arc::new(KindTable::new(config.capacity));
    let pool = Arc::new(TransitionPool::new(config, Arc::clone(&table))?);

    match options.scenario {
        Scenario::Run => simulate(&pool, &table, options),
        Scenario::Fatal => provoke_fatal(&pool, &table),
    }
}

/// Reserve with exponential backoff while every free slot is still busy.
fn reserve(pool: &Pool, kind: Kind) -> Result<usize> {
    let mut backoff = Duration::from_micros(50);
    loop {
        match abort_on_unrecoverable(pool.reserve_for_write(kind)) {
            Ok(slot) => return Ok(slot),
            Err(PoolError::Exhausted) => {
                tracing::trace!(%kind, ?backoff, "Pool exhausted, backing off");
                thread::sleep(backoff);
                backoff = (backoff * 2).min(Duration::from_millis(10));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn publish(pool: &Pool, table: &KindTable, kind: Kind) -> Result<usize> {
    let slot = reserve(pool, kind)?;
    table.write(slot, kind);
    Ok(slot)
}

fn script(cycles: u32) -> Vec<Kind> {
    let mut kinds = vec![Kind::MAP, Kind::CONFIGURE, Kind::BEGIN_RUN];
    for _ in 0..cycles {
        kinds.extend([
            Kind::BEGIN_CALIB_CYCLE,
            Kind::ENABLE,
            Kind::DISABLE,
            Kind::END_CALIB_CYCLE,
        ]);
    }
    kinds.extend([Kind::END_RUN, Kind::UNCONFIGURE, Kind::UNMAP]);
    kinds
}

struct Consumer {
    id: ClientId,
    tx: mpsc::Sender<usize>,
    handle: thread::JoinHandle<Result<u64>>,
}

fn spawn_consumer(pool: &Arc<Pool>, id: ClientId, work: Duration) -> Consumer {
    let (tx, rx) = mpsc::channel::<usize>();
    let pool = Arc::clone(pool);

    let handle = thread::spawn(move || -> Result<u64> {
        let mut handled = 0;
        for slot in rx {
            let kind = pool.kind(slot)?;
            tracing::debug!(client = %id, slot, %kind, "Handling transition");
            thread::sleep(work);
            if pool.release(slot, id)? {
                tracing::info!(client = %id, "Back in step with the producer");
            }
            handled += 1;
        }
        pool.retire(id)?;
        Ok(handled)
    });

    Consumer { id, tx, handle }
}

fn simulate(pool: &Arc<Pool>, table: &KindTable, options: &Options) -> Result<()> {
    if pool.capacity() <= SCRIPT_DEPTH {
        bail!(
            "capacity {} cannot hold {SCRIPT_DEPTH} open levels plus a working slot",
            pool.capacity()
        );
    }

    let work_for = |client: u32| options.work * (client + 1);
    let early = options.clients.saturating_sub(1);
    let mut consumers = (0..early)
        .map(|client| Ok(spawn_consumer(pool, ClientId::new(client)?, work_for(client))))
        .collect::<Result<Vec<_>>>()?;

    let script = script(options.cycles);
    let join_at = script.len() / 2;

    for (step, kind) in script.into_iter().enumerate() {
        if step == join_at && options.clients > 0 {
            let late = options.clients - 1;
            let consumer = spawn_consumer(pool, ClientId::new(late)?, work_for(late));
            let replay = pool.attach(consumer.id)?;
            for slot in replay {
                consumer.tx.send(slot).context("late client hung up")?;
            }
            consumers.push(consumer);
        }

        let slot = publish(pool, table, kind)?;
        for consumer in &consumers {
            if pool.claim(slot, consumer.id)? {
                consumer.tx.send(slot).context("client hung up")?;
            } else {
                tracing::debug!(client = %consumer.id, slot, %kind, "Client behind, transition skipped");
            }
        }
    }

    let mut handled = BTreeMap::new();
    for consumer in consumers {
        drop(consumer.tx);
        let count = consumer
            .handle
            .join()
            .map_err(|_| anyhow!("client {} panicked", consumer.id))??;
        handled.insert(consumer.id.to_string(), count);
    }

    let report = serde_json::json!({
        "stats": pool.stats()?,
        "handled": handled,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn provoke_fatal(pool: &Pool, table: &KindTable) -> Result<()> {
    publish(pool, table, Kind::MAP)?;
    publish(pool, table, Kind::CONFIGURE)?;
    // Skips BeginRun: no rollback can explain a calib cycle directly inside Configure.
    publish(pool, table, Kind::BEGIN_CALIB_CYCLE)?;
    bail!("pool accepted a begin with no open parent")
}
