//! coda_decode - decode CODA event buffers and report statistics
//!
//! Usage:
//!   coda_decode -f hall.toml -i run_1234.dat          # Decode a buffer file
//!   coda_decode -f hall.toml --emulate 1000           # Decode emulated buffers
//!   coda_decode -f hall.toml -e 1000 --block-size 4   # Emulate multiblock readout
//!   coda_decode -f hall.toml -i run_1234.dat --json   # Summary as JSON

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use coda_rs::common::{CounterSnapshot, DecodeArgs, Warning};
use coda_rs::config::Config;
use coda_rs::decoder::DecodedHit;
use coda_rs::dispatcher::EventDispatcher;
use coda_rs::emulator::BufferEmulator;
use coda_rs::event::RunInfo;
use coda_rs::sink::SlotDataStore;
use coda_rs::source::CodaFileReader;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Interval between progress lines
const PROGRESS_INTERVAL_SECS: f64 = 5.0;

#[derive(Parser, Debug)]
#[command(name = "coda_decode", about = "Decode CODA event buffers")]
struct Args {
    #[command(flatten)]
    decode: DecodeArgs,
}

/// Final report
#[derive(Debug, Serialize)]
struct Summary {
    counters: CounterSnapshot,
    run: RunInfo,
    warnings: Vec<(Warning, u64)>,
    elapsed_secs: f64,
    /// Emulated events whose decoded hits differ from the generated ones
    #[serde(skip_serializing_if = "Option::is_none")]
    mismatched_events: Option<u64>,
}

/// Periodic progress logging from counter snapshots
struct Progress {
    start: Instant,
    last: Instant,
    prev: CounterSnapshot,
}

impl Progress {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            prev: CounterSnapshot::default(),
        }
    }

    fn tick(&mut self, dispatcher: &EventDispatcher) {
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed < PROGRESS_INTERVAL_SECS {
            return;
        }
        let snap = dispatcher.metrics().snapshot();
        let rate = snap.rate_from(&self.prev, elapsed);
        info!(
            buffers = snap.buffers,
            failed = snap.failed,
            hits = snap.hits,
            buffer_rate = format_args!("{:.0}/s", rate.buffer_rate),
            hit_rate = %rate.format_hit_rate(),
            "progress"
        );
        self.prev = snap;
        self.last = Instant::now();
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("coda_rs=info".parse()?))
        .init();

    let args = Args::parse().decode;

    let config_path = &args.common.config_file;
    let mut config = if Path::new(config_path).exists() {
        let config = Config::load(config_path)
            .with_context(|| format!("loading configuration from {}", config_path))?;
        info!(
            config_file = %config_path,
            crates = config.crates.len(),
            "Loaded configuration"
        );
        config
    } else {
        warn!(config_file = %config_path, "config file not found, using an empty crate map");
        Config::default()
    };
    if let Some(seed) = args.seed {
        config.emulator.seed = seed;
    }
    if let Some(block_size) = args.block_size {
        config.emulator.block_size = block_size;
    }

    let mut dispatcher = EventDispatcher::from_config(&config)?;
    let mut store = SlotDataStore::new(config.decoder.max_hits_per_slot);
    let mut progress = Progress::new();

    let mismatched_events = match (&args.input, args.emulate) {
        (Some(path), _) => {
            info!(input = %path.display(), "decoding buffer file");
            let mut reader = CodaFileReader::open(path, config.decoder.max_event_length)?;
            let mut count = 0u64;
            while args.max_buffers.map_or(true, |max| count < max) {
                let buffer = match reader.next_buffer() {
                    Ok(Some(buffer)) => buffer,
                    Ok(None) => break,
                    Err(e) if e.is_recoverable() => continue,
                    Err(e) => return Err(e.into()),
                };
                count += 1;
                decode_one(&mut dispatcher, &buffer, &mut store)?;
                progress.tick(&dispatcher);
            }
            info!(
                buffers = reader.buffers_read(),
                words = reader.words_read(),
                "end of file"
            );
            None
        }
        (None, Some(events)) => {
            let events = args.max_buffers.map_or(events, |max| events.min(max));
            Some(run_emulation(
                &config,
                events,
                &mut dispatcher,
                &mut store,
                &mut progress,
            )?)
        }
        (None, None) => bail!("either --input or --emulate is required"),
    };

    let summary = Summary {
        counters: dispatcher.metrics().snapshot(),
        run: dispatcher.run_info().clone(),
        warnings: dispatcher.warning_summary(),
        elapsed_secs: progress.start.elapsed().as_secs_f64(),
        mismatched_events,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if summary.mismatched_events.unwrap_or(0) > 0 {
        bail!(
            "{} emulated events decoded differently from what was generated",
            summary.mismatched_events.unwrap_or(0)
        );
    }
    Ok(())
}

/// Decode one buffer; only a run-fatal error stops the tool
fn decode_one(
    dispatcher: &mut EventDispatcher,
    buffer: &[u32],
    store: &mut SlotDataStore,
) -> anyhow::Result<()> {
    match dispatcher.decode(buffer, store) {
        Ok(_) => Ok(()),
        Err(e) if e.is_fatal_for_run() => Err(e.into()),
        // already logged by the dispatcher
        Err(_) => Ok(()),
    }
}

/// Generate, decode and check `events` physics buffers inside one run
///
/// Returns the number of events whose decoded hits differ from the
/// generated ones.
fn run_emulation(
    config: &Config,
    events: u64,
    dispatcher: &mut EventDispatcher,
    store: &mut SlotDataStore,
    progress: &mut Progress,
) -> anyhow::Result<u64> {
    let mut emulator = BufferEmulator::new(&config.crate_map(), config.emulator.clone());
    info!(
        events,
        seed = config.emulator.seed,
        block_size = config.emulator.block_size,
        "decoding emulated buffers"
    );

    let prestart = emulator.prestart(1, 0);
    decode_one(dispatcher, &prestart, store)?;
    let go = emulator.go();
    decode_one(dispatcher, &go, store)?;

    let scaler_interval = u64::from(config.emulator.scaler_interval);
    let mut mismatched = 0;
    for i in 1..=events {
        let buffer = emulator.next_physics();
        decode_one(dispatcher, &buffer.words, store)?;
        if !matches_expected(store, &buffer.expected) {
            warn!(
                event_number = buffer.event_number,
                expected = buffer.expected.len(),
                decoded = store.num_hits(),
                "decoded hits differ from generated hits"
            );
            mismatched += 1;
        }

        if scaler_interval > 0 && i % scaler_interval == 0 {
            let scalers = emulator.scaler_event();
            decode_one(dispatcher, &scalers.words, store)?;
        }
        progress.tick(dispatcher);
    }

    let end = emulator.end();
    decode_one(dispatcher, &end, store)?;
    Ok(mismatched)
}

/// Compare the store with generated hits, slot by slot and in order
fn matches_expected(store: &SlotDataStore, expected: &[DecodedHit]) -> bool {
    let mut by_slot: BTreeMap<(u32, u32), Vec<DecodedHit>> = BTreeMap::new();
    for hit in expected {
        by_slot
            .entry((hit.crate_id, hit.slot))
            .or_default()
            .push(*hit);
    }

    store.num_hits() == expected.len()
        && by_slot.iter().all(|(&(crate_id, slot), hits)| {
            store
                .slot(crate_id, slot)
                .is_some_and(|data| data.hits() == hits.as_slice())
        })
}

fn print_summary(summary: &Summary) {
    let c = &summary.counters;
    println!("=== Decode Summary ===");
    println!("  Buffers:        {} ({} failed)", c.buffers, c.failed);
    println!("  Physics:        {}", c.physics);
    println!("  Scaler:         {}", c.scaler);
    println!("  EPICS:          {}", c.epics);
    println!("  Prescale:       {}", c.prescale);
    println!("  Control:        {}", c.control);
    println!("  Other:          {}", c.other);
    println!("  Hits:           {}", c.hits);
    println!("  Sub-events:     {}", c.sub_events);
    println!("  Words:          {}", c.words);
    println!("  Elapsed:        {:.3} s", summary.elapsed_secs);

    println!();
    println!("=== Run ===");
    println!("  Run Number:     {}", summary.run.run_number);
    println!("  Run Type:       {}", summary.run.run_type);
    println!("  Event Count:    {}", summary.run.event_count);

    if !summary.warnings.is_empty() {
        println!();
        println!("=== Warnings ===");
        for (warning, count) in &summary.warnings {
            println!("  {:<16}{}", format!("{:?}:", warning), count);
        }
    }

    if let Some(mismatched) = summary.mismatched_events {
        println!();
        if mismatched == 0 {
            println!("\x1b[32m✓ All emulated events decoded as generated\x1b[0m");
        } else {
            println!("\x1b[31m✗ {} emulated events mismatched\x1b[0m", mismatched);
        }
    }
}
