//!
//! This binary provides a CLI for reconstructing wire-plane detector events.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::redundant_closure_for_method_calls,
    clippy::manual_let_else,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};

use serde_json::json;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

use wiretrace_algorithms::{reconstruct_event, EventResult, SliceInput};
use wiretrace_core::geometry::{LinearDedx, UniformGeometry};
use wiretrace_core::session::{EventId, RecoSession};
use wiretrace_core::{RecoConfig, RecoSlice};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] wiretrace_core::ConfigError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Multi-pass trajectory reconstruction for wire-plane detectors.
#[derive(Parser)]
#[command(name = "wiretrace")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct sliced event files into trajectories and 3D objects
    Reconstruct {
        /// Input event file(s), each a JSON array of slices
        #[arg(required = true)]
        input: Vec<PathBuf>,

        /// Output file for the reconstruction summary (JSON)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Cut configuration file (JSON, see `wiretrace config`)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of reconstruction passes
        #[arg(long)]
        num_passes: Option<usize>,

        /// Worker threads (0 = one per core)
        #[arg(long, default_value = "0")]
        threads: usize,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show information about a sliced event file
    Info {
        /// Input event file
        input: PathBuf,
    },

    /// Print the default cut configuration as JSON
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Benchmark reconstruction on an event file
    Benchmark {
        /// Input event file
        input: PathBuf,

        /// Number of iterations
        #[arg(short, long, default_value = "3")]
        iterations: usize,
    },
}

/// Reads a sliced event file: a JSON array of slice inputs.
fn read_event(path: &Path) -> Result<Vec<SliceInput>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Loads the cut configuration, or the defaults when no file is given.
fn load_config(path: Option<&Path>) -> Result<RecoConfig> {
    let config = match path {
        Some(path) => {
            let reader = BufReader::new(File::open(path)?);
            serde_json::from_reader(reader)?
        }
        None => RecoConfig::default(),
    };
    Ok(config)
}

/// Summarizes one reconstructed slice for the JSON report.
fn slice_summary(slice: &RecoSlice) -> serde_json::Value {
    let trajectories: Vec<serde_json::Value> = slice
        .tjs
        .iter()
        .filter(|tj| !tj.is_retired())
        .map(|tj| {
            let (cryostat, tpc, plane) = tj.plane.decode();
            json!({
                "uid": tj.uid,
                "cryostat": cryostat,
                "tpc": tpc,
                "plane": plane,
                "points": tj.num_pts_with_charge(),
                "length_wires": tj.length_wires(),
                "total_charge": tj.tot_chg,
                "mcs_mom": tj.mcs_mom,
                "shape": format!("{:?}", tj.shape),
                "vertex_ids": tj.vtx_id,
            })
        })
        .collect();

    let pfps: Vec<serde_json::Value> = slice
        .pfps
        .iter()
        .filter(|p| p.id != 0)
        .map(|p| {
            json!({
                "uid": p.uid,
                "trajectory_uids": p.traj_uids,
                "shape": format!("{:?}", p.shape),
                "start": p.xyz[0],
                "end": p.xyz[1],
                "length": p.length(),
                "primary": p.primary,
            })
        })
        .collect();

    let showers: Vec<serde_json::Value> = slice
        .showers3
        .iter()
        .filter(|ss| ss.id != 0)
        .map(|ss| {
            json!({
                "uid": ss.uid,
                "start": ss.start,
                "length": ss.len,
                "open_angle": ss.open_angle,
                "energy": ss.energy,
                "best_plane": ss.best_plane,
            })
        })
        .collect();

    json!({
        "slice": slice.id,
        "valid": slice.is_valid,
        "hits": slice.hits.len(),
        "vertices_2d": slice.vtx2s.iter().filter(|vx| vx.is_valid()).count(),
        "vertices_3d": slice.vtx3s.iter().filter(|vx| vx.id != 0).count(),
        "trajectories": trajectories,
        "pfps": pfps,
        "showers_3d": showers,
    })
}

/// Summarizes one reconstructed event for the JSON report.
fn event_summary(path: &Path, result: &EventResult) -> serde_json::Value {
    let slices: Vec<serde_json::Value> = result.slices.iter().map(slice_summary).collect();
    let errors: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
    json!({
        "file": path.display().to_string(),
        "stats": result.stats,
        "errors": errors,
        "slices": slices,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Reconstruct {
            input,
            output,
            config,
            num_passes,
            threads,
            verbose,
        } => {
            // Reconstruction pipeline:
            // 1. Load the cut configuration
            // 2. Read each sliced event file
            // 3. Reconstruct all slices of an event in parallel
            // 4. Write the JSON summary

            let mut config = load_config(config.as_deref())?;
            if let Some(num_passes) = num_passes {
                config.num_passes = num_passes;
            }
            config.validate()?;

            if threads > 0 {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()?;
            }

            if verbose {
                eprintln!("Processing {} event file(s)...", input.len());
                eprintln!("Passes: {}", config.num_passes);
                eprintln!("Units per tick: {}", config.units_per_tick);
            }

            let geometry = UniformGeometry::default();
            let dedx = LinearDedx::default();

            let start = Instant::now();
            let mut summaries = Vec::with_capacity(input.len());
            let mut total_slices = 0usize;
            let mut total_trajs = 0usize;
            let mut total_pfps = 0usize;

            for (index, path) in input.iter().enumerate() {
                if verbose {
                    eprintln!("Reading: {}", path.display());
                }

                let inputs = read_event(path)?;
                let event = EventId {
                    event: index as u32 + 1,
                    ..EventId::default()
                };
                let session = RecoSession::new(event, &geometry, &dedx, config.clone())?;
                let result = reconstruct_event(&session, inputs);

                for err in &result.errors {
                    eprintln!("  slice skipped: {}", err);
                }
                if verbose {
                    eprintln!("  {} slices reconstructed", result.stats.valid_slices);
                    eprintln!("  {} trajectories", result.stats.trajectories);
                    eprintln!("  {} pfps, {} showers", result.stats.pfps, result.stats.showers_3d);
                }

                total_slices += result.stats.valid_slices;
                total_trajs += result.stats.trajectories;
                total_pfps += result.stats.pfps;
                summaries.push(event_summary(path, &result));
            }

            let elapsed = start.elapsed();

            if let Some(output) = output {
                if verbose {
                    eprintln!("Writing summary to: {}", output.display());
                }
                let mut writer = BufWriter::new(File::create(&output)?);
                serde_json::to_writer_pretty(&mut writer, &summaries)?;
                writer.flush()?;
            }

            println!(
                "Reconstructed {} event(s) in {:.2}s",
                input.len(),
                elapsed.as_secs_f64()
            );
            println!("Total slices: {}", total_slices);
            println!("Total trajectories: {}", total_trajs);
            println!("Total pfps: {}", total_pfps);
        }

        Commands::Info { input } => {
            let slices = read_event(&input)?;

            println!("File: {}", input.display());
            println!("Slices: {}", slices.len());

            let total_hits: usize = slices.iter().map(|s| s.hits.len()).sum();
            println!("Hits: {}", total_hits);

            for slice in &slices {
                let mut planes: Vec<u32> = slice.hits.iter().map(|h| h.plane.0).collect();
                planes.sort_unstable();
                planes.dedup();

                println!(
                    "Slice {}: {} hits, {} plane(s), {} dead wire(s)",
                    slice.id,
                    slice.hits.len(),
                    planes.len(),
                    slice.dead_wires.len()
                );

                if !slice.hits.is_empty() {
                    let min_tick = slice.hits.iter().map(|h| h.tick).fold(f64::INFINITY, f64::min);
                    let max_tick = slice
                        .hits
                        .iter()
                        .map(|h| h.tick)
                        .fold(f64::NEG_INFINITY, f64::max);
                    println!("  Tick range: {:.1} - {:.1}", min_tick, max_tick);
                }
            }
        }

        Commands::Config { output } => {
            let config = RecoConfig::default();
            let text = serde_json::to_string_pretty(&config)?;
            match output {
                Some(path) => {
                    let mut writer = BufWriter::new(File::create(&path)?);
                    writer.write_all(text.as_bytes())?;
                    writer.write_all(b"\n")?;
                    writer.flush()?;
                }
                None => println!("{}", text),
            }
        }

        Commands::Benchmark { input, iterations } => {
            let base_inputs = read_event(&input)?;
            let total_hits: usize = base_inputs.iter().map(|s| s.hits.len()).sum();

            println!(
                "Benchmarking with {} slices, {} hits, {} iterations",
                base_inputs.len(),
                total_hits,
                iterations
            );

            let geometry = UniformGeometry::default();
            let dedx = LinearDedx::default();
            let session =
                RecoSession::new(EventId::default(), &geometry, &dedx, RecoConfig::default())?;

            // Warmup
            let _ = reconstruct_event(&session, base_inputs.clone());

            let mut times = Vec::with_capacity(iterations);
            for _ in 0..iterations {
                let inputs = base_inputs.clone();
                let start = Instant::now();
                let result = reconstruct_event(&session, inputs);
                times.push(start.elapsed().as_secs_f64() * 1000.0);
                std::hint::black_box(result);
            }

            let min_time = times.iter().fold(f64::INFINITY, |a, &b| a.min(b));
            let max_time = times.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
            let mean_time = times.iter().sum::<f64>() / times.len() as f64;

            println!(
                "{:<15} | {:<15} | {:<15}",
                "Mean Time (ms)", "Min Time (ms)", "Max Time (ms)"
            );
            println!("{:-<51}", "");
            println!(
                "{:<15.2} | {:<15.2} | {:<15.2}",
                mean_time, min_time, max_time
            );
        }
    }

    Ok(())
}
