//! Command-line front end for the NoC performance estimator.
//!
//! Loads a workload (npe JSON or tt-metal noc trace), runs the simulation,
//! prints the per-device summary, and optionally emits the stats and
//! timeline JSON files.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use nocsim::config::SimConfig;
use nocsim::engine::Engine;
use nocsim::error::{SimError, SimResult};
use nocsim::ingest;
use nocsim::stats::SimStats;

#[derive(Parser, Debug)]
#[command(
    name = "nocsim",
    about = "Congestion-aware NoC performance estimator for tiled AI accelerators"
)]
struct Cli {
    /// Number of cycles a simulation timestep spans
    #[arg(short = 'c', long, default_value_t = 256)]
    cycles_per_timestep: u32,

    /// Name of device to be simulated
    #[arg(short = 'd', long, default_value = "wormhole_b0")]
    device: String,

    /// Congestion model to use (options: 'none', 'fast')
    #[arg(long = "cong-model", default_value = "fast")]
    cong_model: String,

    /// Workload file: npe JSON workload or tt-metal noc trace
    #[arg(short = 'w', long)]
    workload: Option<PathBuf>,

    /// Treat the workload file as a tt-metal noc trace
    #[arg(long)]
    workload_is_noc_trace: bool,

    /// Print a pointer to the congestion TUI after the run
    #[arg(long)]
    enable_cong_viz: bool,

    /// Emit detailed stats as a JSON file
    #[arg(short = 'e', long)]
    emit_stats_as_json: bool,

    /// Filepath for detailed stat JSON output
    #[arg(long, default_value = "npe_stats.json")]
    stats_json_filepath: String,

    /// Emit the timeline file consumed by the viz binary
    #[arg(long)]
    emit_timeline_file: bool,

    /// Filepath for the timeline output (default derives from the workload name)
    #[arg(long, default_value = "")]
    timeline_filepath: String,

    /// Disable injection rate inference based on each transfer's src core type
    #[arg(long)]
    no_injection_rate_inference: bool,

    /// Multiply every phase cycle offset by this factor (0 = off)
    #[arg(long, default_value_t = 0.0)]
    scale_workload_schedule: f32,

    /// Drop unicast transfers whose src == dst before simulating
    #[arg(long)]
    remove_local_unicast_transfers: bool,

    /// Skip the second congestion-free pass that estimates congestion impact
    #[arg(long)]
    no_estimate_cong_impact: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn to_config(&self) -> SimConfig {
        SimConfig {
            device_name: self.device.clone(),
            congestion_model_name: self.cong_model.clone(),
            workload_json: self
                .workload
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            cycles_per_timestep: self.cycles_per_timestep,
            verbosity: self.verbose.min(3),
            enable_visualizations: self.enable_cong_viz,
            infer_injection_rate_from_src: !self.no_injection_rate_inference,
            emit_stats_as_json: self.emit_stats_as_json,
            estimate_cong_impact: !self.no_estimate_cong_impact,
            workload_is_noc_trace: self.workload_is_noc_trace,
            remove_localized_unicast_transfers: self.remove_local_unicast_transfers,
            stats_json_filepath: self.stats_json_filepath.clone(),
            emit_timeline_file: self.emit_timeline_file || self.enable_cong_viz,
            timeline_filepath: self.timeline_filepath.clone(),
            scale_workload_schedule: self.scale_workload_schedule,
        }
    }
}

fn print_div(title: &str) {
    let bar_len = 80usize.saturating_sub(title.len() + 4);
    println!("\n-- {} {}", title, "-".repeat(bar_len));
}

fn run(cli: &Cli) -> SimResult<()> {
    let cfg = cli.to_config();
    let engine = Engine::new(&cfg)?;

    print_div("Build Workload");
    let Some(workload_path) = cli.workload.as_ref() else {
        return Err(SimError::InvalidConfig(
            "no workload file provided; pass one with --workload".to_string(),
        ));
    };
    let workload = ingest::create_workload_from_json(
        workload_path,
        engine.model(),
        cfg.workload_is_noc_trace,
    )?;

    print_div("Run Perf Estimation");
    let stats: SimStats = engine.run(workload, &cfg)?;

    print_div("Stats");
    print!("{}", stats.report(cfg.verbosity > 0));

    if cfg.emit_stats_as_json {
        let summary = serde_json::to_string_pretty(&stats.summary_json())
            .expect("summary json is always serializable");
        if let Err(err) = std::fs::write(&cfg.stats_json_filepath, summary) {
            error!("was not able to write stats file '{}': {err}", cfg.stats_json_filepath);
        } else {
            println!("\nstats written to {}", cfg.stats_json_filepath);
        }
    }
    if cfg.enable_visualizations {
        let timeline = nocsim::timeline::timeline_filepath(&cfg);
        println!("\nview congestion with: cargo run --bin viz -- {}", timeline.display());
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
