use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use beacon_sim_core::{Metrics, SimError, Simulator, SimulatorBuilder};
use beacon_sim_types::{SchedulerMode, SimConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Beacon-exchange network simulator")]
struct Args {
    /// Scheduler policy applied to every buoy.
    #[arg(long, default_value = "static")]
    mode: SchedulerMode,

    /// Simulation end time, in simulated seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// RNG seed; omitted falls back to a wall-clock-derived seed.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    world_width: Option<f64>,
    #[arg(long)]
    world_height: Option<f64>,

    #[arg(long)]
    mobile_buoy_count: Option<usize>,
    #[arg(long)]
    fixed_buoy_count: Option<usize>,

    /// Fixed policy period and the `BI_min` floor used by the adaptive policies.
    #[arg(long)]
    static_interval: Option<f64>,

    /// Bypass probabilistic loss: every in-range receiver always delivers.
    #[arg(long, default_value_t = false)]
    ideal: bool,

    /// Population starts at 2 buoys and grows linearly to the full count.
    #[arg(long, default_value_t = false)]
    ramp: bool,

    /// Optional JSON file of `[x, y]` pairs seeding buoy start positions.
    #[arg(long)]
    positions_file: Option<PathBuf>,

    /// Optional TOML file of `SimConfig` overrides, applied before CLI flags.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Recorded in the summary output only; useful as a sweep label.
    #[arg(long)]
    density: Option<f64>,

    /// Output CSV path; defaults to a name derived from run parameters.
    #[arg(long)]
    result_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    info!("beacon-sim starting");

    let cfg = args.build_config()?;
    let seed = args.seed.unwrap_or_else(seed_from_wall_clock);
    let positions = args.load_positions()?;

    if cfg.ramp_scenario {
        if let Some(positions) = &positions {
            anyhow::ensure!(
                positions.len() >= 2,
                "--ramp requires a positions file with at least 2 entries"
            );
        }
    }

    let sim = Simulator::new(SimulatorBuilder { cfg: cfg.clone(), seed, positions });

    let real_start = Instant::now();
    let (sim_time, metrics) = sim.run();
    let real_duration = real_start.elapsed().as_secs_f64();
    let speedup = if real_duration > 0.0 { sim_time / real_duration } else { f64::INFINITY };
    info!(
        simulated_seconds = sim_time,
        real_seconds = real_duration,
        speedup,
        "simulation complete"
    );

    if cfg.ramp_scenario {
        write_time_series_csv(&args.result_file_path(&cfg, true), &metrics)?;
    } else {
        write_summary_csv(&args.result_file_path(&cfg, false), &metrics, &cfg, sim_time)?;
    }

    Ok(())
}

impl Args {
    fn build_config(&self) -> Result<SimConfig> {
        let mut cfg = if let Some(path) = &self.config {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&content).context("failed to parse config file")?
        } else {
            SimConfig::default()
        };

        cfg.mode = self.mode;
        if let Some(v) = self.duration {
            cfg.duration = v;
        }
        if let Some(v) = self.world_width {
            cfg.world_width = v;
        }
        if let Some(v) = self.world_height {
            cfg.world_height = v;
        }
        if let Some(v) = self.mobile_buoy_count {
            cfg.mobile_buoy_count = v;
        }
        if let Some(v) = self.fixed_buoy_count {
            cfg.fixed_buoy_count = v;
        }
        if let Some(v) = self.static_interval {
            cfg.static_interval = v;
        }
        cfg.ideal_channel = self.ideal;
        cfg.ramp_scenario = self.ramp;
        cfg.seed = self.seed;
        cfg.density = self.density;

        cfg.validate().map_err(SimError::InvalidConfig)?;
        Ok(cfg)
    }

    fn load_positions(&self) -> Result<Option<Vec<(f64, f64)>>> {
        let Some(path) = &self.positions_file else {
            return Ok(None);
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read positions file {}", path.display()))?;
        let raw: Vec<[f64; 2]> =
            serde_json::from_str(&content).context("failed to parse positions file as JSON")?;
        Ok(Some(raw.into_iter().map(|p| (p[0], p[1])).collect()))
    }

    fn result_file_path(&self, cfg: &SimConfig, time_series: bool) -> PathBuf {
        if let Some(path) = &self.result_file {
            return path.clone();
        }
        let suffix = if time_series { "_timeseries" } else { "" };
        let name = format!(
            "{}_{}x{}_mob{}_fix{}{}.csv",
            cfg.mode,
            cfg.world_width as i64,
            cfg.world_height as i64,
            cfg.mobile_buoy_count,
            cfg.fixed_buoy_count,
            suffix
        );
        Path::new("metrics").join("test_results").join(name)
    }
}

fn seed_from_wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn write_summary_csv(path: &Path, metrics: &Metrics, cfg: &SimConfig, sim_time: f64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }
    let mut out = String::from("Metric,Value\n");
    for (key, value) in metrics.summary_rows(cfg, sim_time) {
        out.push_str(&key);
        out.push(',');
        out.push_str(&value);
        out.push('\n');
    }
    fs::write(path, out).with_context(|| format!("failed to write summary CSV {}", path.display()))?;
    info!(path = %path.display(), "metrics exported");
    Ok(())
}

fn write_time_series_csv(path: &Path, metrics: &Metrics) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }
    let mut out = String::from("time,delivery_ratio,n_buoys,avg_unique_nodes,avg_neighbors\n");
    for sample in metrics.time_series() {
        out.push_str(&format!(
            "{:.6},{:.6},{},{:.6},{:.6}\n",
            sample.time, sample.delivery_ratio, sample.n_buoys, sample.avg_unique_nodes, sample.avg_neighbors
        ));
    }
    fs::write(path, out)
        .with_context(|| format!("failed to write time series CSV {}", path.display()))?;
    info!(path = %path.display(), "time series exported");
    Ok(())
}
