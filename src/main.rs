// SPDX-License-Identifier: Apache-2.0 OR MIT
use anyhow::Result;
use clap::Parser;
use fabric_exerciser::config::{FeatureFlags, RunConfig};
use fabric_exerciser::logging::{Consumer, Facility, LogRegistry, Severity, StderrSink};
use fabric_exerciser::profile::Topology;
use fabric_exerciser::supervisor;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Topology to load: normal or ate
    #[arg(value_parser = parse_topology)]
    topology: Topology,

    /// JSON5 configuration overrides
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log-file friendly statistics output (no screen clearing)
    #[arg(long)]
    daemon: bool,

    /// Steady-state duration in seconds (0 = run until Ctrl+C)
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// TX workers per port
    #[arg(long)]
    tx_cores: Option<usize>,

    /// RX workers per port
    #[arg(long)]
    rx_cores: Option<usize>,

    /// Token-bucket window mode: one frame per VL-ID per window
    #[arg(long)]
    window_pacing: bool,

    /// Run the latency sub-test before steady state
    #[arg(long)]
    latency_test: bool,

    /// IMIX frame-size mixing
    #[arg(long)]
    imix: bool,

    /// Disable TX rate shaping entirely
    #[arg(long)]
    no_rate_limit: bool,

    /// Disable the PTP slave engine
    #[arg(long)]
    no_ptp: bool,

    /// Disable the process health monitor
    #[arg(long)]
    no_health: bool,

    /// Legacy per-server-port statistics instead of the DTN view
    #[arg(long)]
    server_stats: bool,

    /// Wire ports through in-memory rings (bench self-test, no hardware)
    #[arg(long)]
    loopback: bool,

    /// Target Gbps for fast-class ports
    #[arg(long)]
    gbps_fast: Option<f64>,

    /// Target Gbps for mid-class ports
    #[arg(long)]
    gbps_mid: Option<f64>,

    /// Target Gbps for slow-class ports
    #[arg(long)]
    gbps_slow: Option<f64>,

    /// Minimum log severity, by name or syslog code (emergency..debug, 0-7)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_topology(value: &str) -> Result<Topology, String> {
    match value.to_ascii_lowercase().as_str() {
        "normal" => Ok(Topology::Normal),
        "ate" => Ok(Topology::Ate),
        other => Err(format!("unknown topology '{other}' (expected: normal, ate)")),
    }
}

fn build_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load_from_file(path)?,
        None => RunConfig::default(),
    };
    config.topology = args.topology;
    config.daemon |= args.daemon;
    config.loopback |= args.loopback;
    if args.duration > 0 {
        config.duration_secs = args.duration;
    }
    if let Some(tx) = args.tx_cores {
        config.tx_queues = tx;
    }
    if let Some(rx) = args.rx_cores {
        config.rx_queues = rx;
    }
    if let Some(gbps) = args.gbps_fast {
        config.gbps_fast = gbps;
    }
    if let Some(gbps) = args.gbps_mid {
        config.gbps_mid = gbps;
    }
    if let Some(gbps) = args.gbps_slow {
        config.gbps_slow = gbps;
    }
    config.features = FeatureFlags {
        window_pacing: args.window_pacing || config.features.window_pacing,
        latency_test: args.latency_test || config.features.latency_test,
        imix: args.imix || config.features.imix,
        rate_limiter: !args.no_rate_limit && config.features.rate_limiter,
        ptp: !args.no_ptp && config.features.ptp,
        health_monitor: !args.no_health && config.features.health_monitor,
        dtn_stats: !args.server_stats && config.features.dtn_stats,
    };
    config.validate()?;
    Ok(config)
}

fn main() {
    let args = Args::parse();

    let severity = args
        .log_level
        .parse::<Severity>()
        .unwrap_or(Severity::Info);
    let registry = LogRegistry::new(severity);
    let consumer = Consumer::spawn(registry.rings(), StderrSink);

    let result = build_config(&args).and_then(|config| supervisor::run(&config, &registry));

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            registry
                .logger(Facility::Supervisor)
                .critical(Facility::Supervisor, &format!("fatal: {e:#}"));
            1
        }
    };
    consumer.shutdown();
    std::process::exit(code);
}
