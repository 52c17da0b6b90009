// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Supervisor: owns bring-up, the warm-up window, the run loop, and
//! shutdown.
//!
//! Bring-up failures are fatal and tear down in reverse order; everything
//! after workers start is counters. SIGINT maps to the shared stop flag
//! and is never an error. Workers are joined with a bounded timeout; a
//! hung worker is reported and leaked while the rest of the process shuts
//! down.

use crate::clock::{Clock, MonotonicClock};
use crate::config::RunConfig;
use crate::dtn::{Aggregator, DtnTable, PortView, StatsMode};
use crate::latency::{self, LatencyCollector, LatencyConfig};
use crate::logging::{Facility, LogRegistry, Logger};
use crate::packet::PrbsCatalog;
use crate::port::{MemQueue, PollModePort, QueueHandle};
use crate::profile::{Profile, VlBlock, FLOWS_PER_PORT, VL_BLOCK_LEN};
use crate::ptp::{PtpEngine, PTP_QUEUE};
use crate::raw::RawSocketPort;
use crate::stats::{RxStats, TxStats};
use crate::tracker::PortTrackerTable;
use crate::worker::rx::{self, RxContext, RxWorkerParams};
use crate::worker::tx::{self, Pacing, TxFlowSpec, TxWorkerParams};
use crate::worker::{new_stop_flag, StopFlag, WorkerHandle};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Workers get this long to exit before being reported hung.
const JOIN_TIMEOUT: Duration = Duration::from_millis(500);

static SIGNAL_STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_stop_signal(_sig: libc::c_int) {
    SIGNAL_STOP.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    let action = SigAction::new(
        SigHandler::Handler(on_stop_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action).context("install SIGINT handler")?;
        sigaction(Signal::SIGTERM, &action).context("install SIGTERM handler")?;
    }
    Ok(())
}

/// Everything built during bring-up for one run.
struct Runtime {
    profile: Arc<Profile>,
    prbs: Arc<PrbsCatalog>,
    dtn: Arc<DtnTable>,
    trackers: BTreeMap<u16, Arc<PortTrackerTable>>,
    rx_stats: BTreeMap<u16, Arc<RxStats>>,
    ports: BTreeMap<u16, PollModePort>,
    latency_collector: Arc<LatencyCollector>,
    clock: Arc<dyn Clock>,
}

fn build_runtime(config: &RunConfig, logger: &Logger) -> Result<Runtime> {
    let profile = Profile::load(config.topology, config.features.window_pacing);
    profile.validate().context("port map validation")?;

    let mut prbs = PrbsCatalog::new();
    for port in &profile.poll_ports {
        for queue in 0..FLOWS_PER_PORT as u16 {
            prbs.insert(port.port_id, queue);
        }
    }
    for raw in &profile.raw_ports {
        prbs.insert(raw.port_id, 0);
    }
    logger.info(
        Facility::Supervisor,
        &format!("PRBS caches built: {} streams", prbs.len()),
    );

    let dtn = Arc::new(DtnTable::from_profile(&profile));

    let mut trackers = BTreeMap::new();
    let mut rx_stats = BTreeMap::new();
    for port in &profile.poll_ports {
        trackers.insert(port.port_id, Arc::new(PortTrackerTable::new()));
        rx_stats.insert(port.port_id, Arc::new(RxStats::new()));
    }
    for raw in &profile.raw_ports {
        trackers.insert(raw.port_id, Arc::new(PortTrackerTable::new()));
        rx_stats.insert(raw.port_id, Arc::new(RxStats::new()));
    }

    let ports = if config.loopback {
        loopback_ports(&profile, config)
    } else {
        open_hardware_ports(&profile, config, logger)?
    };

    Ok(Runtime {
        profile: Arc::new(profile),
        prbs: Arc::new(prbs),
        dtn,
        trackers,
        rx_stats,
        ports,
        latency_collector: Arc::new(LatencyCollector::new()),
        clock: Arc::new(MonotonicClock),
    })
}

/// Wire every poll port's TX queues straight into its peer's RX queues
/// through in-memory rings. Bench self-test without hardware.
fn loopback_ports(profile: &Profile, config: &RunConfig) -> BTreeMap<u16, PollModePort> {
    const RING_DEPTH: usize = 8192;
    let mut tx_sides: BTreeMap<u16, Vec<QueueHandle>> = BTreeMap::new();
    let mut rx_sides: BTreeMap<u16, Vec<QueueHandle>> = BTreeMap::new();
    for port in &profile.poll_ports {
        let peer = profile
            .peer_rx_port(port.port_id)
            .expect("validated profile has peers");
        for q in 0..config.rx_queues.max(config.tx_queues) {
            let (tx, rx) = MemQueue::pair(RING_DEPTH);
            if q < config.tx_queues {
                tx_sides
                    .entry(port.port_id)
                    .or_default()
                    .push(Box::new(tx));
            }
            if q < config.rx_queues {
                rx_sides.entry(peer).or_default().push(Box::new(rx));
            }
        }
    }
    let mut ports = BTreeMap::new();
    for port in &profile.poll_ports {
        let tx = tx_sides.remove(&port.port_id).unwrap_or_default();
        let rx = rx_sides.remove(&port.port_id).unwrap_or_default();
        ports.insert(port.port_id, PollModePort::new(port.port_id, tx, rx));
    }
    ports
}

fn open_hardware_ports(
    profile: &Profile,
    config: &RunConfig,
    logger: &Logger,
) -> Result<BTreeMap<u16, PollModePort>> {
    let known = pnet::datalink::interfaces();
    let mut ports = BTreeMap::new();
    for port in &profile.poll_ports {
        let interface = config
            .interface_for(port.port_id)
            .with_context(|| format!("no interface configured for port {}", port.port_id))?;
        if !known.iter().any(|i| i.name == interface) {
            anyhow::bail!(
                "port {}: interface '{interface}' is not present on this host",
                port.port_id
            );
        }
        let opened =
            PollModePort::open(port.port_id, interface, config.tx_queues, config.rx_queues)
                .with_context(|| format!("bring-up of port {}", port.port_id))?;
        logger.notice(
            Facility::Network,
            &format!(
                "port {} on {interface}: {} TX / {} RX queues",
                port.port_id, config.tx_queues, config.rx_queues
            ),
        );
        ports.insert(port.port_id, opened);
    }
    Ok(ports)
}

fn pacing_for(config: &RunConfig) -> Pacing {
    if config.features.window_pacing {
        Pacing::Window(config.window_ns)
    } else if config.features.rate_limiter {
        Pacing::Bucket
    } else {
        Pacing::Unlimited
    }
}

fn rx_context(runtime: &Runtime, config: &RunConfig, port_id: u16, raw: bool) -> RxContext {
    let sources = if raw {
        runtime
            .profile
            .raw_port(port_id)
            .map(|r| r.rx_sources.clone())
            .unwrap_or_default()
    } else {
        runtime.profile.rx_sources_for_poll_port(port_id)
    };
    RxContext {
        port_id,
        sources,
        profile: Arc::clone(&runtime.profile),
        prbs: Arc::clone(&runtime.prbs),
        trackers: Arc::clone(&runtime.trackers[&port_id]),
        stats: Arc::clone(&runtime.rx_stats[&port_id]),
        dtn: config.features.dtn_stats.then(|| Arc::clone(&runtime.dtn)),
        latency: Some(Arc::clone(&runtime.latency_collector)),
        clock: Arc::clone(&runtime.clock),
    }
}

/// Run the whole test. Returns once the stop signal (or the configured
/// duration) has drained the workers.
pub fn run(config: &RunConfig, registry: &LogRegistry) -> Result<()> {
    config.validate().context("configuration")?;
    let logger = registry.logger(Facility::Supervisor);
    install_signal_handlers()?;
    SIGNAL_STOP.store(false, Ordering::SeqCst);

    logger.notice(
        Facility::Supervisor,
        &format!(
            "bring-up: topology {:?}, {} TX / {} RX queues per port{}",
            config.topology,
            config.tx_queues,
            config.rx_queues,
            if config.loopback { ", loopback wiring" } else { "" }
        ),
    );

    let mut runtime = build_runtime(config, &logger)?;
    let stop = new_stop_flag();
    let pacing = pacing_for(config);

    // Latency sub-test runs while the supervisor still owns every queue.
    if config.features.latency_test {
        let latency_logger = registry.logger(Facility::Latency);
        let results = latency::run_test(
            &mut runtime.ports,
            &runtime.profile,
            &runtime.clock,
            LatencyConfig {
                probes_per_flow: config.latency_probes,
                timeout: Duration::from_secs(config.latency_timeout_secs),
            },
            &latency_logger,
        );
        let lost = results.iter().filter(|r| r.timed_out()).count();
        logger.notice(
            Facility::Supervisor,
            &format!(
                "latency sub-test done: {} flows, {} timed out",
                results.len(),
                lost
            ),
        );
    }

    let mut handles: Vec<WorkerHandle> = Vec::new();
    let mut views: Vec<PortView> = Vec::new();
    let mut next_core = 0usize;
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let mut alloc_core = || {
        let core = next_core % cores;
        next_core += 1;
        Some(core)
    };

    // PTP engine: a dedicated thread owning one extra queue pair per port.
    let ptp_engine = if config.features.ptp && !config.loopback {
        Some(Arc::new(PtpEngine::from_dtn_table(
            &runtime.dtn,
            registry.logger(Facility::Ptp),
        )))
    } else {
        None
    };

    // RX workers first so nothing transmitted is missed.
    let port_ids: Vec<u16> = runtime.ports.keys().copied().collect();
    for &port_id in &port_ids {
        let port = runtime.ports.get_mut(&port_id).expect("port present");
        let rx_queues = std::mem::take(&mut port.rx_queues);
        let mut tx_sw: Vec<Arc<TxStats>> = Vec::new();
        for (queue_id, queue) in rx_queues.into_iter().enumerate() {
            let params = RxWorkerParams {
                queue_id: queue_id as u16,
                ctx: rx_context(&runtime, config, port_id, false),
                ptp: None,
            };
            let worker_logger = registry.logger(Facility::RxWorker);
            let stop_flag = Arc::clone(&stop);
            handles.push(WorkerHandle::spawn(
                format!("rx-p{port_id}q{queue_id}"),
                alloc_core(),
                logger.clone(),
                move || rx::run(params, queue, stop_flag, worker_logger),
            ));
        }

        // TX workers: VLAN slots striped across the configured queues.
        let port_profile = *runtime
            .profile
            .poll_port(port_id)
            .expect("profile covers open ports");
        let class = runtime.profile.port_class(port_id);
        let flow_rate = config.flow_rate_mbps(class);
        let port = runtime.ports.get_mut(&port_id).expect("port present");
        let tx_queues = std::mem::take(&mut port.tx_queues);
        let tx_queue_count = tx_queues.len().max(1);
        for (queue_id, queue) in tx_queues.into_iter().enumerate() {
            let mut flows = Vec::new();
            for slot in (queue_id..FLOWS_PER_PORT).step_by(tx_queue_count) {
                flows.push(TxFlowSpec {
                    vlan: Some(port_profile.tx_vlans[slot]),
                    vl: VlBlock::contiguous(port_profile.tx_vl_ids[slot], VL_BLOCK_LEN),
                    rate_mbps: flow_rate,
                    prbs: runtime
                        .prbs
                        .get_shared(port_id, slot as u16)
                        .expect("catalog covers poll queues"),
                });
            }
            let mut ext_flows = Vec::new();
            if !config.loopback {
                if let Some(ext) = runtime.profile.ext_tx_for_port(port_id) {
                    for target in ext.targets.iter().filter(|t| t.queue_id == queue_id as u16) {
                        ext_flows.push(TxFlowSpec {
                            vlan: Some(target.vlan_id),
                            vl: target.vl,
                            rate_mbps: target.rate_mbps,
                            prbs: runtime
                                .prbs
                                .get_shared(port_id, target.queue_id)
                                .expect("catalog covers poll queues"),
                        });
                    }
                }
            }
            let stats = Arc::new(TxStats::new());
            tx_sw.push(Arc::clone(&stats));
            let params = TxWorkerParams {
                port_id,
                queue_id: queue_id as u16,
                flows,
                ext_flows,
                pacing,
                imix: config.features.imix,
                frame_len: config.frame_len,
                stats,
                phase_slot: port_id * tx_queue_count as u16 + queue_id as u16,
                phase_total: (runtime.ports.len() * tx_queue_count) as u16,
            };
            let worker_logger = registry.logger(Facility::TxWorker);
            let stop_flag = Arc::clone(&stop);
            let clock = Arc::clone(&runtime.clock);
            handles.push(WorkerHandle::spawn(
                format!("tx-p{port_id}q{queue_id}"),
                alloc_core(),
                logger.clone(),
                move || tx::run(params, queue, clock, stop_flag, worker_logger),
            ));
        }

        let port = runtime.ports.get(&port_id).expect("port present");
        views.push(PortView {
            port_id,
            tx_queues: port.tx_counters.clone(),
            rx_queues: port.rx_counters.clone(),
            sw: Arc::clone(&runtime.rx_stats[&port_id]),
            tx_sw,
        });
    }

    // Raw-socket ports: blocking threads, no pinning.
    let mut raw_ports: Vec<RawSocketPort> = Vec::new();
    if !config.loopback {
        for raw_profile in runtime.profile.raw_ports.clone() {
            let ctx = rx_context(&runtime, config, raw_profile.port_id, true);
            let mut raw = RawSocketPort::start(
                &raw_profile,
                ctx,
                pacing,
                config.frame_len,
                Arc::clone(&runtime.clock),
                Arc::clone(&stop),
                registry.logger(Facility::RawSocket),
            )
            .with_context(|| format!("bring-up of raw port {}", raw_profile.port_id))?;
            handles.extend(raw.take_handles());
            views.push(PortView {
                port_id: raw.port_id,
                tx_queues: vec![Arc::clone(&raw.tx_counters)],
                rx_queues: vec![Arc::clone(&raw.rx_counters)],
                sw: Arc::clone(&raw.stats),
                tx_sw: vec![Arc::clone(&raw.tx_stats)],
            });
            raw_ports.push(raw);
        }
    }

    // PTP thread rides one extra queue pair per port (queue 5 analog).
    if let Some(engine) = &ptp_engine {
        let mut ptp_queues: Vec<(u16, QueueHandle)> = Vec::new();
        for port in &runtime.profile.poll_ports {
            if let Some(interface) = config.interface_for(port.port_id) {
                let queue = crate::port::AfPacketQueue::open(interface, None)
                    .with_context(|| format!("PTP queue on port {}", port.port_id))?;
                ptp_queues.push((port.port_id, Box::new(queue)));
            }
        }
        let engine = Arc::clone(engine);
        let stop_flag = Arc::clone(&stop);
        let clock = Arc::clone(&runtime.clock);
        let ptp_logger = registry.logger(Facility::Ptp);
        handles.push(WorkerHandle::spawn(
            format!("ptp-q{PTP_QUEUE}"),
            None,
            logger.clone(),
            move || run_ptp_loop(engine, ptp_queues, clock, stop_flag, ptp_logger),
        ));
    }

    // Health monitor.
    if config.features.health_monitor {
        let stop_flag = Arc::clone(&stop);
        let health_logger = registry.logger(Facility::Health);
        handles.push(WorkerHandle::spawn(
            "health".into(),
            None,
            logger.clone(),
            move || run_health_monitor(stop_flag, health_logger),
        ));
    }

    logger.notice(
        Facility::Supervisor,
        &format!("{} workers running", handles.len()),
    );

    // Warm-up, then steady state.
    let mode = if config.features.dtn_stats {
        StatsMode::Dtn
    } else {
        StatsMode::Server
    };
    let mut aggregator = Aggregator::new(mode, config.daemon, Arc::clone(&runtime.dtn), views);
    let interval = Duration::from_secs(config.stats_interval_secs);

    let mut elapsed = 0u64;
    let mut warmed_up = config.warmup_secs == 0;
    if warmed_up {
        logger.notice(Facility::Supervisor, "warm-up skipped");
    }
    loop {
        if SIGNAL_STOP.load(Ordering::SeqCst) {
            logger.notice(Facility::Supervisor, "stop signal received");
            break;
        }
        std::thread::sleep(interval);
        elapsed += config.stats_interval_secs;

        if !warmed_up && elapsed >= config.warmup_secs {
            // Counters reset exactly once, at the end of the window.
            aggregator.reset_counters();
            for tracker in runtime.trackers.values() {
                tracker.reset();
            }
            warmed_up = true;
            elapsed = 0;
            logger.notice(Facility::Supervisor, "warm-up complete, counters reset");
            continue;
        }

        print!("{}", aggregator.render_tick(warmed_up, elapsed));

        if warmed_up && config.duration_secs > 0 && elapsed >= config.duration_secs {
            logger.notice(Facility::Supervisor, "configured duration reached");
            break;
        }
    }

    // Shutdown: flip the flag, drain, join with a bounded timeout.
    stop.store(true, Ordering::Relaxed);
    let mut hung = 0;
    for handle in handles {
        let name = handle.name.clone();
        if !handle.join_timeout(JOIN_TIMEOUT) {
            hung += 1;
            logger.warning(
                Facility::Supervisor,
                &format!("worker {name} did not exit within {JOIN_TIMEOUT:?}"),
            );
        }
    }
    drop(raw_ports);

    for warning in aggregator.warnings() {
        logger.warning(Facility::Aggregator, &warning);
    }
    logger.notice(
        Facility::Supervisor,
        &format!(
            "shutdown complete{}",
            if hung > 0 {
                format!(" ({hung} workers hung)")
            } else {
                String::new()
            }
        ),
    );
    Ok(())
}

/// PTP loop: drain each port's PTP queue, advance timers, transmit
/// Delay_Reqs on the session's TX port.
fn run_ptp_loop(
    engine: Arc<PtpEngine>,
    mut queues: Vec<(u16, QueueHandle)>,
    clock: Arc<dyn Clock>,
    stop: StopFlag,
    logger: Logger,
) {
    use crate::packet::{peek_ethertype, ETHERTYPE_PTP};
    logger.notice(
        Facility::Ptp,
        &format!("engine up over {} port queues", queues.len()),
    );
    let mut frames: Vec<Vec<u8>> = Vec::with_capacity(crate::BURST_SIZE);
    while !stop.load(Ordering::Relaxed) {
        for (port_id, queue) in queues.iter_mut() {
            frames.clear();
            queue.rx_burst(&mut frames, crate::BURST_SIZE);
            for frame in &frames {
                if let Some((vlan, ethertype)) = peek_ethertype(frame) {
                    if ethertype == ETHERTYPE_PTP {
                        engine.on_frame(*port_id, vlan, frame, clock.now());
                    }
                }
            }
        }
        for request in engine.poll_timers(clock.now()) {
            if let Some((_, queue)) = queues.iter_mut().find(|(p, _)| *p == request.port) {
                let burst = [request.frame];
                if queue.tx_burst(&burst) == 0 {
                    logger.warning(
                        Facility::Ptp,
                        &format!("Delay_Req enqueue refused on port {}", request.port),
                    );
                }
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    let converged = engine
        .snapshot()
        .iter()
        .filter(|s| s.exchanges > 0)
        .count();
    logger.notice(
        Facility::Ptp,
        &format!("engine down: {converged}/{} sessions exchanged", crate::ptp::PTP_SESSION_COUNT),
    );
}

/// Low-rate process self-check: RSS growth and CPU load via sysinfo.
fn run_health_monitor(stop: StopFlag, logger: Logger) {
    use sysinfo::{Pid, ProcessesToUpdate, System};
    let mut sys = System::new();
    let pid = Pid::from(std::process::id() as usize);
    let mut growth_streak = 0u32;
    let mut last_rss = 0u64;
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if let Some(process) = sys.process(pid) {
            let rss = process.memory();
            growth_streak = if rss > last_rss { growth_streak + 1 } else { 0 };
            last_rss = rss;
            if growth_streak >= 10 {
                logger.warning(
                    Facility::Health,
                    &format!("RSS grew for {growth_streak} consecutive samples: {rss} bytes"),
                );
            } else {
                logger.debug(Facility::Health, &format!("rss={rss} bytes"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Severity;
    use crate::profile::Topology;

    #[test]
    fn loopback_run_completes_cleanly() {
        let registry = LogRegistry::new(Severity::Notice);
        let mut config = RunConfig::default();
        config.topology = Topology::Ate;
        config.loopback = true;
        config.daemon = true;
        config.warmup_secs = 1;
        config.duration_secs = 1;
        config.stats_interval_secs = 1;
        config.frame_len = 256;
        config.features.ptp = false;
        config.features.health_monitor = false;
        config.features.latency_test = true;
        config.latency_timeout_secs = 1;
        run(&config, &registry).unwrap();
    }
}
