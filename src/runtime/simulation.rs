use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::error::{Result, SimulationError};
use crate::model::exchange::ExchangePolicy;
use crate::model::routing::RouteLifetimePolicy;
use crate::model::topology::{RouterId, Topology};
use crate::protocols::distance_vector::{DistanceVectorEngine, DistanceVectorParams};
use crate::runtime::bus::{NetworkBus, RouterEvent};
use crate::runtime::config::SimConfig;
use crate::runtime::router::{RouterWorker, WorkerReport};
use crate::runtime::snapshot::{SnapshotSink, TableSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The configured tick budget ran out.
    TickBudget,
    /// No router reported a change for the configured number of ticks.
    Stable,
    /// The external stop flag was raised.
    Stopped,
    /// Every router failed; nothing left to drive.
    AllRoutersFailed,
}

#[derive(Debug)]
pub struct SimulationReport {
    pub ticks_run: u64,
    pub halt: HaltReason,
    pub tables: BTreeMap<RouterId, TableSnapshot>,
    pub failures: BTreeMap<RouterId, SimulationError>,
}

/// One whole simulation run: owns the topology, the clock, and every router
/// worker. Nothing here is global, so independent runs can coexist in one
/// process.
pub struct Simulation {
    topology: Topology,
    cfg: SimConfig,
    sink: Arc<dyn SnapshotSink>,
    stop: Arc<AtomicBool>,
}

impl Simulation {
    pub fn new(topology: Topology, cfg: SimConfig, sink: Arc<dyn SnapshotSink>) -> Result<Self> {
        // The sentinel must sit strictly above any real path metric, which
        // is bounded by (routers - 1) hops of the worst link.
        let worst_path = (topology.len().saturating_sub(1) as u32) * topology.max_link_metric();
        if cfg.unreachable_metric <= worst_path {
            return Err(SimulationError::Configuration(format!(
                "unreachable metric {} does not clear the worst possible path metric {}",
                cfg.unreachable_metric, worst_path
            )));
        }

        Ok(Self {
            topology,
            cfg,
            sink,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag observed between ticks; raising it ends the run at the next
    /// tick boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn engine_params(&self) -> DistanceVectorParams {
        DistanceVectorParams {
            unreachable_metric: self.cfg.unreachable_metric,
            poisoned_reverse: self.cfg.poisoned_reverse,
            lifetime: RouteLifetimePolicy::new(
                self.cfg.route_timeout_ticks,
                self.cfg.garbage_hold_ticks,
            ),
            exchange: ExchangePolicy::hybrid(
                self.cfg.update_interval_ticks,
                self.cfg.trigger_debounce_ticks,
            ),
        }
    }

    pub fn run(self) -> SimulationReport {
        let (report_tx, report_rx) = mpsc::channel();

        let mut inboxes = BTreeMap::new();
        let mut pending = Vec::new();
        for spec in self.topology.routers() {
            let (tx, rx) = mpsc::channel();
            inboxes.insert(spec.id, tx);
            pending.push((spec.clone(), rx));
        }
        let bus = NetworkBus::new(&self.topology, inboxes.clone());

        let mut handles = Vec::with_capacity(pending.len());
        for (spec, inbox) in pending {
            let engine = DistanceVectorEngine::new(spec.id, self.engine_params());
            let worker = RouterWorker::new(
                &spec,
                Box::new(engine),
                self.cfg.update_interval_ticks,
                inbox,
                bus.clone(),
                Arc::clone(&self.sink),
                report_tx.clone(),
            );
            handles.push(thread::spawn(move || worker.run()));
        }
        // Workers hold their own clones; keeping this sender alive would
        // make recv() below block forever if every worker died.
        drop(report_tx);

        let mut live: BTreeSet<RouterId> =
            self.topology.routers().map(|spec| spec.id).collect();
        let mut failures = BTreeMap::new();
        let mut quiet_streak = 0_u64;
        let mut ticks_run = 0_u64;
        let mut halt = HaltReason::TickBudget;

        info!(
            routers = live.len(),
            max_ticks = self.cfg.max_ticks,
            "simulation starting"
        );

        'ticks: for tick in 1..=self.cfg.max_ticks {
            if self.stop.load(Ordering::Relaxed) {
                halt = HaltReason::Stopped;
                break;
            }
            if live.is_empty() {
                halt = HaltReason::AllRoutersFailed;
                break;
            }
            if !self.cfg.tick_interval.is_zero() {
                thread::sleep(self.cfg.tick_interval);
            }

            for id in &live {
                if let Some(inbox) = inboxes.get(id) {
                    let _ = inbox.send(RouterEvent::Tick(tick));
                }
            }

            let mut awaiting = live.clone();
            let mut any_changed = false;
            while !awaiting.is_empty() {
                match report_rx.recv() {
                    Ok(WorkerReport::Tick {
                        router, changed, ..
                    }) => {
                        awaiting.remove(&router);
                        any_changed |= changed;
                    }
                    Ok(WorkerReport::Failed { router, error }) => {
                        warn!(router, "router dropped out: {error}");
                        awaiting.remove(&router);
                        live.remove(&router);
                        failures.insert(router, error);
                    }
                    Ok(WorkerReport::Finished { router, .. }) => {
                        debug!(router, "unexpected finish before shutdown");
                        awaiting.remove(&router);
                        live.remove(&router);
                    }
                    Err(_) => break 'ticks,
                }
            }
            ticks_run = tick;

            if any_changed {
                quiet_streak = 0;
            } else {
                quiet_streak += 1;
                if self.cfg.stability_halt_ticks > 0 && quiet_streak >= self.cfg.stability_halt_ticks
                {
                    debug!(tick, quiet_streak, "network stable, halting early");
                    halt = HaltReason::Stable;
                    break;
                }
            }
        }

        for id in &live {
            if let Some(inbox) = inboxes.get(id) {
                let _ = inbox.send(RouterEvent::Shutdown);
            }
        }
        drop(inboxes);

        let mut tables = BTreeMap::new();
        let mut awaiting = live.clone();
        while !awaiting.is_empty() {
            match report_rx.recv() {
                Ok(WorkerReport::Finished { router, table }) => {
                    awaiting.remove(&router);
                    tables.insert(router, table);
                }
                Ok(WorkerReport::Failed { router, error }) => {
                    awaiting.remove(&router);
                    failures.insert(router, error);
                }
                Ok(WorkerReport::Tick { .. }) => {}
                Err(_) => break,
            }
        }
        for handle in handles {
            let _ = handle.join();
        }

        info!(ticks = ticks_run, halt = ?halt, "simulation finished");
        SimulationReport {
            ticks_run,
            halt,
            tables,
            failures,
        }
    }
}
