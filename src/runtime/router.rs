use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::error::SimulationError;
use crate::model::topology::{RouterId, RouterSpec};
use crate::protocols::base::{EngineContext, EngineLink, EngineOutputs, RoutingEngine};
use crate::runtime::bus::{NetworkBus, RouterEvent};
use crate::runtime::snapshot::{SnapshotSink, TableSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterPhase {
    Initialized,
    Converging,
    Stable,
}

/// Tracks the lifecycle state machine: `Initialized` until the first tick,
/// `Converging` while the table keeps moving, `Stable` after a full periodic
/// interval of quiet. Stability is never terminal; any later change drops
/// back to `Converging`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PhaseTracker {
    phase: RouterPhase,
    quiet_ticks: u64,
    interval_ticks: u64,
}

impl PhaseTracker {
    pub(crate) fn new(interval_ticks: u64) -> Self {
        Self {
            phase: RouterPhase::Initialized,
            quiet_ticks: 0,
            interval_ticks: interval_ticks.max(1),
        }
    }

    pub(crate) fn on_tick(&mut self, changed: bool) -> RouterPhase {
        if changed {
            self.phase = RouterPhase::Converging;
            self.quiet_ticks = 0;
        } else {
            self.quiet_ticks += 1;
            if self.quiet_ticks >= self.interval_ticks {
                self.phase = RouterPhase::Stable;
            } else if self.phase == RouterPhase::Initialized {
                self.phase = RouterPhase::Converging;
            }
        }
        self.phase
    }
}

/// What a worker tells the driver: one `Tick` per processed clock tick, a
/// `Failed` if its engine detects a fatal invariant violation, and a final
/// `Finished` carrying the table as it stood at shutdown.
#[derive(Debug)]
pub enum WorkerReport {
    Tick {
        router: RouterId,
        tick: u64,
        changed: bool,
        phase: RouterPhase,
    },
    Failed {
        router: RouterId,
        error: SimulationError,
    },
    Finished {
        router: RouterId,
        table: TableSnapshot,
    },
}

/// One simulated router: owns its engine (and through it the routing
/// table), consumes its inbox as a strictly ordered event sequence, and
/// never shares mutable state with any other router.
pub struct RouterWorker {
    id: RouterId,
    engine: Box<dyn RoutingEngine>,
    links: BTreeMap<RouterId, EngineLink>,
    inbox: Receiver<RouterEvent>,
    bus: NetworkBus,
    sink: Arc<dyn SnapshotSink>,
    reports: Sender<WorkerReport>,
    tracker: PhaseTracker,
    tick: u64,
    snapshot_seq: u64,
    activity: bool,
}

impl RouterWorker {
    pub fn new(
        spec: &RouterSpec,
        engine: Box<dyn RoutingEngine>,
        interval_ticks: u64,
        inbox: Receiver<RouterEvent>,
        bus: NetworkBus,
        sink: Arc<dyn SnapshotSink>,
        reports: Sender<WorkerReport>,
    ) -> Self {
        let links = spec
            .outputs
            .iter()
            .map(|output| {
                (
                    output.destination,
                    EngineLink {
                        neighbor: output.destination,
                        port: output.port,
                        metric: output.metric,
                    },
                )
            })
            .collect();

        Self {
            id: spec.id,
            engine,
            links,
            inbox,
            bus,
            sink,
            reports,
            tracker: PhaseTracker::new(interval_ticks),
            tick: 0,
            snapshot_seq: 0,
            activity: false,
        }
    }

    pub fn run(mut self) {
        let outputs = {
            let ctx = EngineContext {
                router_id: self.id,
                tick: self.tick,
                links: &self.links,
            };
            self.engine.start(&ctx)
        };
        self.apply(outputs);
        debug!(
            router = self.id,
            protocol = self.engine.name(),
            neighbors = self.links.len(),
            "router started"
        );

        loop {
            let Ok(first) = self.inbox.recv() else {
                debug!(router = self.id, "inbox closed, stopping");
                return;
            };

            // Drain whatever is already queued so a burst of deliveries is
            // absorbed as one batch and triggers at most one update.
            let mut batch = vec![first];
            while let Ok(event) = self.inbox.try_recv() {
                batch.push(event);
            }

            for event in batch {
                match event {
                    RouterEvent::Deliver { advert, input_port } => {
                        trace!(
                            router = self.id,
                            src = advert.src,
                            input_port,
                            seq = advert.seq,
                            "advertisement received"
                        );
                        let ctx = EngineContext {
                            router_id: self.id,
                            tick: self.tick,
                            links: &self.links,
                        };
                        self.engine.absorb(&ctx, &advert);
                    }
                    RouterEvent::Tick(tick) => {
                        self.tick = tick;
                        if !self.handle_tick() {
                            return;
                        }
                    }
                    RouterEvent::Shutdown => {
                        self.finish();
                        return;
                    }
                }
            }

            let outputs = {
                let ctx = EngineContext {
                    router_id: self.id,
                    tick: self.tick,
                    links: &self.links,
                };
                self.engine.flush(&ctx)
            };
            self.apply(outputs);
        }
    }

    fn handle_tick(&mut self) -> bool {
        let result = {
            let ctx = EngineContext {
                router_id: self.id,
                tick: self.tick,
                links: &self.links,
            };
            self.engine.on_tick(&ctx)
        };

        match result {
            Ok(outputs) => {
                self.apply(outputs);
                let changed = std::mem::take(&mut self.activity);
                let phase = self.tracker.on_tick(changed);
                let _ = self.reports.send(WorkerReport::Tick {
                    router: self.id,
                    tick: self.tick,
                    changed,
                    phase,
                });
                true
            }
            Err(error) => {
                warn!(router = self.id, tick = self.tick, "router failed: {error}");
                let _ = self.reports.send(WorkerReport::Failed {
                    router: self.id,
                    error,
                });
                false
            }
        }
    }

    fn apply(&mut self, outputs: EngineOutputs) {
        self.activity |= outputs.table_changed;

        if outputs.snapshot {
            let snapshot = TableSnapshot::capture(self.engine.table(), self.tick, self.snapshot_seq);
            self.snapshot_seq += 1;
            if let Err(err) = self.sink.record(&snapshot) {
                warn!(router = self.id, "failed to record snapshot: {err}");
            }
        }

        for (port, advert) in outputs.outbound {
            if let Err(err) = self.bus.deliver(advert, port) {
                warn!(router = self.id, "dropping advertisement: {err}");
            }
        }
    }

    fn finish(&mut self) {
        let table = TableSnapshot::capture(self.engine.table(), self.tick, self.snapshot_seq);
        let _ = self.reports.send(WorkerReport::Finished {
            router: self.id,
            table,
        });
        info!(router = self.id, tick = self.tick, "router stopped");
    }
}
