use tracing::{debug, trace};

use crate::error::{Result, SimulationError};
use crate::model::exchange::{ExchangePolicy, ExchangeState};
use crate::model::messages::{Advertisement, AdvertisedRoute};
use crate::model::routing::{RouteLifetimePolicy, RoutingTable};
use crate::model::topology::Port;
use crate::protocols::base::{EngineContext, EngineOutputs, RoutingEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceVectorParams {
    pub unreachable_metric: u32,
    pub poisoned_reverse: bool,
    pub lifetime: RouteLifetimePolicy,
    pub exchange: ExchangePolicy,
}

/// RIPv2-style distance-vector engine: incremental relaxation against each
/// incoming advertisement, split-horizon filtering on the way out, and
/// age-driven expiry with a poison-then-purge tail.
pub struct DistanceVectorEngine {
    params: DistanceVectorParams,
    table: RoutingTable,
    exchange: ExchangeState,
    seq: u64,
    pending_gain: bool,
    pending_change: bool,
}

impl DistanceVectorEngine {
    pub fn new(router_id: u8, params: DistanceVectorParams) -> Self {
        Self {
            params,
            table: RoutingTable::new(router_id, params.unreachable_metric, params.lifetime),
            exchange: ExchangeState::default(),
            seq: 0,
            pending_gain: false,
            pending_change: false,
        }
    }

    /// Outgoing advertisements, one per output port. `only_changed` limits
    /// the payload to entries touched since the last send (triggered
    /// updates); periodic sends carry the whole table.
    fn build_advertisements(
        &mut self,
        ctx: &EngineContext<'_>,
        only_changed: bool,
    ) -> Vec<(Port, Advertisement)> {
        self.seq += 1;
        let sentinel = self.params.unreachable_metric;
        let mut out = Vec::with_capacity(ctx.links.len());

        for link in ctx.links.values() {
            let mut entries = Vec::with_capacity(self.table.len());
            for entry in self.table.iter() {
                if only_changed && !entry.changed {
                    continue;
                }
                if entry.next_hop_port == Some(link.port) {
                    // Split horizon: never offer a destination back through
                    // the port its own route uses.
                    if self.params.poisoned_reverse {
                        entries.push(AdvertisedRoute {
                            destination: entry.destination,
                            metric: sentinel,
                        });
                    }
                    continue;
                }
                entries.push(AdvertisedRoute {
                    destination: entry.destination,
                    metric: entry.metric.min(sentinel),
                });
            }
            if entries.is_empty() {
                continue;
            }
            trace!(
                router = self.table.owner(),
                port = link.port,
                seq = self.seq,
                routes = entries.len(),
                "advertisement built"
            );
            out.push((
                link.port,
                Advertisement::new(self.table.owner(), self.seq, entries),
            ));
        }

        self.table.clear_changed_flags();
        out
    }
}

impl RoutingEngine for DistanceVectorEngine {
    fn name(&self) -> &'static str {
        "rip"
    }

    fn start(&mut self, _ctx: &EngineContext<'_>) -> EngineOutputs {
        EngineOutputs {
            outbound: Vec::new(),
            snapshot: true,
            table_changed: false,
        }
    }

    fn absorb(&mut self, ctx: &EngineContext<'_>, advert: &Advertisement) {
        let Some(link) = ctx.links.get(&advert.src) else {
            // No output link toward the sender means no known cost for the
            // incoming hop; nothing here is usable.
            debug!(
                router = ctx.router_id,
                src = advert.src,
                "dropping advertisement from router with no facing link"
            );
            return;
        };
        let facing_port = link.port;

        for advertised in &advert.entries {
            if advertised.destination == ctx.router_id {
                continue;
            }
            let candidate = self.table.combine(advertised.metric, link.metric);

            match self.table.get(advertised.destination) {
                None => {
                    if self.table.is_unreachable(candidate) {
                        continue;
                    }
                    self.table
                        .insert_route(advertised.destination, candidate, facing_port);
                    self.pending_gain = true;
                    self.pending_change = true;
                }
                Some(current) => {
                    let authoritative = current.next_hop_port == Some(facing_port);
                    if candidate < current.metric {
                        self.table
                            .replace_route(advertised.destination, candidate, facing_port);
                        self.pending_gain = true;
                        self.pending_change = true;
                    } else if authoritative && candidate != current.metric {
                        // The current path itself got worse; believe it, but
                        // a degradation is not "new information" worth a
                        // triggered update.
                        if self.table.is_unreachable(candidate) {
                            self.table.mark_unreachable(advertised.destination);
                        } else {
                            self.table
                                .replace_route(advertised.destination, candidate, facing_port);
                        }
                        self.pending_change = true;
                    } else if authoritative && !self.table.is_unreachable(current.metric) {
                        self.table.refresh(advertised.destination);
                    }
                    // Worse or equal offers from other neighbors are a
                    // designed no-op.
                }
            }
        }
    }

    fn flush(&mut self, ctx: &EngineContext<'_>) -> EngineOutputs {
        let table_changed = std::mem::take(&mut self.pending_change);
        if !std::mem::take(&mut self.pending_gain) {
            return EngineOutputs {
                outbound: Vec::new(),
                snapshot: false,
                table_changed,
            };
        }

        let outbound = if self.exchange.trigger_due(ctx.tick, self.params.exchange) {
            self.build_advertisements(ctx, true)
        } else {
            debug!(
                router = ctx.router_id,
                tick = ctx.tick,
                "triggered update suppressed by spacing window"
            );
            Vec::new()
        };

        EngineOutputs {
            outbound,
            snapshot: true,
            table_changed,
        }
    }

    fn on_tick(&mut self, ctx: &EngineContext<'_>) -> Result<EngineOutputs> {
        if !self.table.self_entry_valid() {
            return Err(SimulationError::StateInvariant {
                router: ctx.router_id,
                detail: "self entry must keep metric 0 and no next hop".to_string(),
            });
        }

        // Deliveries queued ahead of this tick were already absorbed, so a
        // just-refreshed entry cannot expire in the same tick.
        let sweep = self.table.advance_ages();
        for destination in &sweep.expired {
            debug!(
                router = ctx.router_id,
                destination = *destination,
                tick = ctx.tick,
                "route expired, poisoning"
            );
        }
        for destination in &sweep.purged {
            debug!(
                router = ctx.router_id,
                destination = *destination,
                tick = ctx.tick,
                "unreachable route purged"
            );
        }

        let gained = std::mem::take(&mut self.pending_gain);
        let table_changed = std::mem::take(&mut self.pending_change) || !sweep.is_quiet();
        let snapshot = gained || !sweep.expired.is_empty();

        let periodic = self.exchange.periodic_due(ctx.tick, self.params.exchange);
        let triggered = !periodic && gained && self.exchange.trigger_due(ctx.tick, self.params.exchange);
        let outbound = if periodic {
            self.exchange.mark_sent(ctx.tick);
            self.build_advertisements(ctx, false)
        } else if triggered {
            self.build_advertisements(ctx, true)
        } else {
            Vec::new()
        };

        Ok(EngineOutputs {
            outbound,
            snapshot,
            table_changed,
        })
    }

    fn table(&self) -> &RoutingTable {
        &self.table
    }
}

#[cfg(test)]
impl DistanceVectorEngine {
    fn table_mut(&mut self) -> &mut RoutingTable {
        &mut self.table
    }
}
