use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::messages::Advertisement;
use crate::model::routing::RoutingTable;
use crate::model::topology::{Port, RouterId};

/// Static view of one output link, keyed by the neighbor it faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLink {
    pub neighbor: RouterId,
    pub port: Port,
    pub metric: u32,
}

/// Everything an engine may read while handling one event. Links never
/// change after topology load, so the worker lends the same map every call.
#[derive(Debug, Clone, Copy)]
pub struct EngineContext<'a> {
    pub router_id: RouterId,
    pub tick: u64,
    pub links: &'a BTreeMap<RouterId, EngineLink>,
}

/// What one engine call asks the worker to do: forward advertisements out
/// the given output ports, record a table snapshot, and whether the table
/// was modified at all (feeds the stability tracking).
#[derive(Debug, Default, Clone)]
pub struct EngineOutputs {
    pub outbound: Vec<(Port, Advertisement)>,
    pub snapshot: bool,
    pub table_changed: bool,
}

/// Seam between the per-router worker loop and the routing protocol proper.
///
/// The worker drains its inbox in arrival order: `absorb` is called once per
/// delivered advertisement, `flush` once at the end of a drained batch (this
/// is where triggered updates coalesce), and `on_tick` once per clock tick,
/// after any deliveries already queued ahead of it.
pub trait RoutingEngine: Send {
    fn name(&self) -> &'static str;

    /// Called once before the first event; emits the initial table snapshot.
    fn start(&mut self, ctx: &EngineContext<'_>) -> EngineOutputs;

    /// Ingest one neighbor advertisement. Effects accumulate until `flush`
    /// or the next tick.
    fn absorb(&mut self, ctx: &EngineContext<'_>, advert: &Advertisement);

    /// Close out a drained inbox batch: if anything gained, emit one
    /// snapshot and (subject to spacing) one triggered update.
    fn flush(&mut self, ctx: &EngineContext<'_>) -> EngineOutputs;

    /// One clock tick: age and expire entries, then send the periodic
    /// advertisement if due. Fails only on a state-invariant violation.
    fn on_tick(&mut self, ctx: &EngineContext<'_>) -> Result<EngineOutputs>;

    fn table(&self) -> &RoutingTable;
}
