use std::collections::BTreeMap;

use crate::model::topology::{Port, RouterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAgeClass {
    Active,
    Expired,
    Purgeable,
}

/// Tick-based lifetime windows for learned routes: a route is `Active` until
/// its age exceeds the timeout, advertised as unreachable while `Expired`,
/// and removed once `Purgeable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteLifetimePolicy {
    pub timeout_ticks: u64,
    pub hold_ticks: u64,
}

impl RouteLifetimePolicy {
    pub fn new(timeout_ticks: u64, hold_ticks: u64) -> Self {
        Self {
            timeout_ticks,
            hold_ticks,
        }
    }

    pub fn classify(self, age_ticks: u64) -> RouteAgeClass {
        if age_ticks <= self.timeout_ticks {
            return RouteAgeClass::Active;
        }
        if age_ticks <= self.timeout_ticks + self.hold_ticks {
            return RouteAgeClass::Expired;
        }
        RouteAgeClass::Purgeable
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: RouterId,
    pub metric: u32,
    pub next_hop_port: Option<Port>,
    pub age_ticks: u64,
    pub changed: bool,
}

impl RouteEntry {
    fn self_entry(destination: RouterId) -> Self {
        Self {
            destination,
            metric: 0,
            next_hop_port: None,
            age_ticks: 0,
            changed: false,
        }
    }
}

/// Result of one aging sweep: which destinations crossed into the
/// unreachable state this tick, and which were purged outright.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AgeSweep {
    pub expired: Vec<RouterId>,
    pub purged: Vec<RouterId>,
}

impl AgeSweep {
    pub fn is_quiet(&self) -> bool {
        self.expired.is_empty() && self.purged.is_empty()
    }
}

/// Per-router routing table. Owned exclusively by its router's worker; all
/// mutation happens on that worker's event sequence, so the type carries no
/// locking.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    owner: RouterId,
    unreachable_metric: u32,
    lifetime: RouteLifetimePolicy,
    entries: BTreeMap<RouterId, RouteEntry>,
}

impl RoutingTable {
    pub fn new(owner: RouterId, unreachable_metric: u32, lifetime: RouteLifetimePolicy) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(owner, RouteEntry::self_entry(owner));
        Self {
            owner,
            unreachable_metric,
            lifetime,
            entries,
        }
    }

    pub fn owner(&self) -> RouterId {
        self.owner
    }

    pub fn unreachable_metric(&self) -> u32 {
        self.unreachable_metric
    }

    pub fn is_unreachable(&self, metric: u32) -> bool {
        metric >= self.unreachable_metric
    }

    /// Additive path cost, saturating at the unreachable sentinel.
    pub fn combine(&self, advertised: u32, link_metric: u32) -> u32 {
        advertised
            .saturating_add(link_metric)
            .min(self.unreachable_metric)
    }

    pub fn get(&self, destination: RouterId) -> Option<&RouteEntry> {
        self.entries.get(&destination)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    /// Entries worth exporting: everything not at the unreachable sentinel,
    /// in destination order.
    pub fn live_routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries
            .values()
            .filter(|entry| !self.is_unreachable(entry.metric))
    }

    pub fn self_entry_valid(&self) -> bool {
        self.entries
            .get(&self.owner)
            .is_some_and(|entry| entry.metric == 0 && entry.next_hop_port.is_none())
    }

    pub fn insert_route(&mut self, destination: RouterId, metric: u32, next_hop_port: Port) {
        self.entries.insert(
            destination,
            RouteEntry {
                destination,
                metric,
                next_hop_port: Some(next_hop_port),
                age_ticks: 0,
                changed: true,
            },
        );
    }

    /// Replace metric and next hop for an existing destination, resetting its
    /// age. Also revives an entry currently held in the unreachable state.
    pub fn replace_route(&mut self, destination: RouterId, metric: u32, next_hop_port: Port) {
        if let Some(entry) = self.entries.get_mut(&destination) {
            entry.metric = metric;
            entry.next_hop_port = Some(next_hop_port);
            entry.age_ticks = 0;
            entry.changed = true;
        }
    }

    /// Reset the age of a still-valid entry without touching its route.
    pub fn refresh(&mut self, destination: RouterId) {
        if let Some(entry) = self.entries.get_mut(&destination) {
            entry.age_ticks = 0;
        }
    }

    /// Force an entry into the unreachable state, holding its age at the
    /// timeout boundary so the garbage-hold countdown starts now.
    pub fn mark_unreachable(&mut self, destination: RouterId) {
        let timeout = self.lifetime.timeout_ticks;
        let sentinel = self.unreachable_metric;
        if let Some(entry) = self.entries.get_mut(&destination) {
            entry.metric = sentinel;
            entry.age_ticks = timeout;
            entry.changed = true;
        }
    }

    pub fn clear_changed_flags(&mut self) {
        for entry in self.entries.values_mut() {
            entry.changed = false;
        }
    }

    /// One clock tick of aging for every entry except the self entry.
    /// Entries crossing the timeout are poisoned in place; entries past the
    /// hold window are removed.
    pub fn advance_ages(&mut self) -> AgeSweep {
        let mut sweep = AgeSweep::default();
        let owner = self.owner;
        let sentinel = self.unreachable_metric;
        let lifetime = self.lifetime;

        for entry in self.entries.values_mut() {
            if entry.destination == owner {
                continue;
            }
            entry.age_ticks += 1;
            if entry.metric < sentinel
                && lifetime.classify(entry.age_ticks) != RouteAgeClass::Active
            {
                entry.metric = sentinel;
                entry.age_ticks = lifetime.timeout_ticks;
                entry.changed = true;
                sweep.expired.push(entry.destination);
            }
        }

        let purged: Vec<RouterId> = self
            .entries
            .values()
            .filter(|entry| {
                entry.destination != owner
                    && lifetime.classify(entry.age_ticks) == RouteAgeClass::Purgeable
            })
            .map(|entry| entry.destination)
            .collect();
        for destination in &purged {
            self.entries.remove(destination);
        }
        sweep.purged = purged;
        sweep
    }
}
