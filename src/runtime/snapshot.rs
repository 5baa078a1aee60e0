use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::Result;
use crate::model::routing::RoutingTable;
use crate::model::topology::{Port, RouterId};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub destination: RouterId,
    pub metric: u32,
    pub next_hop_port: Option<Port>,
}

/// Point-in-time copy of a routing table, taken on the owning router's own
/// event sequence so it is always internally consistent.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TableSnapshot {
    pub router_id: RouterId,
    pub tick: u64,
    pub seq: u64,
    pub routes: Vec<RouteSnapshot>,
}

impl TableSnapshot {
    /// Reachable entries only, in destination order.
    pub fn capture(table: &RoutingTable, tick: u64, seq: u64) -> Self {
        Self {
            router_id: table.owner(),
            tick,
            seq,
            routes: table
                .live_routes()
                .map(|entry| RouteSnapshot {
                    destination: entry.destination,
                    metric: entry.metric,
                    next_hop_port: entry.next_hop_port,
                })
                .collect(),
        }
    }

    pub fn route(&self, destination: RouterId) -> Option<&RouteSnapshot> {
        self.routes
            .iter()
            .find(|route| route.destination == destination)
    }
}

pub trait SnapshotSink: Send + Sync {
    fn record(&self, snapshot: &TableSnapshot) -> Result<()>;
}

/// Writes one JSON file per update under `<root>/router-<id>/`, via a temp
/// file and rename so a reader never sees a partial document.
pub struct DirectorySnapshotLogger {
    root: PathBuf,
}

impl DirectorySnapshotLogger {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl SnapshotSink for DirectorySnapshotLogger {
    fn record(&self, snapshot: &TableSnapshot) -> Result<()> {
        let dir = self.root.join(format!("router-{}", snapshot.router_id));
        fs::create_dir_all(&dir)?;

        let payload = serde_json::to_vec_pretty(snapshot).map_err(std::io::Error::other)?;
        let path = dir.join(format!("update-{:05}.json", snapshot.seq));
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, payload)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

/// Test sink: keeps every snapshot in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySnapshotSink {
    records: Mutex<Vec<TableSnapshot>>,
}

impl MemorySnapshotSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TableSnapshot> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn for_router(&self, router_id: RouterId) -> Vec<TableSnapshot> {
        self.records()
            .into_iter()
            .filter(|snapshot| snapshot.router_id == router_id)
            .collect()
    }
}

impl SnapshotSink for MemorySnapshotSink {
    fn record(&self, snapshot: &TableSnapshot) -> Result<()> {
        if let Ok(mut guard) = self.records.lock() {
            guard.push(snapshot.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::routing::RouteLifetimePolicy;

    fn sample_table() -> RoutingTable {
        let mut table = RoutingTable::new(1, 145, RouteLifetimePolicy::new(6, 6));
        table.insert_route(0, 1, 5000);
        table.insert_route(2, 3, 5002);
        table.insert_route(4, 2, 5002);
        table.mark_unreachable(4);
        table
    }

    #[test]
    fn capture_orders_by_destination_and_drops_unreachable() {
        let snapshot = TableSnapshot::capture(&sample_table(), 7, 3);

        assert_eq!(snapshot.router_id, 1);
        assert_eq!(snapshot.tick, 7);
        let destinations: Vec<RouterId> = snapshot
            .routes
            .iter()
            .map(|route| route.destination)
            .collect();
        assert_eq!(destinations, vec![0, 1, 2]);
        assert_eq!(snapshot.route(1).expect("self entry").metric, 0);
        assert_eq!(snapshot.route(1).expect("self entry").next_hop_port, None);
        assert!(snapshot.route(4).is_none());
    }

    #[test]
    fn directory_logger_writes_one_file_per_update() {
        let root = std::env::temp_dir().join(format!(
            "ripsim-snapshot-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let logger =
            DirectorySnapshotLogger::new(root.clone()).expect("logger creates its directory");

        let snapshot = TableSnapshot::capture(&sample_table(), 2, 0);
        logger.record(&snapshot).expect("snapshot recorded");

        let path = root.join("router-1").join("update-00000.json");
        let text = fs::read_to_string(&path).expect("snapshot file exists");
        assert!(text.contains("\"router_id\": 1"));
        assert!(text.contains("\"tick\": 2"));

        fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn memory_sink_accumulates_in_order() {
        let sink = MemorySnapshotSink::new();
        let table = sample_table();
        sink.record(&TableSnapshot::capture(&table, 1, 0))
            .expect("record");
        sink.record(&TableSnapshot::capture(&table, 2, 1))
            .expect("record");

        let records = sink.for_router(1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 0);
        assert_eq!(records[1].tick, 2);
    }
}
