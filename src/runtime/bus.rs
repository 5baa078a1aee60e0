use std::collections::BTreeMap;
use std::sync::mpsc::Sender;

use crate::error::{Result, SimulationError};
use crate::model::messages::Advertisement;
use crate::model::topology::{Port, RouterId, Topology};

/// Everything a router worker pulls off its inbox, in strict arrival order.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    Deliver {
        advert: Advertisement,
        input_port: Port,
    },
    Tick(u64),
    Shutdown,
}

/// In-process stand-in for the wire: resolves an output port to the input
/// port it is statically bound to and enqueues the advertisement on the
/// owning router's inbox. Each sender's messages keep their send order; the
/// channel provides that for free.
#[derive(Clone)]
pub struct NetworkBus {
    bindings: BTreeMap<Port, RouterId>,
    inboxes: BTreeMap<RouterId, Sender<RouterEvent>>,
}

impl NetworkBus {
    pub fn new(topology: &Topology, inboxes: BTreeMap<RouterId, Sender<RouterEvent>>) -> Self {
        Self {
            bindings: topology.input_owners(),
            inboxes,
        }
    }

    /// Hand one advertisement to the router on the far side of
    /// `output_port`. In a validated topology the lookup cannot fail; a
    /// `Delivery` error here means a dropped message, never a halted
    /// simulation.
    pub fn deliver(&self, advert: Advertisement, output_port: Port) -> Result<()> {
        let Some(owner) = self.bindings.get(&output_port) else {
            return Err(SimulationError::Delivery {
                port: output_port,
                reason: "no link bound to this output port".to_string(),
            });
        };
        let Some(inbox) = self.inboxes.get(owner) else {
            return Err(SimulationError::Delivery {
                port: output_port,
                reason: format!("router {owner} has no inbox"),
            });
        };
        inbox
            .send(RouterEvent::Deliver {
                advert,
                input_port: output_port,
            })
            .map_err(|_| SimulationError::Delivery {
                port: output_port,
                reason: format!("router {owner} stopped receiving"),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::model::topology::{OutputLink, RouterSpec};

    fn two_router_topology() -> Topology {
        Topology::from_specs(vec![
            RouterSpec {
                id: 0,
                inputs: vec![5000],
                outputs: vec![OutputLink {
                    destination: 1,
                    port: 5001,
                    metric: 1,
                }],
            },
            RouterSpec {
                id: 1,
                inputs: vec![5001],
                outputs: vec![OutputLink {
                    destination: 0,
                    port: 5000,
                    metric: 1,
                }],
            },
        ])
        .expect("two-router topology is valid")
    }

    #[test]
    fn delivers_to_the_router_owning_the_port() {
        let topology = two_router_topology();
        let (tx0, rx0) = mpsc::channel();
        let (tx1, rx1) = mpsc::channel();
        let bus = NetworkBus::new(&topology, BTreeMap::from([(0, tx0), (1, tx1)]));

        bus.deliver(Advertisement::new(0, 1, Vec::new()), 5001)
            .expect("delivery to a bound port succeeds");

        match rx1.try_recv().expect("router 1 received an event") {
            RouterEvent::Deliver { advert, input_port } => {
                assert_eq!(advert.src, 0);
                assert_eq!(input_port, 5001);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx0.try_recv().is_err());
    }

    #[test]
    fn unbound_port_is_a_delivery_error() {
        let topology = two_router_topology();
        let (tx0, _rx0) = mpsc::channel();
        let (tx1, _rx1) = mpsc::channel();
        let bus = NetworkBus::new(&topology, BTreeMap::from([(0, tx0), (1, tx1)]));

        let err = bus
            .deliver(Advertisement::new(0, 1, Vec::new()), 6000)
            .unwrap_err();
        assert!(matches!(err, SimulationError::Delivery { port: 6000, .. }));
    }

    #[test]
    fn stopped_receiver_is_a_delivery_error_not_a_panic() {
        let topology = two_router_topology();
        let (tx0, _rx0) = mpsc::channel();
        let (tx1, rx1) = mpsc::channel();
        drop(rx1);
        let bus = NetworkBus::new(&topology, BTreeMap::from([(0, tx0), (1, tx1)]));

        let err = bus
            .deliver(Advertisement::new(0, 1, Vec::new()), 5001)
            .unwrap_err();
        assert!(matches!(err, SimulationError::Delivery { .. }));
    }
}
