use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::{Result, SimulationError};

pub type RouterId = u8;
pub type Port = u16;

pub const MAX_ROUTERS: usize = 9;
pub const MAX_ROUTER_ID: RouterId = 8;
pub const MIN_LINK_METRIC: u32 = 1;
pub const MAX_LINK_METRIC: u32 = 16;
pub const MIN_PORT: Port = 1024;
pub const MAX_PORT: Port = 49151;

/// Directed link from the owning router toward `destination`. `port` is the
/// destination router's input port the link is bound to; it doubles as the
/// output-port identifier on the sending side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLink {
    pub destination: RouterId,
    pub port: Port,
    pub metric: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSpec {
    pub id: RouterId,
    pub inputs: Vec<Port>,
    pub outputs: Vec<OutputLink>,
}

/// Validated static topology. Links never change after load; every
/// delivery-time lookup failure downstream is therefore a bug, not an
/// expected condition.
#[derive(Debug, Clone)]
pub struct Topology {
    routers: BTreeMap<RouterId, RouterSpec>,
}

impl Topology {
    pub fn from_specs(specs: Vec<RouterSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(SimulationError::Configuration(
                "topology defines no routers".to_string(),
            ));
        }
        if specs.len() > MAX_ROUTERS {
            return Err(SimulationError::Configuration(format!(
                "topology defines {} routers, maximum is {}",
                specs.len(),
                MAX_ROUTERS
            )));
        }

        let mut routers: BTreeMap<RouterId, RouterSpec> = BTreeMap::new();
        let mut seen_ports: BTreeSet<Port> = BTreeSet::new();

        for spec in specs {
            if spec.id > MAX_ROUTER_ID {
                return Err(SimulationError::Configuration(format!(
                    "router id {} outside the supported range 0-{}",
                    spec.id, MAX_ROUTER_ID
                )));
            }
            if spec.inputs.is_empty() {
                return Err(SimulationError::Configuration(format!(
                    "router {} declares no input ports",
                    spec.id
                )));
            }
            for port in &spec.inputs {
                if !(MIN_PORT..=MAX_PORT).contains(port) {
                    return Err(SimulationError::Configuration(format!(
                        "router {} input port {} outside {}-{}",
                        spec.id, port, MIN_PORT, MAX_PORT
                    )));
                }
                if !seen_ports.insert(*port) {
                    return Err(SimulationError::Configuration(format!(
                        "port {} assigned to more than one router",
                        port
                    )));
                }
            }
            if routers.insert(spec.id, spec.clone()).is_some() {
                return Err(SimulationError::Configuration(format!(
                    "duplicate router id {}",
                    spec.id
                )));
            }
        }

        for spec in routers.values() {
            let mut reached: BTreeSet<RouterId> = BTreeSet::new();
            for output in &spec.outputs {
                if output.destination == spec.id {
                    return Err(SimulationError::Configuration(format!(
                        "router {} declares an output link to itself",
                        spec.id
                    )));
                }
                if !(MIN_LINK_METRIC..=MAX_LINK_METRIC).contains(&output.metric) {
                    return Err(SimulationError::Configuration(format!(
                        "router {} output metric {} outside {}-{}",
                        spec.id, output.metric, MIN_LINK_METRIC, MAX_LINK_METRIC
                    )));
                }
                if !reached.insert(output.destination) {
                    return Err(SimulationError::Configuration(format!(
                        "router {} declares two output links to router {}",
                        spec.id, output.destination
                    )));
                }
                let Some(destination) = routers.get(&output.destination) else {
                    return Err(SimulationError::Configuration(format!(
                        "router {} output references unknown router {}",
                        spec.id, output.destination
                    )));
                };
                if !destination.inputs.contains(&output.port) {
                    return Err(SimulationError::Configuration(format!(
                        "router {} output port {} is not an input port of router {}",
                        spec.id, output.port, output.destination
                    )));
                }
            }
        }

        Ok(Self { routers })
    }

    pub fn parse(text: &str) -> Result<Self> {
        Self::from_specs(parse_router_blocks(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            SimulationError::Configuration(format!(
                "failed to read topology file {}: {err}",
                path.display()
            ))
        })?;
        Self::parse(&text)
    }

    pub fn get(&self, id: RouterId) -> Option<&RouterSpec> {
        self.routers.get(&id)
    }

    pub fn routers(&self) -> impl Iterator<Item = &RouterSpec> {
        self.routers.values()
    }

    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    /// Largest link metric anywhere in the topology.
    pub fn max_link_metric(&self) -> u32 {
        self.routers
            .values()
            .flat_map(|spec| spec.outputs.iter().map(|output| output.metric))
            .max()
            .unwrap_or(MIN_LINK_METRIC)
    }

    /// Map from every input port to the router that owns it, used by the bus
    /// to resolve deliveries.
    pub fn input_owners(&self) -> BTreeMap<Port, RouterId> {
        self.routers
            .values()
            .flat_map(|spec| spec.inputs.iter().map(|port| (*port, spec.id)))
            .collect()
    }
}

const HEADER: &str = "[ROUTERS]";

fn parse_router_blocks(text: &str) -> Result<Vec<RouterSpec>> {
    let mut lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() || lines.remove(0).trim() != HEADER {
        return Err(SimulationError::Configuration(format!(
            "topology file must start with a {HEADER} header"
        )));
    }

    let mut specs = Vec::new();
    let mut rest = lines.as_slice();
    while !rest.is_empty() {
        if rest.len() < 3 {
            return Err(SimulationError::Configuration(
                "truncated router block, expected id/inputs/outputs lines".to_string(),
            ));
        }
        let (block, remainder) = rest.split_at(3.min(rest.len()));
        let id_line = strip_field(block[0], "id:")?;
        let inputs_line = strip_field(block[1], "inputs:")?;
        let outputs_line = strip_field(block[2], "outputs:")?;

        let id = id_line.parse::<RouterId>().map_err(|_| {
            SimulationError::Configuration(format!("invalid router id: {id_line:?}"))
        })?;
        let inputs = inputs_line
            .split(',')
            .map(|item| {
                item.trim().parse::<Port>().map_err(|_| {
                    SimulationError::Configuration(format!(
                        "router {id}: invalid input port {:?}",
                        item.trim()
                    ))
                })
            })
            .collect::<Result<Vec<Port>>>()?;
        let outputs = outputs_line
            .split(',')
            .map(|item| parse_output(id, item.trim()))
            .collect::<Result<Vec<OutputLink>>>()?;

        specs.push(RouterSpec { id, inputs, outputs });

        // Blocks are separated by exactly one blank line and the file must
        // not end with one.
        rest = match remainder {
            [] => remainder,
            [separator, tail @ ..] => {
                if !separator.trim().is_empty() {
                    return Err(SimulationError::Configuration(format!(
                        "expected blank line between router blocks, found {separator:?}"
                    )));
                }
                if tail.is_empty() {
                    return Err(SimulationError::Configuration(
                        "trailing blank line after the last router block".to_string(),
                    ));
                }
                tail
            }
        };
    }

    Ok(specs)
}

fn strip_field<'a>(line: &'a str, field: &str) -> Result<&'a str> {
    line.strip_prefix(field).map(str::trim).ok_or_else(|| {
        SimulationError::Configuration(format!("expected {field:?} line, found {line:?}"))
    })
}

fn parse_output(router: RouterId, item: &str) -> Result<OutputLink> {
    let parts: Vec<&str> = item.split(':').collect();
    let [destination, port, metric] = parts.as_slice() else {
        return Err(SimulationError::Configuration(format!(
            "router {router}: output {item:?} is not a router:port:metric triple"
        )));
    };
    let destination = destination.trim().parse::<RouterId>().map_err(|_| {
        SimulationError::Configuration(format!(
            "router {router}: invalid output router id {destination:?}"
        ))
    })?;
    let port = port.trim().parse::<Port>().map_err(|_| {
        SimulationError::Configuration(format!("router {router}: invalid output port {port:?}"))
    })?;
    let metric = metric.trim().parse::<u32>().map_err(|_| {
        SimulationError::Configuration(format!("router {router}: invalid output metric {metric:?}"))
    })?;
    Ok(OutputLink {
        destination,
        port,
        metric,
    })
}
