use thiserror::Error;

use crate::model::topology::{Port, RouterId};

/// Crate-wide error taxonomy.
///
/// `Configuration` is fatal before the simulation starts. `Delivery` is a
/// per-message problem the caller logs and drops. `StateInvariant` is fatal
/// to the router that detected it but isolated from the rest of the fleet.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid topology or configuration: {0}")]
    Configuration(String),

    #[error("undeliverable advertisement from output port {port}: {reason}")]
    Delivery { port: Port, reason: String },

    #[error("routing state invariant violated on router {router}: {detail}")]
    StateInvariant { router: RouterId, detail: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
