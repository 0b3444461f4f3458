use thiserror::Error;

/// Errors that can occur while driving the simulation.
#[derive(Error, Debug)]
pub enum SimError {
    /// A node index outside `[1, nodes]` was given to a control operation.
    #[error("node {node} out of range (fleet has {nodes} nodes)")]
    OutOfRange { node: usize, nodes: usize },

    /// The fleet configuration cannot support the requested operation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A command could not be handed to the node's listener.
    #[error("node {node} unavailable")]
    NodeUnavailable { node: usize },

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// Metrics could not be registered or encoded.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
