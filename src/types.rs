use serde::{Deserialize, Serialize};

/// Full-state control message for one node.
///
/// Every field is applied on receipt; there is no partial update. A command
/// that only means to pause a node still has to carry the rate it should keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Command {
    /// 1-based id of the target node.
    pub node_id: usize,

    /// Force every observation to be an error until cleared.
    pub produce_errors: bool,

    /// Stop emitting observations until cleared. Overrides `target_rps`.
    pub paused: bool,

    /// Requests per second to approximate.
    pub target_rps: u32,
}

impl Command {
    /// Steady-state command: serving at `rps`, no errors, not paused.
    pub fn serving(node_id: usize, rps: u32) -> Self {
        Self {
            node_id,
            produce_errors: false,
            paused: false,
            target_rps: rps,
        }
    }

    /// Node drained out of rotation, keeping `rps` for when it resumes.
    pub fn paused(node_id: usize, rps: u32) -> Self {
        Self {
            paused: true,
            ..Self::serving(node_id, rps)
        }
    }

    /// Node failing every request it serves.
    pub fn failing(node_id: usize, rps: u32) -> Self {
        Self {
            produce_errors: true,
            ..Self::serving(node_id, rps)
        }
    }
}

/// One synthetic request record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Node label, `node{N}`.
    pub node: String,

    /// HTTP-like status code.
    pub status: u16,

    /// True iff `status >= 500`, or the node is forced into errors.
    pub is_error: bool,

    /// Synthetic latency in milliseconds.
    pub latency_ms: f64,
}

/// Label used for a node in observations and logs.
pub fn node_label(node_id: usize) -> String {
    format!("node{node_id}")
}
