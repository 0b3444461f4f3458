//! Svcsim: a synthetic load-and-failure simulator for exercising monitoring dashboards and
//! alerting pipelines. A small fleet of nodes continuously generates synthetic
//! request-latency/status observations at a controllable rate, while out-of-band commands
//! inject errors, drain nodes, or rotate traffic across the fleet to emulate a rolling deploy.
//!
//! # Features
//! - One generator and one command listener task per node, on Tokio.
//! - Rendezvous command channels: a send resolves once the node has taken the command.
//! - Fault injection (fail, remove, fix) and rolling-deploy rotation over a [`Fleet`].
//! - Pluggable [`ObservationSink`]s for the synthetic request stream.
//!
//! # Example
//! ```
//! use svcsim::{Fleet, MetricsSink, SimConfig, SimError};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), SimError> {
//! let config = SimConfig::new(3, 900)?;
//! let sink = Arc::new(MetricsSink::new()?);
//! let (fleet, _tasks) = Fleet::launch(&config, Arc::clone(&sink))?;
//! fleet.fail_node(2).await?;
//! fleet.fix_node().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
mod config;
mod error;
mod fleet;
pub mod node;
mod sink;
mod types;

pub use channel::{rendezvous, CommandReceiver, CommandSender};
pub use config::SimConfig;
pub use error::SimError;
pub use fleet::Fleet;
pub use node::{GeneratorState, Node, StateSnapshot};
pub use sink::{MetricsSink, ObservationSink, SeriesKey, SeriesStats, TracingSink, REQUEST_TIME_METRIC};
pub use types::{node_label, Command, Observation};
