use crate::{
    channel::{rendezvous, CommandSender},
    config::SimConfig,
    node::{self, Node},
    sink::ObservationSink,
    Command, SimError,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// The simulated nodes, addressed by 1-based id.
///
/// Holds one command sender per node; index `i` is node `i + 1`. Cloning a fleet
/// shares the same nodes. Control operations on clones are not serialized
/// against each other: the last command a node receives wins.
#[derive(Debug, Clone)]
pub struct Fleet {
    /// Senders for each node.
    senders: Vec<CommandSender>,

    /// Fleet parameters; `nodes` always equals `senders.len()`.
    config: SimConfig,
}

impl Fleet {
    /// Spawns a generator and a listener for every node in `config`.
    ///
    /// Every node starts serving at the steady per-node rate.
    ///
    /// # Returns
    /// The fleet and the handles of all spawned tasks, two per node.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub fn launch<S: ObservationSink>(
        config: &SimConfig,
        sink: Arc<S>,
    ) -> Result<(Self, Vec<JoinHandle<()>>), SimError> {
        config.validate()?;
        let rps = config.steady_rps();
        tracing::info!(nodes = config.nodes, rps = config.base_rps, "starting nodes");

        let mut senders = Vec::with_capacity(config.nodes);
        let mut handles = Vec::with_capacity(config.nodes * 2);
        for id in 1..=config.nodes {
            let (sender, receiver) = rendezvous(id);
            let node = Node::new(id, rps, config.jitter, Arc::clone(&sink));
            tracing::info!(node = id, rps, "starting node");
            handles.extend(node::spawn(node, receiver));
            senders.push(sender);
        }

        Ok((Self::from_senders(senders, config)?, handles))
    }

    /// Builds a fleet over existing channels, one per node in order.
    ///
    /// # Arguments
    /// * `senders` - Command senders; index `i` addresses node `i + 1`.
    /// * `config` - Rates and timings. Its node count is replaced by `senders.len()`.
    ///
    /// # Errors
    /// Returns an error if `senders` is empty or `config` is otherwise invalid.
    pub fn from_senders(senders: Vec<CommandSender>, config: &SimConfig) -> Result<Self, SimError> {
        let config = SimConfig {
            nodes: senders.len(),
            ..config.clone()
        };
        config.validate()?;
        Ok(Self { senders, config })
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Always false: a fleet has at least one node.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Parameters the fleet runs with.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Resolves the node a control request targets.
    ///
    /// An explicit node is range-checked. Without one, a node is drawn uniformly,
    /// from a generator seeded afresh for this call.
    pub fn select_node(&self, node: Option<usize>) -> Result<usize, SimError> {
        match node {
            Some(node) => self.check_node(node).map(|_| node),
            None => Ok(StdRng::from_entropy().gen_range(1..=self.len())),
        }
    }

    /// Hands `command` to node `node`, bounded by the send timeout.
    ///
    /// # Errors
    /// Returns [`SimError::OutOfRange`] before sending anything if `node` is not
    /// in the fleet, or [`SimError::NodeUnavailable`] if the node does not take it.
    pub async fn send(&self, node: usize, command: Command) -> Result<(), SimError> {
        let sender = self.check_node(node)?;
        let result = sender.send_timeout(command, self.config.send_timeout()).await;
        if let Err(e) = &result {
            tracing::warn!(node, error = %e, "command not delivered");
        }
        result
    }

    /// Forces every request on `node` to fail and shifts its traffic to the others.
    pub async fn fail_node(&self, node: usize) -> Result<(), SimError> {
        self.check_node(node)?;
        let takeover = self.config.takeover_rps()?;
        tracing::info!(node, takeover, "failing node");

        self.send(node, Command::failing(node, 0)).await?;
        self.redistribute(node, takeover).await
    }

    /// Takes `node` out of service and shifts its traffic to the others.
    pub async fn remove_node(&self, node: usize) -> Result<(), SimError> {
        self.check_node(node)?;
        let takeover = self.config.takeover_rps()?;
        tracing::info!(node, takeover, "removing node from service");

        self.send(node, Command::paused(node, 0)).await?;
        self.redistribute(node, takeover).await
    }

    /// Returns every node to steady state.
    pub async fn fix_node(&self) -> Result<(), SimError> {
        let rps = self.config.steady_rps();
        tracing::info!(rps, "restoring all nodes to service");
        self.broadcast(rps).await
    }

    /// Runs one rolling-deploy rotation across the whole fleet.
    ///
    /// Each node in turn is paused for the deploy window while the rest serve
    /// its share, then all nodes return to steady state and the rotation settles
    /// before moving on. Occupies the caller for
    /// `nodes * (deploy_window + settle_delay)`.
    pub async fn deploy(&self) -> Result<(), SimError> {
        let takeover = self.config.takeover_rps()?;
        let steady = self.config.steady_rps();

        for deploying in 1..=self.len() {
            tracing::info!(node = deploying, takeover, "deploying node");
            if let Err(e) = self.take_out(deploying, takeover).await {
                tracing::warn!(
                    node = deploying,
                    error = %e,
                    "deploy aborted while taking node out, fleet left mid-rotation"
                );
                return Err(e);
            }
            tokio::time::sleep(self.config.deploy_window()).await;

            tracing::info!(node = deploying, rps = steady, "node deployed, resuming");
            if let Err(e) = self.broadcast(steady).await {
                tracing::warn!(
                    node = deploying,
                    error = %e,
                    "deploy aborted while resuming, node may still be paused"
                );
                return Err(e);
            }
            tokio::time::sleep(self.config.settle_delay()).await;
        }
        tracing::info!(nodes = self.len(), "deploy rotation complete");
        Ok(())
    }

    /// Pauses `deploying` and moves every other node to `takeover`.
    async fn take_out(&self, deploying: usize, takeover: u32) -> Result<(), SimError> {
        for node in 1..=self.len() {
            let command = if node == deploying {
                Command::paused(node, takeover)
            } else {
                Command::serving(node, takeover)
            };
            self.send(node, command).await?;
        }
        Ok(())
    }

    async fn redistribute(&self, skip: usize, rps: u32) -> Result<(), SimError> {
        for node in (1..=self.len()).filter(|&n| n != skip) {
            self.send(node, Command::serving(node, rps)).await?;
        }
        Ok(())
    }

    async fn broadcast(&self, rps: u32) -> Result<(), SimError> {
        for node in 1..=self.len() {
            self.send(node, Command::serving(node, rps)).await?;
        }
        Ok(())
    }

    fn check_node(&self, node: usize) -> Result<&CommandSender, SimError> {
        node.checked_sub(1)
            .and_then(|i| self.senders.get(i))
            .ok_or(SimError::OutOfRange {
                node,
                nodes: self.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CommandReceiver;
    use std::sync::Mutex;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<Command>>>;

    /// Fleet whose nodes record every command they receive.
    fn recording_fleet(config: &SimConfig) -> (Fleet, Log) {
        let log: Log = Arc::default();
        let mut senders = Vec::new();
        for id in 1..=config.nodes {
            let (sender, receiver) = rendezvous(id);
            tokio::spawn(record(receiver, Arc::clone(&log)));
            senders.push(sender);
        }
        (Fleet::from_senders(senders, config).unwrap(), log)
    }

    async fn record(mut receiver: CommandReceiver, log: Log) {
        while let Some(command) = receiver.recv().await {
            log.lock().unwrap().push(command);
        }
    }

    fn drain(log: &Log) -> Vec<Command> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[tokio::test]
    async fn test_fail_node() {
        let config = SimConfig::new(3, 900).unwrap();
        let (fleet, log) = recording_fleet(&config);

        fleet.fail_node(2).await.unwrap();
        tokio::task::yield_now().await;

        let commands = drain(&log);
        assert_eq!(
            commands,
            vec![
                Command::failing(2, 0),
                Command::serving(1, 450),
                Command::serving(3, 450),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_and_fix_node() {
        let config = SimConfig::new(3, 900).unwrap();
        let (fleet, log) = recording_fleet(&config);

        fleet.remove_node(1).await.unwrap();
        fleet.fix_node().await.unwrap();
        tokio::task::yield_now().await;

        let commands = drain(&log);
        assert_eq!(
            commands,
            vec![
                Command::paused(1, 0),
                Command::serving(2, 450),
                Command::serving(3, 450),
                Command::serving(1, 300),
                Command::serving(2, 300),
                Command::serving(3, 300),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deploy_rotation() {
        let config = SimConfig::new(3, 900).unwrap();
        let (fleet, log) = recording_fleet(&config);
        let rotation = tokio::spawn({
            let fleet = fleet.clone();
            async move { fleet.deploy().await }
        });

        // Node 1 is out, the others take over.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            drain(&log),
            vec![
                Command::paused(1, 450),
                Command::serving(2, 450),
                Command::serving(3, 450),
            ]
        );

        // Deploy window elapsed: everyone back at the steady rate.
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(
            drain(&log),
            vec![
                Command::serving(1, 300),
                Command::serving(2, 300),
                Command::serving(3, 300),
            ]
        );

        // Settle, then node 2 goes out.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(
            drain(&log),
            vec![
                Command::serving(1, 450),
                Command::paused(2, 450),
                Command::serving(3, 450),
            ]
        );

        rotation.await.unwrap().unwrap();
        // Node 2 resumes, then node 3 goes out and resumes.
        assert_eq!(drain(&log).len(), 3 + 3 + 3);
    }

    #[tokio::test]
    async fn test_single_node_cannot_redistribute() {
        let config = SimConfig::new(1, 900).unwrap();
        let (fleet, log) = recording_fleet(&config);

        assert!(matches!(
            fleet.deploy().await,
            Err(SimError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            fleet.fail_node(1).await,
            Err(SimError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            fleet.remove_node(1).await,
            Err(SimError::InvalidConfiguration(_))
        ));
        tokio::task::yield_now().await;
        assert!(drain(&log).is_empty(), "no command may be sent");

        // Restoring steady state needs no redistribution.
        fleet.fix_node().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(drain(&log), vec![Command::serving(1, 900)]);
    }

    #[tokio::test]
    async fn test_out_of_range_sends_nothing() {
        let config = SimConfig::new(3, 900).unwrap();
        let (fleet, log) = recording_fleet(&config);

        for node in [0, 4] {
            assert!(matches!(
                fleet.fail_node(node).await,
                Err(SimError::OutOfRange { nodes: 3, .. })
            ));
            assert!(matches!(
                fleet.remove_node(node).await,
                Err(SimError::OutOfRange { .. })
            ));
        }
        tokio::task::yield_now().await;
        assert!(drain(&log).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_node_is_unavailable() {
        let config = SimConfig::new(2, 100).unwrap();
        let (alive, mut alive_rx) = rendezvous(1);
        let (dead, _dead_rx) = rendezvous(2);
        tokio::spawn(async move { while alive_rx.recv().await.is_some() {} });
        let fleet = Fleet::from_senders(vec![alive, dead], &config).unwrap();

        let err = fleet.fix_node().await.unwrap_err();
        assert!(matches!(err, SimError::NodeUnavailable { node: 2 }));
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_deploy_stops_at_dead_node() {
        let config = SimConfig::new(3, 900).unwrap();
        let log: Log = Arc::default();
        let mut senders = Vec::new();
        for id in 1..=2 {
            let (sender, receiver) = rendezvous(id);
            tokio::spawn(record(receiver, Arc::clone(&log)));
            senders.push(sender);
        }
        let (dead, _dead_rx) = rendezvous(3);
        senders.push(dead);
        let fleet = Fleet::from_senders(senders, &config).unwrap();

        let err = fleet.deploy().await.unwrap_err();
        assert!(matches!(err, SimError::NodeUnavailable { node: 3 }));
        // Node 1 stays paused; nothing resumes it.
        assert_eq!(
            drain(&log),
            vec![Command::paused(1, 450), Command::serving(2, 450)]
        );
        assert!(logs_contain("fleet left mid-rotation"));
    }

    #[test]
    fn test_from_senders_takes_node_count_from_channels() {
        let config = SimConfig::new(5, 900).unwrap();
        let (sender, _receiver) = rendezvous(1);
        let fleet = Fleet::from_senders(vec![sender], &config).unwrap();
        assert_eq!(fleet.config().nodes, 1);
        assert_eq!(fleet.config().steady_rps(), 900);
        assert!(matches!(
            Fleet::from_senders(Vec::new(), &config),
            Err(SimError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_select_node() {
        let config = SimConfig::new(4, 100).unwrap();
        let (fleet, _log) = recording_fleet(&config);

        assert_eq!(fleet.select_node(Some(3)).unwrap(), 3);
        assert!(matches!(
            fleet.select_node(Some(5)),
            Err(SimError::OutOfRange { node: 5, nodes: 4 })
        ));
        for _ in 0..100 {
            let node = fleet.select_node(None).unwrap();
            assert!((1..=4).contains(&node));
        }
    }
}
