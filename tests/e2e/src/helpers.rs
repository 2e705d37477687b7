//! Shared utilities for the end-to-end tests.

use {
    scfork_harness::{
        node::{NodeControl, ScId},
        HarnessConfig, NodeId, NodeRegistry, ScenarioDriver,
    },
    scfork_sim_cluster::{SimCluster, SimConfig, SimNode},
    std::sync::Arc,
};

/// Initialize logging once for a test binary.
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// A simulated cluster together with the registry the harness drives it
/// through.
pub struct TestCluster {
    pub cluster: SimCluster,
    pub registry: Arc<NodeRegistry>,
}

impl TestCluster {
    pub fn new(config: SimConfig) -> Self {
        let cluster = SimCluster::new(config).expect("valid cluster config");
        let registry = NodeRegistry::from_handles(cluster.handles()).expect("unique node ids");
        Self {
            cluster,
            registry: Arc::new(registry),
        }
    }

    pub fn node(&self, id: usize) -> Arc<SimNode> {
        self.cluster.node(NodeId(id)).expect("node exists")
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.registry.ids()
    }

    pub fn driver(&self, config: &HarnessConfig) -> ScenarioDriver {
        ScenarioDriver::new(self.registry.clone(), config).expect("valid scenario")
    }

    /// Whether `id`'s own log holds a line starting with `prefix`.
    pub fn logged(&self, id: usize, prefix: &str) -> bool {
        self.cluster
            .log_lines(NodeId(id))
            .expect("node exists")
            .iter()
            .any(|line| line.starts_with(prefix))
    }

    pub fn heights(&self) -> Vec<u64> {
        (0..self.cluster.len())
            .map(|i| self.node(i).get_block_count().expect("block count"))
            .collect()
    }
}

/// Three nodes with the default parameters.
pub fn standard_cluster() -> TestCluster {
    TestCluster::new(SimConfig::default())
}

/// The harness config tests run with: no sleeping, bounded waits.
pub fn dev_config() -> HarnessConfig {
    HarnessConfig::dev_default()
}

/// The sidechain id the default scenario creates.
pub fn scenario_scid() -> ScId {
    dev_config().scenario.scid
}
