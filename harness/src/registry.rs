//! Explicit registry of cluster members keyed by [`NodeId`].

use {
    crate::{
        error::{HarnessError, Result},
        node::{NodeControl, NodeId},
    },
    log::debug,
    std::{collections::BTreeMap, net::SocketAddr, sync::Arc},
};

/// The set of nodes a harness drives.
#[derive(Default, Clone)]
pub struct NodeRegistry {
    nodes: BTreeMap<NodeId, Arc<dyn NodeControl>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from handles, keyed by each handle's own identity.
    pub fn from_handles<I>(handles: I) -> Result<Self>
    where
        I: IntoIterator<Item = Arc<dyn NodeControl>>,
    {
        let mut registry = Self::new();
        for handle in handles {
            registry.register(handle)?;
        }
        Ok(registry)
    }

    /// Add a node. Identities must be unique.
    pub fn register(&mut self, node: Arc<dyn NodeControl>) -> Result<()> {
        let id = node.id();
        if self.nodes.contains_key(&id) {
            return Err(HarnessError::Config(format!("{id} registered twice")));
        }
        debug!("registered {id} at {}", node.p2p_addr());
        self.nodes.insert(id, node);
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> Result<&dyn NodeControl> {
        self.nodes
            .get(&id)
            .map(|node| node.as_ref())
            .ok_or(HarnessError::UnknownNode(id))
    }

    pub fn p2p_addr(&self, id: NodeId) -> Result<SocketAddr> {
        Ok(self.get(id)?.p2p_addr())
    }

    /// All identities in ascending order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &dyn NodeControl)> {
        self.nodes.iter().map(|(id, node)| (*id, node.as_ref()))
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.ids())
            .finish()
    }
}
