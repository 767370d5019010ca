/**
 * NODE REGISTRY - Catalogue des nodes DIMM connus du kernel
 *
 * RÔLE : Peuplé depuis la config au démarrage, consulté par l'API REST.
 * Chaque node partage le même bus et les mêmes réglages de loader.
 */

use crate::bus::MessageBus;
use crate::loader::LoaderSettings;
use crate::node::{Node, NodeError, NodeId, NodeSpec};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub type NodesMap = BTreeMap<NodeId, Arc<Node>>;

pub struct NodeRegistry {
    nodes: RwLock<NodesMap>,
    bus: MessageBus,
    settings: LoaderSettings,
}

impl NodeRegistry {
    pub fn new(bus: MessageBus, settings: LoaderSettings) -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            bus,
            settings,
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Résout et enregistre un node, les erreurs remontent directement
    pub async fn register(&self, spec: NodeSpec) -> Result<Arc<Node>, NodeError> {
        let node = Node::resolve(spec, self.bus.clone(), self.settings.clone()).await?;
        let id = node.id();

        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&id) {
            return Err(NodeError::AlreadyRegistered { node: id });
        }
        let node = Arc::new(node);
        nodes.insert(id, node.clone());

        info!(node = %id, nickname = node.nickname(), address = %node.address(), "registered node");
        Ok(node)
    }

    /// Enregistre tous les nodes de la config ; un node en échec est journalisé et ignoré
    pub async fn populate(&self, specs: Vec<NodeSpec>) -> usize {
        let mut registered = 0;
        for spec in specs {
            let hostname = spec.hostname.clone();
            match self.register(spec).await {
                Ok(_) => registered += 1,
                Err(e) => error!(%hostname, "failed to register node: {e}"),
            }
        }
        registered
    }

    pub async fn get(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.read().await.get(&id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// Retire un node du registre et arrête son loader éventuel
    pub async fn deregister(&self, id: NodeId) -> Option<Arc<Node>> {
        let node = self.nodes.write().await.remove(&id)?;
        if node.terminate() {
            warn!(node = %id, "deregistered node had an active load");
        }
        info!(node = %id, "deregistered node");
        Some(node)
    }

    pub async fn active_loads(&self) -> usize {
        self.nodes
            .read()
            .await
            .values()
            .filter(|n| n.is_active())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}

pub type SharedNodeRegistry = Arc<NodeRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{HardwareProfile, Tagged};

    fn spec(hostname: &str, port: u16) -> NodeSpec {
        NodeSpec {
            nickname: format!("{hostname}:{port}"),
            hostname: hostname.into(),
            port,
            profile: HardwareProfile {
                system: Tagged::new(1, "NAOMI"),
                monitor: Tagged::new(0, "Horizontal"),
                controls: Tagged::new(0, "Joystick"),
                dimm_ram: "512MB".parse().unwrap(),
            },
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = NodeRegistry::new(MessageBus::new(), LoaderSettings::default());
        let node = registry.register(spec("127.0.0.1", 10703)).await.unwrap();

        assert_eq!(registry.len().await, 1);
        let found = registry.get(node.id()).await.unwrap();
        assert_eq!(found.nickname(), "127.0.0.1:10703");
        assert!(registry.get(NodeId::from(node.id().value() ^ 1)).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_rejected() {
        let registry = NodeRegistry::new(MessageBus::new(), LoaderSettings::default());
        registry.register(spec("127.0.0.1", 10703)).await.unwrap();
        let err = registry.register(spec("127.0.0.1", 10703)).await.unwrap_err();
        assert!(matches!(err, NodeError::AlreadyRegistered { .. }));
        assert_eq!(registry.bus().subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_populate_skips_unresolvable_nodes() {
        let registry = NodeRegistry::new(MessageBus::new(), LoaderSettings::default());
        let registered = registry
            .populate(vec![
                spec("127.0.0.1", 10703),
                spec("no-such-host.invalid", 10703),
                spec("127.0.0.1", 10704),
            ])
            .await;
        assert_eq!(registered, 2);
        assert_eq!(registry.list().await.len(), 2);
        assert_eq!(registry.active_loads().await, 0);
    }

    #[tokio::test]
    async fn test_deregister_releases_subscriptions() {
        let bus = MessageBus::new();
        let registry = NodeRegistry::new(bus.clone(), LoaderSettings::default());
        let id = registry.register(spec("127.0.0.1", 10703)).await.unwrap().id();

        let removed = registry.deregister(id).await.unwrap();
        assert!(registry.is_empty().await);
        drop(removed);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(registry.deregister(id).await.is_none());
    }
}
