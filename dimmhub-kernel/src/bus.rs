/**
 * MESSAGE BUS - Publication/abonnement d'événements de chargement
 *
 * RÔLE : Découple les loaders (producteurs) des nodes (consommateurs) : aucun
 * loader ne connaît son node, aucun node n'inspecte son loader.
 *
 * FONCTIONNEMENT :
 * - Instance explicite injectée dans chaque node et loader (pas de global),
 *   les clones partagent la même table d'abonnés
 * - Dispatch synchrone dans le contexte du publieur, dans l'ordre
 *   d'abonnement : les événements d'un même loader arrivent dans l'ordre
 * - Un handler en erreur ou qui panique est journalisé, les autres handlers
 *   sont quand même appelés
 */

use crate::node::NodeId;
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace, warn};
use uuid::Uuid;

/// État publié par un loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LoaderStatus {
    Connecting,
    Uploading,
    Complete,
    Error(String),
    Cancelled,
}

impl LoaderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error(_) | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoaderStatusEvent {
    pub node: NodeId,
    pub attempt: Uuid,
    pub status: LoaderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoaderProgressEvent {
    pub node: NodeId,
    pub attempt: Uuid,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusEvent {
    LoaderStatus(LoaderStatusEvent),
    LoaderProgress(LoaderProgressEvent),
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::LoaderStatus(_) => EventKind::LoaderStatus,
            Self::LoaderProgress(_) => EventKind::LoaderProgress,
        }
    }

    pub fn node(&self) -> NodeId {
        match self {
            Self::LoaderStatus(e) => e.node,
            Self::LoaderProgress(e) => e.node,
        }
    }

    pub fn attempt(&self) -> Uuid {
        match self {
            Self::LoaderStatus(e) => e.attempt,
            Self::LoaderProgress(e) => e.attempt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoaderStatus,
    LoaderProgress,
}

pub type Handler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un handler appelé pour chaque futur événement du type donné
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push(Subscriber {
            id,
            kind,
            handler: Arc::new(handler),
        });
        trace!(?kind, subscription = id.0, "subscribed");
        id
    }

    /// Retire un abonnement, retourne false s'il n'existait plus
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    /// Délivre l'événement à tous les handlers de son type, retourne le nombre
    /// de handlers exécutés sans erreur
    pub fn publish(&self, event: BusEvent) -> usize {
        let kind = event.kind();

        // snapshot : un handler peut (dés)abonner sans deadlock
        let handlers: Vec<(SubscriptionId, Handler)> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| (s.id, s.handler.clone()))
            .collect();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(subscription = id.0, ?kind, node = %event.node(), "handler failed: {e:#}");
                }
                Err(_) => {
                    error!(subscription = id.0, ?kind, node = %event.node(), "handler panicked");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn progress(node: u32, percent: u8) -> BusEvent {
        BusEvent::LoaderProgress(LoaderProgressEvent {
            node: NodeId::from(node),
            attempt: Uuid::nil(),
            percent,
        })
    }

    fn status(node: u32, status: LoaderStatus) -> BusEvent {
        BusEvent::LoaderStatus(LoaderStatusEvent {
            node: NodeId::from(node),
            attempt: Uuid::nil(),
            status,
        })
    }

    #[test]
    fn test_delivers_only_to_matching_kind() {
        let bus = MessageBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.subscribe(EventKind::LoaderProgress, move |e| {
            sink.lock().push(e.clone());
            Ok(())
        });

        assert_eq!(bus.publish(progress(1, 10)), 1);
        assert_eq!(bus.publish(status(1, LoaderStatus::Uploading)), 0);
        assert_eq!(*seen.lock(), vec![progress(1, 10)]);
    }

    #[test]
    fn test_preserves_publish_order() {
        let bus = MessageBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.subscribe(EventKind::LoaderProgress, move |e| {
            if let BusEvent::LoaderProgress(p) = e {
                sink.lock().push(p.percent);
            }
            Ok(())
        });

        for pct in [0, 10, 25, 50, 75, 100] {
            bus.publish(progress(7, pct));
        }
        assert_eq!(*seen.lock(), vec![0, 10, 25, 50, 75, 100]);
    }

    #[test]
    fn test_failing_handlers_do_not_block_delivery() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        bus.subscribe(EventKind::LoaderStatus, |_| anyhow::bail!("boom"));
        bus.subscribe(EventKind::LoaderStatus, |_| panic!("handler panic"));
        let counter = hits.clone();
        bus.subscribe(EventKind::LoaderStatus, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let delivered = bus.publish(status(3, LoaderStatus::Complete));
        assert_eq!(delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        let counter = hits.clone();
        let id = bus.subscribe(EventKind::LoaderProgress, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(progress(1, 1));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(progress(1, 2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_handler_can_subscribe_during_dispatch() {
        let bus = MessageBus::new();
        let inner_bus = bus.clone();
        bus.subscribe(EventKind::LoaderStatus, move |_| {
            inner_bus.subscribe(EventKind::LoaderStatus, |_| Ok(()));
            Ok(())
        });

        bus.publish(status(1, LoaderStatus::Connecting));
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(LoaderStatus::Complete.is_terminal());
        assert!(LoaderStatus::Error("io".into()).is_terminal());
        assert!(LoaderStatus::Cancelled.is_terminal());
        assert!(!LoaderStatus::Uploading.is_terminal());
        assert!(!LoaderStatus::Connecting.is_terminal());
    }
}
