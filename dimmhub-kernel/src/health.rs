use crate::catalog::Catalog;
use crate::registry::NodeRegistry;
use crate::state::{new_state, Shared};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub nodes_tracked: u32,
    pub active_loads: u32,
    pub games_cataloged: u32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Shared<String>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: new_state("disabled".to_string()),
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub async fn get_health(&self, registry: &NodeRegistry, catalog: &Catalog) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            nodes_tracked: registry.len().await as u32,
            active_loads: registry.active_loads().await as u32,
            games_cataloged: catalog.len() as u32,
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use crate::loader::LoaderSettings;

    #[tokio::test]
    async fn test_health_reflects_mqtt_transitions() {
        let tracker = HealthTracker::new();
        let registry = NodeRegistry::new(MessageBus::new(), LoaderSettings::default());
        let catalog = Catalog::new();

        let health = tracker.get_health(&registry, &catalog).await;
        assert_eq!(health.mqtt_status, "disabled");
        assert_eq!(health.nodes_tracked, 0);
        assert_eq!(health.active_loads, 0);

        tracker.mark_mqtt_connecting();
        tracker.increment_reconnects();
        tracker.increment_reconnects();
        let health = tracker.get_health(&registry, &catalog).await;
        assert_eq!(health.mqtt_status, "reconnecting");
        assert_eq!(health.mqtt_reconnects, 2);

        tracker.mark_mqtt_connected();
        assert_eq!(tracker.get_health(&registry, &catalog).await.mqtt_status, "connected");
    }
}
