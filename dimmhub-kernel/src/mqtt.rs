/**
 * MQTT MIRROR - Recopie des événements du bus vers le broker
 *
 * RÔLE : Les dashboards distants suivent les chargements sans interroger
 * l'API REST. Chaque événement du bus est publié en JSON sur son topic.
 *
 * FONCTIONNEMENT : Les handlers du bus sont synchrones, ils ne font que
 * pousser le message dans un canal. Une tâche unique draine ce canal et
 * pilote l'eventloop rumqttc, en utilisant try_publish pour ne jamais
 * bloquer la boucle qui fait avancer la connexion.
 */

use crate::bus::{BusEvent, EventKind, MessageBus, SubscriptionId};
use crate::config::MqttConf;
use crate::health::HealthTracker;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const STATUS_TOPIC: &str = "dimmhub/loader/status@v1";
pub const PROGRESS_TOPIC: &str = "dimmhub/loader/progress@v1";

pub fn topic_for(event: &BusEvent) -> &'static str {
    match event.kind() {
        EventKind::LoaderStatus => STATUS_TOPIC,
        EventKind::LoaderProgress => PROGRESS_TOPIC,
    }
}

pub fn encode(event: &BusEvent) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(event)
}

pub struct MqttMirror {
    bus: MessageBus,
    subscriptions: Vec<SubscriptionId>,
    task: JoinHandle<()>,
}

impl MqttMirror {
    /// Arrête la recopie : désabonne les handlers et stoppe la tâche
    pub fn shutdown(mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
        self.task.abort();
    }
}

/// Doit être appelé depuis un runtime tokio
pub fn spawn_status_mirror(bus: &MessageBus, conf: &MqttConf, health: HealthTracker) -> MqttMirror {
    let (tx, rx) = mpsc::unbounded_channel::<(&'static str, Vec<u8>)>();

    let subscriptions = [EventKind::LoaderStatus, EventKind::LoaderProgress]
        .into_iter()
        .map(|kind| {
            let tx = tx.clone();
            bus.subscribe(kind, move |event| {
                let payload = encode(event)?;
                tx.send((topic_for(event), payload))
                    .map_err(|_| anyhow::anyhow!("mqtt mirror is no longer running"))
            })
        })
        .collect();

    let mut opts = MqttOptions::new(
        format!("dimmhub-kernel-{}", uuid::Uuid::new_v4().simple()),
        conf.host.clone(),
        conf.port,
    );
    opts.set_keep_alive(Duration::from_secs(15));
    info!(host = %conf.host, port = conf.port, "starting MQTT status mirror");

    let task = tokio::spawn(run_mirror(opts, rx, health));
    MqttMirror {
        bus: bus.clone(),
        subscriptions,
        task,
    }
}

async fn run_mirror(
    opts: MqttOptions,
    mut rx: mpsc::UnboundedReceiver<(&'static str, Vec<u8>)>,
    health: HealthTracker,
) {
    let (client, mut eventloop) = AsyncClient::new(opts, 64);
    health.mark_mqtt_connecting();

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some((topic, payload)) = msg else {
                    debug!("bus side closed, stopping MQTT mirror");
                    break;
                };
                if let Err(e) = client.try_publish(topic, QoS::AtLeastOnce, false, payload) {
                    warn!(topic, "dropping mirrored event: {e}");
                }
            }
            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("connected to MQTT broker");
                    health.mark_mqtt_connected();
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {e}");
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            },
        }
    }
}
