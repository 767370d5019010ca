/**
 * NODE - Entrée du registre pour un endpoint NetDIMM distant
 *
 * RÔLE : Identité réseau + profil matériel d'une carte, jeu assigné, et état
 * du chargement en cours (au plus un LoaderWorker par node).
 *
 * MACHINE D'ÉTATS :
 *   Idle -> Validating -> Loading -> { Ready, Failed }
 *   Ready / Failed -> Validating au chargement suivant
 *   terminate() -> Idle
 *
 * CONCURRENCE : Les champs mutables ne sont modifiés que par les méthodes du
 * node et par ses handlers du bus, tous deux sérialisés par le même mutex.
 * Le mutex n'est jamais tenu pendant une publication sur le bus.
 */

use crate::bus::{BusEvent, EventKind, LoaderProgressEvent, LoaderStatus, LoaderStatusEvent, MessageBus, SubscriptionId};
use crate::game::{GameDescriptor, GameRef};
use crate::hardware::{HardwareProfile, RamSize, Tagged};
use crate::loader::{LoaderSettings, LoaderWorker, TransferError};
use crate::validator::{self, CompatibilityReport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identité d'un node : CRC-32 de hostname + ip + port.
/// Sert de clé de routage sur le bus, les collisions ne sont pas détectées.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub fn derive(hostname: &str, ip: IpAddr, port: u16) -> Self {
        let key = format!("{hostname}{ip}{port}");
        Self(crc32fast::hash(key.as_bytes()))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Idle,
    Validating,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("failed to resolve {hostname}: {source}")]
    Resolution {
        hostname: String,
        #[source]
        source: std::io::Error,
    },
    #[error("node {node} is busy with another load")]
    Busy { node: NodeId },
    #[error("node {node} is already registered")]
    AlreadyRegistered { node: NodeId },
    #[error("failed to start loader for node {node}: {source}")]
    Spawn {
        node: NodeId,
        #[source]
        source: TransferError,
    },
}

/// Ce qu'il faut pour construire un node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub nickname: String,
    pub hostname: String,
    pub port: u16,
    pub profile: HardwareProfile,
}

/// Résultat d'une demande de chargement acceptée par le node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Loader démarré pour cette tentative
    Started(Uuid),
    /// Jeu incompatible, aucun loader démarré
    Rejected(CompatibilityReport),
}

/// Vue {état, progression} lue par la couche web
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadView {
    pub state: NodeState,
    pub loader_status: Option<LoaderStatus>,
    pub upload_pct: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub nickname: String,
    pub hostname: String,
    pub ip: IpAddr,
    pub port: u16,
    pub state: NodeState,
    pub loader_status: Option<LoaderStatus>,
    pub upload_pct: u8,
    pub game: Option<GameRef>,
    pub failure: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Représentation externe d'un node (persistance, API)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub hostname: String,
    pub ip: IpAddr,
    pub port: u16,
    pub system: Tagged,
    pub monitor: Tagged,
    pub controls: Tagged,
    pub dimm_ram: RamSize,
    pub game: Option<GameRef>,
}

struct NodeInner {
    state: NodeState,
    loader_status: Option<LoaderStatus>,
    upload_pct: u8,
    game: Option<Arc<GameDescriptor>>,
    failure: Option<String>,
    /// Tentative courante, les événements des autres tentatives sont ignorés
    attempt: Option<Uuid>,
    worker: Option<LoaderWorker>,
    updated_at: OffsetDateTime,
}

impl NodeInner {
    fn view(&self) -> LoadView {
        LoadView {
            state: self.state,
            loader_status: self.loader_status.clone(),
            upload_pct: self.upload_pct,
        }
    }
}

struct NodeShared {
    id: NodeId,
    nickname: String,
    hostname: String,
    ip: IpAddr,
    port: u16,
    profile: HardwareProfile,
    inner: Mutex<NodeInner>,
    view_tx: watch::Sender<LoadView>,
}

impl NodeShared {
    /// À appeler avec le verrou tenu, après chaque mutation
    fn touch(&self, inner: &mut NodeInner) {
        inner.updated_at = OffsetDateTime::now_utc();
        self.view_tx.send_replace(inner.view());
    }

    fn on_loader_status(&self, event: &LoaderStatusEvent) {
        if event.node != self.id {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.attempt != Some(event.attempt) {
            debug!(node = %self.id, attempt = %event.attempt, "ignoring status of stale attempt");
            return;
        }

        inner.loader_status = Some(event.status.clone());
        // après terminate() le node est déjà Idle : seul le statut est enregistré
        let loading = inner.state == NodeState::Loading;
        match &event.status {
            LoaderStatus::Complete if loading => {
                info!(node = %self.id, "load complete");
                inner.state = NodeState::Ready;
                inner.upload_pct = 100;
            }
            LoaderStatus::Error(reason) if loading => {
                warn!(node = %self.id, %reason, "load failed");
                inner.state = NodeState::Failed;
                inner.failure = Some(reason.clone());
            }
            LoaderStatus::Cancelled => {
                info!(node = %self.id, "load cancelled");
                inner.state = NodeState::Idle;
            }
            _ => {}
        }
        if event.status.is_terminal() {
            inner.worker = None;
        }
        self.touch(&mut inner);
    }

    fn on_loader_progress(&self, event: &LoaderProgressEvent) {
        if event.node != self.id {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.attempt != Some(event.attempt) || inner.state != NodeState::Loading {
            return;
        }
        if event.percent < inner.upload_pct {
            warn!(node = %self.id, percent = event.percent, current = inner.upload_pct, "ignoring out-of-order progress");
            return;
        }
        inner.upload_pct = event.percent.min(100);
        self.touch(&mut inner);
    }
}

pub struct Node {
    shared: Arc<NodeShared>,
    bus: MessageBus,
    settings: LoaderSettings,
    subscriptions: Vec<SubscriptionId>,
}

impl Node {
    /// Résout le hostname puis construit le node et l'abonne au bus.
    /// Un échec de résolution est une erreur de construction.
    pub async fn resolve(spec: NodeSpec, bus: MessageBus, settings: LoaderSettings) -> Result<Self, NodeError> {
        let ip = resolve_hostname(&spec.hostname, spec.port).await?;
        Ok(Self::assemble(spec, ip, bus, settings))
    }

    fn assemble(spec: NodeSpec, ip: IpAddr, bus: MessageBus, settings: LoaderSettings) -> Self {
        let id = NodeId::derive(&spec.hostname, ip, spec.port);
        let view = LoadView {
            state: NodeState::Idle,
            loader_status: None,
            upload_pct: 0,
        };
        let (view_tx, _) = watch::channel(view);

        let shared = Arc::new(NodeShared {
            id,
            nickname: spec.nickname,
            hostname: spec.hostname,
            ip,
            port: spec.port,
            profile: spec.profile,
            inner: Mutex::new(NodeInner {
                state: NodeState::Idle,
                loader_status: None,
                upload_pct: 0,
                game: None,
                failure: None,
                attempt: None,
                worker: None,
                updated_at: OffsetDateTime::now_utc(),
            }),
            view_tx,
        });

        let subscriptions = subscribe_handlers(&bus, &shared);
        debug!(node = %id, hostname = %shared.hostname, %ip, port = shared.port, "node created");

        Self {
            shared,
            bus,
            settings,
            subscriptions,
        }
    }

    /// Copie explicite : même identité, profil et jeu assigné, mais sans loader
    /// et avec ses propres abonnements
    pub fn duplicate(&self) -> Self {
        let spec = NodeSpec {
            nickname: self.shared.nickname.clone(),
            hostname: self.shared.hostname.clone(),
            port: self.shared.port,
            profile: self.shared.profile.clone(),
        };
        let copy = Self::assemble(spec, self.shared.ip, self.bus.clone(), self.settings.clone());
        let game = self.shared.inner.lock().game.clone();
        {
            let mut inner = copy.shared.inner.lock();
            inner.game = game;
            copy.shared.touch(&mut inner);
        }
        copy
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn nickname(&self) -> &str {
        &self.shared.nickname
    }

    pub fn hostname(&self) -> &str {
        &self.shared.hostname
    }

    pub fn ip(&self) -> IpAddr {
        self.shared.ip
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.shared.ip, self.shared.port)
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.shared.profile
    }

    pub fn state(&self) -> NodeState {
        self.shared.inner.lock().state
    }

    pub fn loader_status(&self) -> Option<LoaderStatus> {
        self.shared.inner.lock().loader_status.clone()
    }

    pub fn upload_pct(&self) -> u8 {
        self.shared.inner.lock().upload_pct
    }

    pub fn game(&self) -> Option<Arc<GameDescriptor>> {
        self.shared.inner.lock().game.clone()
    }

    pub fn failure(&self) -> Option<String> {
        self.shared.inner.lock().failure.clone()
    }

    pub fn view(&self) -> LoadView {
        self.shared.inner.lock().view()
    }

    /// Récepteur des changements d'état, pour attendre une transition
    pub fn watch(&self) -> watch::Receiver<LoadView> {
        self.shared.view_tx.subscribe()
    }

    /// Valide (mode non strict) puis démarre le chargement
    pub fn load(&self, game: Arc<GameDescriptor>) -> Result<LoadOutcome, NodeError> {
        self.load_with(game, false)
    }

    /// Comme load(), mais moniteur et contrôles doivent correspondre
    pub fn load_strict(&self, game: Arc<GameDescriptor>) -> Result<LoadOutcome, NodeError> {
        self.load_with(game, true)
    }

    fn load_with(&self, game: Arc<GameDescriptor>, strict: bool) -> Result<LoadOutcome, NodeError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if matches!(inner.state, NodeState::Validating | NodeState::Loading) {
            warn!(node = %shared.id, game = game.id(), "load rejected, node is busy");
            return Err(NodeError::Busy { node: shared.id });
        }

        inner.state = NodeState::Validating;
        shared.touch(&mut inner);
        info!(node = %shared.id, nickname = %shared.nickname, hostname = %shared.hostname, game = game.id(), strict, "validating game");

        let report = validator::assess(&shared.profile, &game, strict);
        if !report.bootable() {
            let reason = report
                .failure_reason()
                .unwrap_or_else(|| "game is not bootable on this node".to_string());
            warn!(node = %shared.id, game = game.id(), %reason, "won't attempt load");
            inner.state = NodeState::Failed;
            inner.failure = Some(reason);
            inner.loader_status = None;
            inner.upload_pct = 0;
            // la tentative précédente (éventuellement terminée) ne doit plus rien modifier
            inner.attempt = None;
            shared.touch(&mut inner);
            return Ok(LoadOutcome::Rejected(report));
        }

        let mut worker = LoaderWorker::new(
            game.path(),
            self.address(),
            shared.id,
            self.bus.clone(),
            self.settings.clone(),
        );
        let attempt = worker.attempt();
        inner.game = Some(game);
        inner.failure = None;
        inner.loader_status = None;
        inner.upload_pct = 0;
        inner.attempt = Some(attempt);
        inner.state = NodeState::Loading;

        // la tâche ne peut pas toucher au node avant que le verrou soit relâché
        if let Err(source) = worker.start() {
            inner.state = NodeState::Failed;
            inner.failure = Some(source.to_string());
            inner.attempt = None;
            shared.touch(&mut inner);
            return Err(NodeError::Spawn { node: shared.id, source });
        }
        inner.worker = Some(worker);
        shared.touch(&mut inner);
        Ok(LoadOutcome::Started(attempt))
    }

    /// Arrête le loader actif s'il y en a un. Sans effet sur un node inactif.
    pub fn terminate(&self) -> bool {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        let Some(worker) = inner.worker.take() else {
            debug!(node = %shared.id, "terminate: no active loader");
            return false;
        };

        info!(node = %shared.id, attempt = %worker.attempt(), "received termination request, stopping loader");
        worker.stop();
        inner.state = NodeState::Idle;
        shared.touch(&mut inner);
        true
    }

    pub fn is_active(&self) -> bool {
        self.shared
            .inner
            .lock()
            .worker
            .as_ref()
            .is_some_and(|w| w.is_active())
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let shared = &self.shared;
        let inner = shared.inner.lock();
        NodeSnapshot {
            node_id: shared.id,
            nickname: shared.nickname.clone(),
            hostname: shared.hostname.clone(),
            ip: shared.ip,
            port: shared.port,
            state: inner.state,
            loader_status: inner.loader_status.clone(),
            upload_pct: inner.upload_pct,
            game: inner.game.as_ref().map(|g| g.to_ref()),
            failure: inner.failure.clone(),
            updated_at: inner.updated_at,
        }
    }

    pub fn record(&self) -> NodeRecord {
        let shared = &self.shared;
        let game = shared.inner.lock().game.as_ref().map(|g| g.to_ref());
        NodeRecord {
            hostname: shared.hostname.clone(),
            ip: shared.ip,
            port: shared.port,
            system: shared.profile.system.clone(),
            monitor: shared.profile.monitor.clone(),
            controls: shared.profile.controls.clone(),
            dimm_ram: shared.profile.dimm_ram,
            game,
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
        if let Some(worker) = self.shared.inner.lock().worker.take() {
            worker.stop();
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.shared.id)
            .field("nickname", &self.shared.nickname)
            .field("address", &self.address())
            .field("view", &self.view())
            .finish()
    }
}

fn subscribe_handlers(bus: &MessageBus, shared: &Arc<NodeShared>) -> Vec<SubscriptionId> {
    let weak: Weak<NodeShared> = Arc::downgrade(shared);
    let status = bus.subscribe(EventKind::LoaderStatus, move |event| {
        let Some(node) = weak.upgrade() else { return Ok(()) };
        match event {
            BusEvent::LoaderStatus(e) => node.on_loader_status(e),
            other => anyhow::bail!("unexpected {:?} event on status handler", other.kind()),
        }
        Ok(())
    });

    let weak: Weak<NodeShared> = Arc::downgrade(shared);
    let progress = bus.subscribe(EventKind::LoaderProgress, move |event| {
        let Some(node) = weak.upgrade() else { return Ok(()) };
        match event {
            BusEvent::LoaderProgress(e) => node.on_loader_progress(e),
            other => anyhow::bail!("unexpected {:?} event on progress handler", other.kind()),
        }
        Ok(())
    });

    vec![status, progress]
}

/// Résolution DNS, IPv4 en priorité comme gethostbyname
pub async fn resolve_hostname(hostname: &str, port: u16) -> Result<IpAddr, NodeError> {
    let resolution_error = |source| NodeError::Resolution {
        hostname: hostname.to_string(),
        source,
    };

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((hostname, port))
        .await
        .map_err(resolution_error)?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(|| {
            resolution_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no address returned",
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameRequirements;
    use std::time::Duration;

    fn profile() -> HardwareProfile {
        HardwareProfile {
            system: Tagged::new(1, "NAOMI"),
            monitor: Tagged::new(0, "Horizontal"),
            controls: Tagged::new(0, "Joystick"),
            dimm_ram: "256MB".parse().unwrap(),
        }
    }

    fn spec(port: u16) -> NodeSpec {
        NodeSpec {
            nickname: "cab-1".into(),
            hostname: "127.0.0.1".into(),
            port,
            profile: profile(),
        }
    }

    fn game(system: u32, ram: &str) -> Arc<GameDescriptor> {
        Arc::new(GameDescriptor::new(
            "mvsc2",
            "Marvel vs. Capcom 2",
            "/games/mvsc2.bin",
            GameRequirements {
                system: Tagged::new(system, "NAOMI"),
                monitor: Tagged::new(0, "Horizontal"),
                controls: Tagged::new(0, "Joystick"),
                dimm_ram: ram.parse().unwrap(),
                naomi2_conversion: false,
            },
        ))
    }

    #[test]
    fn test_identity_is_deterministic() {
        let ip: IpAddr = "192.168.0.2".parse().unwrap();
        let a = NodeId::derive("dimm-1", ip, 10703);
        let b = NodeId::derive("dimm-1", ip, 10703);
        assert_eq!(a, b);
        assert_ne!(a, NodeId::derive("dimm-1", ip, 10704));
        assert_eq!(a.value(), crc32fast::hash(b"dimm-1192.168.0.210703"));
    }

    #[tokio::test]
    async fn test_resolution_failure_is_a_constructor_error() {
        let mut bad = spec(10703);
        bad.hostname = "no-such-host.invalid".into();
        let err = Node::resolve(bad, MessageBus::new(), LoaderSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Resolution { .. }));
    }

    #[tokio::test]
    async fn test_terminate_on_idle_node_is_noop() {
        let node = Node::resolve(spec(10703), MessageBus::new(), LoaderSettings::default())
            .await
            .unwrap();
        assert!(!node.terminate());
        assert_eq!(node.state(), NodeState::Idle);
        assert!(!node.is_active());
    }

    #[tokio::test]
    async fn test_incompatible_game_fails_without_worker() {
        let node = Node::resolve(spec(10703), MessageBus::new(), LoaderSettings::default())
            .await
            .unwrap();

        let outcome = node.load(game(1, "512MB")).unwrap();
        let LoadOutcome::Rejected(report) = outcome else { panic!("expected rejection") };
        assert!(!report.bootable());
        assert_eq!(node.state(), NodeState::Failed);
        assert!(node.failure().unwrap().contains("DIMM RAM"));
        assert!(node.game().is_none());
        assert!(!node.is_active());
    }

    #[tokio::test]
    async fn test_unrelated_events_do_not_touch_node() {
        let bus = MessageBus::new();
        let node = Node::resolve(spec(10703), bus.clone(), LoaderSettings::default())
            .await
            .unwrap();
        let other = NodeId::from(node.id().value().wrapping_add(1));

        bus.publish(BusEvent::LoaderProgress(LoaderProgressEvent {
            node: other,
            attempt: Uuid::new_v4(),
            percent: 50,
        }));
        bus.publish(BusEvent::LoaderStatus(LoaderStatusEvent {
            node: other,
            attempt: Uuid::new_v4(),
            status: LoaderStatus::Error("not ours".into()),
        }));
        // même identité, tentative inconnue
        bus.publish(BusEvent::LoaderStatus(LoaderStatusEvent {
            node: node.id(),
            attempt: Uuid::new_v4(),
            status: LoaderStatus::Complete,
        }));

        assert_eq!(node.state(), NodeState::Idle);
        assert_eq!(node.upload_pct(), 0);
        assert_eq!(node.loader_status(), None);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes_handlers() {
        let bus = MessageBus::new();
        let node = Node::resolve(spec(10703), bus.clone(), LoaderSettings::default())
            .await
            .unwrap();
        assert_eq!(bus.subscriber_count(), 2);
        let copy = node.duplicate();
        assert_eq!(bus.subscriber_count(), 4);
        drop(node);
        assert_eq!(bus.subscriber_count(), 2);
        drop(copy);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_copies_identity_and_starts_idle() {
        let node = Node::resolve(spec(10703), MessageBus::new(), LoaderSettings::default())
            .await
            .unwrap();
        let copy = node.duplicate();
        assert_eq!(copy.id(), node.id());
        assert_eq!(copy.nickname(), "cab-1");
        assert_eq!(copy.profile(), node.profile());
        assert_eq!(copy.state(), NodeState::Idle);
        assert_eq!(copy.record(), node.record());
    }

    #[tokio::test]
    async fn test_record_serializes_missing_game_as_null() {
        let node = Node::resolve(spec(10703), MessageBus::new(), LoaderSettings::default())
            .await
            .unwrap();
        let json = serde_json::to_value(node.record()).unwrap();
        assert_eq!(json["hostname"], "127.0.0.1");
        assert_eq!(json["ip"], "127.0.0.1");
        assert_eq!(json["port"], 10703);
        assert_eq!(json["dimm_ram"], "256MB");
        assert_eq!(json["system"]["label"], "NAOMI");
        assert!(json["game"].is_null());
    }

    #[tokio::test]
    async fn test_watch_reports_rejection() {
        let node = Node::resolve(spec(10703), MessageBus::new(), LoaderSettings::default())
            .await
            .unwrap();
        let mut rx = node.watch();
        node.load(game(4, "128MB")).unwrap();

        let view = tokio::time::timeout(
            Duration::from_secs(1),
            rx.wait_for(|v| v.state == NodeState::Failed),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(view.upload_pct, 0);
    }
}
