/**
 * LOADER - Transfert asynchrone d'une image de jeu vers une carte NetDIMM
 *
 * RÔLE : Un LoaderWorker par tentative de chargement. Il ouvre l'image, se
 * connecte à l'endpoint TCP du node et y écrit l'image par blocs.
 *
 * FONCTIONNEMENT :
 * - start() lance une tâche tokio, stop() lève un flag vérifié entre chaque bloc
 * - Progression publiée sur le bus (pourcentages croissants, 0 puis 100)
 * - Exactement un statut terminal : complete, error ou cancelled
 * - Les erreurs de transfert ne remontent jamais au node autrement que par le bus
 */

use crate::bus::{BusEvent, LoaderProgressEvent, LoaderStatus, LoaderStatusEvent, MessageBus};
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Réglages de transfert, partagés par tous les loaders du kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Taille des blocs écrits sur la socket
    pub chunk_size: usize,
    /// Pause entre deux blocs (0 = pas de pause)
    pub chunk_delay_ms: u64,
    pub connect_timeout_secs: u64,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            chunk_delay_ms: 0,
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to open image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("connection to {addr} timed out after {secs}s")]
    ConnectTimeout { addr: SocketAddr, secs: u64 },
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("transfer I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("loader must be started from within a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

enum Outcome {
    Complete,
    Cancelled,
}

/// État partagé entre le worker et sa tâche de transfert
struct Transfer {
    path: PathBuf,
    dest: SocketAddr,
    node: NodeId,
    attempt: Uuid,
    settings: LoaderSettings,
    bus: MessageBus,
    stop: Arc<AtomicBool>,
    percent: Arc<AtomicU8>,
}

pub struct LoaderWorker {
    path: PathBuf,
    dest: SocketAddr,
    node: NodeId,
    attempt: Uuid,
    settings: LoaderSettings,
    bus: MessageBus,
    stop: Arc<AtomicBool>,
    percent: Arc<AtomicU8>,
    task: Option<JoinHandle<()>>,
}

impl LoaderWorker {
    pub fn new(
        path: impl Into<PathBuf>,
        dest: SocketAddr,
        node: NodeId,
        bus: MessageBus,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            path: path.into(),
            dest,
            node,
            attempt: Uuid::new_v4(),
            settings,
            bus,
            stop: Arc::new(AtomicBool::new(false)),
            percent: Arc::new(AtomicU8::new(0)),
            task: None,
        }
    }

    pub fn attempt(&self) -> Uuid {
        self.attempt
    }

    /// Pourcentage transféré vu par le worker lui-même
    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }

    /// Démarre le transfert en tâche de fond. Sans effet si déjà démarré.
    pub fn start(&mut self) -> Result<(), TransferError> {
        if self.task.is_some() {
            debug!(node = %self.node, attempt = %self.attempt, "loader already started");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()?;
        let transfer = Transfer {
            path: self.path.clone(),
            dest: self.dest,
            node: self.node,
            attempt: self.attempt,
            settings: self.settings.clone(),
            bus: self.bus.clone(),
            stop: self.stop.clone(),
            percent: self.percent.clone(),
        };

        info!(node = %self.node, attempt = %self.attempt, dest = %self.dest, path = %self.path.display(), "starting loader");
        self.task = Some(runtime.spawn(transfer.run()));
        Ok(())
    }

    /// Demande d'arrêt coopératif, prise en compte au prochain bloc
    pub fn stop(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(node = %self.node, attempt = %self.attempt, "stop requested");
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl std::fmt::Debug for LoaderWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderWorker")
            .field("node", &self.node)
            .field("attempt", &self.attempt)
            .field("dest", &self.dest)
            .field("path", &self.path)
            .field("percent", &self.percent())
            .field("active", &self.is_active())
            .finish()
    }
}

impl Transfer {
    async fn run(self) {
        self.publish_status(LoaderStatus::Connecting);

        let status = match self.transfer().await {
            Ok(Outcome::Complete) => {
                info!(node = %self.node, attempt = %self.attempt, "upload complete");
                LoaderStatus::Complete
            }
            Ok(Outcome::Cancelled) => {
                info!(node = %self.node, attempt = %self.attempt, "upload cancelled");
                LoaderStatus::Cancelled
            }
            Err(e) => {
                warn!(node = %self.node, attempt = %self.attempt, "upload failed: {e}");
                LoaderStatus::Error(e.to_string())
            }
        };

        self.publish_status(status);
    }

    async fn transfer(&self) -> Result<Outcome, TransferError> {
        if self.stopped() {
            return Ok(Outcome::Cancelled);
        }

        let mut file = File::open(&self.path).await.map_err(|source| TransferError::Open {
            path: self.path.clone(),
            source,
        })?;
        let total = file.metadata().await?.len();

        let secs = self.settings.connect_timeout_secs;
        let mut stream = tokio::time::timeout(Duration::from_secs(secs), TcpStream::connect(self.dest))
            .await
            .map_err(|_| TransferError::ConnectTimeout { addr: self.dest, secs })?
            .map_err(|source| TransferError::Connect { addr: self.dest, source })?;
        stream.set_nodelay(true)?;

        self.publish_status(LoaderStatus::Uploading);
        self.publish_progress(0);

        let delay = Duration::from_millis(self.settings.chunk_delay_ms);
        let mut buf = vec![0u8; self.settings.chunk_size.max(1)];
        let mut sent: u64 = 0;

        loop {
            if self.stopped() {
                // fermeture best-effort, la carte abandonne l'image partielle
                let _ = stream.shutdown().await;
                return Ok(Outcome::Cancelled);
            }

            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
            sent += n as u64;

            let pct = if total == 0 { 100 } else { (sent.min(total) * 100 / total) as u8 };
            self.advance(pct);

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        stream.flush().await?;
        stream.shutdown().await?;
        self.advance(100);
        debug!(node = %self.node, bytes = sent, "image written");
        Ok(Outcome::Complete)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn publish_status(&self, status: LoaderStatus) {
        self.bus.publish(BusEvent::LoaderStatus(LoaderStatusEvent {
            node: self.node,
            attempt: self.attempt,
            status,
        }));
    }

    /// Publie un pourcentage seulement s'il dépasse le précédent
    fn advance(&self, pct: u8) {
        if pct > self.percent.fetch_max(pct, Ordering::SeqCst) {
            self.publish_progress(pct);
        }
    }

    fn publish_progress(&self, percent: u8) {
        self.bus.publish(BusEvent::LoaderProgress(LoaderProgressEvent {
            node: self.node,
            attempt: self.attempt,
            percent,
        }));
    }
}
