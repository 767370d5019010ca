/*!
Faux endpoint NetDIMM pour tester les loaders sans matériel

Écoute sur 127.0.0.1 (port éphémère), accepte toutes les connexions et
garde les octets reçus, une entrée par connexion.
*/

use anyhow::{bail, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Instant};

/// Comportement du faux DIMM côté réception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DimmBehaviour {
    /// Lit aussi vite que possible
    #[default]
    Accept,
    /// Attend entre chaque lecture, pour garder un transfert en cours
    Slow { per_read: Duration },
}

type Received = Arc<Mutex<Vec<Vec<u8>>>>;

pub struct FakeDimm {
    addr: SocketAddr,
    received: Received,
    task: JoinHandle<()>,
}

impl FakeDimm {
    pub async fn start() -> Result<Self> {
        Self::start_with(DimmBehaviour::Accept).await
    }

    pub async fn start_with(behaviour: DimmBehaviour) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        log::debug!("🎮 fake DIMM listening on {addr} ({behaviour:?})");

        let task = tokio::spawn(accept_loop(listener, received.clone(), behaviour));
        Ok(Self { addr, received, task })
    }

    /// Port sur lequel plus personne n'écoute (connexion refusée)
    pub async fn closed_port() -> Result<u16> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);
        Ok(port)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Octets reçus sur la dernière connexion
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().last().cloned().unwrap_or_default()
    }

    /// Octets reçus, connexion par connexion
    pub fn received_all(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }

    /// Attend que la dernière connexion ait reçu au moins `len` octets
    pub async fn wait_for_bytes(&self, len: usize, within: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + within;
        loop {
            let bytes = self.received();
            if bytes.len() >= len && self.connections() > 0 {
                return Ok(bytes);
            }
            if Instant::now() >= deadline {
                bail!("fake DIMM received {} bytes, expected {len}", bytes.len());
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeDimm {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, received: Received, behaviour: DimmBehaviour) {
    // les lecteurs meurent avec la boucle d'accept
    let mut readers = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let slot = {
                    let mut all = received.lock().unwrap();
                    all.push(Vec::new());
                    all.len() - 1
                };
                log::debug!("📥 fake DIMM accepted {peer}");
                readers.spawn(read_into(stream, received.clone(), slot, behaviour));
            }
            Err(e) => {
                log::warn!("fake DIMM accept failed: {e}");
                return;
            }
        }
    }
}

async fn read_into(mut stream: TcpStream, received: Received, slot: usize, behaviour: DimmBehaviour) {
    let mut buf = vec![0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                received.lock().unwrap()[slot].extend_from_slice(&buf[..n]);
                if let DimmBehaviour::Slow { per_read } = behaviour {
                    sleep(per_read).await;
                }
            }
            Err(e) => {
                log::debug!("fake DIMM read error: {e}");
                break;
            }
        }
    }
}
