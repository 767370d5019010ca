/*!
DimmHub kernel : pilotage de cartes NetDIMM (Sega NAOMI / Triforce / Chihiro)

Le kernel connaît un registre de nodes (endpoints DIMM distants) et un
catalogue de jeux. Charger un jeu sur un node = valider la compatibilité
matérielle, puis streamer l'image en TCP depuis un loader en tâche de fond.
Loaders et nodes ne communiquent que par le bus d'événements.
*/

pub mod bus;
pub mod catalog;
pub mod config;
pub mod game;
pub mod hardware;
pub mod health;
pub mod http;
pub mod loader;
pub mod mqtt;
pub mod node;
pub mod registry;
pub mod state;
pub mod validator;

pub use bus::{BusEvent, EventKind, LoaderStatus, MessageBus};
pub use catalog::Catalog;
pub use game::GameDescriptor;
pub use hardware::{HardwareProfile, RamSize, Tagged};
pub use loader::{LoaderSettings, LoaderWorker};
pub use node::{LoadOutcome, Node, NodeError, NodeId, NodeSpec, NodeState};
pub use registry::NodeRegistry;
