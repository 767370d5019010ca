/*!
# DimmHub DevKit - Outils de test pour le kernel

- Faux endpoint NetDIMM (écoute TCP, enregistre les octets reçus)
- Harness : dossier temporaire, images de jeu et fichiers de config
*/

pub mod dimm_stub;
pub mod test_utils;

pub use dimm_stub::{DimmBehaviour, FakeDimm};
pub use test_utils::TestHarness;
