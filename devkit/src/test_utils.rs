/*!
Test Harness pour le kernel DimmHub

Dossier temporaire supprimé à la fin du test, dans lequel on écrit des
images de jeu (contenu déterministe) et des fichiers YAML.
*/

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestHarness {
    dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Écrit une image de `size` octets ; octet i = i mod 251
    pub fn write_image(&self, name: &str, size: usize) -> Result<PathBuf> {
        let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let path = self.path(name);
        fs::write(&path, bytes)?;
        log::info!("💾 wrote test image {} ({size} bytes)", path.display());
        Ok(path)
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path(name);
        fs::write(&path, contents)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_pattern_is_deterministic() {
        let harness = TestHarness::new().unwrap();
        let a = harness.write_image("a.bin", 600).unwrap();
        let b = harness.write_image("b.bin", 600).unwrap();

        let bytes = fs::read(&a).unwrap();
        assert_eq!(bytes.len(), 600);
        assert_eq!(bytes[251], 0);
        assert_eq!(bytes, fs::read(&b).unwrap());
        assert!(a.starts_with(harness.dir()));
    }
}
