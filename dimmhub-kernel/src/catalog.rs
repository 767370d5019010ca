/**
 * GAME CATALOG - Jeux chargeables, lus depuis un fichier YAML
 *
 * EXEMPLE :
 * ```yaml
 * games:
 *   - id: 8f3a1c2e
 *     name: Marvel vs. Capcom 2
 *     path: mvsc2.bin
 *     system: { code: 1, label: NAOMI }
 *     monitor: { code: 0, label: Horizontal }
 *     controls: { code: 0, label: Joystick }
 *     dimm_ram: 128MB
 * ```
 *
 * Les chemins relatifs sont résolus depuis le dossier des jeux.
 */

use crate::game::{GameDescriptor, GameRequirements};
use crate::hardware::{RamParseError, Tagged};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("game '{id}' has an invalid dimm_ram: {source}")]
    Ram {
        id: String,
        #[source]
        source: RamParseError,
    },
    #[error("duplicate game id '{0}'")]
    Duplicate(String),
}

/// Entrée brute du catalogue, telle qu'écrite dans le YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub system: Tagged,
    pub monitor: Tagged,
    pub controls: Tagged,
    pub dimm_ram: String,
    #[serde(default)]
    pub naomi2_conversion: bool,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    games: Vec<CatalogEntry>,
}

impl CatalogEntry {
    pub fn into_descriptor(self, games_dir: &Path) -> Result<GameDescriptor, CatalogError> {
        let dimm_ram = self.dimm_ram.parse().map_err(|source| CatalogError::Ram {
            id: self.id.clone(),
            source,
        })?;
        let path = if self.path.is_absolute() {
            self.path
        } else {
            games_dir.join(self.path)
        };

        Ok(GameDescriptor::new(
            self.id,
            self.name,
            path,
            GameRequirements {
                system: self.system,
                monitor: self.monitor,
                controls: self.controls,
                dimm_ram,
                naomi2_conversion: self.naomi2_conversion,
            },
        ))
    }
}

#[derive(Debug, Default, Clone)]
pub struct Catalog {
    games: BTreeMap<String, Arc<GameDescriptor>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<CatalogEntry>, games_dir: &Path) -> Result<Self, CatalogError> {
        let mut games = BTreeMap::new();
        for entry in entries {
            let id = entry.id.clone();
            if games.contains_key(&id) {
                return Err(CatalogError::Duplicate(id));
            }
            games.insert(id, Arc::new(entry.into_descriptor(games_dir)?));
        }
        Ok(Self { games })
    }

    pub fn parse(yaml: &str, games_dir: &Path) -> Result<Self, CatalogError> {
        if yaml.trim().is_empty() {
            return Ok(Self::new());
        }
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        Self::from_entries(file.games, games_dir)
    }

    pub async fn load(path: &Path, games_dir: &Path) -> Result<Self, CatalogError> {
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let catalog = Self::parse(&yaml, games_dir)?;
        info!(games = catalog.len(), path = %path.display(), "loaded game catalog");
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<Arc<GameDescriptor>> {
        self.games.get(id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<GameDescriptor>> {
        self.games.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
games:
  - id: mvsc2
    name: Marvel vs. Capcom 2
    path: mvsc2.bin
    system: { code: 1, label: NAOMI }
    monitor: { code: 0, label: Horizontal }
    controls: { code: 0, label: Joystick }
    dimm_ram: 128MB
  - id: vtennis2
    name: Virtua Tennis 2
    path: /srv/images/vtennis2.bin
    system: { code: 1, label: NAOMI }
    monitor: { code: 0, label: Horizontal }
    controls: { code: 0, label: Joystick }
    dimm_ram: 256MB
    naomi2_conversion: true
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = Catalog::parse(CATALOG, Path::new("/games")).unwrap();
        assert_eq!(catalog.len(), 2);

        let mvsc2 = catalog.get("mvsc2").unwrap();
        assert_eq!(mvsc2.path(), Path::new("/games/mvsc2.bin"));
        assert_eq!(mvsc2.dimm_ram().megabytes(), 128);
        assert!(!mvsc2.is_naomi2_conversion());

        let vtennis = catalog.get("vtennis2").unwrap();
        assert_eq!(vtennis.path(), Path::new("/srv/images/vtennis2.bin"));
        assert!(vtennis.is_naomi2_conversion());
        assert!(catalog.get("unknown").is_none());
    }

    #[test]
    fn test_malformed_ram_names_the_game() {
        let yaml = CATALOG.replace("dimm_ram: 128MB", "dimm_ram: \"128\"");
        let err = Catalog::parse(&yaml, Path::new("/games")).unwrap_err();
        match err {
            CatalogError::Ram { id, source } => {
                assert_eq!(id, "mvsc2");
                assert_eq!(source, RamParseError::MissingUnit("128".into()));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let yaml = CATALOG.replace("id: vtennis2", "id: mvsc2");
        assert!(matches!(
            Catalog::parse(&yaml, Path::new("/games")),
            Err(CatalogError::Duplicate(id)) if id == "mvsc2"
        ));
    }

    #[test]
    fn test_empty_catalog() {
        assert!(Catalog::parse("  \n", Path::new("/games")).unwrap().is_empty());
        assert!(Catalog::parse("games: []", Path::new("/games")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = Catalog::load(Path::new("/nonexistent/games.yaml"), Path::new("/games"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }
}
