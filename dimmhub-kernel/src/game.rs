use crate::hardware::{RamSize, Tagged};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Exigences matérielles d'une image de jeu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRequirements {
    pub system: Tagged,
    pub monitor: Tagged,
    pub controls: Tagged,
    pub dimm_ram: RamSize,
    /// Conversion Naomi 2 (bootable sur un node hybride quel que soit le système déclaré)
    #[serde(default)]
    pub naomi2_conversion: bool,
}

/// Description immuable d'une image chargeable, issue du catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameDescriptor {
    id: String,
    name: String,
    path: PathBuf,
    requirements: GameRequirements,
}

/// Champs identifiants d'un jeu, exposés à la place du descripteur complet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRef {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

impl GameDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        requirements: GameRequirements,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            requirements,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn system(&self) -> &Tagged {
        &self.requirements.system
    }

    pub fn monitor(&self) -> &Tagged {
        &self.requirements.monitor
    }

    pub fn controls(&self) -> &Tagged {
        &self.requirements.controls
    }

    pub fn dimm_ram(&self) -> RamSize {
        self.requirements.dimm_ram
    }

    pub fn is_naomi2_conversion(&self) -> bool {
        self.requirements.naomi2_conversion
    }

    pub fn to_ref(&self) -> GameRef {
        GameRef {
            id: self.id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}
