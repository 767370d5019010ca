/**
 * HARDWARE - Types décrivant le matériel d'un node ou les exigences d'un jeu
 *
 * RÔLE : Paires (code, libellé) pour système/moniteur/contrôles, et taille de
 * RAM DIMM validée ("128MB", "1GB").
 *
 * UTILITÉ : Les codes servent à la validation de compatibilité, les libellés
 * aux messages de diagnostic.
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Valeur matérielle identifiée par un code numérique et un libellé lisible
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tagged {
    pub code: u32,
    pub label: String,
}

impl Tagged {
    pub fn new(code: u32, label: impl Into<String>) -> Self {
        Self { code, label: label.into() }
    }
}

impl fmt::Display for Tagged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.code)
    }
}

/// Erreurs de parsing d'une taille de RAM issue de la config ou du catalogue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RamParseError {
    #[error("empty RAM size")]
    Empty,
    #[error("RAM size '{0}' has no unit (expected MB or GB)")]
    MissingUnit(String),
    #[error("RAM size '{input}' has unknown unit '{unit}'")]
    UnknownUnit { input: String, unit: String },
    #[error("RAM size '{0}' does not start with a number")]
    InvalidNumber(String),
    #[error("RAM size '{0}' is too large")]
    Overflow(String),
}

/// Capacité (ou exigence) de RAM DIMM, normalisée en mégaoctets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RamSize {
    megabytes: u32,
}

impl RamSize {
    pub const fn from_megabytes(megabytes: u32) -> Self {
        Self { megabytes }
    }

    pub fn megabytes(&self) -> u32 {
        self.megabytes
    }
}

impl FromStr for RamSize {
    type Err = RamParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(RamParseError::Empty);
        }

        let split = input
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(input.len());
        let (digits, unit) = (&input[..split], input[split..].trim());

        if digits.is_empty() {
            return Err(RamParseError::InvalidNumber(input.to_string()));
        }
        if unit.is_empty() {
            return Err(RamParseError::MissingUnit(input.to_string()));
        }

        // que des chiffres : seul un dépassement peut faire échouer le parse
        let value: u32 = digits
            .parse()
            .map_err(|_| RamParseError::Overflow(input.to_string()))?;

        let megabytes = match unit.to_ascii_uppercase().as_str() {
            "MB" => value,
            "GB" => value
                .checked_mul(1024)
                .ok_or_else(|| RamParseError::Overflow(input.to_string()))?,
            _ => {
                return Err(RamParseError::UnknownUnit {
                    input: input.to_string(),
                    unit: unit.to_string(),
                })
            }
        };

        Ok(Self { megabytes })
    }
}

impl TryFrom<String> for RamSize {
    type Error = RamParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RamSize> for String {
    fn from(value: RamSize) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RamSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}MB", self.megabytes)
    }
}

/// Profil matériel d'un node DIMM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub system: Tagged,
    pub monitor: Tagged,
    pub controls: Tagged,
    pub dimm_ram: RamSize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ram_sizes() {
        assert_eq!("128MB".parse::<RamSize>().unwrap().megabytes(), 128);
        assert_eq!("1GB".parse::<RamSize>().unwrap().megabytes(), 1024);
        assert_eq!(" 64 mb".parse::<RamSize>().unwrap().megabytes(), 64);
        assert_eq!("512Mb".parse::<RamSize>().unwrap(), RamSize::from_megabytes(512));
    }

    #[test]
    fn test_reject_malformed_ram_sizes() {
        assert_eq!("".parse::<RamSize>(), Err(RamParseError::Empty));
        assert_eq!(
            "128".parse::<RamSize>(),
            Err(RamParseError::MissingUnit("128".into()))
        );
        assert_eq!(
            "MB".parse::<RamSize>(),
            Err(RamParseError::InvalidNumber("MB".into()))
        );
        assert!(matches!(
            "12XB".parse::<RamSize>(),
            Err(RamParseError::UnknownUnit { .. })
        ));
        assert!(matches!(
            "99999999999MB".parse::<RamSize>(),
            Err(RamParseError::Overflow(_))
        ));
        assert!(matches!(
            "8388608GB".parse::<RamSize>(),
            Err(RamParseError::Overflow(_))
        ));
    }

    #[test]
    fn test_ram_size_ordering_is_numeric() {
        // "64" > "128" en comparaison de chaînes, pas en mégaoctets
        let small: RamSize = "64MB".parse().unwrap();
        let large: RamSize = "128MB".parse().unwrap();
        assert!(small < large);
    }

    #[test]
    fn test_ram_size_serde_roundtrip_as_string() {
        let ram: RamSize = serde_json::from_str("\"2GB\"").unwrap();
        assert_eq!(ram.megabytes(), 2048);
        assert_eq!(serde_json::to_string(&ram).unwrap(), "\"2048MB\"");
        assert!(serde_json::from_str::<RamSize>("\"lots\"").is_err());
    }
}
