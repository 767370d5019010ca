/**
 * VALIDATOR - Décide si une image de jeu peut booter sur un node donné
 *
 * RÈGLES (indépendantes, toutes évaluées pour le diagnostic) :
 * 1. Système : codes égaux, ou node hybride (code 2) avec un jeu NAOMI /
 *    NAOMI 2 / Atomiswave (codes 1, 2, 3), ou node hybride avec une
 *    conversion Naomi 2.
 * 2. Moniteur : codes égaux. Bloquant seulement en mode strict.
 * 3. Contrôles : codes égaux. Bloquant seulement en mode strict.
 * 4. RAM DIMM : capacité du node >= exigence du jeu. Toujours bloquant.
 */

use crate::game::GameDescriptor;
use crate::hardware::HardwareProfile;
use serde::Serialize;
use tracing::{debug, warn};

/// Code système des nodes hybrides
pub const HYBRID_SYSTEM: u32 = 2;

/// Codes système qu'un node hybride accepte en plus du sien
pub const HYBRID_COMPATIBLE: [u32; 3] = [1, 2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    System,
    Monitor,
    Controls,
    DimmRam,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    /// Incompatibilité signalée mais non bloquante
    Warning(String),
    Blocking(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub check: Check,
    pub verdict: Verdict,
}

/// Résultat détaillé d'une validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    pub strict: bool,
    pub checks: Vec<CheckOutcome>,
}

impl CompatibilityReport {
    pub fn bootable(&self) -> bool {
        !self
            .checks
            .iter()
            .any(|c| matches!(c.verdict, Verdict::Blocking(_)))
    }

    /// Raisons bloquantes, concaténées dans l'ordre des règles
    pub fn failure_reason(&self) -> Option<String> {
        let reasons: Vec<&str> = self
            .checks
            .iter()
            .filter_map(|c| match &c.verdict {
                Verdict::Blocking(reason) => Some(reason.as_str()),
                _ => None,
            })
            .collect();

        if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.checks.iter().filter_map(|c| match &c.verdict {
            Verdict::Warning(reason) => Some(reason.as_str()),
            _ => None,
        })
    }

    pub fn verdict(&self, check: Check) -> Option<&Verdict> {
        self.checks
            .iter()
            .find(|c| c.check == check)
            .map(|c| &c.verdict)
    }
}

/// Vérifie la compatibilité et retourne seulement la décision
pub fn validate(profile: &HardwareProfile, game: &GameDescriptor, strict: bool) -> bool {
    assess(profile, game, strict).bootable()
}

/// Évalue chaque règle et journalise un diagnostic par règle
pub fn assess(profile: &HardwareProfile, game: &GameDescriptor, strict: bool) -> CompatibilityReport {
    let checks = vec![
        check_system(profile, game),
        soft_check(
            Check::Monitor,
            profile.monitor.code == game.monitor().code,
            strict,
            || {
                format!(
                    "wrong monitor type: game wants {} but node has {}",
                    game.monitor().label,
                    profile.monitor.label
                )
            },
        ),
        // TODO: les schémas de contrôle compatibles entre eux (ex. joystick 1P/2P) sont traités comme différents
        soft_check(
            Check::Controls,
            profile.controls.code == game.controls().code,
            strict,
            || {
                format!(
                    "wrong control scheme: game wants {} but node has {}",
                    game.controls().label,
                    profile.controls.label
                )
            },
        ),
        check_ram(profile, game),
    ];

    let report = CompatibilityReport { strict, checks };
    for outcome in &report.checks {
        match &outcome.verdict {
            Verdict::Ok => debug!(game = game.id(), check = ?outcome.check, "check ok"),
            Verdict::Warning(reason) => {
                warn!(game = game.id(), check = ?outcome.check, %reason, "non-blocking mismatch")
            }
            Verdict::Blocking(reason) => {
                warn!(game = game.id(), check = ?outcome.check, %reason, "blocking mismatch")
            }
        }
    }
    report
}

fn check_system(profile: &HardwareProfile, game: &GameDescriptor) -> CheckOutcome {
    let node_code = profile.system.code;
    let game_code = game.system().code;
    let hybrid = node_code == HYBRID_SYSTEM;

    let ok = node_code == game_code
        || (hybrid && HYBRID_COMPATIBLE.contains(&game_code))
        || (hybrid && game.is_naomi2_conversion());

    let verdict = if ok {
        Verdict::Ok
    } else {
        Verdict::Blocking(format!(
            "wrong system: game wants {} but node is a {}",
            game.system().label,
            profile.system.label
        ))
    };
    CheckOutcome { check: Check::System, verdict }
}

fn soft_check(check: Check, ok: bool, strict: bool, reason: impl FnOnce() -> String) -> CheckOutcome {
    let verdict = match (ok, strict) {
        (true, _) => Verdict::Ok,
        (false, true) => Verdict::Blocking(reason()),
        (false, false) => Verdict::Warning(reason()),
    };
    CheckOutcome { check, verdict }
}

fn check_ram(profile: &HardwareProfile, game: &GameDescriptor) -> CheckOutcome {
    let verdict = if profile.dimm_ram >= game.dimm_ram() {
        Verdict::Ok
    } else {
        Verdict::Blocking(format!(
            "not enough DIMM RAM: game requires {} but node has {}",
            game.dimm_ram(),
            profile.dimm_ram
        ))
    };
    CheckOutcome { check: Check::DimmRam, verdict }
}
