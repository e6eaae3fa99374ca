#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Pure difficulty scaling shared by enemy stat scaling and reward scaling.
//!
//! Every function maps a base value and a level to a scaled value without
//! retaining state, so applying a scale twice at the same level yields the
//! same result rather than compounding.

use serde::{Deserialize, Serialize};

/// Lowest level accepted by the scaler; smaller levels are clamped to it.
pub const MIN_LEVEL: u32 = 1;

/// Per-level growth rates applied to enemy stats.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalingRates {
    /// Fractional health growth per level above the first.
    pub health_per_level: f32,
    /// Fractional damage growth per level above the first.
    pub damage_per_level: f32,
}

impl ScalingRates {
    /// Creates a new set of scaling rates.
    #[must_use]
    pub const fn new(health_per_level: f32, damage_per_level: f32) -> Self {
        Self {
            health_per_level,
            damage_per_level,
        }
    }
}

impl Default for ScalingRates {
    fn default() -> Self {
        Self::new(0.2, 0.1)
    }
}

/// Combat stats of a hostile before or after scaling.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnemyStats {
    /// Maximum health.
    pub health: f32,
    /// Damage dealt per hit.
    pub damage: f32,
}

impl EnemyStats {
    /// Creates a new stat block.
    #[must_use]
    pub const fn new(health: f32, damage: f32) -> Self {
        Self { health, damage }
    }
}

/// Multiplier `1 + (level - 1) * rate` with the level clamped to [`MIN_LEVEL`].
#[must_use]
pub fn level_factor(level: u32, rate: f32) -> f32 {
    let steps = level.max(MIN_LEVEL) - MIN_LEVEL;
    1.0 + steps as f32 * rate
}

/// Scales a base value to the provided level.
#[must_use]
pub fn scale(base: f32, level: u32, rate: f32) -> f32 {
    base * level_factor(level, rate)
}

/// Scales health and damage independently with their own rates.
#[must_use]
pub fn scale_enemy(base: EnemyStats, level: u32, rates: ScalingRates) -> EnemyStats {
    EnemyStats {
        health: scale(base.health, level, rates.health_per_level),
        damage: scale(base.damage, level, rates.damage_per_level),
    }
}
