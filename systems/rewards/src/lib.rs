#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Reward computation and best-effort reward distribution.
//!
//! [`compute_rewards`] is a pure function the world calls exactly once when an
//! instance completes. [`RewardDistribution`] consumes the resulting
//! [`Event::InstanceCompleted`] values and hands them to an external
//! [`RewardSink`]; grant failures are logged and never feed back into world
//! state.

use challenge_core::{
    BonusCondition, ChallengeDefinition, ChallengePerformance, Event, InstanceId, RewardGrant,
};
use challenge_system_difficulty::level_factor;
use thiserror::Error;
use tracing::{debug, warn};

/// Per-level growth rates applied to experience and currency rewards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RewardTuning {
    /// Fractional experience growth per player level above the first.
    pub xp_per_level: f32,
    /// Fractional currency growth per player level above the first.
    pub currency_per_level: f32,
}

impl RewardTuning {
    /// Creates a new tuning surface.
    #[must_use]
    pub const fn new(xp_per_level: f32, currency_per_level: f32) -> Self {
        Self {
            xp_per_level,
            currency_per_level,
        }
    }
}

impl Default for RewardTuning {
    fn default() -> Self {
        Self::new(0.1, 0.05)
    }
}

/// Reports whether the performance satisfies a bonus condition.
#[must_use]
pub fn bonus_earned(condition: BonusCondition, performance: &ChallengePerformance) -> bool {
    match condition {
        BonusCondition::Flawless => performance.damage_events == 0,
        BonusCondition::SpeedClear { within } => performance.clear_time <= within,
        BonusCondition::Undetected => !performance.detected,
        BonusCondition::NoCasualties => performance.civilians_died == 0,
    }
}

/// Computes the final rewards of a completed instance.
///
/// Totals are `(base + earned bonuses) * difficulty multiplier * level
/// factor`, rounded to the nearest whole unit. The authored manifest is
/// carried unmodified in [`RewardGrant::base`].
#[must_use]
pub fn compute_rewards(
    definition: &ChallengeDefinition,
    performance: &ChallengePerformance,
    player_level: u32,
    tuning: &RewardTuning,
) -> RewardGrant {
    let manifest = &definition.rewards;
    let mut xp = u64::from(manifest.xp);
    let mut currency = u64::from(manifest.currency);
    let mut bonuses = Vec::new();

    for bonus in &manifest.bonus_rewards {
        if bonus_earned(bonus.condition, performance) {
            xp = xp.saturating_add(u64::from(bonus.xp));
            currency = currency.saturating_add(u64::from(bonus.currency));
            bonuses.push(bonus.condition);
        }
    }

    let difficulty = definition.difficulty.reward_multiplier();
    let xp_multiplier = difficulty * level_factor(player_level, tuning.xp_per_level);
    let currency_multiplier = difficulty * level_factor(player_level, tuning.currency_per_level);

    RewardGrant {
        base: manifest.clone(),
        xp: apply_multiplier(xp, xp_multiplier),
        currency: apply_multiplier(currency, currency_multiplier),
        loot: manifest.guaranteed_loot,
        bonuses,
        multiplier: xp_multiplier,
    }
}

fn apply_multiplier(value: u64, multiplier: f32) -> u32 {
    let scaled = (value as f64 * f64::from(multiplier)).round();
    if scaled <= 0.0 {
        return 0;
    }
    scaled.min(f64::from(u32::MAX)) as u32
}

/// Errors an external reward collaborator may report.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GrantError {
    /// The collaborator is not reachable.
    #[error("reward collaborator unavailable")]
    Unavailable,
    /// The collaborator refused the grant.
    #[error("reward grant rejected: {0}")]
    Rejected(String),
}

/// External collaborator that applies rewards to the player.
pub trait RewardSink {
    /// Applies the grant of a completed instance.
    fn grant(&mut self, instance: InstanceId, rewards: &RewardGrant) -> Result<(), GrantError>;
}

/// Outcome counters of a distribution pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DistributionReport {
    /// Grants accepted by the sink.
    pub granted: u32,
    /// Grants the sink failed to apply.
    pub failed: u32,
}

/// System that forwards completion rewards to a [`RewardSink`].
#[derive(Debug, Default)]
pub struct RewardDistribution;

impl RewardDistribution {
    /// Creates a new distribution system.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Forwards every completion in `events` to the sink.
    pub fn handle(&mut self, events: &[Event], sink: &mut dyn RewardSink) -> DistributionReport {
        let mut report = DistributionReport::default();
        for event in events {
            let Event::InstanceCompleted { instance, rewards } = event else {
                continue;
            };

            match sink.grant(*instance, rewards) {
                Ok(()) => {
                    report.granted += 1;
                    debug!(
                        target: "challenge::rewards",
                        instance = instance.get(),
                        xp = rewards.xp,
                        currency = rewards.currency,
                        "reward.granted"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        target: "challenge::rewards",
                        instance = instance.get(),
                        error = %error,
                        "reward.grant_failed"
                    );
                }
            }
        }
        report
    }
}
