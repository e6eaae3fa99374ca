//! Scripted player that roams between encounters and reports combat outcomes.

use std::time::Duration;

use challenge_core::{
    Capabilities, ChallengeState, ChallengeView, Command, InstanceId, InstanceSnapshot, Vec3,
    Vec3Swizzles,
};
use challenge_system_difficulty::scale;
use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaCha8Rng};

use crate::host::SimulatedHost;

const SPEED: f32 = 12.0;
const ENGAGE_RADIUS: f32 = 15.0;
const BASE_HIT_DAMAGE: f32 = 45.0;
const HIT_DAMAGE_PER_LEVEL: f32 = 0.15;
const HIT_CHANCE: f64 = 0.6;
const DETECTION_CHANCE: f64 = 0.01;
const DAMAGE_CHANCE: f64 = 0.08;
const STRAY_FIRE_CHANCE: f64 = 0.015;
const RESCUE_CHANCE: f64 = 0.3;
const RETRY_CHANCE: f64 = 0.25;

/// Deterministic stand-in for a human player.
#[derive(Debug)]
pub(crate) struct ScriptedPlayer {
    position: Vec3,
    rng: ChaCha8Rng,
}

impl ScriptedPlayer {
    pub(crate) fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(1);
        Self {
            position: Vec3::ZERO,
            rng,
        }
    }

    pub(crate) fn position(&self) -> Vec3 {
        self.position
    }

    /// Moves towards the nearest encounter and acts on it once in range.
    pub(crate) fn act(
        &mut self,
        dt: Duration,
        level: u32,
        view: &ChallengeView,
        host: &mut SimulatedHost,
        out: &mut Vec<Command>,
    ) {
        let Some(target) = self.pick_target(view) else {
            return;
        };
        let (instance, state, position) = (target.id, target.state, target.position);

        self.walk_towards(position, dt);
        if self.position.xz().distance(position.xz()) > ENGAGE_RADIUS {
            return;
        }

        match state {
            ChallengeState::Active => self.engage(instance, level, host, out),
            ChallengeState::Failed => {
                if self.rng.gen_bool(RETRY_CHANCE) {
                    out.push(Command::RetryChallenge { instance });
                }
            }
            ChallengeState::Pending | ChallengeState::Completed | ChallengeState::Expired => {}
        }
    }

    fn pick_target<'a>(&self, view: &'a ChallengeView) -> Option<&'a InstanceSnapshot> {
        view.iter()
            .filter(|snapshot| match snapshot.state {
                ChallengeState::Active => true,
                ChallengeState::Failed => snapshot.retryable,
                _ => false,
            })
            .min_by(|left, right| {
                self.position.xz().distance(left.position.xz())
                    .total_cmp(&self.position.xz().distance(right.position.xz()))
            })
    }

    fn walk_towards(&mut self, destination: Vec3, dt: Duration) {
        let offset = Vec3::new(
            destination.x - self.position.x,
            0.0,
            destination.z - self.position.z,
        );
        let distance = offset.length();
        let stride = SPEED * dt.as_secs_f32();
        if distance <= stride {
            self.position = Vec3::new(destination.x, self.position.y, destination.z);
        } else {
            self.position += offset / distance * stride;
        }
    }

    fn engage(
        &mut self,
        instance: InstanceId,
        level: u32,
        host: &mut SimulatedHost,
        out: &mut Vec<Command>,
    ) {
        let Some(entities) = host.entities_mut(instance) else {
            return;
        };

        if self.rng.gen_bool(DETECTION_CHANCE) {
            out.push(Command::PlayerDetected { instance });
        }
        if self.rng.gen_bool(DAMAGE_CHANCE) {
            out.push(Command::PlayerDamaged { instance });
        }

        let position = self.position;
        let nearest_hostile = entities
            .iter()
            .enumerate()
            .filter(|(_, entity)| entity.stats.is_some())
            .min_by(|(_, left), (_, right)| {
                position.xz().distance(left.position.xz())
                    .total_cmp(&position.xz().distance(right.position.xz()))
            })
            .map(|(index, _)| index);
        if let Some(index) = nearest_hostile {
            if self.rng.gen_bool(HIT_CHANCE) {
                let damage = scale(BASE_HIT_DAMAGE, level, HIT_DAMAGE_PER_LEVEL);
                let killed = entities[index].stats.as_mut().map_or(false, |stats| {
                    stats.health -= damage;
                    stats.health <= 0.0
                });
                if killed {
                    let entity = entities.remove(index);
                    out.push(Command::EntityKilled {
                        entity: entity.handle,
                    });
                }
            }
        }

        let civilian = entities
            .iter()
            .position(|entity| entity.category.capabilities().contains(Capabilities::RESCUABLE));
        if let Some(index) = civilian {
            if self.rng.gen_bool(STRAY_FIRE_CHANCE) {
                let entity = entities.remove(index);
                out.push(Command::EntityDied {
                    entity: entity.handle,
                });
            } else if self.rng.gen_bool(RESCUE_CHANCE) {
                let entity = entities.remove(index);
                out.push(Command::EntityRescued {
                    entity: entity.handle,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walking_is_bounded_by_speed() {
        let mut player = ScriptedPlayer::new(1);
        player.walk_towards(Vec3::new(100.0, 5.0, 0.0), Duration::from_secs(1));
        assert!((player.position().x - SPEED).abs() < 1e-4);
        assert_eq!(player.position().y, 0.0);

        player.walk_towards(Vec3::new(14.0, 0.0, 0.0), Duration::from_secs(1));
        assert_eq!(player.position(), Vec3::new(14.0, 0.0, 0.0));
    }

    #[test]
    fn idle_without_live_encounters() {
        let mut player = ScriptedPlayer::new(1);
        let mut host = SimulatedHost::new(Default::default());
        let mut commands = Vec::new();
        player.act(
            Duration::from_secs(1),
            1,
            &ChallengeView::default(),
            &mut host,
            &mut commands,
        );
        assert!(commands.is_empty());
        assert_eq!(player.position(), Vec3::ZERO);
    }
}
