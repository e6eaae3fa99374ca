//! Stand-in for the game engine: materialises spawn plans as entities.

use std::collections::BTreeMap;

use challenge_core::{Command, EntityHandle, Event, InstanceId, SpawnCategory, Vec3};
use challenge_system_difficulty::{scale_enemy, EnemyStats, ScalingRates};
use challenge_system_spawn_manifest::NavMesh;
use tracing::debug;

const ENEMY_BASE_STATS: EnemyStats = EnemyStats::new(100.0, 8.0);
const BOSS_BASE_STATS: EnemyStats = EnemyStats::new(600.0, 20.0);

/// Square patch of walkable ground centred on the origin.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Terrain {
    half_extent: f32,
}

impl Terrain {
    pub(crate) const fn new(half_extent: f32) -> Self {
        Self { half_extent }
    }
}

impl NavMesh for Terrain {
    fn snap(&self, point: Vec3, max_distance: f32) -> Option<Vec3> {
        let extent = self.half_extent;
        let snapped = Vec3::new(
            point.x.clamp(-extent, extent),
            0.0,
            point.z.clamp(-extent, extent),
        );
        (snapped.distance(point) <= max_distance).then_some(snapped)
    }
}

/// Entity materialised for a challenge instance.
#[derive(Clone, Debug)]
pub(crate) struct HostEntity {
    pub(crate) handle: EntityHandle,
    pub(crate) category: SpawnCategory,
    pub(crate) position: Vec3,
    pub(crate) stats: Option<EnemyStats>,
}

/// Spawns and tracks engine-side entities for every populated instance.
#[derive(Debug)]
pub(crate) struct SimulatedHost {
    next_handle: u64,
    rates: ScalingRates,
    population: BTreeMap<InstanceId, Vec<HostEntity>>,
}

impl SimulatedHost {
    pub(crate) fn new(rates: ScalingRates) -> Self {
        Self {
            next_handle: 1,
            rates,
            population: BTreeMap::new(),
        }
    }

    /// Reacts to world events, answering accepted plans with registrations.
    pub(crate) fn handle(&mut self, events: &[Event], player_level: u32, out: &mut Vec<Command>) {
        for event in events {
            match event {
                Event::SpawnPlanAccepted { instance, plan } => {
                    let mut spawned = Vec::with_capacity(plan.placements.len());
                    for placement in &plan.placements {
                        let handle = EntityHandle::new(self.next_handle);
                        self.next_handle += 1;
                        let stats = match placement.category {
                            SpawnCategory::Boss => {
                                Some(scale_enemy(BOSS_BASE_STATS, player_level, self.rates))
                            }
                            SpawnCategory::Enemy => {
                                Some(scale_enemy(ENEMY_BASE_STATS, player_level, self.rates))
                            }
                            _ => None,
                        };
                        spawned.push(HostEntity {
                            handle,
                            category: placement.category,
                            position: placement.position,
                            stats,
                        });
                        out.push(Command::RegisterEntity {
                            instance: *instance,
                            entity: handle,
                            category: placement.category,
                        });
                    }
                    debug!(
                        target: "challenge::sim",
                        instance = instance.get(),
                        entities = spawned.len(),
                        "host.materialised"
                    );
                    let _ = self.population.insert(*instance, spawned);
                }
                Event::InstanceRetried { instance } | Event::InstanceRemoved { instance } => {
                    self.despawn(*instance, out);
                }
                _ => {}
            }
        }
    }

    fn despawn(&mut self, instance: InstanceId, out: &mut Vec<Command>) {
        let Some(entities) = self.population.remove(&instance) else {
            return;
        };
        for entity in &entities {
            out.push(Command::UnregisterEntity {
                entity: entity.handle,
            });
        }
        debug!(
            target: "challenge::sim",
            instance = instance.get(),
            entities = entities.len(),
            "host.despawned"
        );
    }

    pub(crate) fn entities_mut(&mut self, instance: InstanceId) -> Option<&mut Vec<HostEntity>> {
        self.population.get_mut(&instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use challenge_core::{Placement, PrefabRef, ResolvedSpawnPlan};

    #[test]
    fn terrain_snaps_only_nearby_points() {
        let terrain = Terrain::new(50.0);
        assert_eq!(
            terrain.snap(Vec3::new(10.0, 2.0, 0.0), 5.0),
            Some(Vec3::new(10.0, 0.0, 0.0))
        );
        assert_eq!(
            terrain.snap(Vec3::new(55.0, 0.0, 0.0), 10.0),
            Some(Vec3::new(50.0, 0.0, 0.0))
        );
        assert_eq!(terrain.snap(Vec3::new(80.0, 0.0, 0.0), 10.0), None);
    }

    #[test]
    fn accepted_plans_register_scaled_hostiles() {
        let mut host = SimulatedHost::new(ScalingRates::default());
        let placement = |category| Placement {
            item_index: 0,
            category,
            prefab: PrefabRef::new("unit"),
            position: Vec3::ZERO,
            yaw_degrees: 0.0,
        };
        let instance = InstanceId::new(3);
        let events = vec![Event::SpawnPlanAccepted {
            instance,
            plan: ResolvedSpawnPlan {
                placements: vec![
                    placement(SpawnCategory::Enemy),
                    placement(SpawnCategory::Civilian),
                ],
                failures: Vec::new(),
            },
        }];

        let mut commands = Vec::new();
        host.handle(&events, 6, &mut commands);

        assert_eq!(commands.len(), 2);
        let entities = host.entities_mut(instance).expect("population");
        let health = entities[0].stats.map_or(0.0, |stats| stats.health);
        assert!((health - 200.0).abs() < 1e-3, "{health}");
        assert!(entities[1].stats.is_none());

        let mut commands = Vec::new();
        host.handle(&[Event::InstanceRemoved { instance }], 6, &mut commands);
        assert_eq!(commands.len(), 2);
        assert!(host.entities_mut(instance).is_none());
    }
}
