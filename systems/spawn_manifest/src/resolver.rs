//! Spawn-manifest resolution: turns a definition into concrete placements.
//!
//! The ground plane is XZ with Y up. All randomness flows through the
//! injected RNG, so resolution is reproducible for a given seed and spawn
//! point set.

use std::{cmp::Reverse, f32::consts::TAU};

use challenge_core::{
    ChallengeDefinition, LocationStrategy, Placement, PrefabRef, ResolvedSpawnPlan, SpawnFailure,
    SpawnFailureReason, SpawnItem, Vec3,
};
use rand::{seq::SliceRandom, Rng};
use rand_distr::{Distribution, UnitCircle, UnitDisc};
use tracing::trace;

/// Maximum distance searched when snapping a candidate onto navigable ground.
pub const NAVMESH_SEARCH_RADIUS: f32 = 10.0;

/// Smallest lattice spacing used by [`LocationStrategy::Grid`].
const GRID_MIN_SPACING: f32 = 2.0;

/// Navigation surface queried when a spawn item requires navigable ground.
pub trait NavMesh {
    /// Returns the nearest navigable point within `max_distance` of `point`.
    fn snap(&self, point: Vec3, max_distance: f32) -> Option<Vec3>;
}

/// Navigation surface on which every point is walkable.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenTerrain;

impl NavMesh for OpenTerrain {
    fn snap(&self, point: Vec3, _max_distance: f32) -> Option<Vec3> {
        Some(point)
    }
}

/// Resolves every spawn item of `definition` around `center`.
///
/// Items are processed in descending priority; ties keep manifest order.
/// When a navmesh snap misses, the nearest unused entry of `spawn_points`
/// within [`NAVMESH_SEARCH_RADIUS`] is used instead. A required item that
/// still cannot be placed is reported in [`ResolvedSpawnPlan::failures`] and
/// places no further units; optional units are skipped.
pub fn resolve<R>(
    definition: &ChallengeDefinition,
    center: Vec3,
    spawn_points: &[Vec3],
    navmesh: &dyn NavMesh,
    rng: &mut R,
) -> ResolvedSpawnPlan
where
    R: Rng + ?Sized,
{
    let mut order: Vec<usize> = (0..definition.spawn_items.len()).collect();
    order.sort_by_key(|index| Reverse(definition.spawn_items[*index].priority));

    let mut claimed = vec![false; spawn_points.len()];
    let mut plan = ResolvedSpawnPlan::default();

    for item_index in order {
        let item = &definition.spawn_items[item_index];
        let units = resolve_units(item, rng);
        if units.is_empty() {
            continue;
        }

        let anchor = center + item.offset;
        let candidates = layout(item, anchor, units.len(), rng);

        for (prefab, candidate) in units.into_iter().zip(candidates) {
            let Some(position) = settle(item, candidate, spawn_points, &mut claimed, navmesh) else {
                if item.required {
                    plan.failures.push(SpawnFailure {
                        item_index,
                        category: item.category,
                        reason: SpawnFailureReason::NoNavigablePoint,
                    });
                    break;
                }
                trace!(
                    target: "challenge::spawn",
                    definition = definition.id.get(),
                    item = item_index,
                    "spawn.unit_skipped"
                );
                continue;
            };

            let yaw_degrees = if item.random_rotation {
                rng.gen_range(0.0..360.0)
            } else {
                item.rotation_yaw.rem_euclid(360.0)
            };

            plan.placements.push(Placement {
                item_index,
                category: item.category,
                prefab,
                position,
                yaw_degrees,
            });
        }
    }

    plan
}

/// Picks the prefab of every unit the item spawns.
fn resolve_units<R>(item: &SpawnItem, rng: &mut R) -> Vec<PrefabRef>
where
    R: Rng + ?Sized,
{
    if item.pool_mode {
        return item.prefabs.choose(rng).cloned().into_iter().collect();
    }

    if item.prefabs.is_empty() {
        return Vec::new();
    }

    let count = if item.min_count >= item.max_count {
        item.max_count
    } else {
        rng.gen_range(item.min_count..=item.max_count)
    };

    (0..count as usize)
        .map(|unit| item.prefabs[unit % item.prefabs.len()].clone())
        .collect()
}

/// Candidate positions for `count` units before navmesh snapping.
fn layout<R>(item: &SpawnItem, anchor: Vec3, count: usize, rng: &mut R) -> Vec<Vec3>
where
    R: Rng + ?Sized,
{
    let radius = item.radius;
    match item.location {
        LocationStrategy::AtCenter => vec![anchor; count],
        LocationStrategy::RandomInRadius => (0..count)
            .map(|_| {
                let [x, z]: [f32; 2] = UnitDisc.sample(rng);
                anchor + Vec3::new(x * radius, 0.0, z * radius)
            })
            .collect(),
        LocationStrategy::RandomOnEdge => (0..count)
            .map(|_| {
                let [x, z]: [f32; 2] = UnitCircle.sample(rng);
                anchor + Vec3::new(x * radius, 0.0, z * radius)
            })
            .collect(),
        LocationStrategy::AroundPerimeter => (0..count)
            .map(|unit| {
                let angle = TAU * unit as f32 / count as f32;
                anchor + Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius)
            })
            .collect(),
        LocationStrategy::Grid => grid(anchor, count, radius),
    }
}

/// Regular lattice of `count` cells centred on `anchor`.
fn grid(anchor: Vec3, count: usize, radius: f32) -> Vec<Vec3> {
    if count == 0 {
        return Vec::new();
    }

    let columns = (count as f32).sqrt().ceil() as usize;
    let rows = (count + columns - 1) / columns;
    let spacing = if columns > 1 {
        (2.0 * radius / (columns - 1) as f32).max(GRID_MIN_SPACING)
    } else {
        GRID_MIN_SPACING
    };
    let half_width = (columns - 1) as f32 / 2.0;
    let half_depth = (rows - 1) as f32 / 2.0;

    (0..count)
        .map(|cell| {
            let column = (cell % columns) as f32;
            let row = (cell / columns) as f32;
            anchor
                + Vec3::new(
                    (column - half_width) * spacing,
                    0.0,
                    (row - half_depth) * spacing,
                )
        })
        .collect()
}

fn settle(
    item: &SpawnItem,
    candidate: Vec3,
    spawn_points: &[Vec3],
    claimed: &mut [bool],
    navmesh: &dyn NavMesh,
) -> Option<Vec3> {
    if !item.require_navmesh {
        return Some(candidate);
    }

    if let Some(snapped) = navmesh.snap(candidate, NAVMESH_SEARCH_RADIUS) {
        return Some(snapped);
    }

    let (index, point) = spawn_points
        .iter()
        .enumerate()
        .filter(|(index, point)| {
            !claimed[*index] && point.distance(candidate) <= NAVMESH_SEARCH_RADIUS
        })
        .min_by(|(_, left), (_, right)| {
            left.distance_squared(candidate)
                .total_cmp(&right.distance_squared(candidate))
        })?;
    claimed[index] = true;
    Some(*point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use challenge_core::{ChallengeType, DefinitionId, SpawnCategory};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    struct Nowhere;

    impl NavMesh for Nowhere {
        fn snap(&self, _point: Vec3, _max_distance: f32) -> Option<Vec3> {
            None
        }
    }

    fn definition(items: Vec<SpawnItem>) -> ChallengeDefinition {
        let mut definition =
            ChallengeDefinition::new(DefinitionId::new(1), "Test", ChallengeType::ControlPoint);
        definition.spawn_items = items;
        definition
    }

    fn item(category: SpawnCategory, location: LocationStrategy, count: u32) -> SpawnItem {
        SpawnItem {
            location,
            radius: 10.0,
            ..SpawnItem::new(category, PrefabRef::new("unit"), count, count)
        }
    }

    #[test]
    fn random_in_radius_stays_inside_disc() {
        let definition = definition(vec![item(SpawnCategory::Enemy, LocationStrategy::RandomInRadius, 32)]);
        let center = Vec3::new(100.0, 0.0, -40.0);
        let mut rng = ChaCha8Rng::seed_from_u64(9);

        let plan = resolve(&definition, center, &[], &OpenTerrain, &mut rng);

        assert_eq!(plan.placements.len(), 32);
        for placement in &plan.placements {
            assert!(placement.position.distance(center) <= 10.0 + 1e-3);
            assert!((0.0..360.0).contains(&placement.yaw_degrees));
        }
    }

    #[test]
    fn perimeter_units_are_evenly_spaced_on_the_circle() {
        let definition = definition(vec![item(SpawnCategory::Enemy, LocationStrategy::AroundPerimeter, 4)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let plan = resolve(&definition, Vec3::ZERO, &[], &OpenTerrain, &mut rng);

        let positions: Vec<Vec3> = plan.placements.iter().map(|p| p.position).collect();
        assert!(positions[0].distance(Vec3::new(10.0, 0.0, 0.0)) < 1e-3);
        assert!(positions[1].distance(Vec3::new(0.0, 0.0, 10.0)) < 1e-3);
        assert!(positions[2].distance(Vec3::new(-10.0, 0.0, 0.0)) < 1e-3);
        assert!(positions[3].distance(Vec3::new(0.0, 0.0, -10.0)) < 1e-3);
    }

    #[test]
    fn edge_units_lie_on_the_boundary() {
        let definition = definition(vec![item(SpawnCategory::Prop, LocationStrategy::RandomOnEdge, 8)]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let plan = resolve(&definition, Vec3::ZERO, &[], &OpenTerrain, &mut rng);

        for placement in &plan.placements {
            assert!((placement.position.length() - 10.0).abs() < 1e-3);
        }
    }

    #[test]
    fn grid_cells_are_distinct_and_centred() {
        let definition = definition(vec![item(SpawnCategory::Cover, LocationStrategy::Grid, 9)]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let plan = resolve(&definition, Vec3::ZERO, &[], &OpenTerrain, &mut rng);

        let sum = plan
            .placements
            .iter()
            .fold(Vec3::ZERO, |acc, placement| acc + placement.position);
        assert!(sum.length() < 1e-3, "lattice should be centred on the anchor");
        for (index, left) in plan.placements.iter().enumerate() {
            for right in &plan.placements[index + 1..] {
                assert!(left.position.distance(right.position) >= GRID_MIN_SPACING - 1e-3);
            }
        }
    }

    #[test]
    fn at_center_applies_offset_and_fixed_rotation() {
        let mut boss = item(SpawnCategory::Boss, LocationStrategy::AtCenter, 1);
        boss.offset = Vec3::new(0.0, 1.0, 5.0);
        boss.random_rotation = false;
        boss.rotation_yaw = 450.0;
        let definition = definition(vec![boss]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let plan = resolve(&definition, Vec3::new(1.0, 0.0, 1.0), &[], &OpenTerrain, &mut rng);

        assert_eq!(plan.placements[0].position, Vec3::new(1.0, 1.0, 6.0));
        assert!((plan.placements[0].yaw_degrees - 90.0).abs() < 1e-4);
    }

    #[test]
    fn pool_mode_spawns_exactly_one_pool_entry() {
        let pooled = SpawnItem {
            prefabs: vec![
                PrefabRef::new("sniper"),
                PrefabRef::new("heavy"),
                PrefabRef::new("medic"),
            ],
            pool_mode: true,
            min_count: 3,
            max_count: 5,
            ..item(SpawnCategory::Enemy, LocationStrategy::AtCenter, 1)
        };
        let definition = definition(vec![pooled.clone()]);

        for seed in 0..16 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let plan = resolve(&definition, Vec3::ZERO, &[], &OpenTerrain, &mut rng);
            assert_eq!(plan.placements.len(), 1);
            assert!(pooled.prefabs.contains(&plan.placements[0].prefab));
        }
    }

    #[test]
    fn counts_stay_within_authored_range() {
        let ranged = SpawnItem {
            min_count: 2,
            max_count: 4,
            ..item(SpawnCategory::Enemy, LocationStrategy::RandomInRadius, 1)
        };
        let definition = definition(vec![ranged]);

        for seed in 0..32 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let plan = resolve(&definition, Vec3::ZERO, &[], &OpenTerrain, &mut rng);
            assert!((2..=4).contains(&plan.placements.len()));
        }
    }

    #[test]
    fn higher_priority_items_are_placed_first() {
        let mut low = item(SpawnCategory::Prop, LocationStrategy::AtCenter, 1);
        low.priority = -1;
        let mut high = item(SpawnCategory::Boss, LocationStrategy::AtCenter, 1);
        high.priority = 10;
        let middle = item(SpawnCategory::Enemy, LocationStrategy::AtCenter, 1);
        let definition = definition(vec![low, middle, high]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let plan = resolve(&definition, Vec3::ZERO, &[], &OpenTerrain, &mut rng);

        let order: Vec<usize> = plan.placements.iter().map(|p| p.item_index).collect();
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn snap_miss_falls_back_to_nearest_spawn_point() {
        let definition = definition(vec![item(SpawnCategory::Enemy, LocationStrategy::AtCenter, 2)]);
        let spawn_points = [Vec3::new(3.0, 0.0, 0.0), Vec3::new(6.0, 0.0, 0.0), Vec3::new(50.0, 0.0, 0.0)];
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let plan = resolve(&definition, Vec3::ZERO, &spawn_points, &Nowhere, &mut rng);

        let positions: Vec<Vec3> = plan.placements.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![spawn_points[0], spawn_points[1]]);
        assert!(plan.is_viable());
    }

    #[test]
    fn unplaceable_required_item_is_reported_and_optional_item_skipped() {
        let mut required = item(SpawnCategory::Civilian, LocationStrategy::AtCenter, 2);
        required.required = true;
        let optional = item(SpawnCategory::Prop, LocationStrategy::AtCenter, 3);
        let definition = definition(vec![required, optional]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let plan = resolve(&definition, Vec3::ZERO, &[], &Nowhere, &mut rng);

        assert!(plan.placements.is_empty());
        assert_eq!(
            plan.failures,
            vec![SpawnFailure {
                item_index: 0,
                category: SpawnCategory::Civilian,
                reason: SpawnFailureReason::NoNavigablePoint,
            }]
        );
    }
}
