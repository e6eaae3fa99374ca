#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Deterministic spawning system that resolves challenge spawn manifests.
//!
//! The system consumes [`Event::InstanceSpawning`] announcements, resolves the
//! definition's manifest around the encounter centre and answers with
//! [`Command::SubmitSpawnPlan`]. Each attempt draws from its own ChaCha8
//! stream derived from the global seed, the instance and the attempt number.

mod resolver;

use challenge_core::{Command, DefinitionCatalog, Event, InstanceId, ZoneSnapshot};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub use resolver::{resolve, NavMesh, OpenTerrain, NAVMESH_SEARCH_RADIUS};

const RNG_STREAM_SPAWN: &str = "spawn-manifest";

/// Configuration parameters required to construct the spawn-manifest system.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    rng_seed: u64,
}

impl Config {
    /// Creates a new configuration using the provided global seed.
    #[must_use]
    pub const fn new(rng_seed: u64) -> Self {
        Self { rng_seed }
    }
}

/// Pure system that resolves spawn plans for instances awaiting population.
#[derive(Debug)]
pub struct SpawnManifest {
    rng_seed: u64,
}

impl SpawnManifest {
    /// Creates a new system using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            rng_seed: config.rng_seed,
        }
    }

    /// Consumes events and immutable views to emit spawn-plan commands.
    pub fn handle(
        &mut self,
        events: &[Event],
        catalog: &DefinitionCatalog,
        zones: &[ZoneSnapshot],
        navmesh: &dyn NavMesh,
        out: &mut Vec<Command>,
    ) {
        for event in events {
            let Event::InstanceSpawning {
                instance,
                definition,
                zone,
                position,
                attempt,
            } = event
            else {
                continue;
            };

            let Some(definition) = catalog.get(*definition) else {
                warn!(
                    target: "challenge::spawn",
                    instance = instance.get(),
                    definition = definition.get(),
                    "spawn.unknown_definition"
                );
                continue;
            };

            let spawn_points = zones
                .iter()
                .find(|snapshot| snapshot.id == *zone)
                .map_or(&[][..], |snapshot| snapshot.spawn_points.as_slice());

            let mut rng =
                ChaCha8Rng::seed_from_u64(derive_attempt_seed(self.rng_seed, *instance, *attempt));
            let plan = resolve(definition, *position, spawn_points, navmesh, &mut rng);

            if plan.is_viable() {
                debug!(
                    target: "challenge::spawn",
                    instance = instance.get(),
                    attempt = *attempt,
                    placements = plan.placements.len(),
                    "spawn.plan_resolved"
                );
            } else {
                warn!(
                    target: "challenge::spawn",
                    instance = instance.get(),
                    attempt = *attempt,
                    failures = plan.failures.len(),
                    "spawn.required_items_unplaced"
                );
            }

            out.push(Command::SubmitSpawnPlan {
                instance: *instance,
                plan,
            });
        }
    }
}

/// Derives the seed of a single spawn attempt.
#[must_use]
pub fn derive_attempt_seed(global_seed: u64, instance: InstanceId, attempt: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(global_seed.to_le_bytes());
    hasher.update(RNG_STREAM_SPAWN.as_bytes());
    hasher.update(instance.get().to_le_bytes());
    hasher.update(attempt.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_seeds_differ_per_attempt_and_instance() {
        let base = derive_attempt_seed(7, InstanceId::new(1), 1);
        assert_eq!(base, derive_attempt_seed(7, InstanceId::new(1), 1));
        assert_ne!(base, derive_attempt_seed(7, InstanceId::new(1), 2));
        assert_ne!(base, derive_attempt_seed(7, InstanceId::new(2), 1));
        assert_ne!(base, derive_attempt_seed(8, InstanceId::new(1), 1));
    }
}
