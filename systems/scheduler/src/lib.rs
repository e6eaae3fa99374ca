#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Deterministic scheduler that decides when and where challenges spawn.
//!
//! World events are attempted on a fixed cadence driven by
//! [`Event::TimeAdvanced`]. Daily and weekly definitions are offered once per
//! rotation whenever no live instance of them exists.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use challenge_core::{
    ChallengeDefinition, ChallengeView, Command, DefinitionCatalog, DefinitionId, Event, Frequency,
    ZoneId, ZoneSnapshot,
};
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

const RNG_STREAM_SCHEDULER: &str = "challenge-scheduler";

/// Configuration parameters required to construct the scheduler.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    spawn_interval: Duration,
    rng_seed: u64,
    max_world_events: usize,
}

impl Config {
    /// Creates a new configuration using the provided cadence, seed and cap.
    #[must_use]
    pub const fn new(spawn_interval: Duration, rng_seed: u64, max_world_events: usize) -> Self {
        Self {
            spawn_interval,
            rng_seed,
            max_world_events,
        }
    }
}

/// Pure system that emits [`Command::SpawnChallenge`] requests.
#[derive(Debug)]
pub struct Scheduler {
    spawn_interval: Duration,
    max_world_events: usize,
    accumulator: Duration,
    clock: Duration,
    rng: ChaCha8Rng,
    next_rotation: BTreeMap<DefinitionId, Duration>,
}

impl Scheduler {
    /// Creates a new scheduler using the supplied configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            spawn_interval: config.spawn_interval,
            max_world_events: config.max_world_events,
            accumulator: Duration::ZERO,
            clock: Duration::ZERO,
            rng: ChaCha8Rng::seed_from_u64(derive_labeled_seed(
                config.rng_seed,
                RNG_STREAM_SCHEDULER,
            )),
            next_rotation: BTreeMap::new(),
        }
    }

    /// Consumes events and immutable views to emit spawn requests.
    pub fn handle(
        &mut self,
        events: &[Event],
        catalog: &DefinitionCatalog,
        zones: &[ZoneSnapshot],
        view: &ChallengeView,
        player_level: u32,
        out: &mut Vec<Command>,
    ) {
        let mut accumulated = Duration::ZERO;
        let mut ticked = false;
        for event in events {
            match event {
                Event::TimeAdvanced { now, dt } => {
                    accumulated = accumulated.saturating_add(*dt);
                    self.clock = *now;
                    ticked = true;
                }
                Event::InstanceSpawning {
                    definition,
                    attempt: 1,
                    ..
                } => self.record_rotation(catalog, *definition),
                _ => {}
            }
        }

        if !ticked {
            return;
        }

        let mut free: Vec<ZoneId> = zones
            .iter()
            .filter(|zone| zone.is_free())
            .map(|zone| zone.id)
            .collect();
        let mut requested = BTreeSet::new();

        self.schedule_rotations(catalog, view, player_level, &mut free, &mut requested, out);

        self.accumulator = self.accumulator.saturating_add(accumulated);
        for _ in 0..self.resolve_spawn_attempts() {
            self.schedule_world_event(catalog, view, player_level, &mut free, &mut requested, out);
        }
    }

    fn record_rotation(&mut self, catalog: &DefinitionCatalog, definition: DefinitionId) {
        let Some(lifetime) = catalog
            .get(definition)
            .and_then(|definition| definition.frequency.lifetime())
        else {
            return;
        };
        let _ = self
            .next_rotation
            .insert(definition, self.clock.saturating_add(lifetime));
    }

    fn schedule_rotations(
        &mut self,
        catalog: &DefinitionCatalog,
        view: &ChallengeView,
        player_level: u32,
        free: &mut Vec<ZoneId>,
        requested: &mut BTreeSet<DefinitionId>,
        out: &mut Vec<Command>,
    ) {
        for definition in catalog.rotating() {
            if free.is_empty() {
                return;
            }
            if !eligible(definition, view, player_level, requested) {
                continue;
            }
            let due = self
                .next_rotation
                .get(&definition.id)
                .map_or(true, |next| self.clock >= *next);
            if !due {
                continue;
            }
            let Some(zone) = self.take_zone(free) else {
                return;
            };
            let _ = requested.insert(definition.id);
            debug!(
                target: "challenge::scheduler",
                definition = definition.id.get(),
                zone = zone.get(),
                frequency = ?definition.frequency,
                "scheduler.rotation_offered"
            );
            out.push(Command::SpawnChallenge {
                definition: definition.id,
                zone,
            });
        }
    }

    fn schedule_world_event(
        &mut self,
        catalog: &DefinitionCatalog,
        view: &ChallengeView,
        player_level: u32,
        free: &mut Vec<ZoneId>,
        requested: &mut BTreeSet<DefinitionId>,
        out: &mut Vec<Command>,
    ) {
        let requested_events = requested
            .iter()
            .filter(|id| {
                catalog
                    .get(**id)
                    .is_some_and(|definition| definition.frequency == Frequency::WorldEvent)
            })
            .count();
        if view.live_count(Frequency::WorldEvent) + requested_events >= self.max_world_events {
            trace!(target: "challenge::scheduler", "scheduler.world_event_capacity");
            return;
        }

        let candidates: Vec<DefinitionId> = catalog
            .world_event_pool()
            .filter(|definition| eligible(definition, view, player_level, requested))
            .map(|definition| definition.id)
            .collect();
        let Some(definition) = candidates.choose(&mut self.rng).copied() else {
            trace!(target: "challenge::scheduler", "scheduler.no_candidates");
            return;
        };
        let Some(zone) = self.take_zone(free) else {
            trace!(target: "challenge::scheduler", "scheduler.no_free_zone");
            return;
        };

        let _ = requested.insert(definition);
        debug!(
            target: "challenge::scheduler",
            definition = definition.get(),
            zone = zone.get(),
            "scheduler.world_event_requested"
        );
        out.push(Command::SpawnChallenge { definition, zone });
    }

    fn take_zone(&mut self, free: &mut Vec<ZoneId>) -> Option<ZoneId> {
        if free.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..free.len());
        Some(free.swap_remove(index))
    }

    fn resolve_spawn_attempts(&mut self) -> usize {
        if self.spawn_interval.is_zero() {
            return 0;
        }

        let mut attempts = 0;
        while self.accumulator >= self.spawn_interval {
            self.accumulator -= self.spawn_interval;
            attempts += 1;
        }
        attempts
    }
}

fn eligible(
    definition: &ChallengeDefinition,
    view: &ChallengeView,
    player_level: u32,
    requested: &BTreeSet<DefinitionId>,
) -> bool {
    definition.required_level <= player_level
        && !view.has_live(definition.id)
        && !requested.contains(&definition.id)
}

fn derive_labeled_seed(base: u64, label: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base.to_le_bytes());
    hasher.update(label.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
