#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative challenge lifecycle state.
//!
//! The world owns the instance registry, the zone-occupancy table and the
//! entity ownership map. It mutates them exclusively through [`apply`] and
//! reports every observable change as an [`Event`].

mod entities;
mod instance;
mod zones;

use std::{collections::BTreeMap, time::Duration};

use challenge_core::{
    ChallengeDefinition, ChallengeState, Command, DefinitionCatalog, DefinitionId, EntityHandle,
    Event, Frequency, InstanceId, InstanceSnapshot, ResolvedSpawnPlan, SpawnCategory,
    SpawnFailure, SpawnFailureReason, SpawnRejection, SpawnTally, ZoneId,
};
use challenge_system_rewards::{compute_rewards, RewardTuning};
use tracing::{debug, info, trace, warn};

use entities::{EntityRegistry, Outcome};
use zones::ZoneTable;

pub use instance::{ChallengeInstance, RetryTimerPolicy, Transition};

/// Tunables of the lifecycle manager.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldConfig {
    /// Maximum number of live world-event instances.
    pub max_world_events: usize,
    /// Delay between a terminal transition and removal from the registry.
    pub grace_period: Duration,
    /// Allows failed instances to be retried.
    pub allow_retry: bool,
    /// Time a retryable failed instance keeps its zone awaiting a retry.
    pub retry_window: Duration,
    /// Availability window handling on retry.
    pub retry_timer_policy: RetryTimerPolicy,
    /// Delay before a failed or unanswered spawn attempt is repeated.
    pub spawn_retry_delay: Duration,
    /// Spawn attempts allowed before the instance is aborted.
    pub max_spawn_attempts: u32,
    /// Per-level reward growth.
    pub reward_tuning: RewardTuning,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_world_events: 3,
            grace_period: Duration::from_secs(5),
            allow_retry: true,
            retry_window: Duration::from_secs(120),
            retry_timer_policy: RetryTimerPolicy::KeepOriginal,
            spawn_retry_delay: Duration::from_secs(3),
            max_spawn_attempts: 3,
            reward_tuning: RewardTuning::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Population {
    AwaitingPlan { since: Duration },
    Populating { expected: u32, tally: SpawnTally },
    Settled,
}

#[derive(Debug)]
struct Slot {
    instance: ChallengeInstance,
    population: Population,
    attempts_total: u32,
    attempts_round: u32,
    retryable: bool,
    retry_deadline: Option<Duration>,
    retired_at: Option<Duration>,
    /// Outcomes reported while the instance was still populating.
    deferred: Vec<Outcome>,
}

impl Slot {
    fn snapshot(&self) -> InstanceSnapshot {
        let instance = &self.instance;
        InstanceSnapshot {
            id: instance.id(),
            definition: instance.definition().id,
            frequency: instance.definition().frequency,
            zone: instance.zone(),
            position: instance.position(),
            state: instance.state(),
            progress: instance.progress(),
            discovered: instance.is_discovered(),
            retryable: self.retryable,
            started_at: instance.started_at(),
            expires_at: instance.expires_at(),
        }
    }

    fn holds_zone(&self) -> bool {
        match self.instance.state() {
            ChallengeState::Pending | ChallengeState::Active => true,
            ChallengeState::Failed => self.retryable,
            ChallengeState::Completed | ChallengeState::Expired => false,
        }
    }
}

/// Represents the authoritative challenge world state.
#[derive(Debug)]
pub struct World {
    config: WorldConfig,
    catalog: DefinitionCatalog,
    zones: ZoneTable,
    instances: BTreeMap<InstanceId, Slot>,
    entities: EntityRegistry,
    clock: Duration,
    player_level: u32,
    next_instance: u32,
}

impl World {
    /// Creates a world serving the provided catalog.
    #[must_use]
    pub fn new(catalog: DefinitionCatalog, config: WorldConfig) -> Self {
        Self {
            config,
            catalog,
            zones: ZoneTable::default(),
            instances: BTreeMap::new(),
            entities: EntityRegistry::default(),
            clock: Duration::ZERO,
            player_level: 1,
            next_instance: 1,
        }
    }

    fn allocate_instance_id(&mut self) -> InstanceId {
        let id = InstanceId::new(self.next_instance);
        self.next_instance = self.next_instance.saturating_add(1);
        id
    }

    fn advance_clock(&mut self, now: Duration, out_events: &mut Vec<Event>) {
        let dt = now.saturating_sub(self.clock);
        self.clock = self.clock.max(now);
        out_events.push(Event::TimeAdvanced {
            now: self.clock,
            dt,
        });

        let clock = self.clock;
        let ids: Vec<InstanceId> = self.instances.keys().copied().collect();

        for id in &ids {
            let transition = self
                .instances
                .get_mut(id)
                .and_then(|slot| slot.instance.check_time(clock));
            if let Some(transition) = transition {
                self.conclude(*id, transition, out_events);
            }
        }

        for id in &ids {
            self.repeat_spawn_if_due(*id, out_events);
        }

        for id in &ids {
            let lapsed = self.instances.get(id).is_some_and(|slot| {
                slot.instance.state() == ChallengeState::Failed
                    && slot.retryable
                    && (slot.retry_deadline.is_some_and(|deadline| clock >= deadline)
                        || slot
                            .instance
                            .expires_at()
                            .is_some_and(|expires_at| clock > expires_at))
            });
            if lapsed {
                self.retire(*id, out_events);
            }
        }

        let grace_period = self.config.grace_period;
        let expired: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|(_, slot)| {
                slot.retired_at
                    .is_some_and(|retired_at| clock.saturating_sub(retired_at) >= grace_period)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            let _ = self.instances.remove(&id);
            debug!(target: "challenge::world", instance = id.get(), "instance.removed");
            out_events.push(Event::InstanceRemoved { instance: id });
        }
    }

    fn repeat_spawn_if_due(&mut self, id: InstanceId, out_events: &mut Vec<Event>) {
        let delay = self.config.spawn_retry_delay;
        let max_attempts = self.config.max_spawn_attempts;
        let clock = self.clock;
        let Some(slot) = self.instances.get_mut(&id) else {
            return;
        };
        if slot.instance.state() != ChallengeState::Pending {
            return;
        }
        let Population::AwaitingPlan { since } = slot.population else {
            return;
        };
        if clock.saturating_sub(since) < delay {
            return;
        }
        if slot.attempts_round >= max_attempts {
            if let Some(transition) = slot.instance.abort(clock) {
                self.conclude(id, transition, out_events);
            }
            return;
        }
        slot.attempts_round = slot.attempts_round.saturating_add(1);
        slot.attempts_total = slot.attempts_total.saturating_add(1);
        slot.population = Population::AwaitingPlan { since: clock };
        let event = spawning_event(slot);
        debug!(
            target: "challenge::world",
            instance = id.get(),
            attempt = slot.attempts_total,
            "spawn.attempt_repeated"
        );
        out_events.push(event);
    }

    fn spawn(&mut self, definition: DefinitionId, zone: ZoneId, out_events: &mut Vec<Event>) {
        if let Err(reason) = self.admit(definition, zone) {
            info!(
                target: "challenge::world",
                definition = definition.get(),
                zone = zone.get(),
                reason = ?reason,
                "spawn.rejected"
            );
            out_events.push(Event::SpawnRejected {
                definition,
                zone,
                reason,
            });
            return;
        }

        let (Some(definition), Some(descriptor)) = (
            self.catalog.get(definition).cloned(),
            self.zones.descriptor(zone),
        ) else {
            return;
        };
        let position = descriptor.center;
        let id = self.allocate_instance_id();
        if !self.zones.occupy(zone, id) {
            return;
        }

        let instance = ChallengeInstance::new(id, definition, zone, position, self.clock);
        let slot = Slot {
            instance,
            population: Population::AwaitingPlan { since: self.clock },
            attempts_total: 1,
            attempts_round: 1,
            retryable: false,
            retry_deadline: None,
            retired_at: None,
            deferred: Vec::new(),
        };
        info!(
            target: "challenge::world",
            instance = id.get(),
            definition = slot.instance.definition().id.get(),
            zone = zone.get(),
            "instance.spawning"
        );
        out_events.push(spawning_event(&slot));
        let _ = self.instances.insert(id, slot);
    }

    fn admit(&self, definition: DefinitionId, zone: ZoneId) -> Result<(), SpawnRejection> {
        let definition = self
            .catalog
            .get(definition)
            .ok_or(SpawnRejection::UnknownDefinition)?;
        if self.zones.descriptor(zone).is_none() {
            return Err(SpawnRejection::UnknownZone);
        }
        if let Some(occupant) = self.zones.occupant(zone) {
            trace!(
                target: "challenge::world",
                zone = zone.get(),
                occupant = occupant.get(),
                "zone.occupied"
            );
            return Err(SpawnRejection::ZoneOccupied);
        }
        if self.player_level < definition.required_level {
            return Err(SpawnRejection::LevelTooLow);
        }
        if definition.frequency == Frequency::WorldEvent
            && self.live_world_events() >= self.config.max_world_events
        {
            return Err(SpawnRejection::WorldEventCapacity);
        }
        Ok(())
    }

    fn live_world_events(&self) -> usize {
        self.instances
            .values()
            .filter(|slot| {
                slot.instance.definition().frequency == Frequency::WorldEvent && slot.holds_zone()
            })
            .count()
    }

    fn accept_plan(
        &mut self,
        id: InstanceId,
        plan: ResolvedSpawnPlan,
        out_events: &mut Vec<Event>,
    ) {
        let clock = self.clock;
        let max_attempts = self.config.max_spawn_attempts;
        let Some(slot) = self.instances.get_mut(&id) else {
            debug!(target: "challenge::world", instance = id.get(), "plan.unknown_instance");
            return;
        };
        if slot.instance.state() != ChallengeState::Pending
            || !matches!(slot.population, Population::AwaitingPlan { .. })
        {
            debug!(target: "challenge::world", instance = id.get(), "plan.not_awaited");
            return;
        }

        let failures = if plan.is_viable() {
            objective_shortfall(slot.instance.definition(), &plan.tally())
        } else {
            plan.failures.clone()
        };
        if !failures.is_empty() {
            warn!(
                target: "challenge::world",
                instance = id.get(),
                attempt = slot.attempts_total,
                failures = failures.len(),
                "spawn.attempt_failed"
            );
            out_events.push(Event::SpawnAttemptFailed {
                instance: id,
                failures,
            });
            if slot.attempts_round >= max_attempts {
                if let Some(transition) = slot.instance.abort(clock) {
                    self.conclude(id, transition, out_events);
                }
            } else {
                slot.population = Population::AwaitingPlan { since: clock };
            }
            return;
        }

        let expected = u32::try_from(plan.placements.len()).unwrap_or(u32::MAX);
        slot.population = Population::Populating {
            expected,
            tally: SpawnTally::default(),
        };
        out_events.push(Event::SpawnPlanAccepted { instance: id, plan });
        if expected == 0 {
            self.activate(id, SpawnTally::default(), out_events);
        }
    }

    fn register_entity(
        &mut self,
        id: InstanceId,
        entity: EntityHandle,
        category: SpawnCategory,
        out_events: &mut Vec<Event>,
    ) {
        let Some(slot) = self.instances.get_mut(&id) else {
            debug!(target: "challenge::world", instance = id.get(), "entity.unknown_instance");
            return;
        };
        let Population::Populating { expected, mut tally } = slot.population else {
            debug!(
                target: "challenge::world",
                instance = id.get(),
                entity = entity.get(),
                "entity.not_populating"
            );
            return;
        };
        if !self.entities.register(entity, id, category) {
            debug!(target: "challenge::world", entity = entity.get(), "entity.duplicate");
            return;
        }
        tally.record(category);
        if tally.total >= expected {
            slot.population = Population::Settled;
            self.activate(id, tally, out_events);
        } else {
            slot.population = Population::Populating { expected, tally };
        }
    }

    fn activate(&mut self, id: InstanceId, tally: SpawnTally, out_events: &mut Vec<Event>) {
        let clock = self.clock;
        let Some(slot) = self.instances.get_mut(&id) else {
            return;
        };
        slot.population = Population::Settled;
        if !slot.instance.activate(clock, &tally) {
            return;
        }
        let deferred = std::mem::take(&mut slot.deferred);
        let progress = slot.instance.progress();
        info!(
            target: "challenge::world",
            instance = id.get(),
            required_kills = progress.required_kills,
            required_rescues = progress.required_rescues,
            "instance.activated"
        );
        out_events.push(Event::InstanceActivated { instance: id });
        out_events.push(Event::ProgressUpdated {
            instance: id,
            progress,
        });
        for outcome in deferred {
            self.apply_outcome(outcome, out_events);
        }
    }

    /// Routes an entity outcome to its instance, holding it back until the
    /// instance finishes populating.
    fn record_outcome(&mut self, outcome: Outcome, out_events: &mut Vec<Event>) {
        let id = outcome.instance();
        let Some(slot) = self.instances.get_mut(&id) else {
            trace!(target: "challenge::world", instance = id.get(), "outcome.unknown_instance");
            return;
        };
        if slot.instance.state() == ChallengeState::Pending {
            trace!(target: "challenge::world", instance = id.get(), "outcome.deferred");
            slot.deferred.push(outcome);
            return;
        }
        self.apply_outcome(outcome, out_events);
    }

    fn apply_outcome(&mut self, outcome: Outcome, out_events: &mut Vec<Event>) {
        let clock = self.clock;
        match outcome {
            Outcome::HostileKilled(id) => {
                self.progress(id, out_events, |instance| instance.on_enemy_killed(clock));
            }
            Outcome::CivilianDied(id) => {
                self.progress(id, out_events, |instance| instance.on_civilian_died(clock));
            }
            Outcome::CivilianRescued(id) => {
                self.progress(id, out_events, |instance| {
                    instance.on_civilian_rescued(clock)
                });
            }
            Outcome::Withdrawn(id, category) => {
                self.progress(id, out_events, |instance| {
                    instance.on_entity_withdrawn(clock, category)
                });
            }
        }
    }

    fn progress<F>(&mut self, id: InstanceId, out_events: &mut Vec<Event>, update: F)
    where
        F: FnOnce(&mut ChallengeInstance) -> Option<Transition>,
    {
        let Some(slot) = self.instances.get_mut(&id) else {
            trace!(target: "challenge::world", instance = id.get(), "progress.unknown_instance");
            return;
        };
        if slot.instance.state() != ChallengeState::Active {
            trace!(target: "challenge::world", instance = id.get(), "progress.ignored");
            return;
        }
        let transition = update(&mut slot.instance);
        out_events.push(Event::ProgressUpdated {
            instance: id,
            progress: slot.instance.progress(),
        });
        if let Some(transition) = transition {
            self.conclude(id, transition, out_events);
        }
    }

    fn conclude(&mut self, id: InstanceId, transition: Transition, out_events: &mut Vec<Event>) {
        let clock = self.clock;
        let allow_retry = self.config.allow_retry;
        let retry_window = self.config.retry_window;
        let released = self.entities.release_instance(id);
        let Some(slot) = self.instances.get_mut(&id) else {
            return;
        };
        slot.population = Population::Settled;
        slot.deferred.clear();

        match transition {
            Transition::Completed => {
                let rewards = compute_rewards(
                    slot.instance.definition(),
                    &slot.instance.performance(),
                    self.player_level,
                    &self.config.reward_tuning,
                );
                info!(
                    target: "challenge::world",
                    instance = id.get(),
                    xp = rewards.xp,
                    currency = rewards.currency,
                    bonuses = rewards.bonuses.len(),
                    "instance.completed"
                );
                out_events.push(Event::InstanceCompleted {
                    instance: id,
                    rewards,
                });
            }
            Transition::Failed(reason) => {
                let retryable = allow_retry && reason.is_retryable();
                slot.retryable = retryable;
                slot.retry_deadline = retryable.then(|| clock.saturating_add(retry_window));
                info!(
                    target: "challenge::world",
                    instance = id.get(),
                    reason = ?reason,
                    retryable,
                    "instance.failed"
                );
                out_events.push(Event::InstanceFailed {
                    instance: id,
                    reason,
                    retryable,
                });
                if retryable {
                    slot.instance.forget_discovery();
                    trace!(
                        target: "challenge::world",
                        instance = id.get(),
                        released_entities = released,
                        "instance.awaiting_retry"
                    );
                    return;
                }
            }
            Transition::Expired => {
                info!(target: "challenge::world", instance = id.get(), "instance.expired");
                out_events.push(Event::InstanceExpired { instance: id });
            }
        }

        trace!(
            target: "challenge::world",
            instance = id.get(),
            released_entities = released,
            "instance.entities_released"
        );
        self.retire(id, out_events);
    }

    /// Releases the zone of a terminal instance and schedules its removal.
    fn retire(&mut self, id: InstanceId, out_events: &mut Vec<Event>) {
        let clock = self.clock;
        let Some(slot) = self.instances.get_mut(&id) else {
            return;
        };
        slot.retryable = false;
        slot.retry_deadline = None;
        if slot.retired_at.is_none() {
            slot.retired_at = Some(clock);
        }
        let zone = slot.instance.zone();
        if self.zones.release(zone, id) {
            debug!(
                target: "challenge::world",
                instance = id.get(),
                zone = zone.get(),
                "zone.released"
            );
            out_events.push(Event::ZoneReleased { zone });
        }
    }

    fn discover(&mut self, id: InstanceId, out_events: &mut Vec<Event>) {
        let Some(slot) = self.instances.get_mut(&id) else {
            return;
        };
        if !slot.holds_zone() {
            return;
        }
        if slot.instance.mark_discovered() {
            info!(target: "challenge::world", instance = id.get(), "instance.discovered");
            out_events.push(Event::InstanceDiscovered { instance: id });
        }
    }

    fn retry(&mut self, id: InstanceId, out_events: &mut Vec<Event>) {
        let clock = self.clock;
        let policy = self.config.retry_timer_policy;
        let Some(slot) = self.instances.get_mut(&id) else {
            return;
        };
        if slot.instance.state() != ChallengeState::Failed || !slot.retryable {
            debug!(target: "challenge::world", instance = id.get(), "retry.not_retryable");
            return;
        }
        if !slot.instance.reset_for_retry(clock, policy) {
            return;
        }
        slot.retryable = false;
        slot.retry_deadline = None;
        slot.attempts_round = 1;
        slot.attempts_total = slot.attempts_total.saturating_add(1);
        slot.population = Population::AwaitingPlan { since: clock };
        slot.deferred.clear();
        info!(target: "challenge::world", instance = id.get(), "instance.retried");
        out_events.push(Event::InstanceRetried { instance: id });
        out_events.push(spawning_event(slot));
    }

    fn dismiss(&mut self, id: InstanceId, out_events: &mut Vec<Event>) {
        let clock = self.clock;
        let Some(slot) = self.instances.get_mut(&id) else {
            return;
        };
        if slot.instance.state() == ChallengeState::Failed && slot.retryable {
            self.retire(id, out_events);
            return;
        }
        if let Some(transition) = slot.instance.dismiss(clock) {
            self.conclude(id, transition, out_events);
        }
    }
}

/// Failures for objectives the tallied placements cannot reach, one per
/// spawn item of the missing kind.
fn objective_shortfall(definition: &ChallengeDefinition, tally: &SpawnTally) -> Vec<SpawnFailure> {
    let requirements = definition.requirements();
    if requirements.reachable_with(tally, definition.completion_rule) {
        return Vec::new();
    }
    let kills_missing = requirements.kills > 0 && tally.hostiles == 0;
    let rescues_missing = requirements.rescues > 0 && tally.civilians == 0;
    definition
        .spawn_items
        .iter()
        .enumerate()
        .filter(|(_, item)| {
            (kills_missing && item.category.is_hostile())
                || (rescues_missing && item.category == SpawnCategory::Civilian)
        })
        .map(|(item_index, item)| SpawnFailure {
            item_index,
            category: item.category,
            reason: SpawnFailureReason::ObjectiveUnpopulated,
        })
        .collect()
}

fn spawning_event(slot: &Slot) -> Event {
    Event::InstanceSpawning {
        instance: slot.instance.id(),
        definition: slot.instance.definition().id,
        zone: slot.instance.zone(),
        position: slot.instance.position(),
        attempt: slot.attempts_total,
    }
}

/// Applies the provided command to the world, mutating state deterministically.
pub fn apply(world: &mut World, command: Command, out_events: &mut Vec<Event>) {
    match command {
        Command::Tick { now } => world.advance_clock(now, out_events),
        Command::ConfigureZones { zones } => {
            let count = world.zones.replace(zones);
            out_events.push(Event::ZonesConfigured { count });
        }
        Command::SetPlayerLevel { level } => {
            world.player_level = level.max(1);
        }
        Command::SpawnChallenge { definition, zone } => world.spawn(definition, zone, out_events),
        Command::SubmitSpawnPlan { instance, plan } => {
            world.accept_plan(instance, plan, out_events);
        }
        Command::RegisterEntity {
            instance,
            entity,
            category,
        } => world.register_entity(instance, entity, category, out_events),
        Command::UnregisterEntity { entity } => {
            if world.entities.owner(entity).is_none() {
                trace!(target: "challenge::world", entity = entity.get(), "entity.unknown");
            } else if let Some(outcome) = world.entities.unregister(entity) {
                world.record_outcome(outcome, out_events);
            }
        }
        Command::EntityKilled { entity } | Command::EntityDied { entity } => {
            if let Some(outcome) = world.entities.record_death(entity) {
                world.record_outcome(outcome, out_events);
            }
        }
        Command::EntityRescued { entity } => {
            if let Some(outcome) = world.entities.record_rescue(entity) {
                world.record_outcome(outcome, out_events);
            }
        }
        Command::PlayerDetected { instance } => {
            let clock = world.clock;
            world.progress(instance, out_events, |challenge| {
                challenge.on_player_detected(clock)
            });
        }
        Command::PlayerDamaged { instance } => {
            if let Some(slot) = world.instances.get_mut(&instance) {
                slot.instance.on_player_damaged();
            }
        }
        Command::DiscoverChallenge { instance } => world.discover(instance, out_events),
        Command::RetryChallenge { instance } => world.retry(instance, out_events),
        Command::DismissChallenge { instance } => world.dismiss(instance, out_events),
    }
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use std::time::Duration;

    use super::{ChallengeInstance, World, WorldConfig};
    use challenge_core::{
        ChallengeView, DefinitionCatalog, EntityHandle, InstanceId, ZoneId, ZoneSnapshot,
    };

    /// Catalog of definitions the world instantiates.
    #[must_use]
    pub fn catalog(world: &World) -> &DefinitionCatalog {
        &world.catalog
    }

    /// Configuration the world was created with.
    #[must_use]
    pub fn config(world: &World) -> &WorldConfig {
        &world.config
    }

    /// Current simulated time.
    #[must_use]
    pub fn clock(world: &World) -> Duration {
        world.clock
    }

    /// Player level used for gating and reward scaling.
    #[must_use]
    pub fn player_level(world: &World) -> u32 {
        world.player_level
    }

    /// Captures the zone table in identifier order.
    #[must_use]
    pub fn zones(world: &World) -> Vec<ZoneSnapshot> {
        world.zones.snapshots()
    }

    /// Reports whether the zone exists and hosts no live instance.
    #[must_use]
    pub fn zone_available(world: &World, zone: ZoneId) -> bool {
        world.zones.is_free(zone)
    }

    /// Zones currently free to host an instance, in identifier order.
    #[must_use]
    pub fn available_zones(world: &World) -> Vec<ZoneId> {
        world.zones.free_zones().collect()
    }

    /// Captures a read-only view of every instance in the registry.
    #[must_use]
    pub fn challenge_view(world: &World) -> ChallengeView {
        ChallengeView::from_snapshots(world.instances.values().map(|slot| slot.snapshot()).collect())
    }

    /// Looks up a single instance.
    #[must_use]
    pub fn instance(world: &World, id: InstanceId) -> Option<&ChallengeInstance> {
        world.instances.get(&id).map(|slot| &slot.instance)
    }

    /// Instance that owns the entity, if it is still registered.
    #[must_use]
    pub fn entity_owner(world: &World, entity: EntityHandle) -> Option<InstanceId> {
        world.entities.owner(entity)
    }
}
