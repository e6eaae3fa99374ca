#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the challenge engine.
//!
//! This crate defines the message surface that connects adapters, the
//! authoritative world, and pure systems. Adapters submit [`Command`] values
//! describing desired mutations, the world executes those commands via its
//! `apply` entry point, and then broadcasts [`Event`] values for systems to
//! react to deterministically. Systems consume event streams, query immutable
//! snapshots, and respond exclusively with new command batches.
//!
//! Authoring data ([`ChallengeDefinition`], [`SpawnItem`], [`RewardManifest`])
//! lives here as well so that the catalog can be loaded by adapters and shared
//! read-only with the world and every system.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bitflags::bitflags;
pub use glam::{Vec3, Vec3Swizzles};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a simulated day used by [`Frequency::Daily`].
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Length of a simulated week used by [`Frequency::Weekly`].
pub const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Commands that express all permissible world mutations.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Advances the simulation clock to the provided absolute time.
    Tick {
        /// Simulated time elapsed since the session started.
        now: Duration,
    },
    /// Replaces the zone table with the provided zone layout.
    ConfigureZones {
        /// Zones that may host challenge instances.
        zones: Vec<ZoneDescriptor>,
    },
    /// Updates the player level used for level gating and reward scaling.
    SetPlayerLevel {
        /// Current level of the player.
        level: u32,
    },
    /// Requests that a new instance of the definition be created at the zone.
    SpawnChallenge {
        /// Definition to instantiate.
        definition: DefinitionId,
        /// Zone that should host the instance.
        zone: ZoneId,
    },
    /// Submits the resolved spawn plan for a pending instance.
    SubmitSpawnPlan {
        /// Instance the plan was resolved for.
        instance: InstanceId,
        /// Concrete placements and required-item failures.
        plan: ResolvedSpawnPlan,
    },
    /// Registers a spawned entity as owned by a pending instance.
    RegisterEntity {
        /// Instance that owns the entity.
        instance: InstanceId,
        /// Handle the host engine assigned to the entity.
        entity: EntityHandle,
        /// Spawn category the entity was materialised from.
        category: SpawnCategory,
    },
    /// Removes an entity from its owning instance without recording a fate.
    UnregisterEntity {
        /// Entity that left the world.
        entity: EntityHandle,
    },
    /// Reports that an entity was killed by the player.
    EntityKilled {
        /// Entity that was killed.
        entity: EntityHandle,
    },
    /// Reports that an entity was rescued by the player.
    EntityRescued {
        /// Entity that was rescued.
        entity: EntityHandle,
    },
    /// Reports that an entity died from any cause.
    EntityDied {
        /// Entity that died.
        entity: EntityHandle,
    },
    /// Reports that hostiles of the instance detected the player.
    PlayerDetected {
        /// Instance whose hostiles spotted the player.
        instance: InstanceId,
    },
    /// Reports that the player took damage inside the instance.
    PlayerDamaged {
        /// Instance in which the damage occurred.
        instance: InstanceId,
    },
    /// Marks the instance as discovered by the player.
    DiscoverChallenge {
        /// Instance that was discovered.
        instance: InstanceId,
    },
    /// Requests that a failed instance be reset for another attempt.
    RetryChallenge {
        /// Failed instance to retry.
        instance: InstanceId,
    },
    /// Removes an instance on behalf of an external collaborator.
    DismissChallenge {
        /// Instance to remove.
        instance: InstanceId,
    },
}

/// Events broadcast by the world after processing commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Indicates that the simulation clock advanced.
    TimeAdvanced {
        /// Absolute simulated time after the tick.
        now: Duration,
        /// Duration of simulated time that elapsed in the tick.
        dt: Duration,
    },
    /// Confirms that the zone table was replaced.
    ZonesConfigured {
        /// Number of zones now available.
        count: usize,
    },
    /// Requests that the entities of an instance be resolved and materialised.
    InstanceSpawning {
        /// Instance awaiting population.
        instance: InstanceId,
        /// Definition the instance was created from.
        definition: DefinitionId,
        /// Zone hosting the instance.
        zone: ZoneId,
        /// Centre of the encounter.
        position: Vec3,
        /// One-based spawn attempt counter.
        attempt: u32,
    },
    /// Reports that a spawn request was rejected.
    SpawnRejected {
        /// Definition requested for spawning.
        definition: DefinitionId,
        /// Zone requested for hosting.
        zone: ZoneId,
        /// Specific reason the request failed.
        reason: SpawnRejection,
    },
    /// Confirms that a spawn plan was accepted and should be materialised.
    SpawnPlanAccepted {
        /// Instance the plan belongs to.
        instance: InstanceId,
        /// Placements the host engine should spawn.
        plan: ResolvedSpawnPlan,
    },
    /// Reports that a spawn plan could not place every required item.
    SpawnAttemptFailed {
        /// Instance that remains pending.
        instance: InstanceId,
        /// Required items that could not be placed.
        failures: Vec<SpawnFailure>,
    },
    /// Announces that an instance finished populating and now accepts progress.
    InstanceActivated {
        /// Instance that became active.
        instance: InstanceId,
    },
    /// Reports updated progress counters for an active instance.
    ProgressUpdated {
        /// Instance whose progress changed.
        instance: InstanceId,
        /// Progress after applying the event.
        progress: ProgressSnapshot,
    },
    /// Announces that an instance completed and carries the computed rewards.
    InstanceCompleted {
        /// Instance that completed.
        instance: InstanceId,
        /// Rewards to hand to progression and loot collaborators.
        rewards: RewardGrant,
    },
    /// Announces that an instance failed.
    InstanceFailed {
        /// Instance that failed.
        instance: InstanceId,
        /// Condition that caused the failure.
        reason: FailureReason,
        /// Indicates whether the instance may be retried.
        retryable: bool,
    },
    /// Announces that an instance expired without completing.
    InstanceExpired {
        /// Instance that expired.
        instance: InstanceId,
    },
    /// Announces that the player discovered an instance.
    InstanceDiscovered {
        /// Instance that was discovered.
        instance: InstanceId,
    },
    /// Announces that a failed instance was reset for another attempt.
    InstanceRetried {
        /// Instance that returned to pending.
        instance: InstanceId,
    },
    /// Announces that a zone can host a new instance.
    ZoneReleased {
        /// Zone that was released.
        zone: ZoneId,
    },
    /// Announces that an instance left the registry.
    InstanceRemoved {
        /// Instance that was removed.
        instance: InstanceId,
    },
}

/// Unique identifier assigned to a challenge definition by its author.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionId(u32);

impl DefinitionId {
    /// Creates a new definition identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Unique identifier allocated to a live challenge instance by the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Creates a new instance identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Unique identifier of a world-space zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(u32);

impl ZoneId {
    /// Creates a new zone identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Opaque handle the host engine assigned to a spawned entity.
///
/// The core never owns entity lifetimes; it only observes them through the
/// handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityHandle(u64);

impl EntityHandle {
    /// Creates a new entity handle with the provided numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the handle.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// Reference to an engine-side prefab or archetype used to materialise a unit.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefabRef(String);

impl PrefabRef {
    /// Creates a prefab reference from its engine-side name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Engine-side name of the prefab.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Kind of encounter a definition describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    /// Secure a dropped supply crate from its guards.
    SupplyDrop,
    /// Free civilians held in the area.
    CivilianRescue,
    /// Clear a contested control point.
    ControlPoint,
    /// Extract hostages from their captors.
    HostageRescue,
    /// Hold an extraction site against waves of hostiles.
    ExtractionDefense,
    /// Defeat a boss and its escort.
    BossEncounter,
    /// Hunt down a rival agent.
    RivalAgent,
}

impl ChallengeType {
    /// Objective that decides whether the challenge was won.
    #[must_use]
    pub const fn primary_objective(self) -> PrimaryObjective {
        match self {
            Self::CivilianRescue | Self::HostageRescue => PrimaryObjective::Rescue,
            Self::SupplyDrop
            | Self::ControlPoint
            | Self::ExtractionDefense
            | Self::BossEncounter
            | Self::RivalAgent => PrimaryObjective::Eliminate,
        }
    }
}

/// Primary objective class implied by a [`ChallengeType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimaryObjective {
    /// Completion is driven by killing hostiles.
    Eliminate,
    /// Completion is driven by rescuing civilians.
    Rescue,
}

/// Cadence at which a definition is offered, governing its expiration policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    /// Spawned dynamically by the world; never expires by time.
    #[default]
    WorldEvent,
    /// Offered once per day.
    Daily,
    /// Offered once per week.
    Weekly,
}

impl Frequency {
    /// Time an instance stays available after creation, if bounded.
    #[must_use]
    pub const fn lifetime(self) -> Option<Duration> {
        match self {
            Self::WorldEvent => None,
            Self::Daily => Some(DAY),
            Self::Weekly => Some(WEEK),
        }
    }
}

/// Authored difficulty tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    /// Entry-level encounter.
    Easy,
    /// Standard encounter.
    #[default]
    Medium,
    /// Demanding encounter.
    Hard,
    /// Endgame encounter.
    Extreme,
}

impl Difficulty {
    /// Multiplier applied to experience and currency rewards.
    #[must_use]
    pub const fn reward_multiplier(self) -> f32 {
        match self {
            Self::Easy => 1.0,
            Self::Medium => 1.5,
            Self::Hard => 2.0,
            Self::Extreme => 3.0,
        }
    }

    /// Tint used by map markers and notification panels.
    #[must_use]
    pub const fn marker_color(self) -> MarkerColor {
        match self {
            Self::Easy => MarkerColor::from_rgb(0x4c, 0xaf, 0x50),
            Self::Medium => MarkerColor::from_rgb(0xff, 0xeb, 0x3b),
            Self::Hard => MarkerColor::from_rgb(0xff, 0x98, 0x00),
            Self::Extreme => MarkerColor::from_rgb(0xf4, 0x43, 0x36),
        }
    }
}

/// Visual tint applied to challenge markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MarkerColor {
    red: u8,
    green: u8,
    blue: u8,
}

impl MarkerColor {
    /// Creates a new marker color from byte RGB components.
    #[must_use]
    pub const fn from_rgb(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Red component of the color.
    #[must_use]
    pub const fn red(&self) -> u8 {
        self.red
    }

    /// Green component of the color.
    #[must_use]
    pub const fn green(&self) -> u8 {
        self.green
    }

    /// Blue component of the color.
    #[must_use]
    pub const fn blue(&self) -> u8 {
        self.blue
    }
}

/// Rule combining kill and rescue objectives for hybrid challenges.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompletionRule {
    /// Every objective with a non-zero requirement must be satisfied.
    #[default]
    AllObjectives,
    /// Satisfying any objective with a non-zero requirement completes the challenge.
    AnyObjective,
}

/// Category of unit a spawn item materialises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpawnCategory {
    /// Regular hostile combatant.
    Enemy,
    /// Non-combatant that may be rescued or killed.
    Civilian,
    /// Container holding loot.
    LootBox,
    /// Interactable objective such as a terminal or crate.
    Objective,
    /// Decorative prop.
    Prop,
    /// Cover geometry.
    Cover,
    /// Drivable or destructible vehicle.
    Vehicle,
    /// Boss combatant.
    Boss,
    /// Anything else.
    Other,
}

bitflags! {
    /// Capabilities an entity of a given category declares when it registers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Capabilities: u8 {
        /// The entity fights the player and counts toward kill objectives.
        const HOSTILE = 0b0001;
        /// The entity has health and may die.
        const DAMAGEABLE = 0b0010;
        /// The entity may be rescued.
        const RESCUABLE = 0b0100;
        /// The entity holds loot.
        const LOOTABLE = 0b1000;
    }
}

impl SpawnCategory {
    /// Capabilities declared by entities of this category.
    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::Enemy | Self::Boss => Capabilities::HOSTILE.union(Capabilities::DAMAGEABLE),
            Self::Civilian => Capabilities::DAMAGEABLE.union(Capabilities::RESCUABLE),
            Self::LootBox => Capabilities::LOOTABLE,
            Self::Objective | Self::Prop | Self::Cover | Self::Vehicle | Self::Other => {
                Capabilities::empty()
            }
        }
    }

    /// Reports whether the category counts toward kill objectives.
    #[must_use]
    pub const fn is_hostile(self) -> bool {
        self.capabilities().contains(Capabilities::HOSTILE)
    }
}

/// Strategy used to place the units of a spawn item around the encounter centre.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationStrategy {
    /// Uniformly inside a disc of the item's radius.
    #[default]
    RandomInRadius,
    /// At the centre plus the fixed offset.
    AtCenter,
    /// At a uniformly random point of the circle boundary, per unit.
    RandomOnEdge,
    /// Evenly distributed around the full circle boundary.
    AroundPerimeter,
    /// On a regular lattice sized to fit the unit count.
    Grid,
}

/// Manifest entry describing one group of units spawned by a definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnItem {
    /// Prefabs used by the item; pool mode picks one of them.
    pub prefabs: Vec<PrefabRef>,
    /// Category of the spawned units.
    pub category: SpawnCategory,
    /// Minimum number of units spawned outside pool mode.
    pub min_count: u32,
    /// Maximum number of units spawned outside pool mode.
    pub max_count: u32,
    /// Picks exactly one prefab from the pool instead of spawning a counted group.
    pub pool_mode: bool,
    /// Placement strategy.
    pub location: LocationStrategy,
    /// Radius used by the placement strategy, in world units.
    pub radius: f32,
    /// Fixed offset applied to the encounter centre before placement.
    pub offset: Vec3,
    /// Requires each placement to be snapped onto navigable ground.
    pub require_navmesh: bool,
    /// Rolls a random yaw for every unit.
    pub random_rotation: bool,
    /// Fixed yaw in degrees used when `random_rotation` is false.
    pub rotation_yaw: f32,
    /// Items with higher priority are placed first.
    pub priority: i32,
    /// Placement failure of this item fails the whole spawn attempt.
    pub required: bool,
}

impl Default for SpawnItem {
    fn default() -> Self {
        Self {
            prefabs: Vec::new(),
            category: SpawnCategory::Other,
            min_count: 1,
            max_count: 1,
            pool_mode: false,
            location: LocationStrategy::RandomInRadius,
            radius: 5.0,
            offset: Vec3::ZERO,
            require_navmesh: true,
            random_rotation: true,
            rotation_yaw: 0.0,
            priority: 0,
            required: false,
        }
    }
}

impl SpawnItem {
    /// Creates an item spawning between `min_count` and `max_count` units of one prefab.
    #[must_use]
    pub fn new(category: SpawnCategory, prefab: PrefabRef, min_count: u32, max_count: u32) -> Self {
        Self {
            prefabs: vec![prefab],
            category,
            min_count,
            max_count,
            ..Self::default()
        }
    }
}

/// Rarity tier of guaranteed loot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LootRarity {
    /// Common gear.
    #[default]
    Common,
    /// Uncommon gear.
    Uncommon,
    /// Rare gear.
    Rare,
    /// Epic gear.
    Epic,
    /// Legendary gear.
    Legendary,
}

/// Loot granted on completion regardless of performance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LootGrant {
    /// Rarity of the granted items.
    pub rarity: LootRarity,
    /// Number of items granted.
    pub count: u32,
}

/// Performance condition unlocking a bonus reward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BonusCondition {
    /// The player took no damage inside the encounter.
    Flawless,
    /// The encounter was cleared within the given time of activation.
    SpeedClear {
        /// Deadline measured from activation.
        #[serde(with = "secs")]
        within: Duration,
    },
    /// The player was never detected.
    Undetected,
    /// No civilian died.
    NoCasualties,
}

/// Bonus reward unlocked by a performance condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BonusReward {
    /// Condition unlocking the bonus.
    pub condition: BonusCondition,
    /// Additional experience granted.
    #[serde(default)]
    pub xp: u32,
    /// Additional currency granted.
    #[serde(default)]
    pub currency: u32,
}

/// Authored rewards of a definition.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardManifest {
    /// Base experience reward.
    pub xp: u32,
    /// Base currency reward.
    pub currency: u32,
    /// Loot always granted on completion.
    pub guaranteed_loot: Option<LootGrant>,
    /// Bonuses that may be unlocked by performance.
    pub bonus_rewards: Vec<BonusReward>,
}

/// Immutable authoring-time template of a challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChallengeDefinition {
    /// Identifier assigned by the author.
    pub id: DefinitionId,
    /// Display name.
    pub name: String,
    /// Display description.
    #[serde(default)]
    pub description: String,
    /// Kind of encounter.
    pub challenge_type: ChallengeType,
    /// Cadence governing expiration.
    #[serde(default)]
    pub frequency: Frequency,
    /// Authored difficulty tier.
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Level the encounter is balanced for.
    #[serde(default = "default_level")]
    pub recommended_level: u32,
    /// Minimum level needed to spawn the encounter.
    #[serde(default = "default_level")]
    pub required_level: u32,
    /// Time allowed between activation and completion, if bounded.
    #[serde(default, with = "opt_secs")]
    pub time_limit: Option<Duration>,
    /// Radius within which the player discovers the encounter.
    #[serde(default = "default_detection_radius")]
    pub detection_radius: f32,
    /// Fails the challenge as soon as any civilian dies.
    #[serde(default)]
    pub require_no_deaths: bool,
    /// Fails the challenge as soon as the player is detected.
    #[serde(default)]
    pub require_stealth: bool,
    /// Combination rule for hybrid kill and rescue objectives.
    #[serde(default)]
    pub completion_rule: CompletionRule,
    /// Ordered spawn manifest.
    #[serde(default)]
    pub spawn_items: Vec<SpawnItem>,
    /// Authored rewards.
    #[serde(default)]
    pub rewards: RewardManifest,
}

const fn default_level() -> u32 {
    1
}

const fn default_detection_radius() -> f32 {
    50.0
}

impl ChallengeDefinition {
    /// Creates a definition with default requirements and an empty manifest.
    #[must_use]
    pub fn new(id: DefinitionId, name: impl Into<String>, challenge_type: ChallengeType) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            challenge_type,
            frequency: Frequency::default(),
            difficulty: Difficulty::default(),
            recommended_level: default_level(),
            required_level: default_level(),
            time_limit: None,
            detection_radius: default_detection_radius(),
            require_no_deaths: false,
            require_stealth: false,
            completion_rule: CompletionRule::default(),
            spawn_items: Vec::new(),
            rewards: RewardManifest::default(),
        }
    }

    /// Sum of `max_count` over every Enemy and Boss item.
    #[must_use]
    pub fn enemy_count(&self) -> u32 {
        self.spawn_items
            .iter()
            .filter(|item| item.category.is_hostile())
            .map(|item| item.max_count)
            .fold(0, u32::saturating_add)
    }

    /// Sum of `max_count` over every Civilian item.
    #[must_use]
    pub fn civilian_count(&self) -> u32 {
        self.spawn_items
            .iter()
            .filter(|item| item.category == SpawnCategory::Civilian)
            .map(|item| item.max_count)
            .fold(0, u32::saturating_add)
    }

    /// Authored objective requirements before capping by spawned entities.
    ///
    /// Kills are required whenever the manifest spawns hostiles. Rescues are
    /// only an objective for rescue-type challenges; civilians in other types
    /// exist solely for the no-deaths condition.
    #[must_use]
    pub fn requirements(&self) -> Requirements {
        let rescues = match self.challenge_type.primary_objective() {
            PrimaryObjective::Rescue => self.civilian_count(),
            PrimaryObjective::Eliminate => 0,
        };
        Requirements::new(self.enemy_count(), rescues)
    }

    /// Checks authoring invariants.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName {
                definition: self.id,
            });
        }

        for (index, item) in self.spawn_items.iter().enumerate() {
            if item.prefabs.is_empty() {
                return Err(DefinitionError::MissingPrefab {
                    definition: self.id,
                    item: index,
                });
            }
            if item.min_count > item.max_count {
                return Err(DefinitionError::InvalidCountRange {
                    definition: self.id,
                    item: index,
                    min: item.min_count,
                    max: item.max_count,
                });
            }
            if !item.radius.is_finite() || item.radius < 0.0 {
                return Err(DefinitionError::InvalidRadius {
                    definition: self.id,
                    item: index,
                });
            }
        }

        match self.challenge_type.primary_objective() {
            PrimaryObjective::Eliminate if self.enemy_count() == 0 => {
                Err(DefinitionError::MissingEnemies {
                    definition: self.id,
                    challenge_type: self.challenge_type,
                })
            }
            PrimaryObjective::Rescue if self.civilian_count() == 0 => {
                Err(DefinitionError::MissingCivilians {
                    definition: self.id,
                    challenge_type: self.challenge_type,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Authoring errors detected while validating a definition.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// The definition has no display name.
    #[error("definition {} has an empty name", definition.get())]
    EmptyName {
        /// Offending definition.
        definition: DefinitionId,
    },
    /// A spawn item lists no prefab.
    #[error("definition {}: spawn item {item} has no prefab", definition.get())]
    MissingPrefab {
        /// Offending definition.
        definition: DefinitionId,
        /// Index of the spawn item.
        item: usize,
    },
    /// A spawn item's count range is inverted.
    #[error("definition {}: spawn item {item} has min {min} above max {max}", definition.get())]
    InvalidCountRange {
        /// Offending definition.
        definition: DefinitionId,
        /// Index of the spawn item.
        item: usize,
        /// Authored minimum.
        min: u32,
        /// Authored maximum.
        max: u32,
    },
    /// A spawn item's radius is negative or not finite.
    #[error("definition {}: spawn item {item} has an invalid radius", definition.get())]
    InvalidRadius {
        /// Offending definition.
        definition: DefinitionId,
        /// Index of the spawn item.
        item: usize,
    },
    /// A kill-objective definition spawns no hostiles.
    #[error("definition {} of type {challenge_type:?} spawns no enemies", definition.get())]
    MissingEnemies {
        /// Offending definition.
        definition: DefinitionId,
        /// Type implying a kill objective.
        challenge_type: ChallengeType,
    },
    /// A rescue-objective definition spawns no civilians.
    #[error("definition {} of type {challenge_type:?} spawns no civilians", definition.get())]
    MissingCivilians {
        /// Offending definition.
        definition: DefinitionId,
        /// Type implying a rescue objective.
        challenge_type: ChallengeType,
    },
}

/// Errors raised while assembling a [`DefinitionCatalog`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Two definitions share an identifier.
    #[error("duplicate definition id {}", .0.get())]
    Duplicate(DefinitionId),
    /// A definition failed validation.
    #[error(transparent)]
    Invalid(#[from] DefinitionError),
}

/// Validated, read-only collection of challenge definitions.
#[derive(Clone, Debug, Default)]
pub struct DefinitionCatalog {
    definitions: BTreeMap<DefinitionId, Arc<ChallengeDefinition>>,
}

impl DefinitionCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from the provided definitions, rejecting the first invalid one.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = ChallengeDefinition>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for definition in definitions {
            let _ = catalog.insert(definition)?;
        }
        Ok(catalog)
    }

    /// Validates and inserts a definition.
    pub fn insert(&mut self, definition: ChallengeDefinition) -> Result<DefinitionId, CatalogError> {
        definition.validate()?;
        let id = definition.id;
        if self.definitions.contains_key(&id) {
            return Err(CatalogError::Duplicate(id));
        }
        let _ = self.definitions.insert(id, Arc::new(definition));
        Ok(id)
    }

    /// Looks up a definition by identifier.
    #[must_use]
    pub fn get(&self, id: DefinitionId) -> Option<&Arc<ChallengeDefinition>> {
        self.definitions.get(&id)
    }

    /// Iterator over every definition in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ChallengeDefinition>> {
        self.definitions.values()
    }

    /// Definitions the world may spawn dynamically.
    pub fn world_event_pool(&self) -> impl Iterator<Item = &Arc<ChallengeDefinition>> {
        self.iter()
            .filter(|definition| definition.frequency == Frequency::WorldEvent)
    }

    /// Daily and weekly definitions offered on rotation.
    pub fn rotating(&self) -> impl Iterator<Item = &Arc<ChallengeDefinition>> {
        self.iter()
            .filter(|definition| definition.frequency != Frequency::WorldEvent)
    }

    /// Number of definitions in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Reports whether the catalog holds no definitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Objective targets an instance must reach.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Requirements {
    /// Hostiles that must be killed; zero disables the kill objective.
    pub kills: u32,
    /// Civilians that must be rescued; zero disables the rescue objective.
    pub rescues: u32,
}

impl Requirements {
    /// Creates a new requirement pair.
    #[must_use]
    pub const fn new(kills: u32, rescues: u32) -> Self {
        Self { kills, rescues }
    }

    /// Caps each objective at the number of entities of that kind that registered.
    #[must_use]
    pub fn capped_by(self, tally: &SpawnTally) -> Self {
        Self {
            kills: self.kills.min(tally.hostiles),
            rescues: self.rescues.min(tally.civilians),
        }
    }

    /// Reports whether the tallied entities can still satisfy the objectives
    /// under `rule`.
    ///
    /// An objective is reachable when at least one entity of its kind exists.
    /// Requirements without any objective are always reachable.
    #[must_use]
    pub const fn reachable_with(self, tally: &SpawnTally, rule: CompletionRule) -> bool {
        let kills_reachable = self.kills > 0 && tally.hostiles > 0;
        let rescues_reachable = self.rescues > 0 && tally.civilians > 0;
        if self.kills == 0 && self.rescues == 0 {
            return true;
        }
        match rule {
            CompletionRule::AllObjectives => {
                (self.kills == 0 || kills_reachable) && (self.rescues == 0 || rescues_reachable)
            }
            CompletionRule::AnyObjective => kills_reachable || rescues_reachable,
        }
    }
}

/// Counts of registered entities grouped by objective relevance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SpawnTally {
    /// Registered Enemy and Boss entities.
    pub hostiles: u32,
    /// Registered Civilian entities.
    pub civilians: u32,
    /// Every registered entity.
    pub total: u32,
}

impl SpawnTally {
    /// Records one entity of the provided category.
    pub fn record(&mut self, category: SpawnCategory) {
        self.total = self.total.saturating_add(1);
        if category.is_hostile() {
            self.hostiles = self.hostiles.saturating_add(1);
        } else if category == SpawnCategory::Civilian {
            self.civilians = self.civilians.saturating_add(1);
        }
    }
}

/// Concrete placement of a single unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    /// Index of the spawn item in the definition manifest.
    pub item_index: usize,
    /// Category of the unit.
    pub category: SpawnCategory,
    /// Prefab to materialise.
    pub prefab: PrefabRef,
    /// World-space position.
    pub position: Vec3,
    /// Yaw in degrees within `[0, 360)`.
    pub yaw_degrees: f32,
}

/// Reasons a unit could not be placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpawnFailureReason {
    /// No navigable point was found within the search radius.
    NoNavigablePoint,
    /// The plan placed no unit of a kind an objective depends on.
    ObjectiveUnpopulated,
}

/// Required spawn item that could not be placed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnFailure {
    /// Index of the spawn item in the definition manifest.
    pub item_index: usize,
    /// Category of the item.
    pub category: SpawnCategory,
    /// Specific reason the placement failed.
    pub reason: SpawnFailureReason,
}

/// Output of spawn-manifest resolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedSpawnPlan {
    /// Placements in spawn order.
    pub placements: Vec<Placement>,
    /// Required items that could not be placed.
    pub failures: Vec<SpawnFailure>,
}

impl ResolvedSpawnPlan {
    /// Reports whether every required item was placed.
    #[must_use]
    pub fn is_viable(&self) -> bool {
        self.failures.is_empty()
    }

    /// Tally of the placements grouped by objective relevance.
    #[must_use]
    pub fn tally(&self) -> SpawnTally {
        let mut tally = SpawnTally::default();
        for placement in &self.placements {
            tally.record(placement.category);
        }
        tally
    }
}

/// Lifecycle states of a challenge instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChallengeState {
    /// Created, awaiting population.
    Pending,
    /// Populated and accepting progress.
    Active,
    /// Objectives satisfied; rewards granted.
    Completed,
    /// A failure condition triggered.
    Failed,
    /// The availability window lapsed or the instance was dismissed.
    Expired,
}

impl ChallengeState {
    /// Reports whether the state rejects further progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

/// Conditions that fail an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// A civilian died in a no-deaths challenge.
    CivilianDied,
    /// The player was detected in a stealth challenge.
    Detected,
    /// The time limit elapsed before completion.
    TimeLimitExceeded,
    /// The instance could not be populated.
    SpawnAborted,
}

impl FailureReason {
    /// Reports whether an instance failing for this reason may be retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::SpawnAborted)
    }
}

/// Reasons a spawn request may be rejected by the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpawnRejection {
    /// No definition with the provided identifier exists.
    UnknownDefinition,
    /// No zone with the provided identifier exists.
    UnknownZone,
    /// The zone already hosts a live instance.
    ZoneOccupied,
    /// The maximum number of concurrent world events is live.
    WorldEventCapacity,
    /// The player is below the definition's required level.
    LevelTooLow,
}

/// Progress counters of an instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ProgressSnapshot {
    /// Hostiles killed so far.
    pub enemies_killed: u32,
    /// Hostiles required by the kill objective.
    pub required_kills: u32,
    /// Civilians rescued so far.
    pub civilians_rescued: u32,
    /// Civilians required by the rescue objective.
    pub required_rescues: u32,
    /// Civilians that died.
    pub civilians_died: u32,
    /// Indicates whether the player was detected.
    pub detected: bool,
}

/// Performance of the player inside a completed instance, used for bonuses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChallengePerformance {
    /// Number of player-damage reports received while active.
    pub damage_events: u32,
    /// Indicates whether the player was detected.
    pub detected: bool,
    /// Civilians that died.
    pub civilians_died: u32,
    /// Time between activation and completion.
    pub clear_time: Duration,
}

/// Rewards computed for a completed instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RewardGrant {
    /// Authored manifest of the definition, unmodified.
    pub base: RewardManifest,
    /// Experience to grant after bonuses and scaling.
    pub xp: u32,
    /// Currency to grant after bonuses and scaling.
    pub currency: u32,
    /// Guaranteed loot.
    pub loot: Option<LootGrant>,
    /// Bonus conditions that were satisfied.
    pub bonuses: Vec<BonusCondition>,
    /// Combined difficulty and level multiplier applied to the totals.
    pub multiplier: f32,
}

/// Zone layout supplied by the host engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneDescriptor {
    /// Identifier of the zone.
    pub id: ZoneId,
    /// Centre of the zone, used as the encounter centre.
    pub center: Vec3,
    /// Radius of the zone in world units.
    pub radius: f32,
    /// Pre-authored spawn points inside the zone.
    #[serde(default)]
    pub spawn_points: Vec<Vec3>,
}

/// Immutable representation of a zone used for queries.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneSnapshot {
    /// Identifier of the zone.
    pub id: ZoneId,
    /// Centre of the zone.
    pub center: Vec3,
    /// Radius of the zone.
    pub radius: f32,
    /// Pre-authored spawn points inside the zone.
    pub spawn_points: Vec<Vec3>,
    /// Instance currently hosted by the zone, if any.
    pub occupant: Option<InstanceId>,
}

impl ZoneSnapshot {
    /// Reports whether the zone can host a new instance.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.occupant.is_none()
    }
}

/// Immutable representation of a single instance's state used for queries.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceSnapshot {
    /// Identifier allocated by the world.
    pub id: InstanceId,
    /// Definition the instance was created from.
    pub definition: DefinitionId,
    /// Frequency of the definition.
    pub frequency: Frequency,
    /// Zone hosting the instance.
    pub zone: ZoneId,
    /// Centre of the encounter.
    pub position: Vec3,
    /// Current lifecycle state.
    pub state: ChallengeState,
    /// Progress counters.
    pub progress: ProgressSnapshot,
    /// Indicates whether the player discovered the instance.
    pub discovered: bool,
    /// Indicates whether a failed instance may be retried.
    pub retryable: bool,
    /// Creation time.
    pub started_at: Duration,
    /// Expiration time, if bounded.
    pub expires_at: Option<Duration>,
}

impl InstanceSnapshot {
    /// Reports whether the instance still holds its zone.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        match self.state {
            ChallengeState::Pending | ChallengeState::Active => true,
            ChallengeState::Failed => self.retryable,
            ChallengeState::Completed | ChallengeState::Expired => false,
        }
    }
}

/// Read-only snapshot describing every instance in the registry.
#[derive(Clone, Debug, Default)]
pub struct ChallengeView {
    snapshots: Vec<InstanceSnapshot>,
}

impl ChallengeView {
    /// Creates a new view from the provided snapshots.
    #[must_use]
    pub fn from_snapshots(mut snapshots: Vec<InstanceSnapshot>) -> Self {
        snapshots.sort_by_key(|snapshot| snapshot.id);
        Self { snapshots }
    }

    /// Iterator over the captured snapshots in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = &InstanceSnapshot> {
        self.snapshots.iter()
    }

    /// Looks up the snapshot of an instance.
    #[must_use]
    pub fn get(&self, id: InstanceId) -> Option<&InstanceSnapshot> {
        self.snapshots
            .binary_search_by_key(&id, |snapshot| snapshot.id)
            .ok()
            .map(|index| &self.snapshots[index])
    }

    /// Number of live instances with the provided frequency.
    #[must_use]
    pub fn live_count(&self, frequency: Frequency) -> usize {
        self.iter()
            .filter(|snapshot| snapshot.frequency == frequency && snapshot.is_live())
            .count()
    }

    /// Reports whether a live instance of the definition exists.
    #[must_use]
    pub fn has_live(&self, definition: DefinitionId) -> bool {
        self.iter()
            .any(|snapshot| snapshot.definition == definition && snapshot.is_live())
    }

    /// Consumes the view, yielding the underlying snapshots.
    #[must_use]
    pub fn into_vec(self) -> Vec<InstanceSnapshot> {
        self.snapshots
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|seconds| Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom))
            .transpose()
    }
}
