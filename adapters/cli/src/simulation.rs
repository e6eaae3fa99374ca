//! Headless session driver wiring the world to every system.

use std::{f32::consts::TAU, fmt, time::Duration};

use anyhow::{bail, Result};
use challenge_core::{
    Command, DefinitionCatalog, Event, InstanceId, LootGrant, RewardGrant, Vec3, ZoneDescriptor,
    ZoneId,
};
use challenge_system_difficulty::ScalingRates;
use challenge_system_discovery::Discovery;
use challenge_system_rewards::{GrantError, RewardDistribution, RewardSink};
use challenge_system_scheduler::{self as scheduler, Scheduler};
use challenge_system_spawn_manifest::{self as spawn_manifest, SpawnManifest};
use challenge_world::{self as world, query, World, WorldConfig};
use tracing::{debug, info};

use crate::{
    host::{SimulatedHost, Terrain},
    player::ScriptedPlayer,
};

const MAX_DISPATCH_ROUNDS: usize = 64;
const ZONE_RING_RADIUS: f32 = 150.0;
const ZONE_RADIUS: f32 = 30.0;
const SPAWN_POINTS_PER_ZONE: usize = 6;
const SPAWN_POINT_RADIUS: f32 = 10.0;
const TERRAIN_HALF_EXTENT: f32 = 250.0;
const XP_PER_LEVEL: u64 = 500;

/// Parameters of a simulated session.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SimulationConfig {
    pub(crate) seed: u64,
    pub(crate) duration: Duration,
    pub(crate) tick: Duration,
    pub(crate) player_level: u32,
    pub(crate) spawn_interval: Duration,
    pub(crate) max_world_events: usize,
    pub(crate) zone_count: u32,
}

/// Progression collaborator that banks every grant it receives.
#[derive(Debug, Default)]
pub(crate) struct RewardLedger {
    xp: u64,
    currency: u64,
    loot: Vec<LootGrant>,
}

impl RewardSink for RewardLedger {
    fn grant(&mut self, _instance: InstanceId, rewards: &RewardGrant) -> Result<(), GrantError> {
        let xp = self
            .xp
            .checked_add(u64::from(rewards.xp))
            .ok_or_else(|| GrantError::Rejected("experience overflow".to_owned()))?;
        let currency = self
            .currency
            .checked_add(u64::from(rewards.currency))
            .ok_or_else(|| GrantError::Rejected("currency overflow".to_owned()))?;
        self.xp = xp;
        self.currency = currency;
        if let Some(loot) = rewards.loot {
            self.loot.push(loot);
        }
        Ok(())
    }
}

/// Lifecycle tallies collected over a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SessionReport {
    pub(crate) spawned: u32,
    pub(crate) rejected: u32,
    pub(crate) spawn_failures: u32,
    pub(crate) activated: u32,
    pub(crate) completed: u32,
    pub(crate) failed: u32,
    pub(crate) expired: u32,
    pub(crate) discovered: u32,
    pub(crate) retried: u32,
    pub(crate) removed: u32,
    pub(crate) grants_failed: u32,
    pub(crate) xp: u64,
    pub(crate) currency: u64,
    pub(crate) loot_items: u32,
    pub(crate) final_level: u32,
}

impl SessionReport {
    fn observe(&mut self, events: &[Event]) {
        for event in events {
            match event {
                Event::InstanceSpawning { attempt: 1, .. } => self.spawned += 1,
                Event::SpawnRejected { .. } => self.rejected += 1,
                Event::SpawnAttemptFailed { .. } => self.spawn_failures += 1,
                Event::InstanceActivated { .. } => self.activated += 1,
                Event::InstanceCompleted { .. } => self.completed += 1,
                Event::InstanceFailed { .. } => self.failed += 1,
                Event::InstanceExpired { .. } => self.expired += 1,
                Event::InstanceDiscovered { .. } => self.discovered += 1,
                Event::InstanceRetried { .. } => self.retried += 1,
                Event::InstanceRemoved { .. } => self.removed += 1,
                _ => {}
            }
        }
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "challenges spawned:   {}", self.spawned)?;
        writeln!(f, "spawns rejected:      {}", self.rejected)?;
        writeln!(f, "spawn attempts lost:  {}", self.spawn_failures)?;
        writeln!(f, "activated:            {}", self.activated)?;
        writeln!(f, "completed:            {}", self.completed)?;
        writeln!(f, "failed:               {}", self.failed)?;
        writeln!(f, "expired:              {}", self.expired)?;
        writeln!(f, "discovered:           {}", self.discovered)?;
        writeln!(f, "retried:              {}", self.retried)?;
        writeln!(f, "removed:              {}", self.removed)?;
        writeln!(f, "grants failed:        {}", self.grants_failed)?;
        writeln!(f, "experience earned:    {}", self.xp)?;
        writeln!(f, "currency earned:      {}", self.currency)?;
        writeln!(f, "loot items:           {}", self.loot_items)?;
        write!(f, "final player level:   {}", self.final_level)
    }
}

/// Owns the world, its systems and the scripted collaborators for one session.
#[derive(Debug)]
pub(crate) struct Simulation {
    config: SimulationConfig,
    world: World,
    spawn_manifest: SpawnManifest,
    scheduler: Scheduler,
    discovery: Discovery,
    rewards: RewardDistribution,
    terrain: Terrain,
    host: SimulatedHost,
    player: ScriptedPlayer,
    ledger: RewardLedger,
    report: SessionReport,
}

impl Simulation {
    pub(crate) fn new(catalog: DefinitionCatalog, config: SimulationConfig) -> Self {
        let world_config = WorldConfig {
            max_world_events: config.max_world_events,
            ..WorldConfig::default()
        };
        Self {
            config,
            world: World::new(catalog, world_config),
            spawn_manifest: SpawnManifest::new(spawn_manifest::Config::new(config.seed)),
            scheduler: Scheduler::new(scheduler::Config::new(
                config.spawn_interval,
                config.seed,
                config.max_world_events,
            )),
            discovery: Discovery::new(),
            rewards: RewardDistribution::new(),
            terrain: Terrain::new(TERRAIN_HALF_EXTENT),
            host: SimulatedHost::new(ScalingRates::default()),
            player: ScriptedPlayer::new(config.seed),
            ledger: RewardLedger::default(),
            report: SessionReport::default(),
        }
    }

    /// Runs the session to completion and returns its tallies.
    pub(crate) fn run(mut self) -> Result<SessionReport> {
        if self.config.tick.is_zero() {
            bail!("tick length must be positive");
        }

        info!(
            target: "challenge::sim",
            seed = self.config.seed,
            definitions = query::catalog(&self.world).len(),
            zones = self.config.zone_count,
            "session.started"
        );
        self.dispatch(vec![
            Command::ConfigureZones {
                zones: ring_layout(self.config.zone_count),
            },
            Command::SetPlayerLevel {
                level: self.config.player_level,
            },
        ])?;

        let mut now = Duration::ZERO;
        while now < self.config.duration {
            now = now.saturating_add(self.config.tick);
            self.step(now)?;
        }

        self.report.xp = self.ledger.xp;
        self.report.currency = self.ledger.currency;
        self.report.loot_items = self.ledger.loot.iter().map(|loot| loot.count).sum();
        self.report.final_level = query::player_level(&self.world);
        info!(
            target: "challenge::sim",
            completed = self.report.completed,
            failed = self.report.failed,
            xp = self.report.xp,
            "session.finished"
        );
        Ok(self.report)
    }

    fn step(&mut self, now: Duration) -> Result<()> {
        self.dispatch(vec![Command::Tick { now }])?;

        let view = query::challenge_view(&self.world);
        let mut commands = Vec::new();
        self.player.act(
            self.config.tick,
            query::player_level(&self.world),
            &view,
            &mut self.host,
            &mut commands,
        );
        self.discovery.handle(
            self.player.position(),
            &view,
            query::catalog(&self.world),
            &mut commands,
        );
        self.dispatch(commands)?;

        self.sync_player_level()
    }

    fn sync_player_level(&mut self) -> Result<()> {
        let earned = 1 + self.ledger.xp / XP_PER_LEVEL;
        let level = u32::try_from(earned)
            .unwrap_or(u32::MAX)
            .max(self.config.player_level);
        if level == query::player_level(&self.world) {
            return Ok(());
        }
        debug!(target: "challenge::sim", level, "player.levelled");
        self.dispatch(vec![Command::SetPlayerLevel { level }])
    }

    /// Applies commands and feeds the resulting events through every system
    /// until no system has anything left to say.
    fn dispatch(&mut self, mut commands: Vec<Command>) -> Result<()> {
        for _ in 0..MAX_DISPATCH_ROUNDS {
            if commands.is_empty() {
                return Ok(());
            }

            let mut events = Vec::new();
            for command in commands.drain(..) {
                world::apply(&mut self.world, command, &mut events);
            }
            self.report.observe(&events);

            let distribution = self.rewards.handle(&events, &mut self.ledger);
            self.report.grants_failed += distribution.failed;

            let zones = query::zones(&self.world);
            let view = query::challenge_view(&self.world);
            let catalog = query::catalog(&self.world);
            self.scheduler.handle(
                &events,
                catalog,
                &zones,
                &view,
                query::player_level(&self.world),
                &mut commands,
            );
            self.spawn_manifest
                .handle(&events, catalog, &zones, &self.terrain, &mut commands);
            self.host.handle(
                &events,
                query::player_level(&self.world),
                &mut commands,
            );
        }

        if commands.is_empty() {
            Ok(())
        } else {
            bail!("command dispatch did not settle after {MAX_DISPATCH_ROUNDS} rounds")
        }
    }
}

/// Evenly spaces `count` zones on a ring around the origin.
fn ring_layout(count: u32) -> Vec<ZoneDescriptor> {
    (0..count)
        .map(|index| {
            let angle = index as f32 * TAU / count as f32;
            let center = Vec3::new(angle.cos(), 0.0, angle.sin()) * ZONE_RING_RADIUS;
            let spawn_points = (0..SPAWN_POINTS_PER_ZONE)
                .map(|point| {
                    let theta = point as f32 * TAU / SPAWN_POINTS_PER_ZONE as f32;
                    center + Vec3::new(theta.cos(), 0.0, theta.sin()) * SPAWN_POINT_RADIUS
                })
                .collect();
            ZoneDescriptor {
                id: ZoneId::new(index + 1),
                center,
                radius: ZONE_RADIUS,
                spawn_points,
            }
        })
        .collect()
}
