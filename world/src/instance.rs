//! State machine of a single challenge instance.

use std::{sync::Arc, time::Duration};

use challenge_core::{
    Capabilities, ChallengeDefinition, ChallengePerformance, ChallengeState, CompletionRule,
    FailureReason, Frequency, InstanceId, ProgressSnapshot, Requirements, SpawnCategory,
    SpawnTally, Vec3, ZoneId,
};

/// Terminal transition produced by an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Every objective was satisfied.
    Completed,
    /// A failure condition triggered.
    Failed(FailureReason),
    /// The availability window lapsed or the instance was dismissed.
    Expired,
}

/// Controls how the availability window behaves when a failed instance is retried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryTimerPolicy {
    /// The retried instance keeps its original start and expiration times.
    #[default]
    KeepOriginal,
    /// The retried instance restarts its availability window at retry time.
    ResetExpiration,
}

/// Live encounter created from a [`ChallengeDefinition`].
///
/// Progress methods are no-ops unless the instance is Active, and at most one
/// terminal [`Transition`] is ever returned between retries.
#[derive(Clone, Debug)]
pub struct ChallengeInstance {
    id: InstanceId,
    definition: Arc<ChallengeDefinition>,
    zone: ZoneId,
    position: Vec3,
    state: ChallengeState,
    requirements: Requirements,
    hostile_pool: u32,
    civilian_pool: u32,
    enemies_killed: u32,
    civilians_rescued: u32,
    civilians_died: u32,
    was_detected: bool,
    damage_events: u32,
    discovered: bool,
    started_at: Duration,
    expires_at: Option<Duration>,
    activated_at: Option<Duration>,
    terminal_at: Option<Duration>,
    failure: Option<FailureReason>,
}

impl ChallengeInstance {
    /// Creates a Pending instance whose availability window starts at `now`.
    #[must_use]
    pub fn new(
        id: InstanceId,
        definition: Arc<ChallengeDefinition>,
        zone: ZoneId,
        position: Vec3,
        now: Duration,
    ) -> Self {
        let expires_at = expiration(definition.frequency, now);
        Self {
            id,
            definition,
            zone,
            position,
            state: ChallengeState::Pending,
            requirements: Requirements::default(),
            hostile_pool: 0,
            civilian_pool: 0,
            enemies_killed: 0,
            civilians_rescued: 0,
            civilians_died: 0,
            was_detected: false,
            damage_events: 0,
            discovered: false,
            started_at: now,
            expires_at,
            activated_at: None,
            terminal_at: None,
            failure: None,
        }
    }

    /// Identifier allocated by the world.
    #[must_use]
    pub const fn id(&self) -> InstanceId {
        self.id
    }

    /// Definition the instance was created from.
    #[must_use]
    pub fn definition(&self) -> &Arc<ChallengeDefinition> {
        &self.definition
    }

    /// Zone hosting the instance.
    #[must_use]
    pub const fn zone(&self) -> ZoneId {
        self.zone
    }

    /// Centre of the encounter.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ChallengeState {
        self.state
    }

    /// Objective targets fixed at activation.
    #[must_use]
    pub const fn requirements(&self) -> Requirements {
        self.requirements
    }

    /// Reason of the most recent failure, if the instance is Failed.
    #[must_use]
    pub const fn failure(&self) -> Option<FailureReason> {
        self.failure
    }

    /// Indicates whether the player discovered the instance.
    #[must_use]
    pub const fn is_discovered(&self) -> bool {
        self.discovered
    }

    /// Start of the availability window.
    #[must_use]
    pub const fn started_at(&self) -> Duration {
        self.started_at
    }

    /// End of the availability window, if bounded.
    #[must_use]
    pub const fn expires_at(&self) -> Option<Duration> {
        self.expires_at
    }

    /// Time the instance reached its current terminal state.
    #[must_use]
    pub const fn terminal_at(&self) -> Option<Duration> {
        self.terminal_at
    }

    /// Progress counters.
    #[must_use]
    pub const fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            enemies_killed: self.enemies_killed,
            required_kills: self.requirements.kills,
            civilians_rescued: self.civilians_rescued,
            required_rescues: self.requirements.rescues,
            civilians_died: self.civilians_died,
            detected: self.was_detected,
        }
    }

    /// Performance used for bonus evaluation.
    ///
    /// `clear_time` spans activation to the terminal transition, or zero if
    /// either is missing.
    #[must_use]
    pub fn performance(&self) -> ChallengePerformance {
        let clear_time = match (self.activated_at, self.terminal_at) {
            (Some(activated), Some(terminal)) => terminal.saturating_sub(activated),
            _ => Duration::ZERO,
        };
        ChallengePerformance {
            damage_events: self.damage_events,
            detected: self.was_detected,
            civilians_died: self.civilians_died,
            clear_time,
        }
    }

    /// Moves a Pending instance to Active and fixes its requirements.
    ///
    /// Returns `false` when the instance was not Pending.
    pub fn activate(&mut self, now: Duration, tally: &SpawnTally) -> bool {
        if self.state != ChallengeState::Pending {
            return false;
        }
        self.requirements = self.definition.requirements().capped_by(tally);
        self.hostile_pool = tally.hostiles;
        self.civilian_pool = tally.civilians;
        self.state = ChallengeState::Active;
        self.activated_at = Some(now);
        true
    }

    /// Records a hostile kill.
    pub fn on_enemy_killed(&mut self, now: Duration) -> Option<Transition> {
        if self.state != ChallengeState::Active {
            return None;
        }
        self.enemies_killed = self.enemies_killed.saturating_add(1);
        self.evaluate(now)
    }

    /// Records a civilian rescue.
    pub fn on_civilian_rescued(&mut self, now: Duration) -> Option<Transition> {
        if self.state != ChallengeState::Active {
            return None;
        }
        self.civilians_rescued = self.civilians_rescued.saturating_add(1);
        self.evaluate(now)
    }

    /// Records a civilian death.
    ///
    /// Fails immediately for no-deaths challenges, and otherwise once the
    /// surviving civilians can no longer satisfy the remaining objectives.
    pub fn on_civilian_died(&mut self, now: Duration) -> Option<Transition> {
        if self.state != ChallengeState::Active {
            return None;
        }
        self.civilians_died = self.civilians_died.saturating_add(1);
        if self.definition.require_no_deaths {
            return Some(self.fail(now, FailureReason::CivilianDied));
        }
        if self.rescue_unreachable() && !self.alternative_remains() {
            return Some(self.fail(now, FailureReason::CivilianDied));
        }
        None
    }

    /// Records that an entity left the world without a fate of its own.
    ///
    /// The matching objective is lowered to what the remaining entities can
    /// still reach. An instance left with no objective at all expires.
    pub fn on_entity_withdrawn(
        &mut self,
        now: Duration,
        category: SpawnCategory,
    ) -> Option<Transition> {
        if self.state != ChallengeState::Active {
            return None;
        }
        let capabilities = category.capabilities();
        if capabilities.contains(Capabilities::HOSTILE) {
            self.hostile_pool = self.hostile_pool.saturating_sub(1);
            self.requirements.kills = self.requirements.kills.min(self.hostile_pool);
        } else if capabilities.contains(Capabilities::RESCUABLE) {
            self.civilian_pool = self.civilian_pool.saturating_sub(1);
            let reachable = self.civilian_pool.saturating_sub(self.civilians_died);
            self.requirements.rescues = self.requirements.rescues.min(reachable);
        } else {
            return None;
        }
        if self.requirements == Requirements::default() {
            return Some(self.expire(now));
        }
        self.evaluate(now)
    }

    /// Records that the player was detected.
    pub fn on_player_detected(&mut self, now: Duration) -> Option<Transition> {
        if self.state != ChallengeState::Active {
            return None;
        }
        self.was_detected = true;
        if self.definition.require_stealth {
            return Some(self.fail(now, FailureReason::Detected));
        }
        None
    }

    /// Records that the player took damage.
    pub fn on_player_damaged(&mut self) {
        if self.state == ChallengeState::Active {
            self.damage_events = self.damage_events.saturating_add(1);
        }
    }

    /// Applies time limit and expiration checks.
    pub fn check_time(&mut self, now: Duration) -> Option<Transition> {
        if self.state.is_terminal() {
            return None;
        }
        if let (ChallengeState::Active, Some(limit), Some(activated)) =
            (self.state, self.definition.time_limit, self.activated_at)
        {
            if now.saturating_sub(activated) > limit {
                return Some(self.fail(now, FailureReason::TimeLimitExceeded));
            }
        }
        match self.expires_at {
            Some(expires_at) if now > expires_at => Some(self.expire(now)),
            _ => None,
        }
    }

    /// Expires a non-terminal instance on behalf of an external collaborator.
    pub fn dismiss(&mut self, now: Duration) -> Option<Transition> {
        if self.state.is_terminal() {
            return None;
        }
        Some(self.expire(now))
    }

    /// Fails a Pending instance that could not be populated.
    pub fn abort(&mut self, now: Duration) -> Option<Transition> {
        if self.state != ChallengeState::Pending {
            return None;
        }
        Some(self.fail(now, FailureReason::SpawnAborted))
    }

    /// Marks the instance as discovered. Returns `false` if it already was.
    pub fn mark_discovered(&mut self) -> bool {
        if self.discovered {
            return false;
        }
        self.discovered = true;
        true
    }

    /// Clears the discovered flag so the player can rediscover the instance.
    pub fn forget_discovery(&mut self) {
        self.discovered = false;
    }

    /// Returns a Failed instance to Pending with zeroed counters.
    ///
    /// Returns `false` when the instance was not Failed.
    pub fn reset_for_retry(&mut self, now: Duration, policy: RetryTimerPolicy) -> bool {
        if self.state != ChallengeState::Failed {
            return false;
        }
        self.state = ChallengeState::Pending;
        self.requirements = Requirements::default();
        self.hostile_pool = 0;
        self.civilian_pool = 0;
        self.enemies_killed = 0;
        self.civilians_rescued = 0;
        self.civilians_died = 0;
        self.was_detected = false;
        self.damage_events = 0;
        self.activated_at = None;
        self.terminal_at = None;
        self.failure = None;
        if policy == RetryTimerPolicy::ResetExpiration {
            self.started_at = now;
            self.expires_at = expiration(self.definition.frequency, now);
        }
        true
    }

    fn evaluate(&mut self, now: Duration) -> Option<Transition> {
        if !self.objectives_met() {
            return None;
        }
        let definition = &self.definition;
        let deaths_ok = !definition.require_no_deaths || self.civilians_died == 0;
        let stealth_ok = !definition.require_stealth || !self.was_detected;
        if !(deaths_ok && stealth_ok) {
            return None;
        }
        self.state = ChallengeState::Completed;
        self.terminal_at = Some(now);
        Some(Transition::Completed)
    }

    fn objectives_met(&self) -> bool {
        let kills = self.requirements.kills;
        let rescues = self.requirements.rescues;
        let kill_ok = kills == 0 || self.enemies_killed >= kills;
        let rescue_ok = rescues == 0 || self.civilians_rescued >= rescues;
        match self.definition.completion_rule {
            CompletionRule::AllObjectives => kill_ok && rescue_ok,
            CompletionRule::AnyObjective => {
                (kills > 0 && kill_ok) || (rescues > 0 && rescue_ok) || (kills == 0 && rescues == 0)
            }
        }
    }

    fn rescue_unreachable(&self) -> bool {
        let rescues = self.requirements.rescues;
        if rescues == 0 {
            return false;
        }
        let remaining = self
            .civilian_pool
            .saturating_sub(self.civilians_rescued)
            .saturating_sub(self.civilians_died);
        self.civilians_rescued.saturating_add(remaining) < rescues
    }

    fn alternative_remains(&self) -> bool {
        self.definition.completion_rule == CompletionRule::AnyObjective
            && self.requirements.kills > 0
    }

    fn fail(&mut self, now: Duration, reason: FailureReason) -> Transition {
        self.state = ChallengeState::Failed;
        self.failure = Some(reason);
        self.terminal_at = Some(now);
        Transition::Failed(reason)
    }

    fn expire(&mut self, now: Duration) -> Transition {
        self.state = ChallengeState::Expired;
        self.terminal_at = Some(now);
        Transition::Expired
    }
}

fn expiration(frequency: Frequency, now: Duration) -> Option<Duration> {
    frequency.lifetime().map(|lifetime| now.saturating_add(lifetime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use challenge_core::{ChallengeType, DefinitionId, PrefabRef, SpawnCategory, SpawnItem, DAY};

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    fn raid(enemies: u32) -> ChallengeDefinition {
        let mut definition =
            ChallengeDefinition::new(DefinitionId::new(1), "Camp", ChallengeType::ControlPoint);
        definition.spawn_items = vec![SpawnItem::new(
            SpawnCategory::Enemy,
            PrefabRef::new("bandit"),
            enemies,
            enemies,
        )];
        definition
    }

    fn rescue(civilians: u32, enemies: u32) -> ChallengeDefinition {
        let mut definition =
            ChallengeDefinition::new(DefinitionId::new(2), "Hostages", ChallengeType::HostageRescue);
        definition.spawn_items = vec![
            SpawnItem::new(
                SpawnCategory::Civilian,
                PrefabRef::new("hostage"),
                civilians,
                civilians,
            ),
            SpawnItem::new(SpawnCategory::Enemy, PrefabRef::new("guard"), enemies, enemies),
        ];
        definition
    }

    fn active(definition: ChallengeDefinition) -> ChallengeInstance {
        let mut instance = ChallengeInstance::new(
            InstanceId::new(1),
            Arc::new(definition),
            ZoneId::new(1),
            Vec3::ZERO,
            Duration::ZERO,
        );
        let requirements = instance.definition().requirements();
        assert!(instance.activate(secs(1), &tally(requirements.kills, requirements.rescues)));
        instance
    }

    fn tally(hostiles: u32, civilians: u32) -> SpawnTally {
        SpawnTally {
            hostiles,
            civilians,
            total: hostiles + civilians,
        }
    }

    #[test]
    fn progress_is_ignored_while_pending() {
        let mut instance = ChallengeInstance::new(
            InstanceId::new(1),
            Arc::new(raid(2)),
            ZoneId::new(1),
            Vec3::ZERO,
            Duration::ZERO,
        );
        assert_eq!(instance.on_enemy_killed(secs(1)), None);
        assert_eq!(instance.progress().enemies_killed, 0);
        assert_eq!(instance.state(), ChallengeState::Pending);
    }

    #[test]
    fn kills_complete_an_elimination_challenge() {
        let mut instance = active(raid(3));
        assert_eq!(instance.on_enemy_killed(secs(2)), None);
        assert_eq!(instance.on_enemy_killed(secs(3)), None);
        assert_eq!(instance.on_enemy_killed(secs(4)), Some(Transition::Completed));
        assert_eq!(instance.state(), ChallengeState::Completed);
        assert_eq!(instance.performance().clear_time, secs(3));
    }

    #[test]
    fn terminal_instances_reject_progress() {
        let mut instance = active(raid(1));
        assert_eq!(instance.on_enemy_killed(secs(2)), Some(Transition::Completed));
        assert_eq!(instance.on_enemy_killed(secs(3)), None);
        assert_eq!(instance.dismiss(secs(3)), None);
        assert_eq!(instance.check_time(DAY * 30), None);
        assert_eq!(instance.progress().enemies_killed, 1);
    }

    #[test]
    fn civilian_death_fails_no_deaths_challenge_even_when_kills_done() {
        let mut definition = raid(2);
        definition.spawn_items.push(SpawnItem::new(
            SpawnCategory::Civilian,
            PrefabRef::new("villager"),
            2,
            2,
        ));
        definition.require_no_deaths = true;
        definition.completion_rule = CompletionRule::AllObjectives;
        let mut instance = active(definition);
        assert_eq!(instance.on_enemy_killed(secs(2)), None);
        assert_eq!(
            instance.on_civilian_died(secs(3)),
            Some(Transition::Failed(FailureReason::CivilianDied))
        );
        assert_eq!(instance.on_enemy_killed(secs(4)), None);
    }

    #[test]
    fn detection_fails_stealth_challenge_and_freezes_counters() {
        let mut definition = raid(5);
        definition.require_stealth = true;
        let mut instance = active(definition);
        let _ = instance.on_enemy_killed(secs(2));
        let _ = instance.on_enemy_killed(secs(3));
        assert_eq!(
            instance.on_player_detected(secs(4)),
            Some(Transition::Failed(FailureReason::Detected))
        );
        assert_eq!(instance.on_enemy_killed(secs(5)), None);
        assert_eq!(instance.progress().enemies_killed, 2);
    }

    #[test]
    fn detection_without_stealth_is_only_recorded() {
        let mut instance = active(raid(2));
        assert_eq!(instance.on_player_detected(secs(2)), None);
        assert!(instance.progress().detected);
        assert_eq!(instance.state(), ChallengeState::Active);
    }

    #[test]
    fn world_events_never_expire_by_time() {
        let mut instance = active(raid(2));
        assert_eq!(instance.expires_at(), None);
        assert_eq!(instance.check_time(DAY * 365), None);
        assert_eq!(instance.state(), ChallengeState::Active);
    }

    #[test]
    fn daily_instances_expire_after_one_day() {
        let mut definition = raid(2);
        definition.frequency = Frequency::Daily;
        let mut instance = active(definition);
        assert_eq!(instance.check_time(DAY), None);
        assert_eq!(
            instance.check_time(DAY + Duration::from_millis(1)),
            Some(Transition::Expired)
        );
    }

    #[test]
    fn time_limit_fails_active_instance() {
        let mut definition = raid(2);
        definition.time_limit = Some(secs(30));
        let mut instance = active(definition);
        assert_eq!(instance.check_time(secs(31)), None);
        assert_eq!(
            instance.check_time(secs(32)),
            Some(Transition::Failed(FailureReason::TimeLimitExceeded))
        );
    }

    #[test]
    fn requirements_are_capped_by_registered_entities() {
        let mut instance = ChallengeInstance::new(
            InstanceId::new(4),
            Arc::new(raid(6)),
            ZoneId::new(1),
            Vec3::ZERO,
            Duration::ZERO,
        );
        assert!(instance.activate(secs(1), &tally(4, 0)));
        assert_eq!(instance.requirements(), Requirements::new(4, 0));
        assert!(!instance.activate(secs(2), &tally(6, 0)));
    }

    #[test]
    fn rescue_challenge_needs_both_objectives_by_default() {
        let mut instance = active(rescue(2, 1));
        assert_eq!(instance.on_civilian_rescued(secs(2)), None);
        assert_eq!(instance.on_civilian_rescued(secs(3)), None);
        assert_eq!(instance.on_enemy_killed(secs(4)), Some(Transition::Completed));
    }

    #[test]
    fn any_objective_rule_completes_on_first_met_objective() {
        let mut definition = rescue(2, 3);
        definition.completion_rule = CompletionRule::AnyObjective;
        let mut instance = active(definition);
        assert_eq!(instance.on_civilian_rescued(secs(2)), None);
        assert_eq!(instance.on_civilian_rescued(secs(3)), Some(Transition::Completed));
    }

    #[test]
    fn losing_too_many_civilians_fails_the_rescue() {
        let mut instance = ChallengeInstance::new(
            InstanceId::new(1),
            Arc::new(rescue(2, 1)),
            ZoneId::new(1),
            Vec3::ZERO,
            Duration::ZERO,
        );
        assert!(instance.activate(secs(1), &tally(1, 2)));
        assert_eq!(
            instance.on_civilian_died(secs(2)),
            Some(Transition::Failed(FailureReason::CivilianDied))
        );
    }

    #[test]
    fn retry_zeroes_counters_and_keeps_window_by_default() {
        let mut definition = raid(3);
        definition.frequency = Frequency::Daily;
        definition.require_stealth = true;
        let mut instance = active(definition);
        let _ = instance.on_enemy_killed(secs(2));
        let _ = instance.on_player_detected(secs(3));

        assert!(instance.reset_for_retry(secs(100), RetryTimerPolicy::KeepOriginal));
        assert_eq!(instance.state(), ChallengeState::Pending);
        assert_eq!(instance.progress(), ProgressSnapshot::default());
        assert_eq!(instance.failure(), None);
        assert_eq!(instance.started_at(), Duration::ZERO);
        assert_eq!(instance.expires_at(), Some(DAY));
        assert!(!instance.reset_for_retry(secs(101), RetryTimerPolicy::KeepOriginal));
    }

    #[test]
    fn retry_can_restart_the_window() {
        let mut definition = raid(1);
        definition.frequency = Frequency::Weekly;
        definition.require_stealth = true;
        let mut instance = active(definition);
        let _ = instance.on_player_detected(secs(3));
        assert!(instance.reset_for_retry(secs(100), RetryTimerPolicy::ResetExpiration));
        assert_eq!(instance.started_at(), secs(100));
        assert_eq!(instance.expires_at(), Some(secs(100) + challenge_core::WEEK));
    }

    #[test]
    fn withdrawn_hostiles_lower_the_kill_target() {
        let mut instance = active(raid(3));
        assert_eq!(
            instance.on_entity_withdrawn(secs(2), SpawnCategory::Enemy),
            None
        );
        assert_eq!(instance.requirements(), Requirements::new(2, 0));
        assert_eq!(instance.on_enemy_killed(secs(3)), None);
        assert_eq!(instance.on_enemy_killed(secs(4)), Some(Transition::Completed));
    }

    #[test]
    fn withdrawal_after_progress_can_complete_immediately() {
        let mut instance = active(raid(3));
        let _ = instance.on_enemy_killed(secs(2));
        let _ = instance.on_enemy_killed(secs(3));
        assert_eq!(
            instance.on_entity_withdrawn(secs(4), SpawnCategory::Boss),
            Some(Transition::Completed)
        );
    }

    #[test]
    fn instance_without_remaining_objectives_expires() {
        let mut instance = active(raid(1));
        assert_eq!(
            instance.on_entity_withdrawn(secs(2), SpawnCategory::Prop),
            None
        );
        assert_eq!(
            instance.on_entity_withdrawn(secs(3), SpawnCategory::Enemy),
            Some(Transition::Expired)
        );
        assert_eq!(instance.state(), ChallengeState::Expired);
    }

    #[test]
    fn withdrawn_civilians_lower_the_rescue_target() {
        let mut instance = active(rescue(2, 0));
        assert_eq!(
            instance.on_entity_withdrawn(secs(2), SpawnCategory::Civilian),
            None
        );
        assert_eq!(instance.requirements().rescues, 1);
        assert_eq!(instance.on_civilian_rescued(secs(3)), Some(Transition::Completed));
    }

    #[test]
    fn damage_is_counted_only_while_active() {
        let mut instance = active(raid(1));
        instance.on_player_damaged();
        instance.on_player_damaged();
        let _ = instance.on_enemy_killed(secs(5));
        instance.on_player_damaged();
        assert_eq!(instance.performance().damage_events, 2);
    }
}
