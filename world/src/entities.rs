//! Ownership of spawned entities and the fate guard that keeps each one
//! from contributing progress more than once.

use std::collections::BTreeMap;

use challenge_core::{Capabilities, EntityHandle, InstanceId, SpawnCategory};

/// Progress an entity fate contributes to its owning instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    HostileKilled(InstanceId),
    CivilianDied(InstanceId),
    CivilianRescued(InstanceId),
    Withdrawn(InstanceId, SpawnCategory),
}

impl Outcome {
    pub(crate) const fn instance(self) -> InstanceId {
        match self {
            Self::HostileKilled(instance)
            | Self::CivilianDied(instance)
            | Self::CivilianRescued(instance)
            | Self::Withdrawn(instance, _) => instance,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct EntityRecord {
    instance: InstanceId,
    category: SpawnCategory,
    settled: bool,
}

/// Ownership map from entity handles to their instances.
///
/// Each entity contributes at most one outcome; later reports are ignored.
#[derive(Debug, Default)]
pub(crate) struct EntityRegistry {
    records: BTreeMap<EntityHandle, EntityRecord>,
}

impl EntityRegistry {
    pub(crate) fn register(
        &mut self,
        entity: EntityHandle,
        instance: InstanceId,
        category: SpawnCategory,
    ) -> bool {
        if self.records.contains_key(&entity) {
            return false;
        }
        let _ = self.records.insert(
            entity,
            EntityRecord {
                instance,
                category,
                settled: false,
            },
        );
        true
    }

    /// Drops the record of `entity`.
    ///
    /// Yields a withdrawal only for unsettled entities that an objective counts.
    pub(crate) fn unregister(&mut self, entity: EntityHandle) -> Option<Outcome> {
        let record = self.records.remove(&entity)?;
        let capabilities = record.category.capabilities();
        let counted = capabilities.intersects(Capabilities::HOSTILE | Capabilities::RESCUABLE);
        (!record.settled && counted).then_some(Outcome::Withdrawn(record.instance, record.category))
    }

    pub(crate) fn owner(&self, entity: EntityHandle) -> Option<InstanceId> {
        self.records.get(&entity).map(|record| record.instance)
    }

    pub(crate) fn record_death(&mut self, entity: EntityHandle) -> Option<Outcome> {
        let record = self.unsettled(entity)?;
        let capabilities = record.category.capabilities();
        let outcome = if capabilities.contains(Capabilities::HOSTILE) {
            Outcome::HostileKilled(record.instance)
        } else if capabilities.contains(Capabilities::RESCUABLE) {
            Outcome::CivilianDied(record.instance)
        } else {
            return None;
        };
        record.settled = true;
        Some(outcome)
    }

    pub(crate) fn record_rescue(&mut self, entity: EntityHandle) -> Option<Outcome> {
        let record = self.unsettled(entity)?;
        if !record.category.capabilities().contains(Capabilities::RESCUABLE) {
            return None;
        }
        record.settled = true;
        Some(Outcome::CivilianRescued(record.instance))
    }

    pub(crate) fn release_instance(&mut self, instance: InstanceId) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.instance != instance);
        before - self.records.len()
    }

    fn unsettled(&mut self, entity: EntityHandle) -> Option<&mut EntityRecord> {
        self.records.get_mut(&entity).filter(|record| !record.settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_entity_settles_once() {
        let mut registry = EntityRegistry::default();
        let entity = EntityHandle::new(9);
        assert!(registry.register(entity, InstanceId::new(1), SpawnCategory::Civilian));
        assert_eq!(
            registry.record_rescue(entity),
            Some(Outcome::CivilianRescued(InstanceId::new(1)))
        );
        assert_eq!(registry.record_death(entity), None);
        assert_eq!(registry.record_rescue(entity), None);
    }

    #[test]
    fn category_decides_what_a_death_counts_as() {
        let mut registry = EntityRegistry::default();
        let instance = InstanceId::new(2);
        assert!(registry.register(EntityHandle::new(1), instance, SpawnCategory::Boss));
        assert!(registry.register(EntityHandle::new(2), instance, SpawnCategory::Civilian));
        assert!(registry.register(EntityHandle::new(3), instance, SpawnCategory::Prop));

        assert_eq!(
            registry.record_death(EntityHandle::new(1)),
            Some(Outcome::HostileKilled(instance))
        );
        assert_eq!(
            registry.record_death(EntityHandle::new(2)),
            Some(Outcome::CivilianDied(instance))
        );
        assert_eq!(registry.record_death(EntityHandle::new(3)), None);
        assert_eq!(registry.record_rescue(EntityHandle::new(3)), None);
    }

    #[test]
    fn duplicate_registration_is_rejected_and_release_clears_owner() {
        let mut registry = EntityRegistry::default();
        let entity = EntityHandle::new(4);
        assert!(registry.register(entity, InstanceId::new(1), SpawnCategory::Enemy));
        assert!(!registry.register(entity, InstanceId::new(2), SpawnCategory::Enemy));
        assert_eq!(registry.owner(entity), Some(InstanceId::new(1)));
        assert_eq!(registry.release_instance(InstanceId::new(1)), 1);
        assert_eq!(registry.owner(entity), None);
        assert_eq!(registry.unregister(entity), None);
    }

    #[test]
    fn only_unsettled_objective_entities_withdraw() {
        let mut registry = EntityRegistry::default();
        let instance = InstanceId::new(3);
        for (handle, category) in [
            (1, SpawnCategory::Enemy),
            (2, SpawnCategory::Enemy),
            (3, SpawnCategory::Cover),
        ] {
            assert!(registry.register(EntityHandle::new(handle), instance, category));
        }
        assert!(registry.record_death(EntityHandle::new(2)).is_some());

        assert_eq!(
            registry.unregister(EntityHandle::new(1)),
            Some(Outcome::Withdrawn(instance, SpawnCategory::Enemy))
        );
        assert_eq!(registry.unregister(EntityHandle::new(2)), None);
        assert_eq!(registry.unregister(EntityHandle::new(3)), None);
        assert_eq!(registry.owner(EntityHandle::new(3)), None);
    }
}
