//! Zone occupancy table. Only the world mutates it.

use std::collections::BTreeMap;

use challenge_core::{InstanceId, ZoneDescriptor, ZoneId, ZoneSnapshot};

#[derive(Clone, Debug)]
struct ZoneEntry {
    descriptor: ZoneDescriptor,
    occupant: Option<InstanceId>,
}

/// Zone-occupancy table owned by the world.
#[derive(Debug, Default)]
pub(crate) struct ZoneTable {
    zones: BTreeMap<ZoneId, ZoneEntry>,
}

impl ZoneTable {
    /// Replaces the layout while keeping occupants of zones that persist.
    pub(crate) fn replace(&mut self, descriptors: Vec<ZoneDescriptor>) -> usize {
        let mut zones = BTreeMap::new();
        for descriptor in descriptors {
            let occupant = self
                .zones
                .get(&descriptor.id)
                .and_then(|entry| entry.occupant);
            let _ = zones.insert(
                descriptor.id,
                ZoneEntry {
                    descriptor,
                    occupant,
                },
            );
        }
        self.zones = zones;
        self.zones.len()
    }

    pub(crate) fn descriptor(&self, zone: ZoneId) -> Option<&ZoneDescriptor> {
        self.zones.get(&zone).map(|entry| &entry.descriptor)
    }

    pub(crate) fn occupant(&self, zone: ZoneId) -> Option<InstanceId> {
        self.zones.get(&zone).and_then(|entry| entry.occupant)
    }

    pub(crate) fn is_free(&self, zone: ZoneId) -> bool {
        self.zones
            .get(&zone)
            .is_some_and(|entry| entry.occupant.is_none())
    }

    pub(crate) fn occupy(&mut self, zone: ZoneId, instance: InstanceId) -> bool {
        match self.zones.get_mut(&zone) {
            Some(entry) if entry.occupant.is_none() => {
                entry.occupant = Some(instance);
                true
            }
            _ => false,
        }
    }

    /// Frees the zone if `instance` holds it.
    pub(crate) fn release(&mut self, zone: ZoneId, instance: InstanceId) -> bool {
        match self.zones.get_mut(&zone) {
            Some(entry) if entry.occupant == Some(instance) => {
                entry.occupant = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn free_zones(&self) -> impl Iterator<Item = ZoneId> + '_ {
        self.zones
            .iter()
            .filter(|(_, entry)| entry.occupant.is_none())
            .map(|(id, _)| *id)
    }

    pub(crate) fn snapshots(&self) -> Vec<ZoneSnapshot> {
        self.zones
            .values()
            .map(|entry| ZoneSnapshot {
                id: entry.descriptor.id,
                center: entry.descriptor.center,
                radius: entry.descriptor.radius,
                spawn_points: entry.descriptor.spawn_points.clone(),
                occupant: entry.occupant,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use challenge_core::Vec3;

    fn zone(id: u32) -> ZoneDescriptor {
        ZoneDescriptor {
            id: ZoneId::new(id),
            center: Vec3::new(id as f32 * 100.0, 0.0, 0.0),
            radius: 25.0,
            spawn_points: Vec::new(),
        }
    }

    #[test]
    fn zone_holds_a_single_occupant() {
        let mut table = ZoneTable::default();
        assert_eq!(table.replace(vec![zone(1), zone(2)]), 2);
        assert!(table.occupy(ZoneId::new(1), InstanceId::new(1)));
        assert!(!table.occupy(ZoneId::new(1), InstanceId::new(2)));
        assert!(!table.release(ZoneId::new(1), InstanceId::new(2)));
        assert_eq!(table.free_zones().collect::<Vec<_>>(), vec![ZoneId::new(2)]);
        assert!(table.release(ZoneId::new(1), InstanceId::new(1)));
        assert!(table.is_free(ZoneId::new(1)));
    }

    #[test]
    fn replacing_layout_keeps_occupancy_of_surviving_zones() {
        let mut table = ZoneTable::default();
        let _ = table.replace(vec![zone(1), zone(2)]);
        assert!(table.occupy(ZoneId::new(2), InstanceId::new(7)));
        let _ = table.replace(vec![zone(2), zone(3)]);
        assert_eq!(table.occupant(ZoneId::new(2)), Some(InstanceId::new(7)));
        assert!(table.descriptor(ZoneId::new(1)).is_none());
        assert!(!table.is_free(ZoneId::new(1)));
    }
}
