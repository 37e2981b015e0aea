//! Slot-keyed device collections

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute map of a single slot
pub type Attributes = BTreeMap<String, Value>;

/// One sub-resource of a guest (a disk, a NIC, a mount point)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSlot {
    /// Slot id, unique within its collection (e.g. the `0` of `virtio0`)
    pub id: u32,
    /// Attributes of the slot
    pub attributes: Attributes,
}

impl DeviceSlot {
    pub fn new(id: u32, attributes: Attributes) -> Self {
        Self { id, attributes }
    }

    /// Get an attribute
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Set an attribute, returning self for chaining
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A collection of slots keyed by slot id
///
/// Ordering is by slot id; the order carries no meaning beyond making
/// comparisons and output deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceCollection {
    slots: BTreeMap<u32, Attributes>,
}

impl DeviceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the attributes of a slot
    pub fn insert(&mut self, id: u32, attributes: Attributes) -> Option<Attributes> {
        self.slots.insert(id, attributes)
    }

    /// Insert a slot
    pub fn insert_slot(&mut self, slot: DeviceSlot) -> Option<Attributes> {
        self.slots.insert(slot.id, slot.attributes)
    }

    pub fn get(&self, id: u32) -> Option<&Attributes> {
        self.slots.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Attributes> {
        self.slots.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<Attributes> {
        self.slots.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.keys().copied()
    }

    /// Iterate over `(slot id, attributes)` in ascending slot order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Attributes)> {
        self.slots.iter().map(|(id, attrs)| (*id, attrs))
    }

    /// Clone every slot out as a [`DeviceSlot`]
    pub fn to_slots(&self) -> Vec<DeviceSlot> {
        self.iter()
            .map(|(id, attrs)| DeviceSlot::new(id, attrs.clone()))
            .collect()
    }
}

impl FromIterator<DeviceSlot> for DeviceCollection {
    fn from_iter<T: IntoIterator<Item = DeviceSlot>>(iter: T) -> Self {
        let mut collection = Self::new();
        for slot in iter {
            collection.insert_slot(slot);
        }
        collection
    }
}

impl<'a> IntoIterator for &'a DeviceCollection {
    type Item = (&'a u32, &'a Attributes);
    type IntoIter = std::collections::btree_map::Iter<'a, u32, Attributes>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.iter()
    }
}
