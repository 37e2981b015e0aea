//! Merge a declared device collection with the live one
//!
//! The control plane omits attributes that sit at their default value, so an
//! attribute (or a whole slot) missing from the live side means "default",
//! never "deleted". The declared side defines which keys are surfaced.

use crate::collection::{Attributes, DeviceCollection};
use crate::value::{coerce_bool, Value};

/// Merge `declared` with `live`.
///
/// - a slot only in `declared` is kept verbatim
/// - a slot in both takes every declared key, filled from `live` when the
///   plane reported it
/// - keys and slots only in `live` are dropped
///
/// Merging the result again with the same `live` returns it unchanged.
pub fn merge(declared: &DeviceCollection, live: &DeviceCollection) -> DeviceCollection {
    let mut merged = DeviceCollection::new();

    for (id, wanted) in declared.iter() {
        let attributes = match live.get(id) {
            Some(remote) => merge_slot(wanted, remote),
            None => wanted.clone(),
        };
        merged.insert(id, attributes);
    }

    merged
}

/// Merge the attributes of one slot present on both sides
fn merge_slot(declared: &Attributes, live: &Attributes) -> Attributes {
    declared
        .iter()
        .map(|(key, wanted)| {
            let value = match live.get(key) {
                Some(remote) => reconcile_value(wanted, remote),
                None => wanted.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Pick the value to surface for a key both sides know about.
///
/// A declared boolean reported as `0`/`1` is read as a boolean. An integer
/// with no boolean meaning leaves the declared value in place. Any other
/// pairing surfaces the live value.
pub(crate) fn reconcile_value(declared: &Value, live: &Value) -> Value {
    match (declared, live) {
        (Value::Bool(_), Value::Int(i)) => match coerce_bool(*i) {
            Some(b) => Value::Bool(b),
            None => declared.clone(),
        },
        _ => live.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::DeviceSlot;

    fn slot(id: u32, attrs: &[(&str, Value)]) -> DeviceSlot {
        DeviceSlot::new(
            id,
            attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        )
    }

    fn collection(slots: Vec<DeviceSlot>) -> DeviceCollection {
        slots.into_iter().collect()
    }

    #[test]
    fn test_declared_only_slot_survives() {
        let declared = collection(vec![
            slot(0, &[("size", Value::from("4G"))]),
            slot(2, &[("size", Value::from("10G"))]),
        ]);
        let live = collection(vec![slot(0, &[("size", Value::from("4G"))])]);

        let merged = merge(&declared, &live);

        assert_eq!(merged.get(2), declared.get(2));
    }

    #[test]
    fn test_bool_from_int_coercion() {
        let declared = collection(vec![slot(0, &[("acl", Value::Bool(false))])]);
        let live = collection(vec![slot(0, &[("acl", Value::Int(1))])]);

        let merged = merge(&declared, &live);

        assert_eq!(merged.get(0).unwrap()["acl"], Value::Bool(true));
    }

    #[test]
    fn test_non_boolean_integer_keeps_declared() {
        let declared = collection(vec![slot(0, &[("ro", Value::Bool(true))])]);
        let live = collection(vec![slot(0, &[("ro", Value::Int(3))])]);

        let merged = merge(&declared, &live);

        assert_eq!(merged.get(0).unwrap()["ro"], Value::Bool(true));
    }

    #[test]
    fn test_live_value_wins_for_other_kinds() {
        let declared = collection(vec![slot(
            0,
            &[("bridge", Value::from("nat")), ("tag", Value::Int(-1))],
        )]);
        let live = collection(vec![slot(
            0,
            &[("bridge", Value::from("vmbr0")), ("tag", Value::Int(30))],
        )]);

        let merged = merge(&declared, &live);
        let attrs = merged.get(0).unwrap();

        assert_eq!(attrs["bridge"], Value::from("vmbr0"));
        assert_eq!(attrs["tag"], Value::Int(30));
    }

    #[test]
    fn test_missing_live_key_backfilled_from_declared() {
        let declared = collection(vec![slot(
            0,
            &[("model", Value::from("virtio")), ("firewall", Value::Bool(false))],
        )]);
        let live = collection(vec![slot(0, &[("model", Value::from("virtio"))])]);

        let merged = merge(&declared, &live);

        assert_eq!(merged.get(0).unwrap()["firewall"], Value::Bool(false));
    }

    #[test]
    fn test_unknown_live_keys_and_slots_dropped() {
        let declared = collection(vec![slot(0, &[("model", Value::from("virtio"))])]);
        let live = collection(vec![
            slot(
                0,
                &[
                    ("model", Value::from("virtio")),
                    ("macaddr", Value::from("AA:BB:CC:DD:EE:FF")),
                ],
            ),
            slot(1, &[("model", Value::from("e1000"))]),
        ]);

        let merged = merge(&declared, &live);

        assert!(!merged.get(0).unwrap().contains_key("macaddr"));
        assert!(!merged.contains(1));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let declared = collection(vec![
            slot(
                0,
                &[
                    ("acl", Value::Bool(false)),
                    ("ro", Value::Bool(true)),
                    ("size", Value::from("8G")),
                    ("mp", Value::from("/data")),
                ],
            ),
            slot(3, &[("size", Value::from("1G"))]),
        ]);
        let live = collection(vec![slot(
            0,
            &[
                ("acl", Value::Int(1)),
                ("ro", Value::Int(9)),
                ("size", Value::from("16G")),
                ("backup", Value::Int(1)),
            ],
        )]);

        let once = merge(&declared, &live);
        let twice = merge(&once, &live);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_declared_yields_empty() {
        let live = collection(vec![slot(0, &[("size", Value::from("4G"))])]);
        assert!(merge(&DeviceCollection::new(), &live).is_empty());
    }
}
