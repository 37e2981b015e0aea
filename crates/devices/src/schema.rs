//! Recognized attributes of a device collection
//!
//! A schema lists every attribute a collection kind knows about, its value
//! kind and its default. It fills defaults into declared slots before a merge
//! and lets slots the caller never declared (an import) be surfaced without
//! leaking attributes outside the schema.

use crate::collection::{Attributes, DeviceCollection};
use crate::error::{Error, Result};
use crate::merge::merge;
use crate::value::{Value, ValueKind};

/// One recognized attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub kind: ValueKind,
    pub default: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Str)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Int)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Bool)
    }

    /// Set the default used when neither side supplies the attribute
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Schema of one device collection kind (e.g. QEMU disks)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSchema {
    name: String,
    fields: Vec<Field>,
}

impl DeviceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Collection name, e.g. `disk` or `net`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Restrict declared slots to the schema, fill defaults and check kinds.
    ///
    /// A declared `0`/`1` for a boolean field is accepted and converted;
    /// any other kind mismatch is an error.
    pub fn normalize(&self, declared: &DeviceCollection) -> Result<DeviceCollection> {
        let mut normalized = DeviceCollection::new();

        for (id, attrs) in declared.iter() {
            let mut slot = Attributes::new();
            for field in &self.fields {
                match attrs.get(&field.name) {
                    Some(value) => {
                        let value =
                            value
                                .coerce_to(field.kind)
                                .ok_or_else(|| Error::KindMismatch {
                                    slot: id,
                                    key: field.name.clone(),
                                    expected: field.kind,
                                    found: value.kind(),
                                })?;
                        slot.insert(field.name.clone(), value);
                    }
                    None => {
                        if let Some(default) = &field.default {
                            slot.insert(field.name.clone(), default.clone());
                        }
                    }
                }
            }
            normalized.insert(id, slot);
        }

        Ok(normalized)
    }

    /// Project a live slot onto the schema.
    ///
    /// Unknown keys are dropped, values are coerced to the field kind where a
    /// canonical conversion exists (values that cannot be read as the field
    /// kind are dropped), and missing fields take their default.
    pub fn project(&self, live: &Attributes) -> Attributes {
        let mut slot = Attributes::new();
        for field in &self.fields {
            let value = live
                .get(&field.name)
                .and_then(|v| v.coerce_to(field.kind))
                .or_else(|| field.default.clone());
            if let Some(value) = value {
                slot.insert(field.name.clone(), value);
            }
        }
        slot
    }

    /// Merge declared and live collections under this schema.
    ///
    /// Declared slots are normalized and merged with [`merge`]. Slots only
    /// present on the live side are surfaced through [`Self::project`] so an
    /// imported guest shows its real devices.
    pub fn merge(
        &self,
        declared: &DeviceCollection,
        live: &DeviceCollection,
    ) -> Result<DeviceCollection> {
        let declared = self.normalize(declared)?;
        let mut merged = merge(&declared, live);

        for (id, remote) in live.iter() {
            if !merged.contains(id) {
                merged.insert(id, self.project(remote));
            }
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::DeviceSlot;

    fn mp_schema() -> DeviceSchema {
        DeviceSchema::new("mp")
            .field(Field::string("volume"))
            .field(Field::string("mp"))
            .field(Field::bool("acl"))
            .field(Field::bool("ro").default(false))
            .field(Field::string("size"))
    }

    #[test]
    fn test_normalize_fills_defaults_and_drops_unknown() {
        let declared: DeviceCollection = vec![
            DeviceSlot::new(0, Attributes::new())
                .with("volume", "local:8")
                .with("bogus", "x"),
        ]
        .into_iter()
        .collect();

        let normalized = mp_schema().normalize(&declared).unwrap();
        let attrs = normalized.get(0).unwrap();

        assert_eq!(attrs["ro"], Value::Bool(false));
        assert!(!attrs.contains_key("bogus"));
        assert!(!attrs.contains_key("acl"));
    }

    #[test]
    fn test_normalize_rejects_kind_mismatch() {
        let declared: DeviceCollection =
            std::iter::once(DeviceSlot::new(1, Attributes::new()).with("ro", "yes")).collect();

        let err = mp_schema().normalize(&declared).unwrap_err();
        assert_eq!(
            err,
            Error::KindMismatch {
                slot: 1,
                key: "ro".to_string(),
                expected: ValueKind::Bool,
                found: ValueKind::Str,
            }
        );
    }

    #[test]
    fn test_normalize_accepts_boolean_integers() {
        let declared: DeviceCollection =
            std::iter::once(DeviceSlot::new(0, Attributes::new()).with("acl", 1i64)).collect();

        let normalized = mp_schema().normalize(&declared).unwrap();
        assert_eq!(normalized.get(0).unwrap()["acl"], Value::Bool(true));
    }

    #[test]
    fn test_schema_merge_surfaces_live_only_slots() {
        let live: DeviceCollection = vec![
            DeviceSlot::new(4, Attributes::new())
                .with("volume", "local:4")
                .with("acl", 1i64)
                .with("unknown", "x"),
        ]
        .into_iter()
        .collect();

        let merged = mp_schema().merge(&DeviceCollection::new(), &live).unwrap();
        let attrs = merged.get(4).unwrap();

        assert_eq!(attrs["acl"], Value::Bool(true));
        assert_eq!(attrs["ro"], Value::Bool(false));
        assert!(!attrs.contains_key("unknown"));
    }

    #[test]
    fn test_schema_merge_is_idempotent() {
        let declared: DeviceCollection = vec![
            DeviceSlot::new(0, Attributes::new())
                .with("volume", "local:8")
                .with("acl", false),
            DeviceSlot::new(2, Attributes::new()).with("size", "10G"),
        ]
        .into_iter()
        .collect();
        let live: DeviceCollection = vec![
            DeviceSlot::new(0, Attributes::new())
                .with("volume", "local:8")
                .with("acl", 1i64)
                .with("ro", 7i64),
            DeviceSlot::new(5, Attributes::new())
                .with("volume", "local:5")
                .with("ro", 5i64),
        ]
        .into_iter()
        .collect();

        let schema = mp_schema();
        let once = schema.merge(&declared, &live).unwrap();
        let twice = schema.merge(&once, &live).unwrap();

        assert_eq!(once, twice);
    }
}
