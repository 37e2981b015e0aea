//! Conversion between slot-keyed collections and the id-addressed list form
//!
//! The calling engine stores a collection as a list of attribute maps where
//! each element names its own slot in an `id` attribute.

use crate::collection::{Attributes, DeviceCollection};
use crate::error::{Error, Result};
use crate::value::Value;

/// Attribute carrying the slot id in the list form
pub const SLOT_ID_KEY: &str = "id";

/// Flatten a collection into the id-addressed list form, ordered by slot id
pub fn to_keyed_map(collection: &DeviceCollection) -> Vec<Attributes> {
    collection
        .iter()
        .map(|(id, attrs)| {
            let mut element = attrs.clone();
            element.insert(SLOT_ID_KEY.to_string(), Value::Int(i64::from(id)));
            element
        })
        .collect()
}

/// Build a collection from the id-addressed list form.
///
/// Every element must carry a non-negative integer `id`; ids must be unique.
pub fn from_keyed_map(elements: &[Attributes]) -> Result<DeviceCollection> {
    let mut collection = DeviceCollection::new();

    for (index, element) in elements.iter().enumerate() {
        let id = match element.get(SLOT_ID_KEY) {
            None => return Err(Error::MissingSlotId { index }),
            Some(Value::Int(raw)) => u32::try_from(*raw).map_err(|_| Error::InvalidSlotId {
                index,
                value: raw.to_string(),
            })?,
            Some(other) => {
                return Err(Error::InvalidSlotId {
                    index,
                    value: other.to_string(),
                });
            }
        };

        let mut attrs = element.clone();
        attrs.remove(SLOT_ID_KEY);

        if collection.insert(id, attrs).is_some() {
            return Err(Error::DuplicateSlot { id });
        }
    }

    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_keyed_conversion_is_lossless() {
        let elements = vec![
            element(&[
                ("id", Value::Int(0)),
                ("type", Value::from("virtio")),
                ("size", Value::from("10G")),
                ("backup", Value::Bool(false)),
            ]),
            element(&[
                ("id", Value::Int(1)),
                ("type", Value::from("scsi")),
                ("iothread", Value::Bool(true)),
            ]),
        ];

        let collection = from_keyed_map(&elements).unwrap();
        assert!(!collection.get(0).unwrap().contains_key(SLOT_ID_KEY));
        assert_eq!(to_keyed_map(&collection), elements);
    }

    #[test]
    fn test_list_order_does_not_matter() {
        let elements = vec![
            element(&[("id", Value::Int(3)), ("name", Value::from("eth1"))]),
            element(&[("id", Value::Int(0)), ("name", Value::from("eth0"))]),
        ];

        let collection = from_keyed_map(&elements).unwrap();
        assert_eq!(collection.ids().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn test_missing_id_rejected() {
        let elements = vec![element(&[("name", Value::from("eth0"))])];
        assert_eq!(
            from_keyed_map(&elements).unwrap_err(),
            Error::MissingSlotId { index: 0 }
        );
    }

    #[test]
    fn test_negative_or_textual_id_rejected() {
        let negative = vec![element(&[("id", Value::Int(-1))])];
        assert!(matches!(
            from_keyed_map(&negative),
            Err(Error::InvalidSlotId { index: 0, .. })
        ));

        let textual = vec![element(&[("id", Value::from("zero"))])];
        assert!(matches!(
            from_keyed_map(&textual),
            Err(Error::InvalidSlotId { .. })
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let elements = vec![
            element(&[("id", Value::Int(1))]),
            element(&[("id", Value::Int(1))]),
        ];
        assert_eq!(
            from_keyed_map(&elements).unwrap_err(),
            Error::DuplicateSlot { id: 1 }
        );
    }
}
