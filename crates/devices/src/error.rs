//! Error types for device collection conversion

use crate::value::ValueKind;
use thiserror::Error;

/// Errors raised while converting between collection representations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An element of the keyed form carries no slot id
    #[error("device element {index} has no `id` attribute")]
    MissingSlotId {
        /// Position of the element in the keyed list
        index: usize,
    },

    /// The slot id is not a non-negative integer
    #[error("device element {index} has an invalid slot id: {value}")]
    InvalidSlotId {
        /// Position of the element in the keyed list
        index: usize,
        /// The offending value, rendered
        value: String,
    },

    /// Two elements share a slot id
    #[error("duplicate device slot id {id}")]
    DuplicateSlot {
        /// The repeated slot id
        id: u32,
    },

    /// A declared attribute does not match the kind the schema expects
    #[error("attribute `{key}` of slot {slot} must be {expected}, got {found}")]
    KindMismatch {
        slot: u32,
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

/// Result type for device collection operations
pub type Result<T> = std::result::Result<T, Error>;
