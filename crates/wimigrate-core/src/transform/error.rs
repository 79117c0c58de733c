//! Field transformation errors.

use thiserror::Error;

/// An enumerated source value has no entry in the field's allowed-value table.
///
/// Fails the single field assignment; the scheduler treats the owning revision
/// as invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no allowed-value mapping for '{value}' in field {field}")]
pub struct UnmappedValueError {
    /// Source field reference name.
    pub field: String,
    /// Source value without a mapping.
    pub value: String,
}
