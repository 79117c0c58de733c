//! Static work item type/field mapping tables.
//!
//! The mapping document is a JSON array produced once by comparing the source
//! and target process templates:
//!
//! ```json
//! [{
//!   "sourceType": "Bug",
//!   "targetType": "Defect",
//!   "fieldMappings": [{
//!     "sourceField": "System.State",
//!     "targetField": "System.State",
//!     "allowedValueMappings": [{ "sourceValue": "Resolved", "targetValue": "Done" }]
//!   }]
//! }]
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::MappingError;

/// One source enumerated value and its target counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedValueMapping {
    /// Value in the source store.
    pub source_value: String,
    /// Value to write in the target store.
    pub target_value: String,
}

/// Mapping of one source field onto a target field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    /// Source field reference name.
    pub source_field: String,
    /// Target field reference name.
    pub target_field: String,
    /// Enumerated value translations; empty means free-form copy.
    #[serde(default)]
    pub allowed_value_mappings: Vec<AllowedValueMapping>,
}

impl FieldMapping {
    /// Create a free-form field mapping.
    pub fn new(source_field: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
            allowed_value_mappings: Vec::new(),
        }
    }

    /// Add an allowed-value translation.
    pub fn with_value(mut self, source_value: impl Into<String>, target_value: impl Into<String>) -> Self {
        self.allowed_value_mappings.push(AllowedValueMapping {
            source_value: source_value.into(),
            target_value: target_value.into(),
        });
        self
    }

    /// Check whether values of this field are enumerated.
    pub fn has_allowed_values(&self) -> bool {
        !self.allowed_value_mappings.is_empty()
    }

    /// Target value for an exact source value match.
    pub fn map_value(&self, source_value: &str) -> Option<&str> {
        self.allowed_value_mappings
            .iter()
            .find(|m| m.source_value == source_value)
            .map(|m| m.target_value.as_str())
    }
}

/// Mapping of one source work item type onto a target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMapping {
    /// Source type name.
    pub source_type: String,
    /// Target type name.
    pub target_type: String,
    /// Field mappings.
    #[serde(default)]
    pub field_mappings: Vec<FieldMapping>,
}

impl TypeMapping {
    /// Create a type mapping without fields.
    pub fn new(source_type: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            target_type: target_type.into(),
            field_mappings: Vec::new(),
        }
    }

    /// Add a field mapping.
    pub fn with_field(mut self, mapping: FieldMapping) -> Self {
        self.field_mappings.push(mapping);
        self
    }

    /// Mapping for a source field, matched case-insensitively.
    pub fn field(&self, source_field: &str) -> Option<&FieldMapping> {
        self.field_mappings
            .iter()
            .find(|m| m.source_field.eq_ignore_ascii_case(source_field))
    }

    /// Target field a source field maps to.
    pub fn target_field(&self, source_field: &str) -> Option<&str> {
        self.field(source_field).map(|m| m.target_field.as_str())
    }
}

/// All type mappings of a migration. Loaded once, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MappingTable {
    types: Vec<TypeMapping>,
}

impl MappingTable {
    /// Build a table from type mappings.
    pub fn new(types: Vec<TypeMapping>) -> Result<Self, MappingError> {
        let mut seen = HashSet::new();
        for mapping in &types {
            if !seen.insert(mapping.source_type.as_str()) {
                return Err(MappingError::DuplicateType(mapping.source_type.clone()));
            }
        }
        Ok(Self { types })
    }

    /// Parse a mapping document.
    pub fn from_json(json: &str) -> Result<Self, MappingError> {
        let types: Vec<TypeMapping> = serde_json::from_str(json)?;
        Self::new(types)
    }

    /// Load a mapping document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| MappingError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Mapping for a source type.
    pub fn type_mapping(&self, source_type: &str) -> Option<&TypeMapping> {
        self.types.iter().find(|m| m.source_type == source_type)
    }

    /// Iterate over all type mappings.
    pub fn iter(&self) -> impl Iterator<Item = &TypeMapping> {
        self.types.iter()
    }

    /// Number of mapped types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check whether no types are mapped.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
