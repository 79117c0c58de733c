//! Reference names of fields that get special treatment during replay.

/// Area node id.
pub const AREA_ID: &str = "System.AreaId";
/// Iteration node id.
pub const ITERATION_ID: &str = "System.IterationId";
/// Area path string.
pub const AREA_PATH: &str = "System.AreaPath";
/// Iteration path string.
pub const ITERATION_PATH: &str = "System.IterationPath";
/// Creation timestamp.
pub const CREATED_DATE: &str = "System.CreatedDate";
/// Creator.
pub const CREATED_BY: &str = "System.CreatedBy";
/// Last change timestamp.
pub const CHANGED_DATE: &str = "System.ChangedDate";
/// Workflow state.
pub const STATE: &str = "System.State";
/// Reason for the current state.
pub const REASON: &str = "System.Reason";
/// Discussion/history text.
pub const HISTORY: &str = "System.History";

/// Role a field plays in the per-field resolution rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Area node id; remapped through the area node map.
    AreaId,
    /// Iteration node id; remapped through the iteration node map.
    IterationId,
    /// Area or iteration path string.
    NodePath,
    /// Only written when the target entity is created.
    CreationOnly,
    /// Anything else.
    Plain,
}

impl FieldRole {
    /// Classify a field by reference name (case-insensitive).
    pub fn of(field: &str) -> Self {
        if is(field, AREA_ID) {
            FieldRole::AreaId
        } else if is(field, ITERATION_ID) {
            FieldRole::IterationId
        } else if is(field, AREA_PATH) || is(field, ITERATION_PATH) {
            FieldRole::NodePath
        } else if is(field, CREATED_DATE) || is(field, CREATED_BY) {
            FieldRole::CreationOnly
        } else {
            FieldRole::Plain
        }
    }
}

/// Case-insensitive reference name comparison.
pub fn is(field: &str, name: &str) -> bool {
    field.eq_ignore_ascii_case(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles() {
        assert_eq!(FieldRole::of("System.AreaId"), FieldRole::AreaId);
        assert_eq!(FieldRole::of("system.iterationid"), FieldRole::IterationId);
        assert_eq!(FieldRole::of("System.IterationPath"), FieldRole::NodePath);
        assert_eq!(FieldRole::of("System.CreatedBy"), FieldRole::CreationOnly);
        assert_eq!(FieldRole::of("System.Title"), FieldRole::Plain);
    }
}
