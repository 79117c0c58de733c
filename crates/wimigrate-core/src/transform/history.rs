//! Status-change annotations for the history field.

use crate::mapping::well_known::{self, REASON, STATE};
use crate::mapping::TypeMapping;
use crate::model::SourceRevision;

/// Timestamp format used in annotation lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Check whether the revision changed the workflow state or reason.
pub fn is_status_change(revision: &SourceRevision, previous: Option<&SourceRevision>) -> bool {
    revision
        .changed_fields(previous)
        .iter()
        .any(|field| well_known::is(field, STATE) || well_known::is(field, REASON))
}

/// Audit line describing a status change.
///
/// The `mapped on` part is added when the reason translates to a different
/// target value through the allowed-value table.
pub fn status_line(revision: &SourceRevision, type_mapping: &TypeMapping) -> String {
    let text = |name: &str| {
        revision
            .fields
            .iter()
            .find(|(field, _)| well_known::is(field, name))
            .and_then(|(_, value)| value.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let state = text(STATE);
    let reason = text(REASON);

    let mut line = format!(
        "{}: State changed to '{}', Reason was '{}'",
        revision.changed_at.format(TIMESTAMP_FORMAT),
        state,
        reason
    );
    let mapped = type_mapping
        .field(REASON)
        .and_then(|mapping| mapping.map_value(&reason))
        .filter(|target| *target != reason);
    if let Some(target) = mapped {
        line.push_str(&format!(" mapped on '{target}'"));
    }
    line
}

/// Append `line` to existing history text.
pub fn append_line(existing: Option<&str>, line: &str) -> String {
    match existing {
        Some(text) if !text.is_empty() => format!("{text}\n{line}"),
        _ => line.to_string(),
    }
}
