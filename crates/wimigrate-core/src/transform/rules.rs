//! Per-field resolution rules.
//!
//! Each source field runs through the rules in order; the first rule that
//! applies decides whether the field is written and with which value.

use tracing::debug;

use super::error::UnmappedValueError;
use super::TransformContext;
use crate::mapping::{FieldMapping, FieldRole};
use crate::model::{EntityDraft, FieldValue};

/// Why a source field produced no assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No field mapping for the source field.
    Unmapped,
    /// The target field is missing or read-only in the entity's current state.
    NotEditable,
    /// Creation-only field on an existing entity.
    CreationOnly,
    /// Status field carried in the history annotation instead.
    Annotated,
}

/// Outcome of resolving one source field.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Write `value` into target field `field`.
    Assign {
        /// Target field reference name.
        field: String,
        /// Value to write.
        value: FieldValue,
    },
    /// Leave the target untouched.
    Drop(DropReason),
}

/// Resolve one source field against the draft.
pub fn resolve_field(
    ctx: &TransformContext<'_>,
    source_field: &str,
    value: &FieldValue,
    draft: &EntityDraft,
    is_new: bool,
) -> Result<Resolution, UnmappedValueError> {
    let Some(mapping) = ctx.type_mapping.field(source_field) else {
        debug!(field = source_field, "field not in mapping");
        return Ok(Resolution::Drop(DropReason::Unmapped));
    };

    if !draft.is_editable(&mapping.target_field) {
        return Ok(Resolution::Drop(DropReason::NotEditable));
    }

    let value = match FieldRole::of(source_field) {
        FieldRole::AreaId => node_value(value, |id| ctx.area_nodes.resolve(id), ctx.area_nodes.fallback()),
        FieldRole::IterationId => {
            node_value(value, |id| ctx.iteration_nodes.resolve(id), ctx.iteration_nodes.fallback())
        }
        FieldRole::CreationOnly if !is_new => return Ok(Resolution::Drop(DropReason::CreationOnly)),
        FieldRole::NodePath => match (value.as_str(), ctx.node_sub_root) {
            (Some(path), Some(sub_root)) => FieldValue::String(rewrite_node_path(
                path,
                ctx.source_project,
                ctx.target_project,
                sub_root,
            )),
            _ => copy_value(ctx, mapping, source_field, value)?,
        },
        _ => copy_value(ctx, mapping, source_field, value)?,
    };

    Ok(Resolution::Assign {
        field: mapping.target_field.clone(),
        value,
    })
}

fn node_value(value: &FieldValue, resolve: impl Fn(i64) -> i64, fallback: i64) -> FieldValue {
    FieldValue::Integer(value.as_integer().map_or(fallback, resolve))
}

fn copy_value(
    ctx: &TransformContext<'_>,
    mapping: &FieldMapping,
    source_field: &str,
    value: &FieldValue,
) -> Result<FieldValue, UnmappedValueError> {
    let Some(text) = value.as_str() else {
        return Ok(value.clone());
    };

    if mapping.has_allowed_values() {
        return mapping
            .map_value(text)
            .map(FieldValue::from)
            .ok_or_else(|| UnmappedValueError {
                field: source_field.to_string(),
                value: text.to_string(),
            });
    }

    if ctx.source_project.is_empty() {
        return Ok(value.clone());
    }
    Ok(FieldValue::String(text.replace(ctx.source_project, ctx.target_project)))
}

/// Rewrite the leading project segment of a node path to `target\sub_root`.
///
/// Paths that do not start with the source project name are returned as is.
pub fn rewrite_node_path(path: &str, source_project: &str, target_project: &str, sub_root: &str) -> String {
    let replacement = format!("{target_project}\\{sub_root}");
    match path.strip_prefix(source_project) {
        Some("") => replacement,
        Some(rest) if rest.starts_with('\\') => format!("{replacement}{rest}"),
        _ => path.to_string(),
    }
}
