//! Field transformation engine.
//!
//! Converts one source revision into target field assignments plus side-effect
//! instructions (attachment uploads/removals and history annotations). The
//! engine is pure: it reads the draft but never mutates it, and store calls
//! needed to carry out the plan are left to the caller.

pub mod attachments;
pub mod error;
pub mod history;
pub mod rules;

use rand::Rng;
use tracing::warn;

use crate::mapping::well_known::{self, HISTORY, REASON, STATE};
use crate::mapping::{NodeIdentityMap, TypeMapping};
use crate::model::{DraftError, EntityDraft, FieldValue, SourceRevision};

pub use attachments::{plan_attachments, AttachmentPlan, PlannedUpload};
pub use error::UnmappedValueError;
pub use rules::{resolve_field, rewrite_node_path, DropReason, Resolution};

/// Everything a transformation needs besides the revision and draft.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Mapping for the entity's work item type.
    pub type_mapping: &'a TypeMapping,
    /// Area node identity map.
    pub area_nodes: &'a NodeIdentityMap,
    /// Iteration node identity map.
    pub iteration_nodes: &'a NodeIdentityMap,
    /// Source project name, replaced in free text.
    pub source_project: &'a str,
    /// Target project name.
    pub target_project: &'a str,
    /// Node the source project's areas and iterations were copied under.
    pub node_sub_root: Option<&'a str>,
    /// Write status changes into the history field instead of the status fields.
    pub annotate_status_changes: bool,
}

/// A single target field write.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAssignment {
    /// Target field reference name.
    pub field: String,
    /// Value to write.
    pub value: FieldValue,
}

/// Result of transforming one revision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    /// Field writes in source field order.
    pub assignments: Vec<FieldAssignment>,
    /// Source fields that produced no write.
    pub dropped: Vec<(String, DropReason)>,
    /// Failed field assignments; any entry makes the revision invalid.
    pub errors: Vec<UnmappedValueError>,
    /// Attachment changes.
    pub attachments: AttachmentPlan,
    /// Status annotation appended to the history field.
    pub history_append: Option<String>,
}

impl TransformOutput {
    /// Check whether every field resolved.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Value assigned to a target field, if any.
    pub fn assigned(&self, field: &str) -> Option<&FieldValue> {
        self.assignments
            .iter()
            .find(|a| well_known::is(&a.field, field))
            .map(|a| &a.value)
    }

    /// Write the field assignments into a draft.
    pub fn apply_fields(&self, draft: &mut EntityDraft) -> Result<(), DraftError> {
        for assignment in &self.assignments {
            draft.set_field(&assignment.field, assignment.value.clone())?;
        }
        Ok(())
    }
}

/// Transform one source revision against the target draft.
///
/// `previous` is the entity's prior source revision, used to detect status
/// changes. `rng` supplies suffixes for deduplicated attachment names.
pub fn transform_revision<R: Rng + ?Sized>(
    ctx: &TransformContext<'_>,
    revision: &SourceRevision,
    previous: Option<&SourceRevision>,
    draft: &EntityDraft,
    is_new: bool,
    rng: &mut R,
) -> TransformOutput {
    let annotate = ctx.annotate_status_changes && history::is_status_change(revision, previous);
    let mut output = TransformOutput::default();

    for (name, value) in &revision.fields {
        if annotate && !is_new && (well_known::is(name, STATE) || well_known::is(name, REASON)) {
            output.dropped.push((name.clone(), DropReason::Annotated));
            continue;
        }
        match resolve_field(ctx, name, value, draft, is_new) {
            Ok(Resolution::Assign { field, value }) => {
                output.assignments.push(FieldAssignment { field, value })
            }
            Ok(Resolution::Drop(reason)) => output.dropped.push((name.clone(), reason)),
            Err(err) => output.errors.push(err),
        }
    }

    if annotate {
        let line = history::status_line(revision, ctx.type_mapping);
        append_history(ctx, draft, &mut output, &line);
        output.history_append = Some(line);
    }

    output.attachments = plan_attachments(&revision.attachments, draft.attachments(), rng);
    output
}

fn append_history(ctx: &TransformContext<'_>, draft: &EntityDraft, output: &mut TransformOutput, line: &str) {
    let target = ctx.type_mapping.target_field(HISTORY).unwrap_or(HISTORY);

    if let Some(existing) = output
        .assignments
        .iter_mut()
        .find(|a| well_known::is(&a.field, target))
    {
        existing.value = FieldValue::String(history::append_line(existing.value.as_str(), line));
    } else if draft.is_editable(target) {
        output.assignments.push(FieldAssignment {
            field: target.to_string(),
            value: FieldValue::String(line.to_string()),
        });
    } else {
        warn!(field = target, "history field not editable; status annotation dropped");
    }
}
