//! Attachment reconciliation.
//!
//! Target attachments mirror the attachment snapshot of the replayed source
//! revision. Attachments are matched by (length, name, comment).

use std::collections::HashSet;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::model::{AttachmentRef, DraftAttachment};

/// Length of the random suffix used to deduplicate file names.
pub const SUFFIX_LEN: usize = 8;

/// A source attachment to upload under a possibly renamed file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpload {
    /// Source attachment (its uri is used to download the content).
    pub source: AttachmentRef,
    /// File name to use in the target.
    pub name: String,
}

impl PlannedUpload {
    /// Attachment reference as it will be stored in the target.
    pub fn target_ref(&self) -> AttachmentRef {
        AttachmentRef {
            name: self.name.clone(),
            ..self.source.clone()
        }
    }
}

/// Attachment changes needed to make the target mirror a source revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentPlan {
    /// Source attachments missing from the target.
    pub add: Vec<PlannedUpload>,
    /// Target attachments no longer present in the source.
    pub remove: Vec<AttachmentRef>,
}

impl AttachmentPlan {
    /// Check whether nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Compute the set difference between source and target attachments.
///
/// Matching is one-to-one. A target attachment whose name is a deduplicated
/// copy of the source name (`stem-XXXXXXXX.ext`) still matches, so renamed
/// uploads are not re-added on every later revision.
pub fn plan_attachments<R: Rng + ?Sized>(
    source: &[AttachmentRef],
    target: &[DraftAttachment],
    rng: &mut R,
) -> AttachmentPlan {
    let mut matched = vec![false; target.len()];
    let mut missing = Vec::new();

    for attachment in source {
        let found = target
            .iter()
            .enumerate()
            .find(|(i, existing)| !matched[*i] && corresponds(attachment, &existing.attachment))
            .map(|(i, _)| i);
        match found {
            Some(i) => matched[i] = true,
            None => missing.push(attachment),
        }
    }

    let remove: Vec<AttachmentRef> = target
        .iter()
        .zip(&matched)
        .filter(|(_, kept)| !**kept)
        .map(|(existing, _)| existing.attachment.clone())
        .collect();

    let mut names: HashSet<String> = target
        .iter()
        .zip(&matched)
        .filter(|(_, kept)| **kept)
        .map(|(existing, _)| existing.attachment.name.clone())
        .collect();

    let add = missing
        .into_iter()
        .map(|attachment| {
            let mut name = attachment.name.clone();
            while names.contains(&name) {
                name = with_suffix(&attachment.name, rng);
            }
            names.insert(name.clone());
            PlannedUpload {
                source: attachment.clone(),
                name,
            }
        })
        .collect();

    AttachmentPlan { add, remove }
}

fn corresponds(source: &AttachmentRef, target: &AttachmentRef) -> bool {
    source.length == target.length
        && source.comment == target.comment
        && (source.name == target.name || strip_suffix(&target.name) == Some(source.name.clone()))
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    }
}

/// Insert `-XXXXXXXX` before the file extension.
pub fn with_suffix<R: Rng + ?Sized>(name: &str, rng: &mut R) -> String {
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect();
    let (stem, ext) = split_extension(name);
    format!("{stem}-{suffix}{ext}")
}

fn strip_suffix(name: &str) -> Option<String> {
    let (stem, ext) = split_extension(name);
    let (base, suffix) = stem.rsplit_once('-')?;
    (suffix.len() == SUFFIX_LEN && suffix.chars().all(|c| c.is_ascii_alphanumeric()))
        .then(|| format!("{base}{ext}"))
}
