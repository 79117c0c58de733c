//! Link resolution.
//!
//! Decides what a link-kind ledger row turns into in the target store, based
//! on which endpoints have been migrated. The decision itself is a pure
//! function over [`LinkFacts`]; [`resolve_link`] gathers the facts.

use chrono::{DateTime, Utc};

use crate::ledger::EntityMap;
use crate::model::{EntityId, LinkRecord, NewLink};
use crate::store::{StoreError, TargetStore};

/// What to do with a link row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    /// Create the link between the two migrated endpoints.
    CreateLink(NewLink),
    /// The link is already present; only mark the row migrated.
    SkipExisting,
    /// An endpoint is not migrated yet; leave the row pending for a later pass.
    Defer,
    /// Bridge to the unmigrated endpoint's original id (same collection only).
    CreateLegacyLink(NewLink),
}

impl LinkAction {
    /// Check whether the row should be marked migrated after the action.
    pub fn completes_row(&self) -> bool {
        !matches!(self, LinkAction::Defer)
    }
}

/// Facts the link decision depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFacts {
    /// Target id of the row's own entity, if migrated.
    pub own_target: Option<EntityId>,
    /// Target id of the other endpoint, if migrated.
    pub other_target: Option<EntityId>,
    /// Whether the link to create is already present in the target.
    pub exists: bool,
    /// Legacy-link mode.
    pub legacy_links: bool,
}

/// How the link will be expressed in the target, before the existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPlan {
    /// Both endpoints mapped to target ids.
    Mapped {
        /// Link source in the target.
        from: EntityId,
        /// Link target in the target.
        to: EntityId,
    },
    /// One endpoint mapped, the other left at its original id.
    Legacy {
        /// Link source in the target.
        from: EntityId,
        /// Link target in the target.
        to: EntityId,
    },
    /// Nothing can be created yet.
    Wait,
}

/// Work out the target endpoints of `link`, seen from entity `own`.
///
/// The source link's direction is kept; a legacy link substitutes the
/// unmigrated endpoint's original id.
pub fn plan_link(own: EntityId, link: &LinkRecord, entity_map: &EntityMap, legacy_links: bool) -> LinkPlan {
    let Some(other) = link.other_end(own) else {
        return LinkPlan::Wait;
    };
    let map = |id: EntityId| entity_map.get(id);

    match (map(own), map(other)) {
        (Some(_), Some(_)) => match (map(link.source_id), map(link.target_id)) {
            (Some(from), Some(to)) => LinkPlan::Mapped { from, to },
            _ => LinkPlan::Wait,
        },
        (Some(own_target), None) if legacy_links => {
            if link.source_id == own {
                LinkPlan::Legacy {
                    from: own_target,
                    to: other,
                }
            } else {
                LinkPlan::Legacy {
                    from: other,
                    to: own_target,
                }
            }
        }
        _ => LinkPlan::Wait,
    }
}

/// Pure link decision table.
pub fn decide(facts: LinkFacts, plan: LinkPlan, link_type: &str, changed_at: DateTime<Utc>) -> LinkAction {
    let new_link = |from, to| NewLink {
        link_type: link_type.to_string(),
        source_id: from,
        target_id: to,
        changed_at,
    };

    match (facts.own_target, facts.other_target, plan) {
        (Some(_), Some(_), LinkPlan::Mapped { from, to }) => {
            if facts.exists {
                LinkAction::SkipExisting
            } else {
                LinkAction::CreateLink(new_link(from, to))
            }
        }
        (Some(_), None, LinkPlan::Legacy { from, to }) if facts.legacy_links => {
            if facts.exists {
                LinkAction::SkipExisting
            } else {
                LinkAction::CreateLegacyLink(new_link(from, to))
            }
        }
        _ => LinkAction::Defer,
    }
}

/// Resolve a link row of entity `own` against the target store.
pub async fn resolve_link<T>(
    own: EntityId,
    link: &LinkRecord,
    entity_map: &EntityMap,
    target: &T,
    legacy_links: bool,
) -> Result<LinkAction, StoreError>
where
    T: TargetStore + ?Sized,
{
    let other = link.other_end(own);
    let plan = plan_link(own, link, entity_map, legacy_links);

    let exists = match plan {
        LinkPlan::Mapped { from, to } | LinkPlan::Legacy { from, to } => target.link_exists(from, to).await?,
        LinkPlan::Wait => false,
    };

    let facts = LinkFacts {
        own_target: entity_map.get(own),
        other_target: other.and_then(|id| entity_map.get(id)),
        exists,
        legacy_links,
    };
    Ok(decide(facts, plan, &link.link_type, link.added_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_440_000_400, 0).unwrap()
    }

    fn link() -> LinkRecord {
        LinkRecord {
            link_type: "Child".to_string(),
            source_id: 101,
            target_id: 102,
            added_at: ts(),
            removed_at: None,
        }
    }

    fn map(pairs: &[(EntityId, EntityId)]) -> EntityMap {
        pairs.iter().copied().collect()
    }

    fn act(entity_map: &EntityMap, exists: bool, legacy: bool) -> LinkAction {
        let plan = plan_link(101, &link(), entity_map, legacy);
        let facts = LinkFacts {
            own_target: entity_map.get(101),
            other_target: entity_map.get(102),
            exists,
            legacy_links: legacy,
        };
        decide(facts, plan, "Child", ts())
    }

    #[test]
    fn test_both_endpoints_migrated() {
        let m = map(&[(101, 1), (102, 2)]);

        assert_eq!(act(&m, true, false), LinkAction::SkipExisting);
        assert_eq!(
            act(&m, false, false),
            LinkAction::CreateLink(NewLink {
                link_type: "Child".to_string(),
                source_id: 1,
                target_id: 2,
                changed_at: ts(),
            })
        );
    }

    #[test]
    fn test_other_endpoint_pending() {
        let m = map(&[(101, 1)]);

        assert_eq!(act(&m, false, false), LinkAction::Defer);
        assert_eq!(
            act(&m, false, true),
            LinkAction::CreateLegacyLink(NewLink {
                link_type: "Child".to_string(),
                source_id: 1,
                target_id: 102,
                changed_at: ts(),
            })
        );
        assert_eq!(act(&m, true, true), LinkAction::SkipExisting);
    }

    #[test]
    fn test_own_entity_pending() {
        assert_eq!(act(&map(&[(102, 2)]), false, true), LinkAction::Defer);
        assert_eq!(act(&EntityMap::new(), false, false), LinkAction::Defer);
    }

    #[test]
    fn test_direction_kept_from_other_side() {
        let m = map(&[(102, 2)]);
        assert_eq!(
            plan_link(102, &link(), &m, true),
            LinkPlan::Legacy { from: 101, to: 2 }
        );
        assert_eq!(plan_link(103, &link(), &m, true), LinkPlan::Wait);
        assert!(!LinkAction::Defer.completes_row());
        assert!(LinkAction::SkipExisting.completes_row());
    }
}
