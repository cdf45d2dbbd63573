//! Template Diff Engine
//!
//! Compares the deployed and the target template of one stack level, resource by
//! resource, over the unevaluated expression trees. Template-level `Parameters`,
//! `Mappings` and `Conditions` are not diffed; they take part through evaluation.
//! `Outputs` are not resources and are ignored.

use std::collections::BTreeSet;

use super::changes::{ChangeKind, ResourceChange};
use crate::app::cfn_template::RenderedTemplate;

/// Compute the resource changes from `current` to `target`, ordered by logical ID.
///
/// Resources that are identical on both sides produce no entry.
pub fn diff<'a>(current: &'a RenderedTemplate, target: &'a RenderedTemplate) -> Vec<ResourceChange<'a>> {
    let logical_ids: BTreeSet<&'a str> = current
        .resources
        .keys()
        .chain(target.resources.keys())
        .map(String::as_str)
        .collect();

    let changes: Vec<ResourceChange<'a>> = logical_ids
        .into_iter()
        .filter_map(|logical_id| {
            let old = current.resources.get(logical_id);
            let new = target.resources.get(logical_id);

            let (kind, resource_type) = match (old, new) {
                (None, Some(new)) => (ChangeKind::Added, new.resource_type.as_str()),
                (Some(old), None) => (ChangeKind::Removed, old.resource_type.as_str()),
                (Some(old), Some(new)) if old.resource_type != new.resource_type => {
                    (ChangeKind::TypeChanged, new.resource_type.as_str())
                }
                (Some(old), Some(new)) => {
                    if old.properties == new.properties && old.changed_attributes(new).is_empty() {
                        return None;
                    }
                    (ChangeKind::PropertiesModified, new.resource_type.as_str())
                }
                (None, None) => return None,
            };

            Some(ResourceChange {
                logical_id,
                kind,
                resource_type,
                old,
                new,
            })
        })
        .collect();

    log_debug!(
        "Template diff: {} resource change(s) [{}]",
        changes.len(),
        changes
            .iter()
            .map(|c| format!("{} {}", c.logical_id, c.kind))
            .collect::<Vec<_>>()
            .join(", ")
    );

    changes
}
