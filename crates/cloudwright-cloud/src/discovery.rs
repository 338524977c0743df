//! Diff-based discovery of newly created resources
//!
//! Create calls do not return the new identifier. Callers snapshot the ids
//! of the collection first, issue the create, then re-list until an item
//! appears that was not in the snapshot. This is only sound while no other
//! mutation can add members to the same collection, so every caller holds
//! the matching [`crate::SerializationGuard`] lock from before the snapshot
//! until discovery finishes.

use crate::error::{CloudError, Result};
use crate::model::ResourceRef;
use crate::poll::{PollSpec, poll_for};
use std::collections::HashSet;
use std::future::Future;
use tracing::debug;

/// An item of a listable collection
pub trait Listed {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
}

/// Collect the ids of a listing
pub fn snapshot_ids<T: Listed>(items: &[T]) -> HashSet<String> {
    items.iter().map(|item| item.id().to_string()).collect()
}

/// Find an item that is not in `existing`.
///
/// When `match_name` is non-empty the item must also carry that name;
/// otherwise any new item matches. The collection is re-listed on every
/// attempt.
pub async fn find_new<T, F, Fut>(
    zone_id: &str,
    spec: PollSpec,
    mut list: F,
    existing: &HashSet<String>,
    match_name: &str,
) -> Result<ResourceRef>
where
    T: Listed,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let outcome = poll_for(spec, move || {
        let listing = list();
        async move {
            let items = listing.await?;
            Ok(items
                .iter()
                .find(|item| {
                    !existing.contains(item.id())
                        && (match_name.is_empty() || item.name() == match_name)
                })
                .map(|item| item.id().to_string()))
        }
    })
    .await;

    let id = outcome.into_result_with(|attempts| {
        CloudError::Timeout(format!(
            "no new resource named '{}' appeared in zone {} after {} attempts",
            match_name, zone_id, attempts
        ))
    })?;

    debug!(zone = %zone_id, id = %id, name = %match_name, "Discovered new resource");
    Ok(ResourceRef::new(zone_id, id))
}

/// Find an item by name alone.
///
/// Used for collections whose members are uniquely named and may take a
/// while to show up after creation.
pub async fn find_named<T, F, Fut>(
    zone_id: &str,
    spec: PollSpec,
    mut list: F,
    name: &str,
) -> Result<ResourceRef>
where
    T: Listed,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let outcome = poll_for(spec, move || {
        let listing = list();
        async move {
            let items = listing.await?;
            Ok(items
                .iter()
                .find(|item| item.name() == name)
                .map(|item| item.id().to_string()))
        }
    })
    .await;

    let id = outcome.into_result_with(|attempts| {
        CloudError::Timeout(format!(
            "resource named '{}' did not appear in zone {} after {} attempts",
            name, zone_id, attempts
        ))
    })?;

    debug!(zone = %zone_id, id = %id, name = %name, "Found resource by name");
    Ok(ResourceRef::new(zone_id, id))
}
