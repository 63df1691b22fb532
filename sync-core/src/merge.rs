//! Field-level merge of two copies of the same digest.
//!
//! Each field class has a fixed rule, chosen so that no information held by
//! either side is lost: counters and recency take the max, first-seen takes
//! the min, flags OR together, sets union, and free text keeps the longer
//! value.

use std::collections::BTreeSet;
use sync_types::{Digest, DigestContext, ErrorKind};
use thiserror::Error;

/// Errors from the merge engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// The two digests describe different items
    #[error("cannot merge digest {local} with digest {remote}")]
    IdentityMismatch {
        /// Identifier of the local digest
        local: String,
        /// Identifier of the remote digest
        remote: String,
    },
}

impl MergeError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::IdentityMismatch
    }
}

/// Merge a remote copy of a digest into the local copy.
///
/// `now` (Unix ms) becomes the result's `last_synced_at`.
pub fn merge(local: &Digest, remote: &Digest, now: u64) -> Result<Digest, MergeError> {
    if local.id != remote.id {
        return Err(MergeError::IdentityMismatch {
            local: local.id.clone(),
            remote: remote.id.clone(),
        });
    }

    let (vector, vector_space) = if local.vector.is_some() {
        (local.vector.clone(), local.vector_space.clone())
    } else {
        (remote.vector.clone(), remote.vector_space.clone())
    };

    Ok(Digest {
        id: local.id.clone(),
        url: local.url.clone(),
        domain: longer(&local.domain, &remote.domain),
        title: longer(&local.title, &remote.title),
        summary: longer(&local.summary, &remote.summary),
        vector,
        vector_space,
        keywords: union(&local.keywords, &remote.keywords),
        entities: union(&local.entities, &remote.entities),
        category: longer(&local.category, &remote.category),
        relevance_score: local.relevance_score.max(remote.relevance_score),
        quality_score: local.quality_score.max(remote.quality_score),
        first_seen: local.first_seen.min(remote.first_seen),
        last_accessed: local.last_accessed.max(remote.last_accessed),
        // `None < Some(_)`, so a present expiry always beats an absent one.
        expires_at: local.expires_at.max(remote.expires_at),
        version: local.version.max(remote.version),
        visit_count: local.visit_count.max(remote.visit_count),
        synced: local.synced || remote.synced,
        private: local.private || remote.private,
        context: merge_context(&local.context, &remote.context),
        source_devices: union(&local.source_devices, &remote.source_devices),
        merge_count: local.merge_count.max(remote.merge_count).saturating_add(1),
        last_synced_at: Some(now),
    })
}

/// Whether merging `remote` into `local` would improve the local copy.
///
/// True when the remote has a higher relevance, more keywords, more
/// entities, a newer access time, or a vector the local copy lacks.
pub fn should_merge(local: &Digest, remote: &Digest) -> bool {
    remote.relevance_score > local.relevance_score
        || remote.keywords.len() > local.keywords.len()
        || remote.entities.len() > local.entities.len()
        || remote.last_accessed > local.last_accessed
        || (remote.vector.is_some() && local.vector.is_none())
}

// Longer text wins; a tie keeps the local value.
fn longer(local: &str, remote: &str) -> String {
    if remote.chars().count() > local.chars().count() {
        remote.to_owned()
    } else {
        local.to_owned()
    }
}

fn union<T: Ord + Clone>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> BTreeSet<T> {
    a.union(b).cloned().collect()
}

fn merge_context(local: &DigestContext, remote: &DigestContext) -> DigestContext {
    DigestContext {
        session_id: local.session_id.clone().or_else(|| remote.session_id.clone()),
        tab_id: local.tab_id.or(remote.tab_id),
        window_id: local.window_id.or(remote.window_id),
        referrer: local.referrer.clone().or_else(|| remote.referrer.clone()),
        duration_ms: local.duration_ms.max(remote.duration_ms),
    }
}
