//! Closure-table maintenance inside an open transaction.
//!
//! The closure is fully materialized: every reachable `(ancestor, descendant)`
//! pair has a row carrying its shortest distance. Linking merges the cross
//! product of the two sides. Unlinking and node removal re-derive the rows of
//! every affected ancestor from the remaining direct edges.
//!
//! Callers are expected to hold the hierarchy lock
//! ([`AuthorityTransaction::lock_hierarchy`]) before calling these.

pub mod closure;

use std::collections::BTreeSet;

use crate::error::{IamError, IamResult};
use crate::storage::AuthorityTransaction;
use crate::types::Authority;

pub use closure::{Adjacency, Rederivation, plan_link, plan_rederive};

/// Adds the direct edge `ancestor_id -> descendant_id` and its transitive rows.
///
/// Returns the ids whose derived view changed.
///
/// # Errors
///
/// Returns `IamError::Cycle` or `IamError::PathAlreadyExists` from the
/// planner, or a storage error.
pub async fn link<E: Authority>(
    tx: &mut dyn AuthorityTransaction<E>,
    ancestor_id: i64,
    descendant_id: i64,
) -> IamResult<Vec<i64>> {
    let above = tx.paths_to(ancestor_id).await?;
    let into_descendant = tx.paths_to(descendant_id).await?;
    let below = tx.paths_from(&[descendant_id]).await?;

    let paths = plan_link(
        E::KIND,
        ancestor_id,
        descendant_id,
        &above,
        &into_descendant,
        &below,
    )?;
    tracing::debug!(
        kind = %E::KIND,
        ancestor_id,
        descendant_id,
        rows = paths.len(),
        "merging closure rows"
    );
    tx.merge_paths(&paths).await?;

    Ok(vec![ancestor_id, descendant_id])
}

/// Removes the direct edge `ancestor_id -> descendant_id` and re-derives the
/// rows of `ancestor_id` and all of its ancestors.
///
/// Returns the ids whose derived view may have changed.
///
/// # Errors
///
/// Returns `IamError::PathNotFound` if the direct edge does not exist, or a
/// storage error.
pub async fn unlink<E: Authority>(
    tx: &mut dyn AuthorityTransaction<E>,
    ancestor_id: i64,
    descendant_id: i64,
) -> IamResult<Vec<i64>> {
    let into_descendant = tx.paths_to(descendant_id).await?;
    let has_edge = into_descendant
        .iter()
        .any(|p| p.ancestor_id == ancestor_id && p.is_direct());
    if !has_edge {
        return Err(IamError::PathNotFound {
            kind: E::KIND,
            ancestor_id,
            descendant_id,
        });
    }

    tx.delete_paths(&[(ancestor_id, descendant_id)]).await?;

    let mut sources: Vec<i64> = tx
        .paths_to(ancestor_id)
        .await?
        .into_iter()
        .map(|p| p.ancestor_id)
        .collect();
    sources.push(ancestor_id);
    rederive(tx, &sources).await?;

    sources.push(descendant_id);
    Ok(sources)
}

/// Removes every closure row touching `id` and re-derives the rows of its
/// former ancestors.
///
/// Returns the former ancestors.
///
/// # Errors
///
/// Returns an error if the storage operation fails.
pub async fn detach<E: Authority>(
    tx: &mut dyn AuthorityTransaction<E>,
    id: i64,
) -> IamResult<Vec<i64>> {
    let above = tx.paths_to(id).await?;
    let below = tx.paths_from(&[id]).await?;
    if above.is_empty() && below.is_empty() {
        return Ok(Vec::new());
    }

    let pairs: Vec<(i64, i64)> = above.iter().chain(below.iter()).map(|p| p.pair()).collect();
    tx.delete_paths(&pairs).await?;

    let sources: Vec<i64> = above.iter().map(|p| p.ancestor_id).collect();
    rederive(tx, &sources).await?;

    Ok(sources)
}

/// Loads the direct-edge subgraph reachable from `sources`.
async fn load_adjacency<E: Authority>(
    tx: &mut dyn AuthorityTransaction<E>,
    sources: &[i64],
) -> IamResult<Adjacency> {
    let mut adjacency = Adjacency::new();
    let mut frontier: BTreeSet<i64> = sources.iter().copied().collect();

    while !frontier.is_empty() {
        let batch: Vec<i64> = frontier
            .iter()
            .copied()
            .filter(|id| !adjacency.is_loaded(*id))
            .collect();
        if batch.is_empty() {
            break;
        }
        for id in &batch {
            adjacency.mark_loaded(*id);
        }

        frontier.clear();
        for edge in tx.direct_paths_from(&batch).await? {
            adjacency.add_edge(edge.ancestor_id, edge.descendant_id);
            if !adjacency.is_loaded(edge.descendant_id) {
                frontier.insert(edge.descendant_id);
            }
        }
    }

    Ok(adjacency)
}

async fn rederive<E: Authority>(
    tx: &mut dyn AuthorityTransaction<E>,
    sources: &[i64],
) -> IamResult<()> {
    if sources.is_empty() {
        return Ok(());
    }

    let adjacency = load_adjacency(tx, sources).await?;
    let existing = tx.paths_from(sources).await?;
    let plan = plan_rederive(sources, &adjacency, &existing);
    if plan.is_empty() {
        return Ok(());
    }

    tracing::debug!(
        kind = %E::KIND,
        sources = sources.len(),
        upserts = plan.upserts.len(),
        removals = plan.removals.len(),
        "re-deriving closure rows"
    );
    tx.delete_paths(&plan.removals).await?;
    tx.save_paths(&plan.upserts).await?;
    Ok(())
}
