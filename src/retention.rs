//! # Revision Retention
//!
//! Enforces `revisionRetentionPolicy = latest { count, grace_ttl }` after a
//! write to `data`.
//!
//! ## Algorithm
//!
//! ```text
//! written row ──► item key (iKeys minus tid)
//!                   │
//!                   ▼
//!   read live revisions of the item, tid ascending, projecting iKeys
//!                   │
//!          n <= count? ──yes──► Applied { marked: 0 }, nothing executed
//!                   │ no
//!                   ▼
//!   mark the oldest n - count:  _exist_until = COALESCE(_exist_until, now + grace)
//!   delete every row with       _exist_until <= now
//!                   │ one batch
//!                   ▼
//!          Applied { examined: n, marked: n - count }
//! ```
//!
//! Marked revisions stay readable until their marker passes, then disappear
//! from reads and are physically removed by the next sweep that executes.
//!
//! ## Concurrency
//!
//! No per-item lock is taken. Two writers to the same item may both read
//! before either marks, so the bound is enforced eventually rather than at
//! every instant: a later sweep always catches up.

use tracing::{debug, warn};

use crate::api::{now_ms, TableStore};
use crate::error::{Error, Result};
use crate::schema::{Keyspace, Relation, RetentionPolicy, SchemaInfo};
use crate::sql::{build_delete_expired_query, build_mark_expiry_query};
use crate::types::{GetRequest, RetentionSweep, Row, SortOrder};

/// Runs the sweep for one written revision and folds any failure into the
/// returned [`RetentionSweep`]. The write itself has already committed.
pub(crate) async fn apply(
    store: &TableStore,
    keyspace: &Keyspace,
    schema: &SchemaInfo,
    written: &Row,
) -> RetentionSweep {
    match sweep(store, keyspace, schema, written).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(keyspace = %keyspace, error = %err, "revision retention sweep failed");
            RetentionSweep::Failed {
                reason: err.to_string(),
            }
        }
    }
}

async fn sweep(
    store: &TableStore,
    keyspace: &Keyspace,
    schema: &SchemaInfo,
    written: &Row,
) -> Result<RetentionSweep> {
    let RetentionPolicy::Latest { count, grace_ttl } = schema.retention else {
        return Ok(RetentionSweep::Skipped);
    };

    let mut request = GetRequest::new(schema.table.clone())
        .order_by(schema.tid.clone(), SortOrder::Asc)
        .project(schema.i_keys.iter().cloned());
    for key in schema.item_keys() {
        let value = written
            .get(key)
            .ok_or_else(|| Error::internal(format!("written revision lacks key '{key}'")))?;
        request = request.with(key, value.clone());
    }

    let revisions = store
        .read_relation(keyspace, &request, Relation::Data, Some(schema))
        .await?
        .items;
    let examined = revisions.len();
    let keep = usize::try_from(count).unwrap_or(usize::MAX);
    if examined <= keep {
        debug!(keyspace = %keyspace, examined, "retention sweep: nothing to mark");
        return Ok(RetentionSweep::Applied {
            examined,
            marked: 0,
        });
    }

    let now = now_ms();
    let grace_ms = i64::try_from(grace_ttl.saturating_mul(1000)).unwrap_or(i64::MAX);
    let expires_at = now.saturating_add(grace_ms);
    let data = keyspace.relation(Relation::Data);

    let excess = &revisions[..examined - keep];
    let mut batch = Vec::with_capacity(excess.len() + 1);
    for revision in excess {
        batch.push(build_mark_expiry_query(&data, schema, revision, expires_at)?);
    }
    batch.push(build_delete_expired_query(&data, now));
    store.engine().run(batch).await?;

    debug!(
        keyspace = %keyspace,
        examined,
        marked = excess.len(),
        expires_at,
        "retention sweep applied"
    );
    Ok(RetentionSweep::Applied {
        examined,
        marked: excess.len(),
    })
}
