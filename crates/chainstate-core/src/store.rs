//! The `VersionedStore` trait: the read/write contract every backend
//! implements.
//!
//! Writes are checkpoint-ordered: each call carries the checkpoint at which
//! the change becomes visible. A backend keeps, per id, a chain of versions
//! whose `[effective_from, effective_to]` intervals never overlap and have
//! no gaps while the entity exists. At most one version is open
//! (`effective_to == Checkpoint::LATEST`).

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::error::StoreError;
use crate::filter::Filter;
use crate::row::{Row, RowData};
use crate::value::Value;

/// Counts reported by a revert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevertSummary {
    /// Versions physically removed (written after the safe checkpoint).
    pub deleted: u64,
    /// Closed versions reopened as the current version.
    pub reopened: u64,
}

impl std::ops::AddAssign for RevertSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.deleted += rhs.deleted;
        self.reopened += rhs.reopened;
    }
}

/// Bitemporal, checkpoint-ordered entity storage.
///
/// Each write is atomic. `revert`/`revert_table` run with exclusive access:
/// no other write is in flight or starts until they finish.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// The version of `id` valid at `checkpoint`, if any.
    ///
    /// Fails with [`StoreError::MultipleRecordsFound`] if more than one
    /// version matches, which means the store is corrupt.
    async fn find_unique(
        &self,
        table: &str,
        id: &Value,
        checkpoint: Checkpoint,
    ) -> Result<Option<Row>, StoreError>;

    /// Rows valid at `filter.checkpoint` that match the filter, ordered and
    /// paginated. The result is a snapshot taken at call time.
    async fn find_many(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    /// Insert a new entity valid from `checkpoint`.
    async fn create(
        &self,
        table: &str,
        id: Value,
        checkpoint: Checkpoint,
        data: RowData,
    ) -> Result<Row, StoreError>;

    /// Apply a partial update at `checkpoint`.
    async fn update(
        &self,
        table: &str,
        id: Value,
        checkpoint: Checkpoint,
        data: RowData,
    ) -> Result<Row, StoreError>;

    /// `create(create_data)` if the entity has no current version, otherwise
    /// `update(update_data)`.
    async fn upsert(
        &self,
        table: &str,
        id: Value,
        checkpoint: Checkpoint,
        create_data: RowData,
        update_data: RowData,
    ) -> Result<Row, StoreError>;

    /// Close the current version at `checkpoint - 1`. Returns whether a
    /// current version existed.
    async fn delete(&self, table: &str, id: &Value, checkpoint: Checkpoint)
        -> Result<bool, StoreError>;

    /// Discard everything written after `safe` in one table.
    async fn revert_table(&self, table: &str, safe: Checkpoint) -> Result<RevertSummary, StoreError>;

    /// Discard everything written after `safe` in every table, atomically.
    async fn revert(&self, safe: Checkpoint) -> Result<RevertSummary, StoreError>;

    /// All versions of `id`, ordered by `effective_from`.
    async fn history(&self, table: &str, id: &Value) -> Result<Vec<Row>, StoreError>;

    /// The current version of `id`.
    async fn find_latest(&self, table: &str, id: &Value) -> Result<Option<Row>, StoreError> {
        self.find_unique(table, id, Checkpoint::LATEST).await
    }
}

// ─── Write planning ──────────────────────────────────────────────────────────

/// What an update at a given checkpoint does to the current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePlan {
    /// Same checkpoint as the current version: rewrite it in place.
    InPlace,
    /// Later checkpoint: close the current version at `checkpoint - 1` and
    /// open a new one.
    CloseAndInsert,
}

/// Decide how an update (or upsert) at `checkpoint` applies to a current
/// version that starts at `current_from`.
pub fn plan_update(
    table: &str,
    id: &Value,
    current_from: Checkpoint,
    checkpoint: Checkpoint,
) -> Result<UpdatePlan, StoreError> {
    match current_from.cmp(&checkpoint) {
        std::cmp::Ordering::Equal => Ok(UpdatePlan::InPlace),
        std::cmp::Ordering::Less => Ok(UpdatePlan::CloseAndInsert),
        std::cmp::Ordering::Greater => Err(StoreError::TemporalOrderViolation {
            table: table.to_string(),
            id: id.to_string(),
            current: current_from,
            attempted: checkpoint,
        }),
    }
}

/// Merge a partial update into a copy of `base`.
pub fn merge(base: &RowData, update: RowData) -> RowData {
    let mut merged = base.clone();
    merged.extend(update);
    merged
}
