//! In-memory storage backend.
//!
//! Keeps every version of every entity in RAM, per table, keyed by id with
//! versions ordered by `effective_from`. Useful for tests and short-lived
//! indexers that don't need persistence.
//!
//! Writes hold the revert barrier shared and lock one table; `revert` holds
//! the barrier exclusively, so it never observes or interleaves with a
//! half-applied write.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use chainstate_core::store::{merge, plan_update, RevertSummary, UpdatePlan, VersionedStore};
use chainstate_core::{Checkpoint, Filter, Row, RowData, StoreConfig, StoreError, Validator, Value};

/// Versions of every id in one table.
type Versions = HashMap<String, Vec<Row>>;

/// In-memory versioned store.
///
/// All data is lost when the store is dropped.
pub struct InMemoryStore {
    config: StoreConfig,
    barrier: RwLock<()>,
    tables: HashMap<String, Mutex<Versions>>,
}

impl InMemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        let tables = config
            .schema()
            .tables
            .iter()
            .map(|t| (t.name.clone(), Mutex::new(HashMap::new())))
            .collect();
        Self {
            config,
            barrier: RwLock::new(()),
            tables,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of stored versions in `table`, open and closed.
    pub fn version_count(&self, table: &str) -> Result<usize, StoreError> {
        let versions = self.table(table)?.lock().unwrap();
        Ok(versions.values().map(Vec::len).sum())
    }

    fn table(&self, name: &str) -> Result<&Mutex<Versions>, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn validator(&self, table: &str) -> Result<Validator<'_>, StoreError> {
        Validator::new(self.config.schema(), table)
    }
}

// ─── Version-chain operations ────────────────────────────────────────────────

/// Map key of an id, in canonical form so every spelling of a hex id
/// addresses the same entity.
fn key(id: &Value) -> String {
    id.clone().into_normalized().to_string()
}

fn open_version(id: Value, checkpoint: Checkpoint, data: RowData) -> Row {
    Row {
        id,
        data,
        effective_from: checkpoint,
        effective_to: Checkpoint::LATEST,
    }
}

/// The newest version of an id extends furthest; it is the only candidate
/// for being open or overlapping a new write.
fn overlaps(versions: &[Row], checkpoint: Checkpoint) -> Option<&Row> {
    versions.last().filter(|r| r.effective_to >= checkpoint)
}

fn apply_update(
    table: &str,
    versions: &mut Vec<Row>,
    id: &Value,
    checkpoint: Checkpoint,
    data: RowData,
) -> Result<Row, StoreError> {
    let Some(current) = versions.last_mut().filter(|r| r.is_current()) else {
        return Err(StoreError::RecordNotFound {
            table: table.to_string(),
            id: id.to_string(),
        });
    };
    match plan_update(table, id, current.effective_from, checkpoint)? {
        UpdatePlan::InPlace => {
            current.data.extend(data);
            Ok(current.clone())
        }
        UpdatePlan::CloseAndInsert => {
            let next = open_version(current.id.clone(), checkpoint, merge(&current.data, data));
            current.effective_to = checkpoint.prev();
            versions.push(next.clone());
            Ok(next)
        }
    }
}

fn revert_versions(versions: &mut Versions, safe: Checkpoint) -> RevertSummary {
    let mut summary = RevertSummary::default();
    versions.retain(|_, rows| {
        let before = rows.len();
        rows.retain(|r| r.effective_from <= safe);
        summary.deleted += (before - rows.len()) as u64;
        for row in rows.iter_mut() {
            if !row.is_current() && row.effective_to >= safe {
                row.effective_to = Checkpoint::LATEST;
                summary.reopened += 1;
            }
        }
        !rows.is_empty()
    });
    summary
}

// ─── VersionedStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl VersionedStore for InMemoryStore {
    async fn find_unique(
        &self,
        table: &str,
        id: &Value,
        checkpoint: Checkpoint,
    ) -> Result<Option<Row>, StoreError> {
        let _shared = self.barrier.read().await;
        let versions = self.table(table)?.lock().unwrap();
        let mut matching: Vec<&Row> = versions
            .get(&key(id))
            .into_iter()
            .flatten()
            .filter(|r| r.is_valid_at(checkpoint))
            .collect();
        if matching.len() > 1 {
            error!(table, id = %id, checkpoint = %checkpoint, count = matching.len(), "overlapping versions");
            return Err(StoreError::MultipleRecordsFound {
                table: table.to_string(),
                id: id.to_string(),
                checkpoint,
                count: matching.len(),
            });
        }
        Ok(matching.pop().cloned())
    }

    async fn find_many(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let descriptor = self.validator(table)?.table();
        filter.validate(descriptor)?;
        let filter = filter.normalized(descriptor);
        let _shared = self.barrier.read().await;
        let mut rows: Vec<Row> = {
            let versions = self.table(table)?.lock().unwrap();
            versions
                .values()
                .flatten()
                .filter(|r| r.is_valid_at(filter.checkpoint) && filter.matches(r))
                .cloned()
                .collect()
        };
        rows.sort_by(|a, b| filter.compare_rows(a, b));
        Ok(rows
            .into_iter()
            .skip(filter.skip.unwrap_or(0))
            .take(filter.first.unwrap_or(usize::MAX))
            .collect())
    }

    async fn create(
        &self,
        table: &str,
        id: Value,
        checkpoint: Checkpoint,
        data: RowData,
    ) -> Result<Row, StoreError> {
        let validator = self.validator(table)?;
        let id = validator.id(&id)?;
        let data = validator.create(data)?;

        let _shared = self.barrier.read().await;
        let mut versions = self.table(table)?.lock().unwrap();
        let chain = versions.entry(key(&id)).or_default();
        if overlaps(chain, checkpoint).is_some() {
            return Err(StoreError::RecordAlreadyExists {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        let row = open_version(id, checkpoint, data);
        chain.push(row.clone());
        debug!(table, id = %row.id, checkpoint = %checkpoint, "record created");
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        id: Value,
        checkpoint: Checkpoint,
        data: RowData,
    ) -> Result<Row, StoreError> {
        let validator = self.validator(table)?;
        let id = validator.id(&id)?;
        let data = validator.update(data)?;

        let _shared = self.barrier.read().await;
        let mut versions = self.table(table)?.lock().unwrap();
        let chain = versions.get_mut(&key(&id)).ok_or_else(|| StoreError::RecordNotFound {
            table: table.to_string(),
            id: id.to_string(),
        })?;
        let row = apply_update(table, chain, &id, checkpoint, data)?;
        debug!(table, id = %id, checkpoint = %checkpoint, "record updated");
        Ok(row)
    }

    async fn upsert(
        &self,
        table: &str,
        id: Value,
        checkpoint: Checkpoint,
        create_data: RowData,
        update_data: RowData,
    ) -> Result<Row, StoreError> {
        let validator = self.validator(table)?;
        let id = validator.id(&id)?;
        let create_data = validator.create(create_data)?;
        let update_data = validator.update(update_data)?;

        let _shared = self.barrier.read().await;
        let mut versions = self.table(table)?.lock().unwrap();
        let chain = versions.entry(key(&id)).or_default();
        if chain.last().is_some_and(Row::is_current) {
            let row = apply_update(table, chain, &id, checkpoint, update_data)?;
            debug!(table, id = %id, checkpoint = %checkpoint, "record upserted (update)");
            return Ok(row);
        }
        if let Some(last) = overlaps(chain, checkpoint) {
            return Err(StoreError::TemporalOrderViolation {
                table: table.to_string(),
                id: id.to_string(),
                current: last.effective_to.next(),
                attempted: checkpoint,
            });
        }
        let row = open_version(id, checkpoint, create_data);
        chain.push(row.clone());
        debug!(table, id = %row.id, checkpoint = %checkpoint, "record upserted (create)");
        Ok(row)
    }

    async fn delete(
        &self,
        table: &str,
        id: &Value,
        checkpoint: Checkpoint,
    ) -> Result<bool, StoreError> {
        let id = &self.validator(table)?.id(id)?;

        let _shared = self.barrier.read().await;
        let mut versions = self.table(table)?.lock().unwrap();
        let Some(chain) = versions.get_mut(&key(id)) else {
            return Ok(false);
        };
        let Some(current) = chain.last_mut().filter(|r| r.is_current()) else {
            return Ok(false);
        };
        if current.effective_from > checkpoint {
            return Err(StoreError::TemporalOrderViolation {
                table: table.to_string(),
                id: id.to_string(),
                current: current.effective_from,
                attempted: checkpoint,
            });
        }
        if current.effective_from == checkpoint {
            // Born and died at the same checkpoint: never observable.
            chain.pop();
            if chain.is_empty() {
                versions.remove(&key(id));
            }
        } else {
            current.effective_to = checkpoint.prev();
        }
        debug!(table, id = %id, checkpoint = %checkpoint, "record deleted");
        Ok(true)
    }

    async fn revert_table(
        &self,
        table: &str,
        safe: Checkpoint,
    ) -> Result<RevertSummary, StoreError> {
        let _exclusive = self.barrier.write().await;
        let summary = revert_versions(&mut self.table(table)?.lock().unwrap(), safe);
        info!(
            table,
            safe = %safe,
            deleted = summary.deleted,
            reopened = summary.reopened,
            "table reverted"
        );
        Ok(summary)
    }

    async fn revert(&self, safe: Checkpoint) -> Result<RevertSummary, StoreError> {
        let _exclusive = self.barrier.write().await;
        let mut summary = RevertSummary::default();
        for versions in self.tables.values() {
            summary += revert_versions(&mut versions.lock().unwrap(), safe);
        }
        info!(
            safe = %safe,
            deleted = summary.deleted,
            reopened = summary.reopened,
            "store reverted"
        );
        Ok(summary)
    }

    async fn history(&self, table: &str, id: &Value) -> Result<Vec<Row>, StoreError> {
        let _shared = self.barrier.read().await;
        let versions = self.table(table)?.lock().unwrap();
        Ok(versions.get(&key(id)).cloned().unwrap_or_default())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
