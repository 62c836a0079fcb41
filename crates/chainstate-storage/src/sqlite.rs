//! SQLite storage backend.
//!
//! Persists every version of every entity to SQLite through `sqlx`. Each
//! write, and each revert, runs in one `BEGIN IMMEDIATE` transaction on a
//! single connection, so the read-decide-write sequence for an id cannot
//! interleave with another writer. Readers use WAL snapshots and never see
//! a half-applied revert.
//!
//! # Usage
//! ```rust,no_run
//! use chainstate_core::{Column, ScalarType, Schema, StoreConfig, Table};
//! use chainstate_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Schema::new(vec![Table::new("Account", vec![Column::id(ScalarType::Hex)])]);
//! let config = StoreConfig::new(schema, "v1")?;
//!
//! // File-backed (persistent)
//! let store = SqliteStore::open("./state.db", config.clone()).await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory(config).await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteJournalMode,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row as _, SqlitePool};
use tracing::{debug, error, info, warn};

use chainstate_core::filter::Operator;
use chainstate_core::schema::{EFFECTIVE_FROM, EFFECTIVE_TO, ID_COLUMN};
use chainstate_core::store::{merge, plan_update, RevertSummary, UpdatePlan, VersionedStore};
use chainstate_core::value::{decode_bigint, encode_bigint, normalize_hex};
use chainstate_core::{
    Checkpoint, Column, Filter, OrderDirection, Row, RowData, ScalarType, StoreConfig, StoreError,
    Table, Validator, Value,
};

use crate::ddl::{self, quote};

/// Connection settings for file-backed stores.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Maximum pool size.
    pub max_connections: u32,
    /// How long a writer waits for the database lock.
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-backed versioned store.
pub struct SqliteStore {
    pool: SqlitePool,
    config: StoreConfig,
}

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path` and create the
    /// store's tables.
    ///
    /// The path may be a plain file path (`"./state.db"`) or a full
    /// SQLite URL (`"sqlite:./state.db"`).
    pub async fn open(path: &str, config: StoreConfig) -> Result<Self, StoreError> {
        Self::open_with(path, config, SqliteOptions::default()).await
    }

    pub async fn open_with(
        path: &str,
        config: StoreConfig,
        options: SqliteOptions,
    ) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let connect = SqliteConnectOptions::from_str(&url)
            .map_err(storage)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await
            .map_err(storage)?;
        Self::init(pool, config).await
    }

    /// Open a private in-memory database.
    ///
    /// The pool holds exactly one connection for the store's lifetime;
    /// all data is lost when the store is dropped.
    pub async fn in_memory(config: StoreConfig) -> Result<Self, StoreError> {
        let connect = SqliteConnectOptions::from_str("sqlite::memory:").map_err(storage)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(connect)
            .await
            .map_err(storage)?;
        Self::init(pool, config).await
    }

    async fn init(pool: SqlitePool, config: StoreConfig) -> Result<Self, StoreError> {
        for stmt in ddl::create_all(&config) {
            sqlx::query(&stmt).execute(&pool).await.map_err(storage)?;
        }
        info!(
            version = config.version_id(),
            tables = config.schema().tables.len(),
            "sqlite store ready"
        );
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drop every physical table owned by this store.
    pub async fn teardown(&self) -> Result<(), StoreError> {
        for stmt in ddl::drop_all(&self.config) {
            sqlx::query(&stmt).execute(&self.pool).await.map_err(storage)?;
        }
        info!(version = self.config.version_id(), "sqlite store torn down");
        Ok(())
    }

    fn validator(&self, table: &str) -> Result<Validator<'_>, StoreError> {
        Validator::new(self.config.schema(), table)
    }
}

// ─── Write transactions ──────────────────────────────────────────────────────

/// A `BEGIN IMMEDIATE` transaction holding one pooled connection.
///
/// Dropped without [`WriteTx::commit`] (an error or a cancelled future),
/// the transaction is rolled back before the connection returns to the
/// pool.
struct WriteTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTx {
    async fn begin(pool: &SqlitePool) -> Result<Self, StoreError> {
        let mut conn = pool.acquire().await.map_err(storage)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(storage)?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> &mut SqliteConnection {
        match self.conn.as_deref_mut() {
            Some(conn) => conn,
            None => unreachable!("transaction already finished"),
        }
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(storage(e));
        }
        Ok(())
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                        warn!(error = %e, "rollback failed");
                    }
                });
            }
            // Closing the connection discards the open transaction.
            Err(_) => drop(conn.detach()),
        }
    }
}

// ─── Value mapping ───────────────────────────────────────────────────────────

/// A bound SQL parameter.
#[derive(Debug, Clone)]
enum Param {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all(mut query: SqliteQuery<'_>, params: Vec<Param>) -> SqliteQuery<'_> {
    for param in params {
        query = match param {
            Param::Null => query.bind(None::<String>),
            Param::Int(i) => query.bind(i),
            Param::Real(f) => query.bind(f),
            Param::Text(s) => query.bind(s),
            Param::Blob(b) => query.bind(b),
        };
    }
    query
}

fn to_param(value: &Value) -> Param {
    match value {
        Value::Null => Param::Null,
        Value::String(s) => Param::Text(s.clone()),
        Value::Hex(s) => Param::Text(normalize_hex(s)),
        Value::Int(i) => Param::Int(*i),
        Value::Float(f) => Param::Real(*f),
        Value::Boolean(b) => Param::Int(i64::from(*b)),
        Value::BigInt(i) => Param::Blob(encode_bigint(*i).to_vec()),
        Value::List(_) => Param::Text(value.clone().into_normalized().to_json().to_string()),
    }
}

/// Parameter for comparing against one element of a JSON list column,
/// as produced by `json_each`.
fn list_item_param(value: &Value) -> Param {
    match value {
        Value::String(s) => Param::Text(s.clone()),
        Value::Hex(s) => Param::Text(normalize_hex(s)),
        Value::Int(i) => Param::Int(*i),
        Value::Float(f) => Param::Real(*f),
        Value::Boolean(b) => Param::Int(i64::from(*b)),
        Value::BigInt(i) => Param::Text(i.to_string()),
        Value::Null | Value::List(_) => Param::Null,
    }
}

fn checkpoint_param(checkpoint: Checkpoint) -> Param {
    Param::Blob(checkpoint.encode().to_vec())
}

fn corrupt(table: &Table, column: &str, what: &str) -> StoreError {
    StoreError::Storage(format!("corrupt {what} in {}.{column}", table.name))
}

fn decode_value(table: &Table, column: &Column, row: &SqliteRow) -> Result<Value, StoreError> {
    let name = column.name.as_str();
    let ty = column.scalar_type().unwrap_or(ScalarType::String);

    if column.is_list() {
        let Some(text) = row.try_get::<Option<String>, _>(name).map_err(storage)? else {
            return Ok(Value::Null);
        };
        let json: serde_json::Value = serde_json::from_str(&text).map_err(storage)?;
        let items = json
            .as_array()
            .ok_or_else(|| corrupt(table, name, "list"))?
            .iter()
            .map(|item| Value::from_json(ty, item).ok_or_else(|| corrupt(table, name, "list item")))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::List(items));
    }

    let value = match ty {
        ScalarType::String => row
            .try_get::<Option<String>, _>(name)
            .map_err(storage)?
            .map(Value::String),
        ScalarType::Hex => row
            .try_get::<Option<String>, _>(name)
            .map_err(storage)?
            .map(Value::Hex),
        ScalarType::Int => row
            .try_get::<Option<i64>, _>(name)
            .map_err(storage)?
            .map(Value::Int),
        ScalarType::Boolean => row
            .try_get::<Option<i64>, _>(name)
            .map_err(storage)?
            .map(|i| Value::Boolean(i != 0)),
        ScalarType::Float => row
            .try_get::<Option<f64>, _>(name)
            .map_err(storage)?
            .map(Value::Float),
        ScalarType::BigInt => row
            .try_get::<Option<Vec<u8>>, _>(name)
            .map_err(storage)?
            .map(|b| decode_bigint(&b).ok_or_else(|| corrupt(table, name, "bigint")))
            .transpose()?
            .map(Value::BigInt),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_checkpoint(row: &SqliteRow, column: &str) -> Result<Checkpoint, StoreError> {
    let bytes: Vec<u8> = row.try_get(column).map_err(storage)?;
    Ok(Checkpoint::decode(&bytes)?)
}

fn decode_row(table: &Table, row: &SqliteRow) -> Result<Row, StoreError> {
    let id_column = table
        .column(ID_COLUMN)
        .ok_or_else(|| StoreError::UnknownTable(table.name.clone()))?;
    let mut data = RowData::new();
    for column in table.data_columns() {
        data.insert(column.name.clone(), decode_value(table, column, row)?);
    }
    Ok(Row {
        id: decode_value(table, id_column, row)?,
        data,
        effective_from: decode_checkpoint(row, EFFECTIVE_FROM)?,
        effective_to: decode_checkpoint(row, EFFECTIVE_TO)?,
    })
}

// ─── Query building ──────────────────────────────────────────────────────────

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// SQL for one filter condition. Matches [`chainstate_core::Condition::matches`]:
/// apart from the explicit null tests, no predicate matches a NULL column.
fn condition_sql(column: &str, op: &Operator, params: &mut Vec<Param>) -> String {
    let c = quote(column);
    let (sql_op, v) = match op {
        Operator::Equals(Value::Null) => return format!("{c} IS NULL"),
        Operator::Not(Value::Null) => return format!("{c} IS NOT NULL"),
        Operator::Equals(v) => ("=", v),
        Operator::Not(v) => ("<>", v),
        Operator::Gt(v) => (">", v),
        Operator::Gte(v) => (">=", v),
        Operator::Lt(v) => ("<", v),
        Operator::Lte(v) => ("<=", v),
        _ => return pattern_sql(&c, op, params),
    };
    params.push(to_param(v));
    format!("{c} {sql_op} ?")
}

fn pattern_sql(c: &str, op: &Operator, params: &mut Vec<Param>) -> String {
    match op {
        Operator::In(vs) if vs.is_empty() => "0".into(),
        Operator::In(vs) => {
            params.extend(vs.iter().map(to_param));
            format!("{c} IN ({})", placeholders(vs.len()))
        }
        Operator::NotIn(vs) if vs.is_empty() => format!("{c} IS NOT NULL"),
        Operator::NotIn(vs) => {
            params.extend(vs.iter().map(to_param));
            format!("{c} NOT IN ({})", placeholders(vs.len()))
        }
        Operator::Contains(s) if s.is_empty() => format!("{c} IS NOT NULL"),
        Operator::Contains(s) => {
            params.push(Param::Text(s.clone()));
            format!("instr({c}, ?) > 0")
        }
        Operator::NotContains(s) if s.is_empty() => "0".into(),
        Operator::NotContains(s) => {
            params.push(Param::Text(s.clone()));
            format!("instr({c}, ?) = 0")
        }
        Operator::StartsWith(s) | Operator::NotStartsWith(s) => {
            params.push(Param::Int(s.chars().count() as i64));
            params.push(Param::Text(s.clone()));
            let eq = if matches!(op, Operator::StartsWith(_)) { "=" } else { "<>" };
            format!("substr({c}, 1, ?) {eq} ?")
        }
        Operator::EndsWith(s) if s.is_empty() => format!("{c} IS NOT NULL"),
        Operator::NotEndsWith(s) if s.is_empty() => "0".into(),
        Operator::EndsWith(s) | Operator::NotEndsWith(s) => {
            params.push(Param::Int(-(s.chars().count() as i64)));
            params.push(Param::Text(s.clone()));
            let eq = if matches!(op, Operator::EndsWith(_)) { "=" } else { "<>" };
            format!("substr({c}, ?) {eq} ?")
        }
        Operator::Has(v) => {
            params.push(list_item_param(v));
            format!("EXISTS (SELECT 1 FROM json_each({c}) WHERE json_each.value = ?)")
        }
        Operator::NotHas(v) => {
            params.push(list_item_param(v));
            format!(
                "{c} IS NOT NULL AND NOT EXISTS (SELECT 1 FROM json_each({c}) WHERE json_each.value = ?)"
            )
        }
        Operator::Equals(_)
        | Operator::Not(_)
        | Operator::Gt(_)
        | Operator::Gte(_)
        | Operator::Lt(_)
        | Operator::Lte(_) => unreachable!("comparisons are handled by condition_sql"),
    }
}

fn find_many_sql(physical: &str, filter: &Filter) -> (String, Vec<Param>) {
    let mut params = vec![checkpoint_param(filter.checkpoint), checkpoint_param(filter.checkpoint)];
    let mut clauses = vec![format!(
        "{} <= ? AND {} >= ?",
        quote(EFFECTIVE_FROM),
        quote(EFFECTIVE_TO)
    )];
    for cond in &filter.conditions {
        clauses.push(format!("({})", condition_sql(&cond.column, &cond.op, &mut params)));
    }

    let id = quote(ID_COLUMN);
    let order = match &filter.order_by {
        Some(order) => {
            let dir = match order.direction {
                OrderDirection::Asc => "ASC",
                OrderDirection::Desc => "DESC",
            };
            format!("{} {dir}, {id} ASC", quote(&order.column))
        }
        None => format!("{id} ASC"),
    };

    params.push(Param::Int(filter.first.map_or(-1, |n| n as i64)));
    params.push(Param::Int(filter.skip.unwrap_or(0) as i64));
    let sql = format!(
        "SELECT * FROM {} WHERE {} ORDER BY {order} LIMIT ? OFFSET ?",
        quote(physical),
        clauses.join(" AND ")
    );
    (sql, params)
}

// ─── Statement helpers (run inside a WriteTx) ────────────────────────────────

async fn fetch_current(
    conn: &mut SqliteConnection,
    physical: &str,
    table: &Table,
    id: &Value,
) -> Result<Option<Row>, StoreError> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ? AND {} = ?",
        quote(physical),
        quote(ID_COLUMN),
        quote(EFFECTIVE_TO)
    );
    let row = bind_all(
        sqlx::query(&sql),
        vec![to_param(id), checkpoint_param(Checkpoint::LATEST)],
    )
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage)?;
    row.map(|r| decode_row(table, &r)).transpose()
}

/// End of the newest version of `id` that reaches `checkpoint`, if any.
async fn overlapping_end(
    conn: &mut SqliteConnection,
    physical: &str,
    id: &Value,
    checkpoint: Checkpoint,
) -> Result<Option<Checkpoint>, StoreError> {
    let sql = format!(
        "SELECT {to} FROM {} WHERE {} = ? AND {to} >= ? ORDER BY {to} DESC LIMIT 1",
        quote(physical),
        quote(ID_COLUMN),
        to = quote(EFFECTIVE_TO)
    );
    let row = bind_all(sqlx::query(&sql), vec![to_param(id), checkpoint_param(checkpoint)])
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?;
    row.map(|r| decode_checkpoint(&r, EFFECTIVE_TO)).transpose()
}

async fn insert_version(
    conn: &mut SqliteConnection,
    physical: &str,
    table: &Table,
    row: &Row,
) -> Result<(), StoreError> {
    let mut columns = vec![quote(ID_COLUMN)];
    let mut params = vec![to_param(&row.id)];
    for column in table.data_columns() {
        columns.push(quote(&column.name));
        params.push(to_param(row.data.get(&column.name).unwrap_or(&Value::Null)));
    }
    columns.push(quote(EFFECTIVE_FROM));
    columns.push(quote(EFFECTIVE_TO));
    params.push(checkpoint_param(row.effective_from));
    params.push(checkpoint_param(row.effective_to));

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(physical),
        columns.join(", "),
        placeholders(params.len())
    );
    bind_all(sqlx::query(&sql), params)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    Ok(())
}

async fn update_current_in_place(
    conn: &mut SqliteConnection,
    physical: &str,
    id: &Value,
    data: &RowData,
) -> Result<(), StoreError> {
    if data.is_empty() {
        return Ok(());
    }
    let sets: Vec<String> = data.keys().map(|k| format!("{} = ?", quote(k))).collect();
    let mut params: Vec<Param> = data.values().map(to_param).collect();
    params.push(to_param(id));
    params.push(checkpoint_param(Checkpoint::LATEST));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ? AND {} = ?",
        quote(physical),
        sets.join(", "),
        quote(ID_COLUMN),
        quote(EFFECTIVE_TO)
    );
    bind_all(sqlx::query(&sql), params)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    Ok(())
}

async fn close_current(
    conn: &mut SqliteConnection,
    physical: &str,
    id: &Value,
    effective_to: Checkpoint,
) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE {} SET {to} = ? WHERE {} = ? AND {to} = ?",
        quote(physical),
        quote(ID_COLUMN),
        to = quote(EFFECTIVE_TO)
    );
    bind_all(
        sqlx::query(&sql),
        vec![
            checkpoint_param(effective_to),
            to_param(id),
            checkpoint_param(Checkpoint::LATEST),
        ],
    )
    .execute(&mut *conn)
    .await
    .map_err(storage)?;
    Ok(())
}

async fn remove_version(
    conn: &mut SqliteConnection,
    physical: &str,
    id: &Value,
    effective_from: Checkpoint,
) -> Result<(), StoreError> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ? AND {} = ?",
        quote(physical),
        quote(ID_COLUMN),
        quote(EFFECTIVE_FROM)
    );
    bind_all(sqlx::query(&sql), vec![to_param(id), checkpoint_param(effective_from)])
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
    Ok(())
}

async fn apply_update(
    conn: &mut SqliteConnection,
    physical: &str,
    table: &Table,
    current: Row,
    checkpoint: Checkpoint,
    data: RowData,
) -> Result<Row, StoreError> {
    match plan_update(&table.name, &current.id, current.effective_from, checkpoint)? {
        UpdatePlan::InPlace => {
            update_current_in_place(conn, physical, &current.id, &data).await?;
            Ok(Row {
                data: merge(&current.data, data),
                ..current
            })
        }
        UpdatePlan::CloseAndInsert => {
            close_current(conn, physical, &current.id, checkpoint.prev()).await?;
            let row = Row {
                data: merge(&current.data, data),
                id: current.id,
                effective_from: checkpoint,
                effective_to: Checkpoint::LATEST,
            };
            insert_version(conn, physical, table, &row).await?;
            Ok(row)
        }
    }
}

async fn revert_physical(
    conn: &mut SqliteConnection,
    physical: &str,
    safe: Checkpoint,
) -> Result<RevertSummary, StoreError> {
    let delete = format!("DELETE FROM {} WHERE {} > ?", quote(physical), quote(EFFECTIVE_FROM));
    let deleted = bind_all(sqlx::query(&delete), vec![checkpoint_param(safe)])
        .execute(&mut *conn)
        .await
        .map_err(storage)?
        .rows_affected();

    let reopen = format!(
        "UPDATE {} SET {to} = ? WHERE {to} >= ? AND {to} <> ?",
        quote(physical),
        to = quote(EFFECTIVE_TO)
    );
    let reopened = bind_all(
        sqlx::query(&reopen),
        vec![
            checkpoint_param(Checkpoint::LATEST),
            checkpoint_param(safe),
            checkpoint_param(Checkpoint::LATEST),
        ],
    )
    .execute(&mut *conn)
    .await
    .map_err(storage)?
    .rows_affected();

    Ok(RevertSummary { deleted, reopened })
}

// ─── VersionedStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl VersionedStore for SqliteStore {
    async fn find_unique(
        &self,
        table: &str,
        id: &Value,
        checkpoint: Checkpoint,
    ) -> Result<Option<Row>, StoreError> {
        let descriptor = self.validator(table)?.table();
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? AND {} <= ? AND {} >= ?",
            quote(&self.config.physical_name(table)),
            quote(ID_COLUMN),
            quote(EFFECTIVE_FROM),
            quote(EFFECTIVE_TO)
        );
        let rows = bind_all(
            sqlx::query(&sql),
            vec![to_param(id), checkpoint_param(checkpoint), checkpoint_param(checkpoint)],
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        if rows.len() > 1 {
            error!(table, id = %id, checkpoint = %checkpoint, count = rows.len(), "overlapping versions");
            return Err(StoreError::MultipleRecordsFound {
                table: table.to_string(),
                id: id.to_string(),
                checkpoint,
                count: rows.len(),
            });
        }
        rows.first().map(|r| decode_row(descriptor, r)).transpose()
    }

    async fn find_many(&self, table: &str, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let descriptor = self.validator(table)?.table();
        filter.validate(descriptor)?;
        let filter = filter.normalized(descriptor);
        let (sql, params) = find_many_sql(&self.config.physical_name(table), &filter);
        let rows = bind_all(sqlx::query(&sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(|r| decode_row(descriptor, r)).collect()
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
        let physical = self.config.physical_name(table);

        let mut tx = WriteTx::begin(&self.pool).await?;
        if overlapping_end(tx.conn(), &physical, &id, checkpoint).await?.is_some() {
            return Err(StoreError::RecordAlreadyExists {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        let row = Row {
            id,
            data,
            effective_from: checkpoint,
            effective_to: Checkpoint::LATEST,
        };
        insert_version(tx.conn(), &physical, validator.table(), &row).await?;
        tx.commit().await?;

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
        let physical = self.config.physical_name(table);

        let mut tx = WriteTx::begin(&self.pool).await?;
        let current = fetch_current(tx.conn(), &physical, validator.table(), &id)
            .await?
            .ok_or_else(|| StoreError::RecordNotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;
        let row = apply_update(tx.conn(), &physical, validator.table(), current, checkpoint, data).await?;
        tx.commit().await?;

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
        let physical = self.config.physical_name(table);

        let mut tx = WriteTx::begin(&self.pool).await?;
        let row = match fetch_current(tx.conn(), &physical, validator.table(), &id).await? {
            Some(current) => {
                apply_update(tx.conn(), &physical, validator.table(), current, checkpoint, update_data)
                    .await?
            }
            None => {
                if let Some(end) = overlapping_end(tx.conn(), &physical, &id, checkpoint).await? {
                    return Err(StoreError::TemporalOrderViolation {
                        table: table.to_string(),
                        id: id.to_string(),
                        current: end.next(),
                        attempted: checkpoint,
                    });
                }
                let row = Row {
                    id: id.clone(),
                    data: create_data,
                    effective_from: checkpoint,
                    effective_to: Checkpoint::LATEST,
                };
                insert_version(tx.conn(), &physical, validator.table(), &row).await?;
                row
            }
        };
        tx.commit().await?;

        debug!(table, id = %id, checkpoint = %checkpoint, "record upserted");
        Ok(row)
    }

    async fn delete(
        &self,
        table: &str,
        id: &Value,
        checkpoint: Checkpoint,
    ) -> Result<bool, StoreError> {
        let validator = self.validator(table)?;
        let id = &validator.id(id)?;
        let physical = self.config.physical_name(table);

        let mut tx = WriteTx::begin(&self.pool).await?;
        let Some(current) = fetch_current(tx.conn(), &physical, validator.table(), id).await? else {
            tx.commit().await?;
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
            remove_version(tx.conn(), &physical, id, checkpoint).await?;
        } else {
            close_current(tx.conn(), &physical, id, checkpoint.prev()).await?;
        }
        tx.commit().await?;

        debug!(table, id = %id, checkpoint = %checkpoint, "record deleted");
        Ok(true)
    }

    async fn revert_table(
        &self,
        table: &str,
        safe: Checkpoint,
    ) -> Result<RevertSummary, StoreError> {
        self.validator(table)?;
        let physical = self.config.physical_name(table);

        let mut tx = WriteTx::begin(&self.pool).await?;
        let summary = revert_physical(tx.conn(), &physical, safe).await?;
        tx.commit().await?;

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
        let mut tx = WriteTx::begin(&self.pool).await?;
        let mut summary = RevertSummary::default();
        for table in &self.config.schema().tables {
            let physical = self.config.physical_name(&table.name);
            summary += revert_physical(tx.conn(), &physical, safe).await?;
        }
        tx.commit().await?;

        info!(
            safe = %safe,
            deleted = summary.deleted,
            reopened = summary.reopened,
            "store reverted"
        );
        Ok(summary)
    }

    async fn history(&self, table: &str, id: &Value) -> Result<Vec<Row>, StoreError> {
        let descriptor = self.validator(table)?.table();
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC",
            quote(&self.config.physical_name(table)),
            quote(ID_COLUMN),
            quote(EFFECTIVE_FROM)
        );
        let rows = bind_all(sqlx::query(&sql), vec![to_param(id)])
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(|r| decode_row(descriptor, r)).collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chainstate_core::{row_data, EnumType, Schema};

    fn config() -> StoreConfig {
        let schema = Schema::new(vec![Table::new(
            "Token",
            vec![
                Column::id(ScalarType::BigInt),
                Column::scalar("owner", ScalarType::Hex),
                Column::scalar("price", ScalarType::Float).nullable(),
                Column::scalar("burned", ScalarType::Boolean),
                Column::scalar("tags", ScalarType::String).list(),
                Column::enumeration("kind", "Kind"),
            ],
        )])
        .with_enum(EnumType::new("Kind", &["ERC721", "ERC1155"]));
        StoreConfig::new(schema, "t1").unwrap()
    }

    fn token(owner: &str) -> RowData {
        row_data([
            ("owner", Value::hex(owner)),
            ("burned", Value::Boolean(false)),
            ("tags", Value::List(vec!["rare".into(), "art".into()])),
            ("kind", "ERC721".into()),
        ])
    }

    fn at(block: u64) -> Checkpoint {
        Checkpoint::block(1, block)
    }

    #[tokio::test]
    async fn values_roundtrip_through_sqlite() {
        let store = SqliteStore::in_memory(config()).await.unwrap();
        let id = Value::BigInt(-42);
        let created = store.create("Token", id.clone(), at(1), token("0xAB")).await.unwrap();

        let loaded = store.find_latest("Token", &id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.get("owner"), Some(&Value::hex("0xab")));
        assert_eq!(loaded.get("price"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn failed_write_rolls_back() {
        let store = SqliteStore::in_memory(config()).await.unwrap();
        let id = Value::BigInt(1);
        store.create("Token", id.clone(), at(5), token("0x01")).await.unwrap();

        let err = store
            .update("Token", id.clone(), at(4), row_data([("burned", true)]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TemporalOrderViolation { .. }));

        // The connection is usable again and nothing changed.
        let history = store.history("Token", &id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].get("burned"), Some(&Value::Boolean(false)));
    }

    #[tokio::test]
    async fn enum_constraint_is_enforced_by_validation() {
        let store = SqliteStore::in_memory(config()).await.unwrap();
        let mut data = token("0x01");
        data.insert("kind".into(), "ERC20".into());
        let err = store.create("Token", Value::BigInt(1), at(1), data).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidData { .. }));
    }

    #[tokio::test]
    async fn teardown_drops_tables() {
        let store = SqliteStore::in_memory(config()).await.unwrap();
        store.teardown().await.unwrap();
        let err = store.history("Token", &Value::BigInt(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
    }

    #[test]
    fn find_many_sql_shape() {
        let filter = Filter::new()
            .eq("owner", Value::hex("0x01"))
            .condition("tags", Operator::Has("rare".into()))
            .order_by("price", OrderDirection::Desc)
            .first(10);
        let (sql, params) = find_many_sql("Token_t1", &filter);
        assert!(sql.contains("(\"owner\" = ?)"));
        assert!(sql.contains("json_each(\"tags\")"));
        assert!(sql.ends_with("ORDER BY \"price\" DESC, \"id\" ASC LIMIT ? OFFSET ?"));
        assert_eq!(params.len(), 6);
    }

    #[test]
    fn null_tests_bind_nothing() {
        let mut params = Vec::new();
        assert_eq!(
            condition_sql("price", &Operator::Equals(Value::Null), &mut params),
            "\"price\" IS NULL"
        );
        assert_eq!(
            condition_sql("price", &Operator::In(vec![]), &mut params),
            "0"
        );
        assert!(params.is_empty());
    }
}
