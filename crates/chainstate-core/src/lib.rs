//! chainstate-core: types shared by the reorg-safe versioned store.
//!
//! # Architecture
//!
//! ```text
//! Driver ──► VersionedStore (store.rs; backends in chainstate-storage)
//!               ├── Checkpoint   (total order over chain positions)
//!               ├── Schema       (table/column descriptors, validated once)
//!               ├── Row / Value  (one version of an entity)
//!               ├── Filter       (find_many predicates, order, pagination)
//!               └── StoreConfig  (schema + version id → physical tables)
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod filter;
pub mod row;
pub mod schema;
pub mod store;
pub mod value;

pub use checkpoint::Checkpoint;
pub use config::StoreConfig;
pub use error::{CheckpointError, SchemaError, StoreError};
pub use filter::{Condition, Filter, Operator, OrderBy, OrderDirection};
pub use row::{row_data, Row, RowData, Validator};
pub use schema::{Column, ColumnKind, EnumType, ScalarType, Schema, Table};
pub use store::{merge, plan_update, RevertSummary, UpdatePlan, VersionedStore};
pub use value::Value;
