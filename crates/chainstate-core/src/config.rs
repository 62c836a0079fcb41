//! Store configuration.
//!
//! The schema and the version id are passed explicitly at construction.
//! Physical table names are `<table>_<version_id>`, so two stores with
//! different version ids can share one database (hot schema migration,
//! parallel tests).

use rand::Rng;

use crate::error::SchemaError;
use crate::schema::{is_identifier, Schema};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    schema: Schema,
    version_id: String,
}

impl StoreConfig {
    /// Validate `schema` and `version_id` and build a config.
    pub fn new(schema: Schema, version_id: impl Into<String>) -> Result<Self, SchemaError> {
        let version_id = version_id.into();
        if version_id.is_empty() || !version_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(SchemaError::InvalidVersionId(version_id));
        }
        schema.validate()?;
        Ok(Self { schema, version_id })
    }

    /// Like [`StoreConfig::new`] with a random 8-hex-character version id.
    pub fn with_random_version(schema: Schema) -> Result<Self, SchemaError> {
        let id: u32 = rand::thread_rng().gen();
        Self::new(schema, format!("{id:08x}"))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    /// Physical name of `table` for this store instance.
    pub fn physical_name(&self, table: &str) -> String {
        let name = format!("{table}_{}", self.version_id);
        debug_assert!(is_identifier(&name));
        name
    }
}
