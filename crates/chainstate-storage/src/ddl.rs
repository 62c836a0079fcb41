//! SQL DDL for versioned tables.
//!
//! Every logical table becomes one physical table named
//! `<table>_<version_id>` holding all versions of all rows:
//!
//! | column           | SQL type                    |
//! |------------------|-----------------------------|
//! | string, hex      | `TEXT`                      |
//! | int, boolean     | `INTEGER`                   |
//! | float            | `REAL`                      |
//! | bigint           | `BLOB` (16 bytes, ordered)  |
//! | enum             | `TEXT` + `CHECK (... IN)`   |
//! | any list         | `TEXT` (JSON array)         |
//! | `effective_from` | `BLOB` (40-byte checkpoint) |
//! | `effective_to`   | `BLOB` (40-byte checkpoint) |
//!
//! `(id, effective_to)` is unique, so at most one version per id is open.
//! References are plain columns; no foreign keys are declared since the
//! referenced row may not exist yet at write time.

use chainstate_core::schema::{EFFECTIVE_FROM, EFFECTIVE_TO};
use chainstate_core::{Column, ColumnKind, ScalarType, Schema, StoreConfig, Table};

/// Quote an identifier. Identifiers are validated at schema load, so this
/// never needs escaping.
pub fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// SQL storage type of a persisted column.
pub fn sql_type(column: &Column) -> &'static str {
    if column.is_list() {
        return "TEXT";
    }
    match column.scalar_type() {
        Some(ScalarType::String | ScalarType::Hex) | None => "TEXT",
        Some(ScalarType::Int | ScalarType::Boolean) => "INTEGER",
        Some(ScalarType::Float) => "REAL",
        Some(ScalarType::BigInt) => "BLOB",
    }
}

fn column_def(schema: &Schema, column: &Column) -> String {
    let name = quote(&column.name);
    let mut def = format!("{name} {}", sql_type(column));
    if !column.is_nullable() {
        def.push_str(" NOT NULL");
    }
    if let ColumnKind::Enum {
        name: enum_name,
        list: false,
        ..
    } = &column.kind
    {
        if let Some(e) = schema.enum_type(enum_name) {
            let values: Vec<String> = e.values.iter().map(|v| quote_literal(v)).collect();
            def.push_str(&format!(" CHECK ({name} IN ({}))", values.join(", ")));
        }
    }
    def
}

/// `CREATE TABLE` and `CREATE INDEX` statements for one table.
pub fn create_table(config: &StoreConfig, table: &Table) -> Vec<String> {
    let physical = config.physical_name(&table.name);
    let mut defs: Vec<String> = table
        .persisted_columns()
        .map(|c| column_def(config.schema(), c))
        .collect();
    defs.push(format!("{} BLOB NOT NULL", quote(EFFECTIVE_FROM)));
    defs.push(format!("{} BLOB NOT NULL", quote(EFFECTIVE_TO)));
    defs.push(format!(
        "CONSTRAINT {} UNIQUE (\"id\", {})",
        quote(&format!("{physical}_id_effective_to_unique")),
        quote(EFFECTIVE_TO)
    ));

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote(&physical),
            defs.join(",\n    ")
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({}, {})",
            quote(&format!("{physical}_effective_idx")),
            quote(&physical),
            quote(EFFECTIVE_FROM),
            quote(EFFECTIVE_TO)
        ),
    ]
}

/// DDL for every table in the store's schema.
pub fn create_all(config: &StoreConfig) -> Vec<String> {
    config
        .schema()
        .tables
        .iter()
        .flat_map(|t| create_table(config, t))
        .collect()
}

/// `DROP TABLE` statements for every table in the store's schema.
pub fn drop_all(config: &StoreConfig) -> Vec<String> {
    config
        .schema()
        .tables
        .iter()
        .map(|t| format!("DROP TABLE IF EXISTS {}", quote(&config.physical_name(&t.name))))
        .collect()
}
