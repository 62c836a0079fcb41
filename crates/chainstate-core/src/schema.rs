//! Table descriptors.
//!
//! The schema is plain data handed to the store at construction and
//! validated once with [`Schema::validate`]. Every table has exactly one
//! `id` column; every persisted table also carries the two checkpoint
//! columns [`EFFECTIVE_FROM`] and [`EFFECTIVE_TO`], which is why those names
//! are reserved.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Name of the primary key column.
pub const ID_COLUMN: &str = "id";
/// Start of a version's validity interval (inclusive).
pub const EFFECTIVE_FROM: &str = "effective_from";
/// End of a version's validity interval (inclusive).
pub const EFFECTIVE_TO: &str = "effective_to";

// ─── Column types ────────────────────────────────────────────────────────────

/// Semantic scalar type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Int,
    Float,
    Boolean,
    Hex,
    BigInt,
}

impl ScalarType {
    /// Types allowed for the `id` column.
    pub fn is_id_type(&self) -> bool {
        matches!(self, Self::String | Self::Int | Self::Hex | Self::BigInt)
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Boolean => write!(f, "boolean"),
            Self::Hex => write!(f, "hex"),
            Self::BigInt => write!(f, "bigint"),
        }
    }
}

/// The kind of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    /// A plain value (or list of values).
    Scalar {
        ty: ScalarType,
        #[serde(default)]
        nullable: bool,
        #[serde(default)]
        list: bool,
    },
    /// Holds the id of a row in another table, written as `"<table>.id"`.
    Reference {
        ty: ScalarType,
        #[serde(default)]
        nullable: bool,
        references: String,
    },
    /// Text restricted to the values of a declared enum.
    Enum {
        name: String,
        #[serde(default)]
        nullable: bool,
        #[serde(default)]
        list: bool,
    },
    /// Virtual one-to-one relation resolved through a reference column.
    One { reference_column: String },
    /// Virtual reverse relation: rows of `table` whose `column` points here.
    Many { table: String, column: String },
}

/// A named column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
}

impl Column {
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Scalar {
                ty,
                nullable: false,
                list: false,
            },
        }
    }

    /// The `id` column.
    pub fn id(ty: ScalarType) -> Self {
        Self::scalar(ID_COLUMN, ty)
    }

    pub fn reference(name: impl Into<String>, ty: ScalarType, target_table: &str) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Reference {
                ty,
                nullable: false,
                references: format!("{target_table}.{ID_COLUMN}"),
            },
        }
    }

    pub fn enumeration(name: impl Into<String>, enum_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Enum {
                name: enum_name.into(),
                nullable: false,
                list: false,
            },
        }
    }

    pub fn one(name: impl Into<String>, reference_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::One {
                reference_column: reference_column.into(),
            },
        }
    }

    pub fn many(name: impl Into<String>, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Many {
                table: table.into(),
                column: column.into(),
            },
        }
    }

    /// Mark the column nullable. No effect on virtual columns.
    pub fn nullable(mut self) -> Self {
        match &mut self.kind {
            ColumnKind::Scalar { nullable, .. }
            | ColumnKind::Reference { nullable, .. }
            | ColumnKind::Enum { nullable, .. } => *nullable = true,
            ColumnKind::One { .. } | ColumnKind::Many { .. } => {}
        }
        self
    }

    /// Mark the column as a list. No effect on references and virtual columns.
    pub fn list(mut self) -> Self {
        match &mut self.kind {
            ColumnKind::Scalar { list, .. } | ColumnKind::Enum { list, .. } => *list = true,
            _ => {}
        }
        self
    }

    /// Returns `true` for `One`/`Many` columns, which are not stored.
    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, ColumnKind::One { .. } | ColumnKind::Many { .. })
    }

    pub fn is_nullable(&self) -> bool {
        match self.kind {
            ColumnKind::Scalar { nullable, .. }
            | ColumnKind::Reference { nullable, .. }
            | ColumnKind::Enum { nullable, .. } => nullable,
            ColumnKind::One { .. } | ColumnKind::Many { .. } => true,
        }
    }

    pub fn is_list(&self) -> bool {
        match self.kind {
            ColumnKind::Scalar { list, .. } | ColumnKind::Enum { list, .. } => list,
            _ => false,
        }
    }

    /// The scalar type stored in this column (enums are strings).
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.kind {
            ColumnKind::Scalar { ty, .. } | ColumnKind::Reference { ty, .. } => Some(ty),
            ColumnKind::Enum { .. } => Some(ScalarType::String),
            ColumnKind::One { .. } | ColumnKind::Many { .. } => None,
        }
    }
}

// ─── Tables & schema ─────────────────────────────────────────────────────────

/// A table descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The id column's scalar type, if the table declares a valid one.
    pub fn id_type(&self) -> Option<ScalarType> {
        match self.column(ID_COLUMN)?.kind {
            ColumnKind::Scalar { ty, .. } => Some(ty),
            _ => None,
        }
    }

    /// Stored columns in declaration order, `id` included.
    pub fn persisted_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_virtual())
    }

    /// Stored columns other than `id`.
    pub fn data_columns(&self) -> impl Iterator<Item = &Column> {
        self.persisted_columns().filter(|c| c.name != ID_COLUMN)
    }
}

/// A named set of allowed string values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    pub values: Vec<String>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// The full set of tables (and enums) managed by a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
    #[serde(default)]
    pub enums: Vec<EnumType>,
}

impl Schema {
    pub fn new(tables: Vec<Table>) -> Self {
        Self {
            tables,
            enums: Vec::new(),
        }
    }

    pub fn with_enum(mut self, e: EnumType) -> Self {
        self.enums.push(e);
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn enum_type(&self, name: &str) -> Option<&EnumType> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Check the descriptor for structural errors.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for e in &self.enums {
            validate_enum(e)?;
        }

        let mut table_names = HashSet::new();
        for table in &self.tables {
            check_identifier(&table.name)?;
            if !table_names.insert(table.name.as_str()) {
                return Err(SchemaError::DuplicateTable(table.name.clone()));
            }
        }

        for table in &self.tables {
            self.validate_table(table)?;
        }
        Ok(())
    }

    fn validate_table(&self, table: &Table) -> Result<(), SchemaError> {
        let mut names = HashSet::new();
        for column in &table.columns {
            check_identifier(&column.name)?;
            if column.name == EFFECTIVE_FROM || column.name == EFFECTIVE_TO {
                return Err(SchemaError::ReservedColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
            if !names.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        let id = table
            .column(ID_COLUMN)
            .ok_or_else(|| SchemaError::MissingId(table.name.clone()))?;
        let invalid_id = |reason: &str| SchemaError::InvalidId {
            table: table.name.clone(),
            reason: reason.to_string(),
        };
        match id.kind {
            ColumnKind::Scalar { ty, nullable, list } => {
                if !ty.is_id_type() {
                    return Err(invalid_id(&format!("type {ty} cannot be an id")));
                }
                if nullable {
                    return Err(invalid_id("id cannot be nullable"));
                }
                if list {
                    return Err(invalid_id("id cannot be a list"));
                }
            }
            _ => return Err(invalid_id("id must be a scalar column")),
        }

        for column in &table.columns {
            let bad_ref = |reason: String| SchemaError::InvalidReference {
                table: table.name.clone(),
                column: column.name.clone(),
                reason,
            };
            match &column.kind {
                ColumnKind::Reference { ty, references, .. } => {
                    let target = references
                        .strip_suffix(".id")
                        .ok_or_else(|| bad_ref(format!("'{references}' must be '<table>.id'")))?;
                    let target_table = self
                        .table(target)
                        .ok_or_else(|| bad_ref(format!("unknown table '{target}'")))?;
                    match target_table.id_type() {
                        Some(target_ty) if target_ty == *ty => {}
                        Some(target_ty) => {
                            return Err(bad_ref(format!(
                                "type {ty} does not match {target}.id type {target_ty}"
                            )))
                        }
                        None => return Err(bad_ref(format!("'{target}' has no valid id"))),
                    }
                }
                ColumnKind::Enum { name, .. } => {
                    if self.enum_type(name).is_none() {
                        return Err(SchemaError::InvalidEnum {
                            name: name.clone(),
                            reason: format!("used by {}.{} but not declared", table.name, column.name),
                        });
                    }
                }
                ColumnKind::One { reference_column } => match table.column(reference_column) {
                    Some(Column {
                        kind: ColumnKind::Reference { .. },
                        ..
                    }) => {}
                    _ => {
                        return Err(bad_ref(format!(
                            "'{reference_column}' is not a reference column of '{}'",
                            table.name
                        )))
                    }
                },
                ColumnKind::Many {
                    table: other,
                    column: back,
                } => {
                    let other_table = self
                        .table(other)
                        .ok_or_else(|| bad_ref(format!("unknown table '{other}'")))?;
                    let expected = format!("{}.{ID_COLUMN}", table.name);
                    match other_table.column(back) {
                        Some(Column {
                            kind: ColumnKind::Reference { references, .. },
                            ..
                        }) if *references == expected => {}
                        _ => {
                            return Err(bad_ref(format!(
                                "'{other}.{back}' does not reference '{expected}'"
                            )))
                        }
                    }
                }
                ColumnKind::Scalar { .. } => {}
            }
        }
        Ok(())
    }
}

fn validate_enum(e: &EnumType) -> Result<(), SchemaError> {
    check_identifier(&e.name)?;
    if e.values.is_empty() {
        return Err(SchemaError::InvalidEnum {
            name: e.name.clone(),
            reason: "no values".into(),
        });
    }
    let mut seen = HashSet::new();
    for v in &e.values {
        if !seen.insert(v.as_str()) {
            return Err(SchemaError::InvalidEnum {
                name: e.name.clone(),
                reason: format!("duplicate value '{v}'"),
            });
        }
    }
    Ok(())
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(s: &str) -> Result<(), SchemaError> {
    if is_identifier(s) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(s.to_string()))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
