//! Versioned rows and write-payload validation.

use std::collections::BTreeMap;

use crate::checkpoint::Checkpoint;
use crate::error::StoreError;
use crate::schema::{ColumnKind, Schema, Table, ID_COLUMN};
use crate::value::Value;

/// Column values of a row, keyed by column name (`id` excluded).
pub type RowData = BTreeMap<String, Value>;

/// One version of an entity, valid over `[effective_from, effective_to]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: Value,
    pub data: RowData,
    pub effective_from: Checkpoint,
    pub effective_to: Checkpoint,
}

impl Row {
    /// Value of `column`; `id` is looked up too.
    pub fn get(&self, column: &str) -> Option<&Value> {
        if column == ID_COLUMN {
            Some(&self.id)
        } else {
            self.data.get(column)
        }
    }

    /// Returns `true` if this is the open (current) version.
    pub fn is_current(&self) -> bool {
        self.effective_to.is_latest()
    }

    /// Returns `true` if `checkpoint` falls inside this version's interval.
    pub fn is_valid_at(&self, checkpoint: Checkpoint) -> bool {
        self.effective_from <= checkpoint && checkpoint <= self.effective_to
    }
}

/// Build a [`RowData`] from `(column, value)` pairs.
///
/// ```
/// use chainstate_core::{row_data, Value};
/// let data = row_data([("owner", Value::hex("0xAB")), ("count", Value::Int(1))]);
/// assert_eq!(data.len(), 2);
/// ```
pub fn row_data<K, V, I>(pairs: I) -> RowData
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Validates write payloads against a schema.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    schema: &'a Schema,
    table: &'a Table,
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a Schema, table_name: &str) -> Result<Self, StoreError> {
        let table = schema
            .table(table_name)
            .ok_or_else(|| StoreError::UnknownTable(table_name.to_string()))?;
        Ok(Self { schema, table })
    }

    pub fn table(&self) -> &'a Table {
        self.table
    }

    /// Check an id value against the table's id type and return its
    /// canonical form.
    pub fn id(&self, id: &Value) -> Result<Value, StoreError> {
        let ty = self
            .table
            .id_type()
            .ok_or_else(|| StoreError::invalid_data(&self.table.name, "table has no id"))?;
        if id.is_scalar_of(ty) {
            Ok(id.clone().into_normalized())
        } else {
            Err(StoreError::invalid_data(
                &self.table.name,
                format!("id must be {ty}, got {}", id.type_name()),
            ))
        }
    }

    /// Validate a full create payload and return it with every stored
    /// column present (missing nullable columns become `Null`).
    pub fn create(&self, data: RowData) -> Result<RowData, StoreError> {
        self.check_columns(&data)?;
        let mut full = normalize(data);
        for column in self.table.data_columns() {
            if !full.contains_key(&column.name) {
                if column.is_nullable() {
                    full.insert(column.name.clone(), Value::Null);
                } else {
                    return Err(StoreError::invalid_data(
                        &self.table.name,
                        format!("missing required column '{}'", column.name),
                    ));
                }
            }
        }
        Ok(full)
    }

    /// Validate a partial update payload.
    pub fn update(&self, data: RowData) -> Result<RowData, StoreError> {
        self.check_columns(&data)?;
        Ok(normalize(data))
    }

    fn check_columns(&self, data: &RowData) -> Result<(), StoreError> {
        let table = &self.table.name;
        for (name, value) in data {
            if name == ID_COLUMN {
                return Err(StoreError::invalid_data(
                    table,
                    "'id' is passed separately and cannot be written",
                ));
            }
            let column = self.table.column(name).ok_or_else(|| {
                StoreError::invalid_data(table, format!("unknown column '{name}'"))
            })?;
            if column.is_virtual() {
                return Err(StoreError::invalid_data(
                    table,
                    format!("column '{name}' is virtual and cannot be written"),
                ));
            }
            if value.is_null() {
                if column.is_nullable() {
                    continue;
                }
                return Err(StoreError::invalid_data(
                    table,
                    format!("column '{name}' is not nullable"),
                ));
            }
            self.check_value(name, &column.kind, value)?;
        }
        Ok(())
    }

    fn check_value(&self, name: &str, kind: &ColumnKind, value: &Value) -> Result<(), StoreError> {
        let table = &self.table.name;
        let mismatch = |expected: String| {
            StoreError::invalid_data(
                table,
                format!("column '{name}' expects {expected}, got {}", value.type_name()),
            )
        };
        if !value.is_finite() {
            return Err(StoreError::invalid_data(
                table,
                format!("column '{name}' does not accept NaN or infinite floats"),
            ));
        }
        match kind {
            ColumnKind::Scalar { ty, list: false, .. } | ColumnKind::Reference { ty, .. } => {
                if !value.is_scalar_of(*ty) {
                    return Err(mismatch(ty.to_string()));
                }
            }
            ColumnKind::Scalar { ty, list: true, .. } => {
                let items = value.as_list().ok_or_else(|| mismatch(format!("{ty}[]")))?;
                if !items.iter().all(|v| v.is_scalar_of(*ty)) {
                    return Err(mismatch(format!("{ty}[]")));
                }
            }
            ColumnKind::Enum { name: enum_name, list, .. } => {
                let allowed = self.schema.enum_type(enum_name).ok_or_else(|| {
                    StoreError::invalid_data(table, format!("undeclared enum '{enum_name}'"))
                })?;
                let items: Vec<&Value> = if *list {
                    value
                        .as_list()
                        .ok_or_else(|| mismatch(format!("{enum_name}[]")))?
                        .iter()
                        .collect()
                } else {
                    vec![value]
                };
                for item in items {
                    match item {
                        Value::String(s) if allowed.values.contains(s) => {}
                        _ => {
                            return Err(StoreError::invalid_data(
                                table,
                                format!("'{item}' is not a value of enum '{enum_name}'"),
                            ))
                        }
                    }
                }
            }
            ColumnKind::One { .. } | ColumnKind::Many { .. } => {
                return Err(StoreError::invalid_data(
                    table,
                    format!("column '{name}' is virtual"),
                ))
            }
        }
        Ok(())
    }
}

fn normalize(data: RowData) -> RowData {
    data.into_iter()
        .map(|(name, value)| (name, value.into_normalized()))
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, EnumType, ScalarType};

    fn schema() -> Schema {
        Schema::new(vec![
            Table::new("Account", vec![Column::id(ScalarType::Hex)]),
            Table::new(
                "Token",
                vec![
                    Column::id(ScalarType::BigInt),
                    Column::reference("owner", ScalarType::Hex, "Account"),
                    Column::one("ownerAccount", "owner"),
                    Column::scalar("uri", ScalarType::String).nullable(),
                    Column::scalar("tags", ScalarType::String).list(),
                    Column::enumeration("kind", "TokenKind"),
                ],
            ),
        ])
        .with_enum(EnumType::new("TokenKind", &["ERC721", "ERC1155"]))
    }

    fn token_data() -> RowData {
        row_data([
            ("owner", Value::hex("0x01")),
            ("tags", Value::List(vec!["a".into()])),
            ("kind", "ERC721".into()),
        ])
    }

    #[test]
    fn create_fills_missing_nullable_columns() {
        let s = schema();
        let v = Validator::new(&s, "Token").unwrap();
        let full = v.create(token_data()).unwrap();
        assert_eq!(full.get("uri"), Some(&Value::Null));
        assert!(!full.contains_key("ownerAccount"));
    }

    #[test]
    fn create_rejects_missing_required() {
        let s = schema();
        let v = Validator::new(&s, "Token").unwrap();
        let mut data = token_data();
        data.remove("owner");
        assert!(matches!(v.create(data), Err(StoreError::InvalidData { .. })));
    }

    #[test]
    fn rejects_wrong_types_and_unknown_columns() {
        let s = schema();
        let v = Validator::new(&s, "Token").unwrap();
        assert!(v.update(row_data([("owner", Value::Int(1))])).is_err());
        assert!(v.update(row_data([("nope", Value::Int(1))])).is_err());
        assert!(v.update(row_data([("ownerAccount", Value::hex("0x01"))])).is_err());
        assert!(v.update(row_data([("id", Value::BigInt(1))])).is_err());
        assert!(v.update(row_data([("tags", Value::List(vec![Value::Int(1)]))])).is_err());
        assert!(v.update(row_data([("owner", Value::Null)])).is_err());
        assert!(v.update(row_data([("uri", Value::Null)])).is_ok());
    }

    #[test]
    fn enum_values_are_checked() {
        let s = schema();
        let v = Validator::new(&s, "Token").unwrap();
        assert!(v.update(row_data([("kind", "ERC1155")])).is_ok());
        assert!(v.update(row_data([("kind", "ERC20")])).is_err());
    }

    #[test]
    fn id_type_is_checked() {
        let s = schema();
        let v = Validator::new(&s, "Token").unwrap();
        assert!(v.id(&Value::BigInt(7)).is_ok());
        assert!(v.id(&Value::Int(7)).is_err());
    }

    #[test]
    fn hex_ids_and_values_are_normalized() {
        let s = schema();
        let v = Validator::new(&s, "Account").unwrap();
        assert_eq!(v.id(&Value::Hex("0xAB".into())).unwrap(), Value::hex("0xab"));

        let v = Validator::new(&s, "Token").unwrap();
        let mut data = token_data();
        data.insert("owner".into(), Value::Hex("0XCD".into()));
        let full = v.create(data).unwrap();
        assert_eq!(full.get("owner"), Some(&Value::Hex("0xcd".into())));
        let partial = v.update(row_data([("owner", Value::Hex("EF".into()))])).unwrap();
        assert_eq!(partial.get("owner"), Some(&Value::Hex("0xef".into())));
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        let s = Schema::new(vec![Table::new(
            "Pool",
            vec![
                Column::id(ScalarType::String),
                Column::scalar("price", ScalarType::Float).nullable(),
                Column::scalar("history", ScalarType::Float).list(),
            ],
        )]);
        let v = Validator::new(&s, "Pool").unwrap();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                v.update(row_data([("price", Value::Float(bad))])),
                Err(StoreError::InvalidData { .. })
            ));
            assert!(matches!(
                v.update(row_data([("history", Value::List(vec![Value::Float(bad)]))])),
                Err(StoreError::InvalidData { .. })
            ));
        }
        assert!(v.update(row_data([("price", Value::Float(-0.5))])).is_ok());
    }

    #[test]
    fn unknown_table() {
        let s = schema();
        assert!(matches!(
            Validator::new(&s, "Nope"),
            Err(StoreError::UnknownTable(_))
        ));
    }
}
