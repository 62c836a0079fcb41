//! Query filters for `find_many`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::StoreError;
use crate::row::Row;
use crate::schema::{Column, ScalarType, Table};
use crate::value::Value;

/// Largest accepted page size.
pub const MAX_FIRST: usize = 1_000;
/// Largest accepted offset.
pub const MAX_SKIP: usize = 5_000;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: OrderDirection,
}

/// A predicate on one column.
///
/// Predicates other than `Equals(Null)` / `Not(Null)` never match a null
/// column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Equals(Value),
    Not(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Contains(String),
    NotContains(String),
    StartsWith(String),
    NotStartsWith(String),
    EndsWith(String),
    NotEndsWith(String),
    /// List column contains the value.
    Has(Value),
    /// List column does not contain the value.
    NotHas(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Operator,
}

impl Condition {
    /// Evaluate against a column value.
    pub fn matches(&self, value: &Value) -> bool {
        use Operator::*;
        if let Equals(Value::Null) = self.op {
            return value.is_null();
        }
        if let Not(Value::Null) = self.op {
            return !value.is_null();
        }
        if value.is_null() {
            return false;
        }
        let text = || value.as_str();
        match &self.op {
            Equals(v) => value == v,
            Not(v) => value != v,
            In(vs) => vs.contains(value),
            NotIn(vs) => !vs.contains(value),
            Gt(v) => value.compare(v) == Some(Ordering::Greater),
            Gte(v) => matches!(value.compare(v), Some(Ordering::Greater | Ordering::Equal)),
            Lt(v) => value.compare(v) == Some(Ordering::Less),
            Lte(v) => matches!(value.compare(v), Some(Ordering::Less | Ordering::Equal)),
            Contains(s) => text().is_some_and(|t| t.contains(s.as_str())),
            NotContains(s) => text().is_some_and(|t| !t.contains(s.as_str())),
            StartsWith(s) => text().is_some_and(|t| t.starts_with(s.as_str())),
            NotStartsWith(s) => text().is_some_and(|t| !t.starts_with(s.as_str())),
            EndsWith(s) => text().is_some_and(|t| t.ends_with(s.as_str())),
            NotEndsWith(s) => text().is_some_and(|t| !t.ends_with(s.as_str())),
            Has(v) => value.as_list().is_some_and(|items| items.contains(v)),
            NotHas(v) => value.as_list().is_some_and(|items| !items.contains(v)),
        }
    }
}

/// A `find_many` query: predicates, ordering, pagination and the
/// checkpoint to read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    pub skip: Option<usize>,
    pub first: Option<usize>,
    pub order_by: Option<OrderBy>,
    pub checkpoint: Checkpoint,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
            skip: None,
            first: None,
            order_by: None,
            checkpoint: Checkpoint::LATEST,
        }
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read at `checkpoint` instead of the latest state.
    pub fn at(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn condition(mut self, column: impl Into<String>, op: Operator) -> Self {
        self.conditions.push(Condition {
            column: column.into(),
            op,
        });
        self
    }

    /// Shorthand for an `Equals` condition.
    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.condition(column, Operator::Equals(value.into()))
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by = Some(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn first(mut self, n: usize) -> Self {
        self.first = Some(n);
        self
    }

    /// Check limits, column names and operator/type compatibility.
    pub fn validate(&self, table: &Table) -> Result<(), StoreError> {
        let name = &table.name;
        if let Some(first) = self.first {
            if first > MAX_FIRST {
                return Err(StoreError::invalid_filter(
                    name,
                    format!("first ({first}) exceeds {MAX_FIRST}"),
                ));
            }
        }
        if let Some(skip) = self.skip {
            if skip > MAX_SKIP {
                return Err(StoreError::invalid_filter(
                    name,
                    format!("skip ({skip}) exceeds {MAX_SKIP}"),
                ));
            }
        }
        if let Some(order) = &self.order_by {
            let column = persisted_column(table, &order.column)?;
            if column.is_list() {
                return Err(StoreError::invalid_filter(
                    name,
                    format!("cannot order by list column '{}'", order.column),
                ));
            }
        }
        for cond in &self.conditions {
            validate_condition(table, cond)?;
        }
        Ok(())
    }

    /// A copy in canonical form: hex operands are normalized the way stored
    /// hex values are, and substring patterns on hex columns are
    /// lower-cased. Backends evaluate this form.
    pub fn normalized(&self, table: &Table) -> Filter {
        use Operator::*;
        let mut filter = self.clone();
        for cond in &mut filter.conditions {
            let hex_column =
                table.column(&cond.column).and_then(Column::scalar_type) == Some(ScalarType::Hex);
            match &mut cond.op {
                Equals(v) | Not(v) | Gt(v) | Gte(v) | Lt(v) | Lte(v) | Has(v) | NotHas(v) => {
                    *v = v.clone().into_normalized();
                }
                In(vs) | NotIn(vs) => {
                    for v in vs.iter_mut() {
                        *v = v.clone().into_normalized();
                    }
                }
                Contains(p) | NotContains(p) | StartsWith(p) | NotStartsWith(p) | EndsWith(p)
                | NotEndsWith(p) => {
                    if hex_column {
                        *p = p.to_ascii_lowercase();
                    }
                }
            }
        }
        filter
    }

    /// Evaluate every condition against a row.
    ///
    /// Hex operands are compared as given; use [`Filter::normalized`] first.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| match row.get(&c.column) {
            Some(value) => c.matches(value),
            None => c.matches(&Value::Null),
        })
    }

    /// Sort order used by every backend: the requested column (nulls
    /// first when ascending), then `id` ascending.
    pub fn compare_rows(&self, a: &Row, b: &Row) -> Ordering {
        let by_id = || a.id.compare(&b.id).unwrap_or(Ordering::Equal);
        let Some(order) = &self.order_by else {
            return by_id();
        };
        let null = Value::Null;
        let va = a.get(&order.column).unwrap_or(&null);
        let vb = b.get(&order.column).unwrap_or(&null);
        let primary = match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => va.compare(vb).unwrap_or(Ordering::Equal),
        };
        let primary = match order.direction {
            OrderDirection::Asc => primary,
            OrderDirection::Desc => primary.reverse(),
        };
        primary.then_with(by_id)
    }
}

fn persisted_column<'t>(table: &'t Table, column: &str) -> Result<&'t Column, StoreError> {
    match table.column(column) {
        Some(c) if !c.is_virtual() => Ok(c),
        Some(_) => Err(StoreError::invalid_filter(
            &table.name,
            format!("column '{column}' is virtual"),
        )),
        None => Err(StoreError::invalid_filter(
            &table.name,
            format!("unknown column '{column}'"),
        )),
    }
}

fn validate_condition(table: &Table, cond: &Condition) -> Result<(), StoreError> {
    use Operator::*;
    let column = persisted_column(table, &cond.column)?;
    let is_list = column.is_list();
    let ty = column.scalar_type().unwrap_or(ScalarType::String);
    let bad = |reason: &str| {
        StoreError::invalid_filter(&table.name, format!("'{}': {reason}", cond.column))
    };
    let scalar_ok = |v: &Value| v.is_scalar_of(ty);
    let list_ok = |v: &Value| {
        v.as_list()
            .is_some_and(|items| items.iter().all(|i| i.is_scalar_of(ty)))
    };

    match &cond.op {
        Equals(Value::Null) | Not(Value::Null) => Ok(()),
        Equals(v) | Not(v) => {
            let ok = if is_list { list_ok(v) } else { scalar_ok(v) };
            if ok {
                Ok(())
            } else {
                Err(bad(&format!("expected {ty} value, got {}", v.type_name())))
            }
        }
        In(vs) | NotIn(vs) => {
            if is_list {
                Err(bad("set membership is not supported on list columns"))
            } else if vs.iter().all(scalar_ok) {
                Ok(())
            } else {
                Err(bad(&format!("expected {ty} values")))
            }
        }
        Gt(v) | Gte(v) | Lt(v) | Lte(v) => {
            if is_list {
                Err(bad("comparison is not supported on list columns"))
            } else if scalar_ok(v) {
                Ok(())
            } else {
                Err(bad(&format!("expected {ty} value, got {}", v.type_name())))
            }
        }
        Contains(_) | NotContains(_) | StartsWith(_) | NotStartsWith(_) | EndsWith(_)
        | NotEndsWith(_) => {
            if !is_list && matches!(ty, ScalarType::String | ScalarType::Hex) {
                Ok(())
            } else {
                Err(bad("substring operators need a string or hex column"))
            }
        }
        Has(v) | NotHas(v) => {
            if !is_list {
                Err(bad("has/not_has need a list column"))
            } else if scalar_ok(v) {
                Ok(())
            } else {
                Err(bad(&format!("expected {ty} element, got {}", v.type_name())))
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
