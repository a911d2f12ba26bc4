//! Filter shapes and statement selection for filter batches.
//!
//! A filter is a set of optional equality constraints. The fields a filter
//! populates form its [`Shape`]. Every entity keeps a [`ShapeTable`] mapping
//! shapes to registered statements; [`plan`] turns a batch of filters into a
//! single statement execution:
//!
//! - no filters: the unconstrained statement,
//! - one filter (or a batch that de-duplicates to one): the cached equality
//!   statement for its shape,
//! - several filters: a cached fixed fan-out variant when one matches,
//!   otherwise an ad hoc IN-list statement sized to the batch.
//!
//! [`plan_chunked`] splits batches that would exceed the connection's bound
//! parameter limit into several such statements.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use rusqlite::types::Value;
use tracing::debug;

use crate::errors::{DbError, Result};
use crate::stmt::{SelectTemplate, Selection, StatementCode, StatementRegistry};

/// Set of populated filter fields, as a bitset over field declaration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Shape(u64);

impl Shape {
    pub const EMPTY: Shape = Shape(0);
    pub const MAX_FIELDS: usize = 64;

    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        indices.into_iter().fold(Self::EMPTY, |s, i| s.with(i))
    }

    pub fn from_values(values: &[Option<Value>]) -> Self {
        Self::from_indices(
            values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_some())
                .map(|(i, _)| i),
        )
    }

    pub const fn with(self, index: usize) -> Self {
        Shape(self.0 | (1u64 << index))
    }

    pub const fn contains(self, index: usize) -> bool {
        index < Self::MAX_FIELDS && self.0 & (1u64 << index) != 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Field indices in declaration order.
    pub fn indices(self) -> impl Iterator<Item = usize> {
        (0..Self::MAX_FIELDS).filter(move |&i| self.contains(i))
    }

    /// Every shape over `fields` fields, the empty shape included.
    pub fn all_subsets(fields: usize) -> impl Iterator<Item = Shape> {
        (0..(1u64 << fields)).map(Shape)
    }

    pub fn describe(self, fields: &[&str]) -> String {
        if self.is_empty() {
            return "<none>".to_string();
        }
        self.indices()
            .map(|i| fields.get(i).copied().unwrap_or("?"))
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#b}", self.0)
    }
}

/// A sparse per-entity filter.
pub trait Filter {
    /// Optional equality constraints, in field declaration order.
    fn values(&self) -> Vec<Option<Value>>;

    fn shape(&self) -> Shape {
        Shape::from_values(&self.values())
    }
}

/// Clone an optional filter field into a bindable value.
pub(crate) fn field<T>(v: &Option<T>) -> Option<Value>
where
    T: Clone + Into<Value>,
{
    v.clone().map(Into::into)
}

/// Registered statements for one entity's filter shapes.
#[derive(Debug)]
pub struct ShapeTable {
    entity: &'static str,
    template: Arc<SelectTemplate>,
    shapes: HashMap<Shape, StatementCode>,
    fanouts: HashMap<(Shape, usize), StatementCode>,
}

impl ShapeTable {
    pub fn new(entity: &'static str, template: SelectTemplate) -> Self {
        Self {
            entity,
            template: Arc::new(template),
            shapes: HashMap::new(),
            fanouts: HashMap::new(),
        }
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn fields(&self) -> Vec<&'static str> {
        self.template.fields()
    }

    /// Register the statement for one shape.
    pub fn register(&mut self, registry: &mut StatementRegistry, shape: Shape) -> StatementCode {
        let code = registry.register_select(&self.template, shape);
        self.shapes.insert(shape, code);
        code
    }

    /// Register every shape, the unconstrained one included.
    pub fn register_all(&mut self, registry: &mut StatementRegistry) {
        for shape in Shape::all_subsets(self.template.predicates().len()) {
            self.register(registry, shape);
        }
    }

    /// Register a cached IN-list of exactly `width` values on one field.
    pub fn register_fanout(
        &mut self,
        registry: &mut StatementRegistry,
        field: usize,
        width: usize,
    ) -> StatementCode {
        let shape = Shape::EMPTY.with(field);
        let code = registry.register_fanout(&self.template, shape, width);
        self.fanouts.insert((shape, width), code);
        code
    }

    pub fn code(&self, shape: Shape) -> Option<StatementCode> {
        self.shapes.get(&shape).copied()
    }

    fn unsupported(&self, shape: Shape) -> DbError {
        DbError::unsupported(
            self.entity,
            format!("no query form for fields {}", shape.describe(&self.fields())),
        )
    }
}

/// How a batch will be executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// A registered statement, bound through the cache.
    Prepared { code: StatementCode, args: Vec<Value> },
    /// A one-off statement sized to the batch; never cached.
    AdHoc { sql: String, args: Vec<Value> },
}

impl Plan {
    pub fn args(&self) -> &[Value] {
        match self {
            Plan::Prepared { args, .. } | Plan::AdHoc { args, .. } => args,
        }
    }
}

/// Pick or synthesize the statement serving `filters`.
///
/// Every member of the batch must populate the same fields; otherwise
/// values could not be attributed to a single WHERE clause and the batch is
/// rejected with `UnsupportedFilterShape`. Result ordering follows the
/// statement's `ORDER BY`, not the batch order.
pub fn plan<F: Filter>(
    table: &ShapeTable,
    registry: &StatementRegistry,
    filters: &[F],
) -> Result<Plan> {
    match batch_rows(table, filters)? {
        None => unconstrained(table),
        Some((shape, rows)) => {
            let code = table.code(shape).ok_or_else(|| table.unsupported(shape))?;
            plan_rows(table, registry, shape, code, &rows)
        }
    }
}

/// Like [`plan`], but splits the de-duplicated batch so that no statement
/// binds more than `max_args` parameters.
///
/// Distinct rows match disjoint sets of records, so the chunks' results
/// together equal the single-statement result. Ordering holds within each
/// chunk only.
pub fn plan_chunked<F: Filter>(
    table: &ShapeTable,
    registry: &StatementRegistry,
    filters: &[F],
    max_args: usize,
) -> Result<Vec<Plan>> {
    let Some((shape, rows)) = batch_rows(table, filters)? else {
        return Ok(vec![unconstrained(table)?]);
    };
    let code = table.code(shape).ok_or_else(|| table.unsupported(shape))?;
    let per_chunk = (max_args / shape.len().max(1)).max(1);
    if rows.len() > per_chunk {
        debug!(
            entity = table.entity,
            rows = rows.len(),
            per_chunk,
            "splitting batch over the bound parameter limit"
        );
    }
    rows.chunks(per_chunk)
        .map(|chunk| plan_rows(table, registry, shape, code, chunk))
        .collect()
}

fn unconstrained(table: &ShapeTable) -> Result<Plan> {
    let code = table
        .code(Shape::EMPTY)
        .ok_or_else(|| table.unsupported(Shape::EMPTY))?;
    Ok(Plan::Prepared {
        code,
        args: Vec::new(),
    })
}

/// The batch's common shape and its distinct value rows, in first-seen
/// order. `None` for an empty batch.
fn batch_rows<F: Filter>(
    table: &ShapeTable,
    filters: &[F],
) -> Result<Option<(Shape, Vec<Vec<Value>>)>> {
    let Some(first) = filters.first() else {
        return Ok(None);
    };

    let shape = first.shape();
    let mut seen: HashSet<Vec<RowKey>> = HashSet::with_capacity(filters.len());
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(filters.len());
    for filter in filters {
        let values = filter.values();
        let member = Shape::from_values(&values);
        if member != shape {
            let fields = table.fields();
            return Err(DbError::unsupported(
                table.entity,
                format!(
                    "batch members disagree on populated fields ({} vs {})",
                    shape.describe(&fields),
                    member.describe(&fields)
                ),
            ));
        }
        let row: Vec<Value> = values.into_iter().flatten().collect();
        if seen.insert(row.iter().map(RowKey::from).collect()) {
            rows.push(row);
        }
    }
    Ok(Some((shape, rows)))
}

fn plan_rows(
    table: &ShapeTable,
    registry: &StatementRegistry,
    shape: Shape,
    code: StatementCode,
    rows: &[Vec<Value>],
) -> Result<Plan> {
    let args: Vec<Value> = rows.iter().flatten().cloned().collect();

    if rows.len() == 1 {
        return Ok(Plan::Prepared { code, args });
    }

    if let Some(&fanout) = table.fanouts.get(&(shape, rows.len())) {
        return Ok(Plan::Prepared { code: fanout, args });
    }

    let variant = registry.get(code)?;
    let source = variant
        .template()
        .ok_or_else(|| table.unsupported(shape))?;
    let sql = source.template.render(Selection::In {
        shape: source.shape,
        rows: rows.len(),
    });
    debug!(
        entity = table.entity,
        shape = %shape.describe(&table.fields()),
        rows = rows.len(),
        "synthesized IN-list statement"
    );
    Ok(Plan::AdHoc { sql, args })
}

/// Hashable image of a bound value, for batch de-duplication.
#[derive(PartialEq, Eq, Hash)]
enum RowKey {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&Value> for RowKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => RowKey::Null,
            Value::Integer(i) => RowKey::Integer(*i),
            Value::Real(f) => RowKey::Real(f.to_bits()),
            Value::Text(s) => RowKey::Text(s.clone()),
            Value::Blob(b) => RowKey::Blob(b.clone()),
        }
    }
}
