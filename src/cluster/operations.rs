//! Background operations tracked per cluster member.

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::Row;
use uuid::Uuid;

use crate::errors::Result;
use crate::filter::{field, Filter, ShapeTable};
use crate::mapper::{text, ClusterTx, Record};
use crate::stmt::{Predicate, SelectTemplate, StatementCode, StatementRegistry};

const ENTITY: &str = "Operation";

/// Operation kind, stored as its integer code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OperationType(pub i64);

impl From<OperationType> for Value {
    fn from(kind: OperationType) -> Self {
        Value::Integer(kind.0)
    }
}

impl ToSql for OperationType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for OperationType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(OperationType)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: i64,
    pub uuid: String,
    /// Read-only; joined from the owning node.
    pub node_address: String,
    pub project_id: Option<i64>,
    pub node_id: i64,
    pub kind: OperationType,
}

impl Operation {
    /// A new operation with a fresh time-ordered UUID.
    pub fn new(node_id: i64, project_id: Option<i64>, kind: OperationType) -> Self {
        Self {
            id: 0,
            uuid: Uuid::now_v7().to_string(),
            node_address: String::new(),
            project_id,
            node_id,
            kind,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    pub id: Option<i64>,
    pub node_id: Option<i64>,
    pub uuid: Option<String>,
}

impl OperationFilter {
    pub fn by_uuid(uuid: &str) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            ..Default::default()
        }
    }

    pub fn by_node(node_id: i64) -> Self {
        Self {
            node_id: Some(node_id),
            ..Default::default()
        }
    }
}

impl Filter for OperationFilter {
    fn values(&self) -> Vec<Option<Value>> {
        vec![field(&self.id), field(&self.node_id), field(&self.uuid)]
    }
}

impl Record for Operation {
    type Filter = OperationFilter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uuid: row.get(1)?,
            node_address: row.get(2)?,
            project_id: row.get(3)?,
            node_id: row.get(4)?,
            kind: row.get(5)?,
        })
    }
}

#[derive(Debug)]
pub struct OperationStatements {
    pub objects: ShapeTable,
    pub create_or_replace: StatementCode,
    pub delete_by_uuid: StatementCode,
    pub delete_by_node_id: StatementCode,
}

impl OperationStatements {
    pub fn register(registry: &mut StatementRegistry) -> Self {
        let mut objects = ShapeTable::new(
            ENTITY,
            SelectTemplate::new(
                "SELECT operations.id, operations.uuid, nodes.address, operations.project_id, operations.node_id, operations.type
  FROM operations JOIN nodes ON operations.node_id = nodes.id",
                vec![
                    Predicate::new("id", "operations.id"),
                    Predicate::new("node_id", "operations.node_id"),
                    Predicate::new("uuid", "operations.uuid"),
                ],
                "operations.id, operations.uuid",
            ),
        );
        objects.register_all(registry);

        Self {
            objects,
            create_or_replace: registry.register(
                "INSERT OR REPLACE INTO operations (uuid, project_id, node_id, type) VALUES (?, ?, ?, ?)",
                None,
            ),
            delete_by_uuid: registry.register("DELETE FROM operations WHERE uuid = ?", None),
            delete_by_node_id: registry.register("DELETE FROM operations WHERE node_id = ?", None),
        }
    }
}

impl ClusterTx<'_> {
    pub fn get_operations(&self, filters: &[OperationFilter]) -> Result<Vec<Operation>> {
        let stmts = &self.stmts().catalog().operations;
        self.select(&stmts.objects, filters)
    }

    pub fn get_operation(&self, uuid: &str) -> Result<Operation> {
        let stmts = &self.stmts().catalog().operations;
        self.select_one(&stmts.objects, OperationFilter::by_uuid(uuid))
    }

    /// Insert the operation, replacing any existing one with the same UUID.
    pub fn create_or_replace_operation(&self, op: &Operation) -> Result<i64> {
        let stmts = &self.stmts().catalog().operations;
        self.insert(
            stmts.create_or_replace,
            ENTITY,
            &[
                text(&op.uuid),
                op.project_id.into(),
                Value::Integer(op.node_id),
                op.kind.into(),
            ],
        )
    }

    pub fn delete_operation(&self, uuid: &str) -> Result<()> {
        let stmts = &self.stmts().catalog().operations;
        self.exec_one(stmts.delete_by_uuid, ENTITY, "delete", &[text(uuid)])
    }

    /// Delete every operation of a node. Matching nothing is not an error.
    pub fn delete_operations(&self, node_id: i64) -> Result<usize> {
        let stmts = &self.stmts().catalog().operations;
        self.exec(
            stmts.delete_by_node_id,
            ENTITY,
            "delete",
            &[Value::Integer(node_id)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn test_create_or_replace_keeps_one_row_per_uuid() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            let mut op = Operation::new(1, None, OperationType(3));
            tx.create_or_replace_operation(&op)?;
            op.kind = OperationType(7);
            op.project_id = Some(1);
            tx.create_or_replace_operation(&op)?;

            let all = tx.get_operations(&[])?;
            assert_eq!(all.len(), 1);
            let got = tx.get_operation(&op.uuid)?;
            assert_eq!(got.kind, OperationType(7));
            assert_eq!(got.project_id, Some(1));
            assert_eq!(got.node_address, "10.0.0.1:8443");
            Ok(())
        });
    }

    #[test]
    fn test_delete_many_ignores_count() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            for _ in 0..3 {
                tx.create_or_replace_operation(&Operation::new(2, None, OperationType(1)))?;
            }
            tx.create_or_replace_operation(&Operation::new(1, None, OperationType(1)))?;
            assert_eq!(tx.get_operations(&[OperationFilter::by_node(2)])?.len(), 3);
            assert_eq!(tx.delete_operations(2)?, 3);
            assert_eq!(tx.delete_operations(2)?, 0);
            assert_eq!(tx.get_operations(&[])?.len(), 1);
            Ok(())
        });
    }

    #[test]
    fn test_delete_one_is_single_row() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            let op = Operation::new(1, None, OperationType(1));
            tx.create_or_replace_operation(&op)?;
            tx.delete_operation(&op.uuid)?;
            assert!(tx.delete_operation(&op.uuid).unwrap_err().is_not_found());
            assert!(tx.get_operation(&op.uuid).unwrap_err().is_not_found());
            Ok(())
        });
    }
}
