//! Generic CRUD surface shared by every entity.
//!
//! [`ClusterTx`] pairs a caller-owned transaction with the prepared
//! statements and a cancellation context. Entity modules add their typed
//! operations on top of the helpers here, which enforce the row-count
//! invariants of point reads and mutations.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, Value};
use rusqlite::limits::Limit;
use rusqlite::{params_from_iter, Row, Statement, Transaction};

use crate::cluster::Statements;
use crate::context::Context;
use crate::errors::{is_unique_violation, DbError, Result};
use crate::filter::{self, Filter, Plan, ShapeTable};
use crate::stmt::StatementCode;

/// SQLite's compiled-in default for `SQLITE_MAX_VARIABLE_NUMBER`.
const DEFAULT_MAX_ARGS: usize = 32_766;

/// A value object scanned from one result row.
pub trait Record: Sized {
    type Filter: Filter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// One logical unit of work inside a transaction owned by the caller.
///
/// The core never begins, commits or rolls back: errors are returned so the
/// caller can decide the transaction's fate.
pub struct ClusterTx<'a> {
    ctx: &'a Context,
    tx: &'a Transaction<'a>,
    stmts: &'a Statements,
}

impl<'a> ClusterTx<'a> {
    pub fn new(ctx: &'a Context, tx: &'a Transaction<'a>, stmts: &'a Statements) -> Self {
        Self { ctx, tx, stmts }
    }

    pub fn context(&self) -> &Context {
        self.ctx
    }

    pub fn transaction(&self) -> &Transaction<'a> {
        self.tx
    }

    pub(crate) fn stmts(&self) -> &'a Statements {
        self.stmts
    }

    /// Rows matching any filter of the batch. Zero matches is not an error.
    ///
    /// Batches binding more parameters than the connection allows run as
    /// several statements.
    pub(crate) fn select<R: Record>(
        &self,
        table: &ShapeTable,
        filters: &[R::Filter],
    ) -> Result<Vec<R>> {
        let plans = filter::plan_chunked(table, self.stmts.registry(), filters, self.max_args())?;
        let mut objects = Vec::new();
        for plan in &plans {
            objects.extend(self.fetch::<R>(table.entity(), plan)?);
        }
        Ok(objects)
    }

    fn fetch<R: Record>(&self, entity: &'static str, plan: &Plan) -> Result<Vec<R>> {
        self.ctx.check()?;
        let _guard = self.ctx.interruptible(self.tx, self.stmts.progress_ops());
        let scanned = match plan {
            Plan::Prepared { code, args } => {
                let mut stmt = self.stmts.cache().bind(self.tx, *code)?;
                scan_all(&mut stmt, args)
            }
            Plan::AdHoc { sql, args } => {
                let mut stmt = self
                    .tx
                    .prepare(sql)
                    .map_err(|e| self.ctx.storage_error("prepare", entity, e))?;
                scan_all(&mut stmt, args)
            }
        };
        scanned.map_err(|e| self.ctx.storage_error("fetch", entity, e))
    }

    /// Bound parameters a single statement may carry on this connection.
    fn max_args(&self) -> usize {
        usize::try_from(self.tx.limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER))
            .ok()
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_ARGS)
    }

    /// Exactly one row matching `filter`.
    pub(crate) fn select_one<R: Record>(&self, table: &ShapeTable, filter: R::Filter) -> Result<R> {
        let mut objects = self.select::<R>(table, std::slice::from_ref(&filter))?;
        match objects.len() {
            0 => Err(DbError::NotFound {
                entity: table.entity(),
            }),
            1 => Ok(objects.remove(0)),
            rows => Err(DbError::Integrity {
                entity: table.entity(),
                op: "get",
                rows,
            }),
        }
    }

    /// First column of every row a registered query returns.
    pub(crate) fn query_column<T: FromSql>(
        &self,
        code: StatementCode,
        entity: &'static str,
        op: &'static str,
        args: &[Value],
    ) -> Result<Vec<T>> {
        self.ctx.check()?;
        let _guard = self.ctx.interruptible(self.tx, self.stmts.progress_ops());
        let mut stmt = self.stmts.cache().bind(self.tx, code)?;
        stmt.query_map(params_from_iter(args.iter()), |row| row.get::<_, T>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| self.ctx.storage_error(op, entity, e))
    }

    /// Single-column, single-row lookup of an ID.
    pub(crate) fn query_id(
        &self,
        code: StatementCode,
        entity: &'static str,
        args: &[Value],
    ) -> Result<i64> {
        let ids: Vec<i64> = self.query_column(code, entity, "get ID of", args)?;
        match ids.as_slice() {
            [] => Err(DbError::NotFound { entity }),
            [id] => Ok(*id),
            _ => Err(DbError::Integrity {
                entity,
                op: "get ID",
                rows: ids.len(),
            }),
        }
    }

    /// Run a mutation and report the number of affected rows.
    pub(crate) fn exec(
        &self,
        code: StatementCode,
        entity: &'static str,
        op: &'static str,
        args: &[Value],
    ) -> Result<usize> {
        self.ctx.check()?;
        let _guard = self.ctx.interruptible(self.tx, self.stmts.progress_ops());
        let mut stmt = self.stmts.cache().bind(self.tx, code)?;
        stmt.execute(params_from_iter(args.iter()))
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DbError::Conflict { entity }
                } else {
                    self.ctx.storage_error(op, entity, e)
                }
            })
    }

    /// A mutation that must touch exactly one row.
    pub(crate) fn exec_one(
        &self,
        code: StatementCode,
        entity: &'static str,
        op: &'static str,
        args: &[Value],
    ) -> Result<()> {
        match self.exec(code, entity, op, args)? {
            0 => Err(DbError::NotFound { entity }),
            1 => Ok(()),
            rows => Err(DbError::Integrity { entity, op, rows }),
        }
    }

    /// Delete the row of `table` whose primary key is `id`.
    ///
    /// Returns whether a row was deleted; more than one is an integrity
    /// violation.
    pub fn delete_object(&self, table: &'static str, entity: &'static str, id: i64) -> Result<bool> {
        self.ctx.check()?;
        let _guard = self.ctx.interruptible(self.tx, self.stmts.progress_ops());
        let sql = format!("DELETE FROM {table} WHERE id = ?");
        let rows = self
            .tx
            .prepare_cached(&sql)
            .and_then(|mut stmt| stmt.execute([id]))
            .map_err(|e| self.ctx.storage_error("delete", entity, e))?;
        match rows {
            0 => Ok(false),
            1 => Ok(true),
            rows => Err(DbError::Integrity {
                entity,
                op: "delete",
                rows,
            }),
        }
    }

    /// Insert a row and return the store-assigned ID.
    pub(crate) fn insert(
        &self,
        code: StatementCode,
        entity: &'static str,
        args: &[Value],
    ) -> Result<i64> {
        self.exec(code, entity, "create", args)?;
        Ok(self.tx.last_insert_rowid())
    }
}

/// Collapse a point lookup into a presence check.
pub(crate) fn found<T>(result: Result<T>) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(DbError::NotFound { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

pub(crate) fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

pub(crate) fn timestamp(at: &DateTime<Utc>) -> Value {
    Value::Text(at.to_rfc3339())
}

pub(crate) fn nullable_timestamp(at: &Option<DateTime<Utc>>) -> Value {
    at.as_ref().map_or(Value::Null, timestamp)
}

fn scan_all<R: Record>(stmt: &mut Statement<'_>, args: &[Value]) -> rusqlite::Result<Vec<R>> {
    stmt.query_map(params_from_iter(args.iter()), R::scan)?
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Instance, Operation, OperationFilter, OperationType};
    use crate::testing::Fixture;

    #[test]
    fn test_exec_one_reports_missing_row() {
        let mut fx = Fixture::new();
        let (ctx, stmts) = (fx.ctx.clone(), fx.stmts.clone());
        let tx = fx.conn.transaction().unwrap();
        let ctx_tx = ClusterTx::new(&ctx, &tx, &stmts);
        let code = stmts.catalog().operations.delete_by_uuid;
        let err = ctx_tx
            .exec_one(code, "Operation", "delete", &[Value::Text("nope".into())])
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_cancelled_context_runs_nothing() {
        let mut fx = Fixture::new();
        let stmts = fx.stmts.clone();
        let ctx = Context::background();
        ctx.cancel();
        let tx = fx.conn.transaction().unwrap();
        let ctx_tx = ClusterTx::new(&ctx, &tx, &stmts);
        let err = ctx_tx
            .exec(
                stmts.catalog().operations.delete_by_node_id,
                "Operation",
                "delete",
                &[Value::Integer(1)],
            )
            .unwrap_err();
        assert!(matches!(err, DbError::Cancelled));
    }

    fn two_operations_on_node1(tx: &ClusterTx<'_>) -> Result<()> {
        for _ in 0..2 {
            tx.create_or_replace_operation(&Operation::new(1, Some(1), OperationType(1)))?;
        }
        Ok(())
    }

    #[test]
    fn test_exec_one_rejects_multi_row_mutation() {
        let mut fx = Fixture::new();
        let err = fx
            .try_tx(|tx| {
                two_operations_on_node1(tx)?;
                let code = tx.stmts().catalog().operations.delete_by_node_id;
                tx.exec_one(code, "Operation", "delete", &[Value::Integer(1)])
            })
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Integrity {
                entity: "Operation",
                op: "delete",
                rows: 2
            }
        ));
        assert!(err.is_fatal());
        let left = fx.with_tx(|tx| tx.get_operations(&[]));
        assert!(left.is_empty());
    }

    #[test]
    fn test_select_one_rejects_multiple_matches() {
        let mut fx = Fixture::new();
        let err = fx
            .try_tx(|tx| {
                two_operations_on_node1(tx)?;
                let table = &tx.stmts().catalog().operations.objects;
                tx.select_one::<Operation>(
                    table,
                    OperationFilter {
                        node_id: Some(1),
                        ..Default::default()
                    },
                )
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Integrity { op: "get", rows: 2, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_delete_object_by_primary_key() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            let id = tx.create_instance(&Instance::new("default", "c1", "node1"))?;
            assert!(tx.delete_object("instances", "Instance", id)?);
            assert!(!tx.delete_object("instances", "Instance", id)?);
            assert!(!tx.instance_exists("default", "c1")?);
            Ok(())
        });
    }

    #[test]
    fn test_delete_object_rejects_duplicate_keys() {
        let mut fx = Fixture::new();
        let err = fx
            .try_tx(|tx| {
                tx.transaction().execute_batch(
                    "CREATE TEMP TABLE scratch (id INTEGER, name TEXT);
                     INSERT INTO scratch (id, name) VALUES (1, 'a'), (1, 'b');",
                )?;
                tx.delete_object("scratch", "Scratch", 1)
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Integrity { entity: "Scratch", rows: 2, .. }));
    }

    #[test]
    fn test_list_all_beyond_parameter_limit() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            for n in 0..25 {
                let mut i = Instance::new("default", &format!("c{n:02}"), "node1");
                i.config.insert("user.n".into(), n.to_string());
                i.devices.insert(
                    "root".into(),
                    [("type".to_string(), "disk".to_string())].into(),
                );
                tx.create_instance(&i)?;
            }
            Ok(())
        });
        fx.conn.set_limit(Limit::SQLITE_LIMIT_VARIABLE_NUMBER, 8);

        let all = fx.with_tx(|tx| tx.get_instances(&[]));
        assert_eq!(all.len(), 25);
        for (n, i) in all.iter().enumerate() {
            assert_eq!(i.name, format!("c{n:02}"));
            assert_eq!(i.config["user.n"], n.to_string());
            assert_eq!(i.devices["root"]["type"], "disk");
        }
    }
}
