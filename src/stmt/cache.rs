//! Prepared-statement cache.
//!
//! SQLite statements belong to a connection, so the process-wide part of the
//! cache is the immutable code → SQL index built by [`StatementCache::prepare_all`].
//! Each connection keeps its own compiled statements in rusqlite's statement
//! cache; [`StatementCache::bind`] re-associates a code with the active
//! transaction through that cache instead of re-compiling the SQL.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::{CachedStatement, Connection, Transaction};
use tracing::{debug, error, warn};

use crate::errors::{DbError, Result};
use crate::stmt::registry::StatementRegistry;
use crate::stmt::StatementCode;

/// Extra statement-cache slots left for non-registered statements.
const CACHE_HEADROOM: usize = 16;

#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub code: StatementCode,
    pub sql: Arc<str>,
    pub arity: usize,
    /// Set when preparation failed and errors were skipped.
    pub error: Option<String>,
}

/// Read-only after construction; safe to share across threads.
#[derive(Debug)]
pub struct StatementCache {
    index: HashMap<StatementCode, PreparedStatement>,
}

impl StatementCache {
    /// Prepare every registered statement on `conn`.
    ///
    /// With `skip_errors = false` the first statement that fails to prepare
    /// aborts initialisation: it means the SQL and the schema disagree.
    pub fn prepare_all(
        registry: &StatementRegistry,
        conn: &Connection,
        skip_errors: bool,
    ) -> Result<Self> {
        conn.set_prepared_statement_cache_capacity(registry.len() + CACHE_HEADROOM);

        let mut index = HashMap::with_capacity(registry.len());
        let mut skipped = 0usize;
        for variant in registry.iter() {
            let (arity, error) = match conn.prepare_cached(&variant.sql) {
                Ok(stmt) => {
                    let arity = stmt.parameter_count();
                    if arity != variant.arity {
                        warn!(code = %variant.code, registered = variant.arity, compiled = arity, "statement arity differs from registration");
                    }
                    (arity, None)
                }
                Err(err) if skip_errors => {
                    warn!(code = %variant.code, sql = %variant.sql, error = %err, "skipping statement that failed to prepare");
                    skipped += 1;
                    (variant.arity, Some(err.to_string()))
                }
                Err(err) => {
                    error!(code = %variant.code, sql = %variant.sql, error = %err, "statement failed to prepare");
                    return Err(DbError::storage("prepare", "registered statement", err));
                }
            };
            index.insert(
                variant.code,
                PreparedStatement {
                    code: variant.code,
                    sql: Arc::clone(&variant.sql),
                    arity,
                    error,
                },
            );
        }

        debug!(prepared = index.len() - skipped, skipped, "prepared registered statements");
        Ok(Self { index })
    }

    /// Compile every statement on an additional connection.
    pub fn warm(&self, conn: &Connection) -> Result<()> {
        conn.set_prepared_statement_cache_capacity(self.index.len() + CACHE_HEADROOM);
        for stmt in self.index.values().filter(|s| s.error.is_none()) {
            conn.prepare_cached(&stmt.sql)
                .map_err(|err| DbError::storage("prepare", "registered statement", err))?;
        }
        Ok(())
    }

    pub fn get(&self, code: StatementCode) -> Result<&PreparedStatement> {
        self.index.get(&code).ok_or_else(|| {
            error!(code = %code, "no prepared statement registered with code");
            DbError::UnregisteredStatement(code)
        })
    }

    /// Bind the prepared statement for `code` to the transaction.
    pub fn bind<'t>(
        &self,
        tx: &'t Transaction<'_>,
        code: StatementCode,
    ) -> Result<CachedStatement<'t>> {
        let stmt = self.get(code)?;
        tx.prepare_cached(&stmt.sql)
            .map_err(|err| DbError::storage("bind", "registered statement", err))
    }

    /// Codes whose preparation failed and was skipped.
    pub fn broken(&self) -> Vec<StatementCode> {
        let mut codes: Vec<_> = self
            .index
            .values()
            .filter(|s| s.error.is_some())
            .map(|s| s.code)
            .collect();
        codes.sort();
        codes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
