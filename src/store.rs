//! SQLite-backed cluster store.
//!
//! Opens the database, applies the bundled schema, registers and prepares
//! every statement, and runs units of work inside one transaction each.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use tracing::{debug, warn};

use crate::cluster::Statements;
use crate::config::StoreConfig;
use crate::context::Context;
use crate::errors::{DbError, Result};
use crate::mapper::ClusterTx;
use crate::schema;

pub struct Store {
    config: StoreConfig,
    stmts: Arc<Statements>,
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let conn = Self::open_connection(&config)?;
        schema::apply(&conn)?;
        let stmts = Statements::prepare(&conn, config.skip_prepare_errors)?
            .with_progress_ops(config.progress_ops);
        debug!(path = ?config.path, statements = stmts.registry().len(), "cluster store opened");
        Ok(Self {
            config,
            stmts: Arc::new(stmts),
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory store with the default settings.
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::in_memory())
    }

    fn open_connection(config: &StoreConfig) -> Result<Connection> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(config.busy_timeout())?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode={}; PRAGMA synchronous=NORMAL;",
            config.journal_mode.pragma()
        ))?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
        Ok(conn)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Registered statements, shareable with worker threads.
    pub fn statements(&self) -> Arc<Statements> {
        Arc::clone(&self.stmts)
    }

    /// A further connection to the same database, for another worker.
    /// Registered statements are compiled on it up front.
    pub fn connect(&self) -> Result<Connection> {
        let Some(path) = &self.config.path else {
            return Err(DbError::Config(
                "an in-memory store has a single connection".to_string(),
            ));
        };
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.config.busy_timeout())?;
        conn.pragma_update(None, "foreign_keys", self.config.foreign_keys)?;
        self.stmts.cache().warm(&conn)?;
        Ok(conn)
    }

    /// Run `f` on the store's own connection, one caller at a time. See
    /// [`Store::transaction`].
    pub fn run<T>(&self, ctx: &Context, f: impl FnOnce(&ClusterTx<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        transaction(&mut conn, &self.stmts, ctx, f)
    }

    /// Run `f` inside one transaction on `conn`: committed when `f` returns
    /// `Ok` and the context is still live, rolled back otherwise.
    pub fn transaction<T>(
        &self,
        conn: &mut Connection,
        ctx: &Context,
        f: impl FnOnce(&ClusterTx<'_>) -> Result<T>,
    ) -> Result<T> {
        transaction(conn, &self.stmts, ctx, f)
    }
}

/// Run `f` in a transaction on `conn` against `stmts`.
pub fn transaction<T>(
    conn: &mut Connection,
    stmts: &Statements,
    ctx: &Context,
    f: impl FnOnce(&ClusterTx<'_>) -> Result<T>,
) -> Result<T> {
    ctx.check()?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| DbError::storage("begin", "transaction", e))?;
    let result = f(&ClusterTx::new(ctx, &tx, stmts)).and_then(|v| ctx.check().map(|()| v));
    match result {
        Ok(value) => {
            tx.commit()
                .map_err(|e| DbError::storage("commit", "transaction", e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback() {
                warn!(error = %rollback, "failed to roll back transaction");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterGroup, Instance, InstanceFilter};
    use std::thread;

    fn seed(tx: &ClusterTx<'_>) -> Result<()> {
        tx.transaction().execute_batch(
            "INSERT INTO nodes (id, name, address) VALUES (1, 'node1', '10.0.0.1:8443');
             INSERT INTO nodes (id, name, address) VALUES (2, 'node2', '10.0.0.2:8443');",
        )?;
        Ok(())
    }

    #[test]
    fn test_in_memory_store_runs_units_of_work() {
        let store = Store::in_memory().unwrap();
        let ctx = Context::background();
        store.run(&ctx, seed).unwrap();
        store
            .run(&ctx, |tx| tx.create_instance(&Instance::new("default", "c1", "node1")))
            .unwrap();
        let names = store
            .run(&ctx, |tx| tx.get_instances(&[]))
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["c1"]);
        assert!(store.connect().is_err());
    }

    #[test]
    fn test_error_rolls_back() {
        let store = Store::in_memory().unwrap();
        let ctx = Context::background();
        store.run(&ctx, seed).unwrap();
        let err = store.run(&ctx, |tx| {
            tx.create_cluster_group(&ClusterGroup {
                name: "g".into(),
                ..Default::default()
            })?;
            tx.delete_cluster_group("missing")
        });
        assert!(err.unwrap_err().is_not_found());
        assert!(!store.run(&ctx, |tx| tx.cluster_group_exists("g")).unwrap());
    }

    #[test]
    fn test_cancelled_context_never_begins() {
        let store = Store::in_memory().unwrap();
        let ctx = Context::background();
        ctx.cancel();
        let err = store.run(&ctx, |tx| tx.get_instances(&[])).unwrap_err();
        assert!(matches!(err, DbError::Cancelled));
    }

    #[test]
    fn test_workers_share_statements_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(StoreConfig::at(dir.path().join("cluster.db"))).unwrap();
        let ctx = Context::background();
        store.run(&ctx, seed).unwrap();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                let ctx = ctx.clone();
                thread::spawn(move || {
                    let mut conn = store.connect().unwrap();
                    for n in 0..5 {
                        let name = format!("w{worker}-{n}");
                        let node = if n % 2 == 0 { "node1" } else { "node2" };
                        store
                            .transaction(&mut conn, &ctx, |tx| {
                                tx.create_instance(&Instance::new("default", &name, node))
                            })
                            .unwrap();
                    }
                    store
                        .transaction(&mut conn, &ctx, |tx| {
                            tx.get_instances(&[InstanceFilter::by_name(&format!("w{worker}-0"))])
                        })
                        .unwrap()
                        .len()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }

        let mut conn = store.connect().unwrap();
        let all = store
            .transaction(&mut conn, &ctx, |tx| tx.get_instances(&[]))
            .unwrap();
        assert_eq!(all.len(), 20);
    }
}
