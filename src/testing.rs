//! Shared fixture for unit tests: an in-memory store with seeded nodes and
//! projects.

use std::sync::Arc;

use rusqlite::Connection;

use crate::cluster::{Profile, Statements};
use crate::context::Context;
use crate::errors::Result;
use crate::mapper::ClusterTx;
use crate::schema;
use crate::store::transaction;

const SEED: &str = "
INSERT INTO nodes (id, name, address) VALUES (1, 'node1', '10.0.0.1:8443');
INSERT INTO nodes (id, name, address) VALUES (2, 'node2', '10.0.0.2:8443');
INSERT INTO nodes (id, name, address) VALUES (3, 'node3', '10.0.0.3:8443');
INSERT INTO projects (id, name) VALUES (2, 'other');
INSERT INTO projects (id, name) VALUES (3, 'plain');
INSERT INTO projects_config (project_id, key, value) VALUES (2, 'features.profiles', 'true');
";

pub(crate) struct Fixture {
    pub conn: Connection,
    pub stmts: Arc<Statements>,
    pub ctx: Context,
}

impl Fixture {
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", true).unwrap();
        schema::apply(&conn).unwrap();
        conn.execute_batch(SEED).unwrap();
        let stmts = Statements::prepare(&conn, false).unwrap();
        Self {
            conn,
            stmts: Arc::new(stmts),
            ctx: Context::background(),
        }
    }

    /// Run a committed unit of work; panics if it fails.
    pub fn with_tx<T>(&mut self, f: impl FnOnce(&ClusterTx<'_>) -> Result<T>) -> T {
        self.try_tx(f)
            .unwrap_or_else(|err| panic!("unit of work failed: {err}"))
    }

    /// Run a unit of work, rolling it back if it fails.
    pub fn try_tx<T>(&mut self, f: impl FnOnce(&ClusterTx<'_>) -> Result<T>) -> Result<T> {
        transaction(&mut self.conn, &self.stmts, &self.ctx, f)
    }
}

pub(crate) fn profile(project: &str, name: &str) -> Profile {
    Profile {
        project: project.to_string(),
        name: name.to_string(),
        ..Default::default()
    }
}
