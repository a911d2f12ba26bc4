//! Cluster entities and their registered statements.

pub mod cluster_groups;
pub mod instances;
pub mod operations;
pub mod profiles;
pub mod references;
pub mod warnings;

use rusqlite::Connection;

use crate::context::DEFAULT_PROGRESS_OPS;
use crate::errors::Result;
use crate::stmt::{StatementCache, StatementRegistry};

pub use cluster_groups::{ClusterGroup, ClusterGroupFilter};
pub use instances::{Instance, InstanceFilter, InstanceType};
pub use operations::{Operation, OperationFilter, OperationType};
pub use profiles::{Profile, ProfileFilter};
pub use references::{Config, Device, DeviceType, Devices};
pub use warnings::{Warning, WarningFilter, WarningStatus};

/// Statement codes of every entity, produced by one registration pass.
#[derive(Debug)]
pub struct Catalog {
    pub instances: instances::InstanceStatements,
    pub profiles: profiles::ProfileStatements,
    pub cluster_groups: cluster_groups::ClusterGroupStatements,
    pub operations: operations::OperationStatements,
    pub warnings: warnings::WarningStatements,
    pub references: references::ReferenceStatements,
}

impl Catalog {
    pub fn register(registry: &mut StatementRegistry) -> Self {
        Self {
            instances: instances::InstanceStatements::register(registry),
            profiles: profiles::ProfileStatements::register(registry),
            cluster_groups: cluster_groups::ClusterGroupStatements::register(registry),
            operations: operations::OperationStatements::register(registry),
            warnings: warnings::WarningStatements::register(registry),
            references: references::ReferenceStatements::register(registry),
        }
    }
}

/// Registry, catalog and prepared-statement cache for one store.
///
/// Immutable once built; share it across threads behind an `Arc`.
#[derive(Debug)]
pub struct Statements {
    registry: StatementRegistry,
    catalog: Catalog,
    cache: StatementCache,
    progress_ops: i32,
}

impl Statements {
    /// Register every statement and prepare it on `conn`.
    pub fn prepare(conn: &Connection, skip_errors: bool) -> Result<Self> {
        let mut registry = StatementRegistry::new();
        let catalog = Catalog::register(&mut registry);
        let cache = StatementCache::prepare_all(&registry, conn, skip_errors)?;
        Ok(Self {
            registry,
            catalog,
            cache,
            progress_ops: DEFAULT_PROGRESS_OPS,
        })
    }

    /// SQLite VM instructions between cancellation checks.
    pub fn with_progress_ops(mut self, ops: i32) -> Self {
        self.progress_ops = ops.max(1);
        self
    }

    pub fn registry(&self) -> &StatementRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn cache(&self) -> &StatementCache {
        &self.cache
    }

    pub fn progress_ops(&self) -> i32 {
        self.progress_ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Shape;
    use crate::testing::Fixture;

    #[test]
    fn test_every_statement_prepares_against_schema() {
        let fx = Fixture::new();
        assert!(fx.stmts.cache().broken().is_empty());
        assert_eq!(fx.stmts.cache().len(), fx.stmts.registry().len());
    }

    #[test]
    fn test_independent_registries_do_not_collide() {
        let a = Fixture::new();
        let b = Fixture::new();
        let code = a.stmts.catalog().instances.objects.code(Shape::EMPTY);
        assert_eq!(code, b.stmts.catalog().instances.objects.code(Shape::EMPTY));
        assert_eq!(a.stmts.registry().len(), b.stmts.registry().len());
    }

    #[test]
    fn test_instance_shapes_registered_exhaustively() {
        let fx = Fixture::new();
        let table = &fx.stmts.catalog().instances.objects;
        for shape in Shape::all_subsets(5) {
            assert!(table.code(shape).is_some(), "missing shape {shape}");
        }
    }
}
