//! Cluster database layer.
//!
//! Filter-driven query dispatch over a SQLite cluster store: a statement
//! registry and prepared-statement cache, a dispatcher that folds batches of
//! sparse filters into single IN-list queries, a generic entity mapper with
//! single-row invariants, and the profile cascade that produces expanded
//! instance config and devices.

pub mod api;
pub mod cluster;
pub mod config;
pub mod context;
pub mod errors;
pub mod expand;
pub mod filter;
pub mod mapper;
pub mod schema;
pub mod stmt;
pub mod store;

#[cfg(test)]
mod testing;

pub use api::{ClusterGroupView, InstanceView, ProfileView};
pub use cluster::{
    ClusterGroup, ClusterGroupFilter, Config, Device, DeviceType, Devices, Instance,
    InstanceFilter, InstanceType, Operation, OperationFilter, OperationType, Profile,
    ProfileFilter, Statements, Warning, WarningFilter, WarningStatus,
};
pub use config::{JournalMode, StoreConfig};
pub use context::Context;
pub use errors::{DbError, Result};
pub use expand::{expand_config, expand_devices};
pub use filter::{Filter, Plan, Shape, ShapeTable};
pub use mapper::{ClusterTx, Record};
pub use stmt::{StatementCache, StatementCode, StatementRegistry};
pub use store::Store;
