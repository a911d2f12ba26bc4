//! Reference rows loaded alongside records: config key/values, devices and
//! cluster group members.
//!
//! References go through the same filter dispatcher as records, so loading
//! them for N records costs one IN-list query rather than N lookups.

use std::collections::BTreeMap;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::Row;

use crate::errors::{DbError, Result};
use crate::filter::{field, Filter, ShapeTable};
use crate::mapper::{ClusterTx, Record};
use crate::stmt::{Predicate, SelectTemplate, StatementCode, StatementRegistry};

pub type Config = BTreeMap<String, String>;
/// Device properties, `type` included.
pub type Device = BTreeMap<String, String>;
pub type Devices = BTreeMap<String, Device>;

/// Device kinds, stored as integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum DeviceType {
    None = 0,
    Nic = 1,
    Disk = 2,
    UnixChar = 3,
    UnixBlock = 4,
    Usb = 5,
    Gpu = 6,
    Infiniband = 7,
    Proxy = 8,
    UnixHotplug = 9,
    Tpm = 10,
    Pci = 11,
}

impl DeviceType {
    const ALL: [DeviceType; 12] = [
        Self::None,
        Self::Nic,
        Self::Disk,
        Self::UnixChar,
        Self::UnixBlock,
        Self::Usb,
        Self::Gpu,
        Self::Infiniband,
        Self::Proxy,
        Self::UnixHotplug,
        Self::Tpm,
        Self::Pci,
    ];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Nic => "nic",
            Self::Disk => "disk",
            Self::UnixChar => "unix-char",
            Self::UnixBlock => "unix-block",
            Self::Usb => "usb",
            Self::Gpu => "gpu",
            Self::Infiniband => "infiniband",
            Self::Proxy => "proxy",
            Self::UnixHotplug => "unix-hotplug",
            Self::Tpm => "tpm",
            Self::Pci => "pci",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| DbError::Invalid(format!("unknown device type {name:?}")))
    }
}

impl ToSql for DeviceType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for DeviceType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

/// Filter on the owning record's ID.
#[derive(Debug, Clone, Default)]
pub struct OwnerFilter {
    pub owner_id: Option<i64>,
}

impl OwnerFilter {
    pub fn batch(ids: &[i64]) -> Vec<Self> {
        ids.iter()
            .map(|&id| Self { owner_id: Some(id) })
            .collect()
    }
}

impl Filter for OwnerFilter {
    fn values(&self) -> Vec<Option<Value>> {
        vec![field(&self.owner_id)]
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ConfigRow {
    owner_id: i64,
    key: String,
    value: String,
}

impl Record for ConfigRow {
    type Filter = OwnerFilter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner_id: row.get(0)?,
            key: row.get(1)?,
            value: row.get(2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DeviceRow {
    owner_id: i64,
    name: String,
    kind: DeviceType,
    key: String,
    value: String,
}

impl Record for DeviceRow {
    type Filter = OwnerFilter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner_id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            key: row.get(3)?,
            value: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MemberRow {
    group_id: i64,
    node: String,
}

impl Record for MemberRow {
    type Filter = OwnerFilter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            group_id: row.get(0)?,
            node: row.get(1)?,
        })
    }
}

/// Config table statements of one owner kind (`instance`, `profile`).
#[derive(Debug)]
pub struct ConfigStatements {
    pub entity: &'static str,
    pub objects: ShapeTable,
    pub create: StatementCode,
    pub delete: StatementCode,
}

impl ConfigStatements {
    fn register(registry: &mut StatementRegistry, entity: &'static str, owner: &str) -> Self {
        let table = format!("{owner}s_config");
        let mut objects = ShapeTable::new(
            entity,
            SelectTemplate::new(
                format!("SELECT {table}.{owner}_id, {table}.key, {table}.value FROM {table}"),
                vec![Predicate::new("owner_id", format!("{table}.{owner}_id"))],
                format!("{table}.{owner}_id, {table}.key"),
            ),
        );
        objects.register_all(registry);
        Self {
            entity,
            objects,
            create: registry.register(
                &format!("INSERT INTO {table} ({owner}_id, key, value) VALUES (?, ?, ?)"),
                None,
            ),
            delete: registry.register(&format!("DELETE FROM {table} WHERE {owner}_id = ?"), None),
        }
    }
}

/// Device table statements of one owner kind.
#[derive(Debug)]
pub struct DeviceStatements {
    pub entity: &'static str,
    pub objects: ShapeTable,
    pub create: StatementCode,
    pub create_config: StatementCode,
    pub delete: StatementCode,
}

impl DeviceStatements {
    fn register(registry: &mut StatementRegistry, entity: &'static str, owner: &str) -> Self {
        let devices = format!("{owner}s_devices");
        let config = format!("{owner}s_devices_config");
        let mut objects = ShapeTable::new(
            entity,
            SelectTemplate::new(
                format!(
                    "SELECT {devices}.{owner}_id, {devices}.name, {devices}.type, coalesce({config}.key, ''), coalesce({config}.value, '')
  FROM {devices} LEFT JOIN {config} ON {config}.{owner}_device_id = {devices}.id"
                ),
                vec![Predicate::new("owner_id", format!("{devices}.{owner}_id"))],
                format!("{devices}.{owner}_id, {devices}.name"),
            ),
        );
        objects.register_all(registry);
        Self {
            entity,
            objects,
            create: registry.register(
                &format!("INSERT INTO {devices} ({owner}_id, name, type) VALUES (?, ?, ?)"),
                None,
            ),
            create_config: registry.register(
                &format!("INSERT INTO {config} ({owner}_device_id, key, value) VALUES (?, ?, ?)"),
                None,
            ),
            delete: registry.register(&format!("DELETE FROM {devices} WHERE {owner}_id = ?"), None),
        }
    }
}

/// Cluster group membership statements.
#[derive(Debug)]
pub struct MemberStatements {
    pub objects: ShapeTable,
    pub create: StatementCode,
    pub delete: StatementCode,
}

impl MemberStatements {
    fn register(registry: &mut StatementRegistry) -> Self {
        let mut objects = ShapeTable::new(
            "Cluster group member",
            SelectTemplate::new(
                "SELECT nodes_cluster_groups.group_id, nodes.name
  FROM nodes_cluster_groups JOIN nodes ON nodes_cluster_groups.node_id = nodes.id",
                vec![Predicate::new("group_id", "nodes_cluster_groups.group_id")],
                "nodes_cluster_groups.group_id, nodes.name",
            ),
        );
        objects.register_all(registry);
        Self {
            objects,
            create: registry.register(
                "INSERT INTO nodes_cluster_groups (group_id, node_id)
  VALUES (?, (SELECT nodes.id FROM nodes WHERE nodes.name = ?))",
                None,
            ),
            delete: registry.register("DELETE FROM nodes_cluster_groups WHERE group_id = ?", None),
        }
    }
}

#[derive(Debug)]
pub struct ReferenceStatements {
    pub instance_config: ConfigStatements,
    pub instance_devices: DeviceStatements,
    pub profile_config: ConfigStatements,
    pub profile_devices: DeviceStatements,
    pub group_members: MemberStatements,
}

impl ReferenceStatements {
    pub fn register(registry: &mut StatementRegistry) -> Self {
        Self {
            instance_config: ConfigStatements::register(registry, "Instance config", "instance"),
            instance_devices: DeviceStatements::register(registry, "Instance device", "instance"),
            profile_config: ConfigStatements::register(registry, "Profile config", "profile"),
            profile_devices: DeviceStatements::register(registry, "Profile device", "profile"),
            group_members: MemberStatements::register(registry),
        }
    }
}

impl ClusterTx<'_> {
    /// Config of every owner in `ids`, keyed by owner ID.
    pub(crate) fn get_config(
        &self,
        stmts: &ConfigStatements,
        ids: &[i64],
    ) -> Result<BTreeMap<i64, Config>> {
        let mut out: BTreeMap<i64, Config> = BTreeMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let rows: Vec<ConfigRow> = self.select(&stmts.objects, &OwnerFilter::batch(ids))?;
        for row in rows {
            out.entry(row.owner_id).or_default().insert(row.key, row.value);
        }
        Ok(out)
    }

    pub(crate) fn create_config(
        &self,
        stmts: &ConfigStatements,
        owner_id: i64,
        config: &Config,
    ) -> Result<()> {
        for (key, value) in config {
            if value.is_empty() {
                continue;
            }
            self.exec(
                stmts.create,
                stmts.entity,
                "create",
                &[
                    Value::Integer(owner_id),
                    Value::Text(key.clone()),
                    Value::Text(value.clone()),
                ],
            )?;
        }
        Ok(())
    }

    /// Replace the owner's config with `config`.
    pub(crate) fn update_config(
        &self,
        stmts: &ConfigStatements,
        owner_id: i64,
        config: &Config,
    ) -> Result<()> {
        self.exec(stmts.delete, stmts.entity, "delete", &[Value::Integer(owner_id)])?;
        self.create_config(stmts, owner_id, config)
    }

    /// Devices of every owner in `ids`, keyed by owner ID.
    pub(crate) fn get_devices(
        &self,
        stmts: &DeviceStatements,
        ids: &[i64],
    ) -> Result<BTreeMap<i64, Devices>> {
        let mut out: BTreeMap<i64, Devices> = BTreeMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let rows: Vec<DeviceRow> = self.select(&stmts.objects, &OwnerFilter::batch(ids))?;
        for row in rows {
            let device = out
                .entry(row.owner_id)
                .or_default()
                .entry(row.name)
                .or_insert_with(|| Device::from([("type".to_string(), row.kind.name().to_string())]));
            if !row.key.is_empty() {
                device.insert(row.key, row.value);
            }
        }
        Ok(out)
    }

    pub(crate) fn create_devices(
        &self,
        stmts: &DeviceStatements,
        owner_id: i64,
        devices: &Devices,
    ) -> Result<()> {
        for (name, device) in devices {
            let kind = match device.get("type") {
                Some(kind) => DeviceType::from_name(kind)?,
                None => {
                    return Err(DbError::Invalid(format!(
                        "missing device type for device {name:?}"
                    )))
                }
            };
            let device_id = self.insert(
                stmts.create,
                stmts.entity,
                &[
                    Value::Integer(owner_id),
                    Value::Text(name.clone()),
                    Value::Integer(kind.code()),
                ],
            )?;
            for (key, value) in device.iter().filter(|(k, _)| k.as_str() != "type") {
                self.exec(
                    stmts.create_config,
                    stmts.entity,
                    "create",
                    &[
                        Value::Integer(device_id),
                        Value::Text(key.clone()),
                        Value::Text(value.clone()),
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Replace the owner's devices with `devices`.
    pub(crate) fn update_devices(
        &self,
        stmts: &DeviceStatements,
        owner_id: i64,
        devices: &Devices,
    ) -> Result<()> {
        self.exec(stmts.delete, stmts.entity, "delete", &[Value::Integer(owner_id)])?;
        self.create_devices(stmts, owner_id, devices)
    }

    /// Member node names of every group in `ids`, keyed by group ID.
    pub(crate) fn get_group_members(&self, ids: &[i64]) -> Result<BTreeMap<i64, Vec<String>>> {
        let mut out: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let stmts = &self.stmts().catalog().references.group_members;
        let rows: Vec<MemberRow> = self.select(&stmts.objects, &OwnerFilter::batch(ids))?;
        for row in rows {
            out.entry(row.group_id).or_default().push(row.node);
        }
        Ok(out)
    }

    pub(crate) fn add_group_members(&self, group_id: i64, nodes: &[String]) -> Result<()> {
        let stmts = &self.stmts().catalog().references.group_members;
        for node in nodes {
            self.exec(
                stmts.create,
                "Cluster group member",
                "create",
                &[Value::Integer(group_id), Value::Text(node.clone())],
            )
            .inspect_err(|err| {
                tracing::debug!(node = %node, error = %err, "error adding node to cluster group");
            })?;
        }
        Ok(())
    }

    pub(crate) fn remove_group_members(&self, group_id: i64) -> Result<usize> {
        let stmts = &self.stmts().catalog().references.group_members;
        self.exec(
            stmts.delete,
            "Cluster group member",
            "delete",
            &[Value::Integer(group_id)],
        )
    }
}
