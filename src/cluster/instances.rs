//! Instances and their profile links.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::Row;

use crate::api::{architecture_name, InstanceView};
use crate::cluster::profiles::{Profile, ProfileFilter};
use crate::cluster::references::{Config, Devices, OwnerFilter};
use crate::errors::{DbError, Result};
use crate::expand::{expand_config, expand_devices};
use crate::filter::{field, Filter, ShapeTable};
use crate::mapper::{found, nullable_timestamp, text, timestamp, ClusterTx, Record};
use crate::stmt::{Predicate, SelectTemplate, StatementCode, StatementRegistry};

const ENTITY: &str = "Instance";
const PROFILE_LINK: &str = "Instance profile";
const PROJECT_ID: &str = "(SELECT projects.id FROM projects WHERE projects.name = ?)";
const NODE_ID: &str = "(SELECT nodes.id FROM nodes WHERE nodes.name = ?)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InstanceType {
    #[default]
    Container,
    VirtualMachine,
}

impl InstanceType {
    pub fn code(self) -> i64 {
        match self {
            Self::Container => 0,
            Self::VirtualMachine => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Container),
            1 => Some(Self::VirtualMachine),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::VirtualMachine => "virtual-machine",
        }
    }
}

impl From<InstanceType> for Value {
    fn from(kind: InstanceType) -> Self {
        Value::Integer(kind.code())
    }
}

impl ToSql for InstanceType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for InstanceType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: i64,
    pub project: String,
    pub name: String,
    pub node: String,
    pub kind: InstanceType,
    pub architecture: i64,
    pub ephemeral: bool,
    pub creation_date: DateTime<Utc>,
    pub stateful: bool,
    pub last_use_date: Option<DateTime<Utc>>,
    pub description: String,
    pub expiry_date: Option<DateTime<Utc>>,
    pub config: Config,
    pub devices: Devices,
    /// Profile names in apply order.
    pub profiles: Vec<String>,
}

impl Instance {
    pub fn new(project: &str, name: &str, node: &str) -> Self {
        Self {
            id: 0,
            project: project.to_string(),
            name: name.to_string(),
            node: node.to_string(),
            kind: InstanceType::default(),
            architecture: 2,
            ephemeral: false,
            creation_date: Utc::now(),
            stateful: false,
            last_use_date: None,
            description: String::new(),
            expiry_date: None,
            config: Config::new(),
            devices: Devices::new(),
            profiles: Vec::new(),
        }
    }

    fn row_args(&self) -> Vec<Value> {
        vec![
            text(&self.project),
            text(&self.name),
            text(&self.node),
            self.kind.into(),
            Value::Integer(self.architecture),
            self.ephemeral.into(),
            timestamp(&self.creation_date),
            self.stateful.into(),
            nullable_timestamp(&self.last_use_date),
            text(&self.description),
            nullable_timestamp(&self.expiry_date),
        ]
    }

    /// Externally facing form, with profiles folded into the expanded
    /// config and devices.
    pub fn to_api(&self, tx: &ClusterTx<'_>) -> Result<InstanceView> {
        let profiles = tx.get_instance_profiles(self.id)?;
        let catalog = tx.stmts().catalog();
        let config = tx
            .get_config(&catalog.references.instance_config, &[self.id])?
            .remove(&self.id)
            .unwrap_or_default();
        let devices = tx
            .get_devices(&catalog.references.instance_devices, &[self.id])?
            .remove(&self.id)
            .unwrap_or_default();

        Ok(InstanceView {
            name: self.name.clone(),
            project: self.project.clone(),
            location: self.node.clone(),
            kind: self.kind.name().to_string(),
            architecture: architecture_name(self.architecture)?.to_string(),
            description: self.description.clone(),
            ephemeral: self.ephemeral,
            stateful: self.stateful,
            profiles: profiles.iter().map(|p| p.name.clone()).collect(),
            expanded_config: expand_config(&config, profiles.iter().map(|p| &p.config)),
            expanded_devices: expand_devices(&devices, profiles.iter().map(|p| &p.devices)),
            config,
            devices,
            created_at: self.creation_date,
            last_used_at: self.last_use_date,
            expires_at: self.expiry_date,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub id: Option<i64>,
    pub project: Option<String>,
    pub name: Option<String>,
    pub node: Option<String>,
    pub kind: Option<InstanceType>,
}

impl InstanceFilter {
    pub const ID: usize = 0;
    pub const PROJECT: usize = 1;
    pub const NAME: usize = 2;
    pub const NODE: usize = 3;
    pub const TYPE: usize = 4;

    pub fn by_key(project: &str, name: &str) -> Self {
        Self {
            project: Some(project.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn by_type(kind: InstanceType) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }
}

impl Filter for InstanceFilter {
    fn values(&self) -> Vec<Option<Value>> {
        vec![
            field(&self.id),
            field(&self.project),
            field(&self.name),
            field(&self.node),
            field(&self.kind),
        ]
    }
}

impl Record for Instance {
    type Filter = InstanceFilter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project: row.get(1)?,
            name: row.get(2)?,
            node: row.get(3)?,
            kind: row.get(4)?,
            architecture: row.get(5)?,
            ephemeral: row.get(6)?,
            creation_date: row.get(7)?,
            stateful: row.get(8)?,
            last_use_date: row.get(9)?,
            description: row.get(10)?,
            expiry_date: row.get(11)?,
            config: Config::new(),
            devices: Devices::new(),
            profiles: Vec::new(),
        })
    }
}

/// One instance→profile link, in apply order.
#[derive(Debug, Clone)]
pub(crate) struct ProfileLink {
    instance_id: i64,
    profile_id: i64,
    name: String,
}

impl Record for ProfileLink {
    type Filter = OwnerFilter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            instance_id: row.get(0)?,
            profile_id: row.get(1)?,
            name: row.get(2)?,
        })
    }
}

#[derive(Debug)]
pub struct InstanceStatements {
    pub objects: ShapeTable,
    pub id: StatementCode,
    pub create: StatementCode,
    pub rename: StatementCode,
    pub update: StatementCode,
    pub delete_by_project_and_name: StatementCode,
    pub profiles: ShapeTable,
    pub create_profile: StatementCode,
    pub delete_profiles: StatementCode,
}

impl InstanceStatements {
    pub fn register(registry: &mut StatementRegistry) -> Self {
        let mut objects = ShapeTable::new(
            ENTITY,
            SelectTemplate::new(
                "SELECT instances.id, projects.name, instances.name, nodes.name, instances.type, instances.architecture,
    instances.ephemeral, instances.creation_date, instances.stateful, instances.last_use_date,
    coalesce(instances.description, ''), instances.expiry_date
  FROM instances
  JOIN projects ON instances.project_id = projects.id
  JOIN nodes ON instances.node_id = nodes.id",
                vec![
                    Predicate::new("id", "instances.id"),
                    Predicate::new("project", "projects.name"),
                    Predicate::new("name", "instances.name"),
                    Predicate::new("node", "nodes.name"),
                    Predicate::new("type", "instances.type"),
                ],
                "projects.id, instances.name",
            ),
        );
        objects.register_all(registry);
        objects.register_fanout(registry, InstanceFilter::TYPE, 2);

        let mut profiles = ShapeTable::new(
            PROFILE_LINK,
            SelectTemplate::new(
                "SELECT instances_profiles.instance_id, instances_profiles.profile_id, profiles.name
  FROM instances_profiles JOIN profiles ON instances_profiles.profile_id = profiles.id",
                vec![Predicate::new("instance_id", "instances_profiles.instance_id")],
                "instances_profiles.instance_id, instances_profiles.apply_order",
            ),
        );
        profiles.register_all(registry);

        Self {
            objects,
            id: registry.register(
                "SELECT instances.id FROM instances JOIN projects ON instances.project_id = projects.id
  WHERE projects.name = ? AND instances.name = ?",
                None,
            ),
            create: registry.register(
                &format!(
                    "INSERT INTO instances (project_id, name, node_id, type, architecture, ephemeral, creation_date,
    stateful, last_use_date, description, expiry_date)
  VALUES ({PROJECT_ID}, ?, {NODE_ID}, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                None,
            ),
            rename: registry.register(
                &format!("UPDATE instances SET name = ? WHERE name = ? AND project_id = {PROJECT_ID}"),
                None,
            ),
            update: registry.register(
                &format!(
                    "UPDATE instances SET project_id = {PROJECT_ID}, name = ?, node_id = {NODE_ID}, type = ?,
    architecture = ?, ephemeral = ?, creation_date = ?, stateful = ?, last_use_date = ?,
    description = ?, expiry_date = ?
  WHERE id = ?"
                ),
                None,
            ),
            delete_by_project_and_name: registry.register(
                &format!("DELETE FROM instances WHERE project_id = {PROJECT_ID} AND name = ?"),
                None,
            ),
            profiles,
            create_profile: registry.register(
                "INSERT INTO instances_profiles (instance_id, profile_id, apply_order) VALUES (?, ?, ?)",
                None,
            ),
            delete_profiles: registry.register(
                "DELETE FROM instances_profiles WHERE instance_id = ?",
                None,
            ),
        }
    }
}

impl ClusterTx<'_> {
    /// Instances matching any of `filters`, with config, devices and profile
    /// names. Results follow project then name order, not batch order.
    pub fn get_instances(&self, filters: &[InstanceFilter]) -> Result<Vec<Instance>> {
        let catalog = self.stmts().catalog();
        let mut instances: Vec<Instance> = self.select(&catalog.instances.objects, filters)?;
        let ids: Vec<i64> = instances.iter().map(|i| i.id).collect();
        let mut config = self.get_config(&catalog.references.instance_config, &ids)?;
        let mut devices = self.get_devices(&catalog.references.instance_devices, &ids)?;
        let mut profiles = self.profile_links(&ids)?;
        for instance in &mut instances {
            instance.config = config.remove(&instance.id).unwrap_or_default();
            instance.devices = devices.remove(&instance.id).unwrap_or_default();
            instance.profiles = profiles
                .remove(&instance.id)
                .unwrap_or_default()
                .into_iter()
                .map(|link| link.name)
                .collect();
        }
        Ok(instances)
    }

    pub fn get_instance(&self, project: &str, name: &str) -> Result<Instance> {
        let mut instances = self.get_instances(&[InstanceFilter::by_key(project, name)])?;
        match instances.len() {
            0 => Err(DbError::NotFound { entity: ENTITY }),
            1 => Ok(instances.remove(0)),
            rows => Err(DbError::Integrity {
                entity: ENTITY,
                op: "get",
                rows,
            }),
        }
    }

    pub fn get_instance_id(&self, project: &str, name: &str) -> Result<i64> {
        let stmts = &self.stmts().catalog().instances;
        self.query_id(stmts.id, ENTITY, &[text(project), text(name)])
    }

    pub fn instance_exists(&self, project: &str, name: &str) -> Result<bool> {
        found(self.get_instance_id(project, name))
    }

    /// Insert the instance with its config, devices and profile links;
    /// returns the new ID.
    pub fn create_instance(&self, instance: &Instance) -> Result<i64> {
        if self.instance_exists(&instance.project, &instance.name)? {
            return Err(DbError::Conflict { entity: ENTITY });
        }
        let catalog = self.stmts().catalog();
        let id = self.insert(catalog.instances.create, ENTITY, &instance.row_args())?;
        self.create_config(&catalog.references.instance_config, id, &instance.config)?;
        self.create_devices(&catalog.references.instance_devices, id, &instance.devices)?;
        self.link_profiles(id, &instance.project, &instance.profiles)?;
        Ok(id)
    }

    pub fn rename_instance(&self, project: &str, name: &str, to: &str) -> Result<()> {
        let stmts = &self.stmts().catalog().instances;
        self.exec_one(
            stmts.rename,
            ENTITY,
            "rename",
            &[text(to), text(name), text(project)],
        )
    }

    /// Update the row, then replace config and devices. Profile links are
    /// left alone; see [`ClusterTx::update_instance_profiles`].
    pub fn update_instance(&self, project: &str, name: &str, instance: &Instance) -> Result<()> {
        let id = self.get_instance_id(project, name)?;
        let catalog = self.stmts().catalog();
        let mut args = instance.row_args();
        args.push(Value::Integer(id));
        self.exec_one(catalog.instances.update, ENTITY, "update", &args)?;
        self.update_config(&catalog.references.instance_config, id, &instance.config)?;
        self.update_devices(&catalog.references.instance_devices, id, &instance.devices)
    }

    /// Replace the instance's profile links with `profiles`, in apply order.
    pub fn update_instance_profiles(
        &self,
        instance_id: i64,
        project: &str,
        profiles: &[String],
    ) -> Result<()> {
        let stmts = &self.stmts().catalog().instances;
        self.exec(
            stmts.delete_profiles,
            PROFILE_LINK,
            "delete",
            &[Value::Integer(instance_id)],
        )?;
        self.link_profiles(instance_id, project, profiles)
    }

    pub fn delete_instance(&self, project: &str, name: &str) -> Result<()> {
        let stmts = &self.stmts().catalog().instances;
        self.exec_one(
            stmts.delete_by_project_and_name,
            ENTITY,
            "delete",
            &[text(project), text(name)],
        )
    }

    /// Profiles applied to the instance, lowest priority first.
    pub fn get_instance_profiles(&self, instance_id: i64) -> Result<Vec<Profile>> {
        let links = self
            .profile_links(&[instance_id])?
            .remove(&instance_id)
            .unwrap_or_default();
        if links.is_empty() {
            return Ok(Vec::new());
        }
        let filters: Vec<ProfileFilter> = links
            .iter()
            .map(|link| ProfileFilter::by_id(link.profile_id))
            .collect();
        let mut by_id: BTreeMap<i64, Profile> = self
            .get_profiles(&filters)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        Ok(links
            .iter()
            .filter_map(|link| by_id.remove(&link.profile_id))
            .collect())
    }

    fn profile_links(&self, ids: &[i64]) -> Result<BTreeMap<i64, Vec<ProfileLink>>> {
        let mut out: BTreeMap<i64, Vec<ProfileLink>> = BTreeMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let stmts = &self.stmts().catalog().instances;
        let links: Vec<ProfileLink> = self.select(&stmts.profiles, &OwnerFilter::batch(ids))?;
        for link in links {
            out.entry(link.instance_id).or_default().push(link);
        }
        Ok(out)
    }

    fn link_profiles(&self, instance_id: i64, project: &str, profiles: &[String]) -> Result<()> {
        let stmts = &self.stmts().catalog().instances;
        for (order, name) in profiles.iter().enumerate() {
            let profile_id = match self.get_profile_if_enabled(project, name) {
                Ok(profile) => profile.id,
                Err(DbError::NotFound { .. }) => {
                    return Err(DbError::Invalid(format!(
                        "requested profile {name:?} doesn't exist"
                    )))
                }
                Err(err) => return Err(err),
            };
            self.exec(
                stmts.create_profile,
                PROFILE_LINK,
                "create",
                &[
                    Value::Integer(instance_id),
                    Value::Integer(profile_id),
                    Value::Integer(order as i64 + 1),
                ],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{plan, Plan};
    use crate::testing::{profile, Fixture};

    fn instance(project: &str, name: &str, node: &str, kind: InstanceType) -> Instance {
        let mut i = Instance::new(project, name, node);
        i.kind = kind;
        i
    }

    #[test]
    fn test_create_and_get_round_trips_columns() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            let mut i = instance("default", "c1", "node1", InstanceType::Container);
            i.description = "first".into();
            i.last_use_date = Some(i.creation_date);
            i.config.insert("security.nesting".into(), "true".into());
            let id = tx.create_instance(&i)?;

            let got = tx.get_instance("default", "c1")?;
            assert_eq!(got.id, id);
            assert_eq!(got.node, "node1");
            assert_eq!(got.description, "first");
            assert_eq!(got.creation_date, i.creation_date);
            assert_eq!(got.last_use_date, i.last_use_date);
            assert_eq!(got.expiry_date, None);
            assert_eq!(got.config, i.config);
            Ok(())
        });
    }

    #[test]
    fn test_duplicate_create_conflicts() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            let i = instance("default", "c1", "node1", InstanceType::Container);
            tx.create_instance(&i)?;
            let err = tx.create_instance(&i).unwrap_err();
            assert!(matches!(err, DbError::Conflict { entity: "Instance" }));
            Ok(())
        });
    }

    #[test]
    fn test_batch_equals_union_of_single_fetches() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            for (name, node) in [("a", "node1"), ("b", "node2"), ("c", "node1"), ("d", "node2")] {
                tx.create_instance(&instance("default", name, node, InstanceType::Container))?;
            }
            let batch = [
                InstanceFilter::by_name("d"),
                InstanceFilter::by_name("a"),
                InstanceFilter::by_name("zzz"),
            ];
            let batched: Vec<String> = tx
                .get_instances(&batch)?
                .into_iter()
                .map(|i| i.name)
                .collect();

            let mut union = Vec::new();
            for f in &batch {
                union.extend(tx.get_instances(std::slice::from_ref(f))?.into_iter().map(|i| i.name));
            }
            union.sort();
            assert_eq!(batched, union);
            assert_eq!(batched, vec!["a", "d"]);
            Ok(())
        });
    }

    #[test]
    fn test_two_types_use_registered_fanout() {
        let mut fx = Fixture::new();
        let stmts = fx.stmts.clone();
        let table = &stmts.catalog().instances.objects;
        let batch = [
            InstanceFilter::by_type(InstanceType::Container),
            InstanceFilter::by_type(InstanceType::VirtualMachine),
        ];
        let planned = plan(table, stmts.registry(), &batch).unwrap();
        assert!(matches!(planned, Plan::Prepared { .. }));

        fx.with_tx(|tx| {
            tx.create_instance(&instance("default", "c", "node1", InstanceType::Container))?;
            tx.create_instance(&instance("default", "v", "node1", InstanceType::VirtualMachine))?;
            assert_eq!(tx.get_instances(&batch)?.len(), 2);
            Ok(())
        });
    }

    #[test]
    fn test_mixed_shape_batch_rejected() {
        let mut fx = Fixture::new();
        let err = fx.try_tx(|tx| {
            tx.get_instances(&[
                InstanceFilter::by_name("a"),
                InstanceFilter::by_key("default", "b"),
            ])
        });
        assert!(matches!(err, Err(DbError::UnsupportedFilterShape { .. })));
    }

    #[test]
    fn test_rename_and_delete_single_row_invariants() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            tx.create_instance(&instance("default", "a", "node1", InstanceType::Container))?;
            tx.rename_instance("default", "a", "b")?;
            assert!(tx.rename_instance("default", "a", "c").unwrap_err().is_not_found());
            assert!(tx.instance_exists("default", "b")?);
            tx.delete_instance("default", "b")?;
            assert!(tx.delete_instance("default", "b").unwrap_err().is_not_found());
            assert!(!tx.instance_exists("default", "b")?);
            Ok(())
        });
    }

    #[test]
    fn test_update_replaces_config_and_devices() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            let mut i = instance("default", "a", "node1", InstanceType::Container);
            i.config.insert("old".into(), "1".into());
            tx.create_instance(&i)?;

            let mut next = tx.get_instance("default", "a")?;
            next.node = "node2".into();
            next.stateful = true;
            next.config = Config::from([("new".to_string(), "2".to_string())]);
            next.devices = Devices::from([(
                "root".to_string(),
                [("type".to_string(), "disk".to_string()), ("path".to_string(), "/".to_string())].into(),
            )]);
            tx.update_instance("default", "a", &next)?;

            let got = tx.get_instance("default", "a")?;
            assert_eq!(got.node, "node2");
            assert!(got.stateful);
            assert_eq!(got.config, next.config);
            assert_eq!(got.devices, next.devices);
            Ok(())
        });
    }

    #[test]
    fn test_profiles_kept_in_apply_order() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            tx.create_profile(&profile("default", "zeta"))?;
            tx.create_profile(&profile("default", "alpha"))?;
            let mut i = instance("default", "a", "node1", InstanceType::Container);
            i.profiles = vec!["zeta".into(), "alpha".into()];
            let id = tx.create_instance(&i)?;

            let names: Vec<String> = tx
                .get_instance_profiles(id)?
                .into_iter()
                .map(|p| p.name)
                .collect();
            assert_eq!(names, vec!["zeta", "alpha"]);
            assert_eq!(tx.get_instance("default", "a")?.profiles, names);

            tx.update_instance_profiles(id, "default", &["alpha".to_string()])?;
            assert_eq!(tx.get_instance("default", "a")?.profiles, vec!["alpha"]);

            let err = tx
                .update_instance_profiles(id, "default", &["missing".to_string()])
                .unwrap_err();
            assert!(matches!(err, DbError::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_to_api_expands_profiles_with_own_overrides() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            let mut base = profile("default", "base");
            base.config.insert("limits.memory".into(), "1GiB".into());
            base.config.insert("limits.cpu".into(), "1".into());
            base.devices.insert(
                "eth0".into(),
                [("type".to_string(), "nic".to_string()), ("nictype".to_string(), "bridged".to_string())].into(),
            );
            let mut fast = profile("default", "fast");
            fast.config.insert("limits.cpu".into(), "4".into());
            fast.devices.insert(
                "eth0".into(),
                [("type".to_string(), "nic".to_string()), ("nictype".to_string(), "macvlan".to_string())].into(),
            );
            tx.create_profile(&base)?;
            tx.create_profile(&fast)?;

            let mut i = instance("default", "web", "node1", InstanceType::VirtualMachine);
            i.profiles = vec!["base".into(), "fast".into()];
            i.config.insert("limits.memory".into(), "8GiB".into());
            tx.create_instance(&i)?;

            let view = tx.get_instance("default", "web")?.to_api(tx)?;
            assert_eq!(view.kind, "virtual-machine");
            assert_eq!(view.architecture, "x86_64");
            assert_eq!(view.profiles, vec!["base", "fast"]);
            assert_eq!(view.expanded_config["limits.cpu"], "4");
            assert_eq!(view.expanded_config["limits.memory"], "8GiB");
            assert_eq!(view.expanded_devices["eth0"]["nictype"], "macvlan");
            assert_eq!(view.config.len(), 1);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_architecture_fails_conversion() {
        let mut fx = Fixture::new();
        let err = fx.try_tx(|tx| {
            let mut i = instance("default", "odd", "node1", InstanceType::Container);
            i.architecture = 99;
            tx.create_instance(&i)?;
            tx.get_instance("default", "odd")?.to_api(tx)
        });
        assert!(matches!(err, Err(DbError::Invalid(_))));
    }

    mod union {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        const PROJECTS: [&str; 2] = ["default", "other"];
        const NODES: [&str; 3] = ["node1", "node2", "node3"];

        fn seeded() -> Fixture {
            let mut fx = Fixture::new();
            fx.with_tx(|tx| {
                for (p, project) in PROJECTS.iter().enumerate() {
                    for n in 0..6 {
                        let node = NODES[(n + p) % NODES.len()];
                        tx.create_instance(&Instance::new(project, &format!("c{n}"), node))?;
                    }
                }
                Ok(())
            });
            fx
        }

        fn ids(fx: &mut Fixture, filters: &[InstanceFilter]) -> BTreeSet<i64> {
            fx.with_tx(|tx| tx.get_instances(filters))
                .into_iter()
                .map(|i| i.id)
                .collect()
        }

        fn key_filters() -> impl Strategy<Value = Vec<InstanceFilter>> {
            prop::collection::vec((0..PROJECTS.len(), 0..8usize), 1..8).prop_map(|keys| {
                keys.into_iter()
                    .map(|(p, n)| InstanceFilter::by_key(PROJECTS[p], &format!("c{n}")))
                    .collect()
            })
        }

        fn node_filters() -> impl Strategy<Value = Vec<InstanceFilter>> {
            prop::collection::vec(0..NODES.len() + 1, 1..5).prop_map(|nodes| {
                nodes
                    .into_iter()
                    .map(|n| InstanceFilter {
                        node: Some(format!("node{}", n + 1)),
                        ..Default::default()
                    })
                    .collect()
            })
        }

        fn assert_union(filters: Vec<InstanceFilter>) -> std::result::Result<(), TestCaseError> {
            let mut fx = seeded();
            let batched = ids(&mut fx, &filters);
            let mut singles = BTreeSet::new();
            for f in &filters {
                singles.extend(ids(&mut fx, std::slice::from_ref(f)));
            }
            prop_assert_eq!(batched, singles);
            Ok(())
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn test_batched_keys_equal_union_of_single_fetches(filters in key_filters()) {
                assert_union(filters)?;
            }

            #[test]
            fn test_batched_nodes_equal_union_of_single_fetches(filters in node_filters()) {
                assert_union(filters)?;
            }
        }
    }
}
