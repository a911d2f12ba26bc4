//! Cluster groups and their member nodes.

use rusqlite::types::Value;
use rusqlite::Row;

use crate::api::ClusterGroupView;
use crate::errors::{DbError, Result};
use crate::filter::{field, Filter, ShapeTable};
use crate::mapper::{found, text, ClusterTx, Record};
use crate::stmt::{Predicate, SelectTemplate, StatementCode, StatementRegistry};

const ENTITY: &str = "Cluster group";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterGroup {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Member node names.
    pub nodes: Vec<String>,
}

impl ClusterGroup {
    pub fn to_api(&self) -> ClusterGroupView {
        ClusterGroupView {
            name: self.name.clone(),
            description: self.description.clone(),
            members: self.nodes.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusterGroupFilter {
    pub id: Option<i64>,
    pub name: Option<String>,
}

impl ClusterGroupFilter {
    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }
}

impl Filter for ClusterGroupFilter {
    fn values(&self) -> Vec<Option<Value>> {
        vec![field(&self.id), field(&self.name)]
    }
}

impl Record for ClusterGroup {
    type Filter = ClusterGroupFilter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            nodes: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct ClusterGroupStatements {
    pub objects: ShapeTable,
    pub id: StatementCode,
    pub create: StatementCode,
    pub rename: StatementCode,
    pub update: StatementCode,
    pub delete_by_name: StatementCode,
}

impl ClusterGroupStatements {
    pub fn register(registry: &mut StatementRegistry) -> Self {
        let mut objects = ShapeTable::new(
            ENTITY,
            SelectTemplate::new(
                "SELECT cluster_groups.id, cluster_groups.name, coalesce(cluster_groups.description, '')
  FROM cluster_groups",
                vec![
                    Predicate::new("id", "cluster_groups.id"),
                    Predicate::new("name", "cluster_groups.name"),
                ],
                "cluster_groups.name",
            ),
        );
        objects.register_all(registry);

        Self {
            objects,
            id: registry.register(
                "SELECT cluster_groups.id FROM cluster_groups WHERE cluster_groups.name = ?",
                None,
            ),
            create: registry.register(
                "INSERT INTO cluster_groups (name, description) VALUES (?, ?)",
                None,
            ),
            rename: registry.register("UPDATE cluster_groups SET name = ? WHERE name = ?", None),
            update: registry.register(
                "UPDATE cluster_groups SET name = ?, description = ? WHERE id = ?",
                None,
            ),
            delete_by_name: registry.register("DELETE FROM cluster_groups WHERE name = ?", None),
        }
    }
}

impl ClusterTx<'_> {
    /// Groups matching any of `filters`, with their members.
    pub fn get_cluster_groups(&self, filters: &[ClusterGroupFilter]) -> Result<Vec<ClusterGroup>> {
        let stmts = &self.stmts().catalog().cluster_groups;
        let mut groups: Vec<ClusterGroup> = self.select(&stmts.objects, filters)?;
        let ids: Vec<i64> = groups.iter().map(|g| g.id).collect();
        let mut members = self.get_group_members(&ids)?;
        for group in &mut groups {
            group.nodes = members.remove(&group.id).unwrap_or_default();
        }
        Ok(groups)
    }

    pub fn get_cluster_group(&self, name: &str) -> Result<ClusterGroup> {
        let stmts = &self.stmts().catalog().cluster_groups;
        let mut group: ClusterGroup =
            self.select_one(&stmts.objects, ClusterGroupFilter::by_name(name))?;
        group.nodes = self
            .get_group_members(&[group.id])?
            .remove(&group.id)
            .unwrap_or_default();
        Ok(group)
    }

    pub fn get_cluster_group_id(&self, name: &str) -> Result<i64> {
        let stmts = &self.stmts().catalog().cluster_groups;
        self.query_id(stmts.id, ENTITY, &[text(name)])
    }

    pub fn cluster_group_exists(&self, name: &str) -> Result<bool> {
        found(self.get_cluster_group_id(name))
    }

    pub fn create_cluster_group(&self, group: &ClusterGroup) -> Result<i64> {
        if self.cluster_group_exists(&group.name)? {
            return Err(DbError::Conflict { entity: ENTITY });
        }
        let stmts = &self.stmts().catalog().cluster_groups;
        let id = self.insert(
            stmts.create,
            ENTITY,
            &[text(&group.name), text(&group.description)],
        )?;
        self.add_group_members(id, &group.nodes)?;
        Ok(id)
    }

    pub fn rename_cluster_group(&self, name: &str, to: &str) -> Result<()> {
        let stmts = &self.stmts().catalog().cluster_groups;
        self.exec_one(stmts.rename, ENTITY, "rename", &[text(to), text(name)])
    }

    /// Update the row and replace the member set.
    ///
    /// All three steps run in the caller's transaction; on error the caller
    /// rolls back and the previous members survive.
    pub fn update_cluster_group(&self, name: &str, group: &ClusterGroup) -> Result<()> {
        let id = self.get_cluster_group_id(name)?;
        let stmts = &self.stmts().catalog().cluster_groups;
        self.exec_one(
            stmts.update,
            ENTITY,
            "update",
            &[text(&group.name), text(&group.description), Value::Integer(id)],
        )?;
        self.remove_group_members(id)?;
        self.add_group_members(id, &group.nodes)
    }

    pub fn delete_cluster_group(&self, name: &str) -> Result<()> {
        let stmts = &self.stmts().catalog().cluster_groups;
        self.exec_one(stmts.delete_by_name, ENTITY, "delete", &[text(name)])
    }
}
