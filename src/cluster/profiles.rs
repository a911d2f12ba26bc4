//! Profiles: named config/device bundles inherited by instances.

use rusqlite::types::Value;
use rusqlite::Row;

use crate::api::ProfileView;
use crate::cluster::references::{Config, Devices};
use crate::errors::{DbError, Result};
use crate::filter::{field, Filter, ShapeTable};
use crate::mapper::{found, text, ClusterTx, Record};
use crate::stmt::{Predicate, SelectTemplate, StatementCode, StatementRegistry};

const ENTITY: &str = "Profile";
const PROJECT_ID: &str = "(SELECT projects.id FROM projects WHERE projects.name = ?)";

/// Project every profile lookup falls back to.
pub const DEFAULT_PROJECT: &str = "default";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub id: i64,
    /// Read-only; derived from `project`.
    pub project_id: i64,
    pub project: String,
    pub name: String,
    pub description: String,
    pub config: Config,
    pub devices: Devices,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileFilter {
    pub id: Option<i64>,
    pub project: Option<String>,
    pub name: Option<String>,
}

impl ProfileFilter {
    pub fn by_key(project: &str, name: &str) -> Self {
        Self {
            project: Some(project.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }
}

impl Filter for ProfileFilter {
    fn values(&self) -> Vec<Option<Value>> {
        vec![field(&self.id), field(&self.project), field(&self.name)]
    }
}

impl Record for Profile {
    type Filter = ProfileFilter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            project: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            ..Default::default()
        })
    }
}

impl Profile {
    /// Externally facing form. Config and devices must already be loaded.
    pub fn to_api(&self) -> ProfileView {
        ProfileView {
            name: self.name.clone(),
            project: self.project.clone(),
            description: self.description.clone(),
            config: self.config.clone(),
            devices: self.devices.clone(),
        }
    }
}

#[derive(Debug)]
pub struct ProfileStatements {
    pub objects: ShapeTable,
    pub id: StatementCode,
    pub create: StatementCode,
    pub rename: StatementCode,
    pub update: StatementCode,
    pub delete_by_project_and_name: StatementCode,
    pub project_features: StatementCode,
}

impl ProfileStatements {
    pub fn register(registry: &mut StatementRegistry) -> Self {
        let mut objects = ShapeTable::new(
            ENTITY,
            SelectTemplate::new(
                "SELECT profiles.id, profiles.project_id, projects.name, profiles.name, coalesce(profiles.description, '')
  FROM profiles JOIN projects ON profiles.project_id = projects.id",
                vec![
                    Predicate::new("id", "profiles.id"),
                    Predicate::new("project", "projects.name"),
                    Predicate::new("name", "profiles.name"),
                ],
                "projects.id, profiles.name",
            ),
        );
        objects.register_all(registry);

        Self {
            objects,
            id: registry.register(
                "SELECT profiles.id FROM profiles JOIN projects ON profiles.project_id = projects.id
  WHERE projects.name = ? AND profiles.name = ?",
                None,
            ),
            create: registry.register(
                &format!("INSERT INTO profiles (project_id, name, description) VALUES ({PROJECT_ID}, ?, ?)"),
                None,
            ),
            rename: registry.register(
                &format!("UPDATE profiles SET name = ? WHERE name = ? AND project_id = {PROJECT_ID}"),
                None,
            ),
            update: registry.register(
                &format!(
                    "UPDATE profiles SET project_id = {PROJECT_ID}, name = ?, description = ? WHERE id = ?"
                ),
                None,
            ),
            delete_by_project_and_name: registry.register(
                &format!("DELETE FROM profiles WHERE project_id = {PROJECT_ID} AND name = ?"),
                None,
            ),
            project_features: registry.register(
                "SELECT projects_config.value FROM projects_config
  JOIN projects ON projects.id = projects_config.project_id
  WHERE projects.name = ? AND projects_config.key = 'features.profiles'",
                None,
            ),
        }
    }
}

impl ClusterTx<'_> {
    /// Profiles matching any of `filters`, with config and devices.
    pub fn get_profiles(&self, filters: &[ProfileFilter]) -> Result<Vec<Profile>> {
        let catalog = self.stmts().catalog();
        let mut profiles: Vec<Profile> = self.select(&catalog.profiles.objects, filters)?;
        let ids: Vec<i64> = profiles.iter().map(|p| p.id).collect();
        let mut config = self.get_config(&catalog.references.profile_config, &ids)?;
        let mut devices = self.get_devices(&catalog.references.profile_devices, &ids)?;
        for profile in &mut profiles {
            profile.config = config.remove(&profile.id).unwrap_or_default();
            profile.devices = devices.remove(&profile.id).unwrap_or_default();
        }
        Ok(profiles)
    }

    pub fn get_profile(&self, project: &str, name: &str) -> Result<Profile> {
        let mut profiles = self.get_profiles(&[ProfileFilter::by_key(project, name)])?;
        match profiles.len() {
            0 => Err(DbError::NotFound { entity: ENTITY }),
            1 => Ok(profiles.remove(0)),
            rows => Err(DbError::Integrity {
                entity: ENTITY,
                op: "get",
                rows,
            }),
        }
    }

    pub fn get_profile_id(&self, project: &str, name: &str) -> Result<i64> {
        let stmts = &self.stmts().catalog().profiles;
        self.query_id(stmts.id, ENTITY, &[text(project), text(name)])
    }

    pub fn profile_exists(&self, project: &str, name: &str) -> Result<bool> {
        found(self.get_profile_id(project, name))
    }

    /// Insert the profile with its config and devices; returns the new ID.
    pub fn create_profile(&self, profile: &Profile) -> Result<i64> {
        if self.profile_exists(&profile.project, &profile.name)? {
            return Err(DbError::Conflict { entity: ENTITY });
        }
        let catalog = self.stmts().catalog();
        let id = self.insert(
            catalog.profiles.create,
            ENTITY,
            &[
                text(&profile.project),
                text(&profile.name),
                text(&profile.description),
            ],
        )?;
        self.create_config(&catalog.references.profile_config, id, &profile.config)?;
        self.create_devices(&catalog.references.profile_devices, id, &profile.devices)?;
        Ok(id)
    }

    pub fn rename_profile(&self, project: &str, name: &str, to: &str) -> Result<()> {
        let stmts = &self.stmts().catalog().profiles;
        self.exec_one(
            stmts.rename,
            ENTITY,
            "rename",
            &[text(to), text(name), text(project)],
        )
    }

    /// Update the row, then replace config and devices.
    pub fn update_profile(&self, project: &str, name: &str, profile: &Profile) -> Result<()> {
        let id = self.get_profile_id(project, name)?;
        let catalog = self.stmts().catalog();
        self.exec_one(
            catalog.profiles.update,
            ENTITY,
            "update",
            &[
                text(&profile.project),
                text(&profile.name),
                text(&profile.description),
                Value::Integer(id),
            ],
        )?;
        self.update_config(&catalog.references.profile_config, id, &profile.config)?;
        self.update_devices(&catalog.references.profile_devices, id, &profile.devices)
    }

    pub fn delete_profile(&self, project: &str, name: &str) -> Result<()> {
        let stmts = &self.stmts().catalog().profiles;
        self.exec_one(
            stmts.delete_by_project_and_name,
            ENTITY,
            "delete",
            &[text(project), text(name)],
        )
    }

    /// Whether `project` keeps its own profiles rather than the default
    /// project's.
    pub fn project_has_profiles(&self, project: &str) -> Result<bool> {
        if project == DEFAULT_PROJECT {
            return Ok(true);
        }
        let stmts = &self.stmts().catalog().profiles;
        let values: Vec<String> = self.query_column(
            stmts.project_features,
            "Project",
            "get features of",
            &[text(project)],
        )?;
        Ok(values.first().is_some_and(|v| v == "true"))
    }

    /// The profile as seen from `project`: looked up in the default project
    /// unless the project has the profiles feature enabled.
    pub fn get_profile_if_enabled(&self, project: &str, name: &str) -> Result<Profile> {
        let project = if self.project_has_profiles(project)? {
            project
        } else {
            DEFAULT_PROJECT
        };
        self.get_profile(project, name)
    }
}
