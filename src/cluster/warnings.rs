//! Warnings raised against nodes, projects or individual entities.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::Row;
use uuid::Uuid;

use crate::errors::Result;
use crate::filter::{field, Filter, Shape, ShapeTable};
use crate::mapper::{found, text, timestamp, ClusterTx, Record};
use crate::stmt::{Predicate, SelectTemplate, StatementCode, StatementRegistry};

const ENTITY: &str = "Warning";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WarningStatus {
    #[default]
    New,
    Acknowledged,
    Resolved,
}

impl WarningStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::New => 1,
            Self::Acknowledged => 2,
            Self::Resolved => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::New),
            2 => Some(Self::Acknowledged),
            4 => Some(Self::Resolved),
            _ => None,
        }
    }
}

impl From<WarningStatus> for Value {
    fn from(status: WarningStatus) -> Self {
        Value::Integer(status.code())
    }
}

impl ToSql for WarningStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for WarningStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub id: i64,
    /// Empty when not tied to a node.
    pub node: String,
    /// Empty when not tied to a project.
    pub project: String,
    /// -1 when not tied to an entity.
    pub entity_type_code: i64,
    pub entity_id: i64,
    pub uuid: String,
    pub type_code: i64,
    pub status: WarningStatus,
    pub first_seen_date: DateTime<Utc>,
    pub last_seen_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    pub last_message: String,
    pub count: i64,
}

impl Warning {
    /// A fresh, unattached warning seen once, now.
    pub fn new(type_code: i64, message: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            node: String::new(),
            project: String::new(),
            entity_type_code: -1,
            entity_id: -1,
            uuid: Uuid::now_v7().to_string(),
            type_code,
            status: WarningStatus::New,
            first_seen_date: now,
            last_seen_date: now,
            updated_date: now,
            last_message: message.to_string(),
            count: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WarningFilter {
    pub id: Option<i64>,
    pub uuid: Option<String>,
    pub project: Option<String>,
    pub node: Option<String>,
    pub type_code: Option<i64>,
    pub entity_type_code: Option<i64>,
    pub entity_id: Option<i64>,
    pub status: Option<WarningStatus>,
}

impl WarningFilter {
    pub const ID: usize = 0;
    pub const UUID: usize = 1;
    pub const PROJECT: usize = 2;
    pub const NODE: usize = 3;
    pub const TYPE_CODE: usize = 4;
    pub const ENTITY_TYPE_CODE: usize = 5;
    pub const ENTITY_ID: usize = 6;
    pub const STATUS: usize = 7;

    pub fn by_uuid(uuid: &str) -> Self {
        Self {
            uuid: Some(uuid.to_string()),
            ..Default::default()
        }
    }

    pub fn by_status(status: WarningStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

impl Filter for WarningFilter {
    fn values(&self) -> Vec<Option<Value>> {
        vec![
            field(&self.id),
            field(&self.uuid),
            field(&self.project),
            field(&self.node),
            field(&self.type_code),
            field(&self.entity_type_code),
            field(&self.entity_id),
            field(&self.status),
        ]
    }
}

impl Record for Warning {
    type Filter = WarningFilter;

    fn scan(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            node: row.get(1)?,
            project: row.get(2)?,
            entity_type_code: row.get(3)?,
            entity_id: row.get(4)?,
            uuid: row.get(5)?,
            type_code: row.get(6)?,
            status: row.get(7)?,
            first_seen_date: row.get(8)?,
            last_seen_date: row.get(9)?,
            updated_date: row.get(10)?,
            last_message: row.get(11)?,
            count: row.get(12)?,
        })
    }
}

/// `NULL` for the "unset" sentinel -1.
fn optional_code(code: i64) -> Value {
    if code < 0 {
        Value::Null
    } else {
        Value::Integer(code)
    }
}

/// Field combinations warnings are queried by.
const SHAPES: &[&[usize]] = &[
    &[],
    &[WarningFilter::UUID],
    &[WarningFilter::PROJECT],
    &[WarningFilter::STATUS],
    &[WarningFilter::NODE, WarningFilter::TYPE_CODE],
    &[WarningFilter::NODE, WarningFilter::TYPE_CODE, WarningFilter::PROJECT],
    &[
        WarningFilter::NODE,
        WarningFilter::TYPE_CODE,
        WarningFilter::PROJECT,
        WarningFilter::ENTITY_TYPE_CODE,
        WarningFilter::ENTITY_ID,
    ],
];

#[derive(Debug)]
pub struct WarningStatements {
    pub objects: ShapeTable,
    pub id: StatementCode,
    pub create: StatementCode,
    pub update_status: StatementCode,
    pub delete_by_uuid: StatementCode,
    pub delete_by_entity_type_code_and_entity_id: StatementCode,
}

impl WarningStatements {
    pub fn register(registry: &mut StatementRegistry) -> Self {
        let mut objects = ShapeTable::new(
            ENTITY,
            SelectTemplate::new(
                "SELECT warnings.id, coalesce(nodes.name, ''), coalesce(projects.name, ''),
    coalesce(warnings.entity_type_code, -1), coalesce(warnings.entity_id, -1), warnings.uuid,
    warnings.type_code, warnings.status, warnings.first_seen_date, warnings.last_seen_date,
    warnings.updated_date, warnings.last_message, warnings.count
  FROM warnings
  LEFT JOIN nodes ON warnings.node_id = nodes.id
  LEFT JOIN projects ON warnings.project_id = projects.id",
                vec![
                    Predicate::new("id", "warnings.id"),
                    Predicate::new("uuid", "warnings.uuid"),
                    Predicate::new("project", "coalesce(projects.name, '')"),
                    Predicate::new("node", "coalesce(nodes.name, '')"),
                    Predicate::new("type_code", "warnings.type_code"),
                    Predicate::new("entity_type_code", "coalesce(warnings.entity_type_code, -1)"),
                    Predicate::new("entity_id", "coalesce(warnings.entity_id, -1)"),
                    Predicate::new("status", "warnings.status"),
                ],
                "warnings.uuid",
            ),
        );
        for fields in SHAPES {
            objects.register(registry, Shape::from_indices(fields.iter().copied()));
        }
        objects.register_fanout(registry, WarningFilter::STATUS, 3);

        Self {
            objects,
            id: registry.register("SELECT warnings.id FROM warnings WHERE warnings.uuid = ?", None),
            create: registry.register(
                "INSERT INTO warnings (node_id, project_id, entity_type_code, entity_id, uuid, type_code, status,
    first_seen_date, last_seen_date, updated_date, last_message, count)
  VALUES ((SELECT nodes.id FROM nodes WHERE nodes.name = ?),
    (SELECT projects.id FROM projects WHERE projects.name = ?), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                None,
            ),
            update_status: registry.register(
                "UPDATE warnings SET status = ?, updated_date = ? WHERE uuid = ?",
                None,
            ),
            delete_by_uuid: registry.register("DELETE FROM warnings WHERE uuid = ?", None),
            delete_by_entity_type_code_and_entity_id: registry.register(
                "DELETE FROM warnings WHERE entity_type_code = ? AND entity_id = ?",
                None,
            ),
        }
    }
}

impl ClusterTx<'_> {
    /// Warnings matching any of `filters`, ordered by UUID. Only the field
    /// combinations warnings are queried by are supported.
    pub fn get_warnings(&self, filters: &[WarningFilter]) -> Result<Vec<Warning>> {
        let stmts = &self.stmts().catalog().warnings;
        self.select(&stmts.objects, filters)
    }

    pub fn get_warning(&self, uuid: &str) -> Result<Warning> {
        let stmts = &self.stmts().catalog().warnings;
        self.select_one(&stmts.objects, WarningFilter::by_uuid(uuid))
    }

    pub fn get_warning_id(&self, uuid: &str) -> Result<i64> {
        let stmts = &self.stmts().catalog().warnings;
        self.query_id(stmts.id, ENTITY, &[text(uuid)])
    }

    pub fn warning_exists(&self, uuid: &str) -> Result<bool> {
        found(self.get_warning_id(uuid))
    }

    /// Insert the warning; a duplicate UUID is a conflict.
    pub fn create_warning(&self, warning: &Warning) -> Result<i64> {
        let stmts = &self.stmts().catalog().warnings;
        self.insert(
            stmts.create,
            ENTITY,
            &[
                text(&warning.node),
                text(&warning.project),
                optional_code(warning.entity_type_code),
                optional_code(warning.entity_id),
                text(&warning.uuid),
                Value::Integer(warning.type_code),
                warning.status.into(),
                timestamp(&warning.first_seen_date),
                timestamp(&warning.last_seen_date),
                timestamp(&warning.updated_date),
                text(&warning.last_message),
                Value::Integer(warning.count),
            ],
        )
    }

    pub fn update_warning_status(&self, uuid: &str, status: WarningStatus) -> Result<()> {
        let stmts = &self.stmts().catalog().warnings;
        self.exec_one(
            stmts.update_status,
            ENTITY,
            "update",
            &[status.into(), timestamp(&Utc::now()), text(uuid)],
        )
    }

    pub fn delete_warning(&self, uuid: &str) -> Result<()> {
        let stmts = &self.stmts().catalog().warnings;
        self.exec_one(stmts.delete_by_uuid, ENTITY, "delete", &[text(uuid)])
    }

    /// Delete every warning about one entity. Matching nothing is not an
    /// error.
    pub fn delete_warnings(&self, entity_type_code: i64, entity_id: i64) -> Result<usize> {
        let stmts = &self.stmts().catalog().warnings;
        self.exec(
            stmts.delete_by_entity_type_code_and_entity_id,
            ENTITY,
            "delete",
            &[Value::Integer(entity_type_code), Value::Integer(entity_id)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DbError;
    use crate::filter::{plan, Plan};
    use crate::testing::Fixture;

    fn attached(node: &str, project: &str, type_code: i64) -> Warning {
        let mut w = Warning::new(type_code, "disk almost full");
        w.node = node.to_string();
        w.project = project.to_string();
        w
    }

    #[test]
    fn test_unattached_warning_reads_back_sentinels() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            let w = Warning::new(5, "clock skew");
            tx.create_warning(&w)?;
            let got = tx.get_warning(&w.uuid)?;
            assert_eq!(got.node, "");
            assert_eq!(got.project, "");
            assert_eq!(got.entity_type_code, -1);
            assert_eq!(got.entity_id, -1);
            assert_eq!(got.status, WarningStatus::New);
            assert_eq!(got.first_seen_date, w.first_seen_date);
            Ok(())
        });
    }

    #[test]
    fn test_duplicate_uuid_conflicts() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            let w = Warning::new(5, "clock skew");
            tx.create_warning(&w)?;
            assert!(matches!(
                tx.create_warning(&w),
                Err(DbError::Conflict { entity: "Warning" })
            ));
            Ok(())
        });
    }

    #[test]
    fn test_node_and_type_matches_empty_project_column() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            tx.create_warning(&attached("node1", "", 3))?;
            tx.create_warning(&attached("node1", "default", 3))?;
            tx.create_warning(&attached("node2", "", 3))?;

            let by_node_type = WarningFilter {
                node: Some("node1".into()),
                type_code: Some(3),
                ..Default::default()
            };
            assert_eq!(tx.get_warnings(&[by_node_type.clone()])?.len(), 2);

            let unscoped = WarningFilter {
                project: Some(String::new()),
                ..by_node_type
            };
            let got = tx.get_warnings(&[unscoped])?;
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].project, "");
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_shape_is_usage_error() {
        let mut fx = Fixture::new();
        let err = fx.try_tx(|tx| {
            tx.get_warnings(&[WarningFilter {
                type_code: Some(3),
                ..Default::default()
            }])
        });
        assert!(matches!(err, Err(DbError::UnsupportedFilterShape { entity: "Warning", .. })));
    }

    #[test]
    fn test_status_fanout_and_update() {
        let mut fx = Fixture::new();
        let stmts = fx.stmts.clone();
        let all_statuses = [
            WarningFilter::by_status(WarningStatus::New),
            WarningFilter::by_status(WarningStatus::Acknowledged),
            WarningFilter::by_status(WarningStatus::Resolved),
        ];
        let planned = plan(&stmts.catalog().warnings.objects, stmts.registry(), &all_statuses).unwrap();
        assert!(matches!(planned, Plan::Prepared { .. }));

        fx.with_tx(|tx| {
            let a = Warning::new(1, "a");
            let b = Warning::new(2, "b");
            tx.create_warning(&a)?;
            tx.create_warning(&b)?;
            tx.update_warning_status(&a.uuid, WarningStatus::Resolved)?;
            assert!(tx
                .update_warning_status("missing", WarningStatus::Resolved)
                .unwrap_err()
                .is_not_found());

            assert_eq!(tx.get_warnings(&all_statuses)?.len(), 2);
            let resolved = tx.get_warnings(&[WarningFilter::by_status(WarningStatus::Resolved)])?;
            assert_eq!(resolved.len(), 1);
            assert_eq!(resolved[0].uuid, a.uuid);
            Ok(())
        });
    }

    #[test]
    fn test_delete_by_entity_and_single_delete() {
        let mut fx = Fixture::new();
        fx.with_tx(|tx| {
            for _ in 0..2 {
                let mut w = Warning::new(1, "instance broken");
                w.entity_type_code = 16;
                w.entity_id = 42;
                tx.create_warning(&w)?;
            }
            let lone = Warning::new(1, "other");
            tx.create_warning(&lone)?;

            assert_eq!(tx.delete_warnings(16, 42)?, 2);
            assert_eq!(tx.delete_warnings(16, 42)?, 0);
            assert!(tx.warning_exists(&lone.uuid)?);
            tx.delete_warning(&lone.uuid)?;
            assert!(!tx.warning_exists(&lone.uuid)?);
            assert!(tx.delete_warning(&lone.uuid).unwrap_err().is_not_found());
            Ok(())
        });
    }
}
