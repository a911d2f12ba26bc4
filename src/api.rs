//! Externally facing representations of records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::references::{Config, Devices};
use crate::errors::{DbError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceView {
    pub name: String,
    pub project: String,
    /// Node the instance runs on.
    pub location: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub architecture: String,
    pub description: String,
    pub ephemeral: bool,
    pub stateful: bool,
    pub profiles: Vec<String>,
    pub config: Config,
    pub devices: Devices,
    pub expanded_config: Config,
    pub expanded_devices: Devices,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileView {
    pub name: String,
    pub project: String,
    pub description: String,
    pub config: Config,
    pub devices: Devices,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterGroupView {
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
}

const ARCHITECTURES: [(i64, &str); 13] = [
    (1, "i686"),
    (2, "x86_64"),
    (3, "armv7l"),
    (4, "aarch64"),
    (5, "ppc"),
    (6, "ppc64"),
    (7, "ppc64le"),
    (8, "s390x"),
    (9, "mips"),
    (10, "mips64"),
    (11, "riscv32"),
    (12, "riscv64"),
    (13, "loongarch64"),
];

/// Name of a stored architecture ID.
pub fn architecture_name(id: i64) -> Result<&'static str> {
    ARCHITECTURES
        .iter()
        .find(|(code, _)| *code == id)
        .map(|(_, name)| *name)
        .ok_or_else(|| DbError::Invalid(format!("architecture isn't supported: {id}")))
}

pub fn architecture_id(name: &str) -> Result<i64> {
    ARCHITECTURES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
        .ok_or_else(|| DbError::Invalid(format!("architecture isn't supported: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_names() {
        assert_eq!(architecture_name(2).unwrap(), "x86_64");
        assert_eq!(architecture_id("aarch64").unwrap(), 4);
        assert!(architecture_name(0).is_err());
        assert!(architecture_id("vax").is_err());
    }

    #[test]
    fn test_instance_view_serializes_type_field() {
        let view = InstanceView {
            name: "c1".into(),
            project: "default".into(),
            location: "node1".into(),
            kind: "container".into(),
            architecture: "x86_64".into(),
            description: String::new(),
            ephemeral: false,
            stateful: false,
            profiles: vec!["default".into()],
            config: Config::new(),
            devices: Devices::new(),
            expanded_config: Config::new(),
            expanded_devices: Devices::new(),
            created_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["type"], "container");
        assert!(json["last_used_at"].is_null());
        let back: InstanceView = serde_json::from_value(json).unwrap();
        assert_eq!(back, view);
    }
}
