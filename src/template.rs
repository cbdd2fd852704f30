// src/template.rs
// Typed view of a cluster configuration template. Only the paths the wizard
// defaults are typed; everything else rides along in the `extra` maps.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::ConsoleResult;

pub type Extra = BTreeMap<String, Value>;

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_node: Option<HeadNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Image {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_ami: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct HeadNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<Networking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<Ssh>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Networking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Ssh {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Scheduling {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slurm_queues: Option<Vec<SlurmQueue>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SlurmQueue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_resources: Option<Vec<ComputeResource>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ComputeResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efa: Option<Efa>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Efa {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gdr_support: Option<Flag>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// A template flag. Templates are hand-written, so a flag may hold a real
/// boolean or whatever else the author typed (`"yes"`, `1`, ...).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Other(Value),
}

impl Flag {
    pub fn is_bool(&self) -> bool {
        matches!(self, Flag::Bool(_))
    }

    /// Loose truthiness: null, `""`, `0` and `false` are falsy, anything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Other(Value::Null) => false,
            Flag::Other(Value::String(s)) => !s.is_empty(),
            Flag::Other(Value::Number(n)) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
            Flag::Other(_) => true,
        }
    }
}

/// A string leaf counts as set only when it is present and non-empty.
pub fn is_set(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |s| !s.is_empty())
}

impl ClusterConfig {
    pub fn from_yaml_str(document: &str) -> ConsoleResult<Self> {
        // An empty document is an empty template.
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(document)?)
    }

    pub fn from_json_str(document: &str) -> ConsoleResult<Self> {
        Ok(serde_json::from_str(document)?)
    }

    pub fn from_path(path: &Path) -> ConsoleResult<Self> {
        let document = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&document),
            _ => Self::from_yaml_str(&document),
        }
    }

    pub fn to_yaml_string(&self) -> ConsoleResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json_string(&self) -> ConsoleResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    // Readers never allocate intermediates.

    pub fn custom_ami(&self) -> Option<&str> {
        self.image.as_ref().and_then(|i| i.custom_ami.as_deref())
    }

    pub fn os(&self) -> Option<&str> {
        self.image.as_ref().and_then(|i| i.os.as_deref())
    }

    pub fn scheduler(&self) -> Option<&str> {
        self.scheduling.as_ref().and_then(|s| s.scheduler.as_deref())
    }

    pub fn head_node_instance_type(&self) -> Option<&str> {
        self.head_node.as_ref().and_then(|h| h.instance_type.as_deref())
    }

    pub fn head_node_subnet_id(&self) -> Option<&str> {
        self.head_node
            .as_ref()
            .and_then(|h| h.networking.as_ref())
            .and_then(|n| n.subnet_id.as_deref())
    }

    pub fn head_node_key_name(&self) -> Option<&str> {
        self.head_node
            .as_ref()
            .and_then(|h| h.ssh.as_ref())
            .and_then(|s| s.key_name.as_deref())
    }

    // Writers create whatever intermediates are missing.

    pub fn image_mut(&mut self) -> &mut Image {
        self.image.get_or_insert_with(Image::default)
    }

    pub fn head_node_mut(&mut self) -> &mut HeadNode {
        self.head_node.get_or_insert_with(HeadNode::default)
    }

    pub fn scheduling_mut(&mut self) -> &mut Scheduling {
        self.scheduling.get_or_insert_with(Scheduling::default)
    }

    pub fn set_head_node_key_name(&mut self, key_name: String) {
        self.head_node_mut()
            .ssh
            .get_or_insert_with(Ssh::default)
            .key_name = Some(key_name);
    }

    /// Every compute resource across every Slurm queue.
    pub fn compute_resources_mut(&mut self) -> impl Iterator<Item = &mut ComputeResource> {
        self.scheduling
            .iter_mut()
            .flat_map(|s| s.slurm_queues.iter_mut().flatten())
            .flat_map(|q| q.compute_resources.iter_mut().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
Region: eu-west-1
Image:
  Os: ubuntu2004
Tags:
  - Key: team
    Value: hpc
HeadNode:
  InstanceType: c5.xlarge
  Networking:
    SubnetId: subnet-0abc
  LocalStorage:
    RootVolume:
      Size: 50
Scheduling:
  Scheduler: slurm
  SlurmQueues:
    - Name: q1
      ComputeResources:
        - Name: cr1
          InstanceType: p4d.24xlarge
          MinCount: 0
          Efa:
            Enabled: true
            GdrSupport: "maybe"
"#;

    #[test]
    fn parses_known_paths() {
        let config = ClusterConfig::from_yaml_str(TEMPLATE).unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.os(), Some("ubuntu2004"));
        assert_eq!(config.head_node_instance_type(), Some("c5.xlarge"));
        assert_eq!(config.head_node_subnet_id(), Some("subnet-0abc"));
        assert_eq!(config.scheduler(), Some("slurm"));
        assert_eq!(config.head_node_key_name(), None);
    }

    #[test]
    fn unknown_keys_survive_a_round_trip() {
        let config = ClusterConfig::from_yaml_str(TEMPLATE).unwrap();
        assert!(config.extra.contains_key("Tags"));
        let head_node = config.head_node.as_ref().unwrap();
        assert!(head_node.extra.contains_key("LocalStorage"));

        let reparsed = ClusterConfig::from_yaml_str(&config.to_yaml_string().unwrap()).unwrap();
        assert_eq!(reparsed, config);
        let from_json = ClusterConfig::from_json_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(from_json, config);
    }

    #[test]
    fn flags_keep_non_boolean_values() {
        let mut config = ClusterConfig::from_yaml_str(TEMPLATE).unwrap();
        let cr = config.compute_resources_mut().next().unwrap();
        let efa = cr.efa.as_ref().unwrap();
        assert_eq!(efa.enabled, Some(Flag::Bool(true)));
        assert_eq!(efa.gdr_support, Some(Flag::Other(Value::String("maybe".into()))));
        assert!(!efa.gdr_support.as_ref().unwrap().is_bool());
        assert_eq!(cr.extra.get("MinCount"), Some(&Value::from(0)));
    }

    #[test]
    fn flag_truthiness() {
        assert!(Flag::Bool(true).is_truthy());
        assert!(!Flag::Bool(false).is_truthy());
        assert!(!Flag::Other(Value::Null).is_truthy());
        assert!(!Flag::Other(Value::from("")).is_truthy());
        assert!(Flag::Other(Value::from("yes")).is_truthy());
        assert!(!Flag::Other(Value::from(0)).is_truthy());
        assert!(Flag::Other(Value::from(1)).is_truthy());
        assert!(Flag::Other(serde_json::json!({})).is_truthy());
    }

    #[test]
    fn empty_documents_are_empty_templates() {
        assert_eq!(ClusterConfig::from_yaml_str("").unwrap(), ClusterConfig::default());
        assert_eq!(ClusterConfig::from_yaml_str("{}").unwrap(), ClusterConfig::default());
    }

    #[test]
    fn writers_create_intermediates() {
        let mut config = ClusterConfig::default();
        assert_eq!(config.head_node_key_name(), None);
        assert!(config.head_node.is_none());

        config.set_head_node_key_name("kp-a".into());
        assert_eq!(config.head_node_key_name(), Some("kp-a"));

        config.image_mut().os = Some("alinux2".into());
        assert_eq!(config.os(), Some("alinux2"));
    }

    #[test]
    fn is_set_ignores_empty_strings() {
        assert!(!is_set(&None));
        assert!(!is_set(&Some(String::new())));
        assert!(is_set(&Some("ami-123".into())));
    }

    #[test]
    fn loads_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(&path, r#"{"Region":"us-east-2","Image":{"CustomAmi":"ami-1"}}"#).unwrap();
        let config = ClusterConfig::from_path(&path).unwrap();
        assert_eq!(config.region.as_deref(), Some("us-east-2"));
        assert_eq!(config.custom_ami(), Some("ami-1"));
    }
}
