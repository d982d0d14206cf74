use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;
use crate::pattern::Pattern;

/// Variables attached to a host or a group.
pub type VarMap = serde_json::Map<String, Value>;

/// The group every host is registered in. It always exists.
pub const ALL_GROUP: &str = "all";

/// Reserved top-level key holding `hostvars`.
pub const META_KEY: &str = "_meta";

/// Well-known variable holding a host's address.
pub const HOST_ADDRESS_VAR: &str = "ansible_host";

/// Well-known variable holding a host's SSH port.
pub const HOST_PORT_VAR: &str = "ansible_port";

/// Full shape of a group: hosts, variables and child groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub vars: VarMap,
    #[serde(default)]
    pub children: Vec<String>,
}

/// A group is stored either as a bare host list or as a full record.
///
/// A bare group is upgraded with [`Group::to_record`] the first time it
/// needs variables or children. It is never downgraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Group {
    Bare(Vec<String>),
    Record(GroupRecord),
}

impl Default for Group {
    fn default() -> Self {
        Group::Record(GroupRecord::default())
    }
}

impl Group {
    pub fn hosts(&self) -> &[String] {
        match self {
            Group::Bare(hosts) => hosts,
            Group::Record(record) => &record.hosts,
        }
    }

    pub fn hosts_mut(&mut self) -> &mut Vec<String> {
        match self {
            Group::Bare(hosts) => hosts,
            Group::Record(record) => &mut record.hosts,
        }
    }

    pub fn vars(&self) -> Option<&VarMap> {
        match self {
            Group::Bare(_) => None,
            Group::Record(record) => Some(&record.vars),
        }
    }

    pub fn vars_mut(&mut self) -> Option<&mut VarMap> {
        match self {
            Group::Bare(_) => None,
            Group::Record(record) => Some(&mut record.vars),
        }
    }

    pub fn children(&self) -> &[String] {
        match self {
            Group::Bare(_) => &[],
            Group::Record(record) => &record.children,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            Group::Bare(_) => None,
            Group::Record(record) => Some(&mut record.children),
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Group::Record(_))
    }

    /// Upgrade a bare group in place, keeping its host list untouched.
    pub fn to_record(&mut self) -> &mut GroupRecord {
        if let Group::Bare(hosts) = self {
            let hosts = std::mem::take(hosts);
            *self = Group::Record(GroupRecord {
                hosts,
                ..GroupRecord::default()
            });
        }
        match self {
            Group::Record(record) => record,
            Group::Bare(_) => unreachable!("bare group upgraded above"),
        }
    }
}

/// The `_meta` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub hostvars: BTreeMap<String, VarMap>,
}

/// The whole inventory as persisted and as consumed by Ansible.
///
/// ```json
/// {
///   "all":       { "hosts": ["web1"], "vars": {}, "children": ["web"] },
///   "web":       ["web1"],
///   "_meta":     { "hostvars": { "web1": { "ansible_host": "10.0.0.1" } } }
/// }
/// ```
///
/// Groups and variables are kept in sorted maps, so serializing a document
/// that was read from this crate's own output reproduces it byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(flatten)]
    pub groups: BTreeMap<String, Group>,
    #[serde(rename = "_meta", default)]
    pub meta: Meta,
}

impl Document {
    /// An empty document with the mandatory skeleton in place.
    pub fn new() -> Self {
        let mut doc = Self::default();
        doc.ensure_skeleton();
        doc
    }

    /// Make sure `all` and `_meta.hostvars` exist.
    pub fn ensure_skeleton(&mut self) {
        self.groups.entry(ALL_GROUP.to_string()).or_default();
    }

    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json)
            .map_err(|e| StorageError::Serialization(format!("Failed to parse inventory: {}", e)))
    }

    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string_pretty(self).map_err(|e| {
            StorageError::Serialization(format!("Failed to serialize inventory: {}", e))
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Every known host, without duplicates: group members first, in group
    /// order, then hosts that only have variables.
    pub fn hosts(&self) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let members = self.groups.values().flat_map(|g| g.hosts().iter());
        members
            .chain(self.meta.hostvars.keys())
            .filter(|host| seen.insert(host.as_str()))
            .cloned()
            .collect()
    }

    pub fn has_host(&self, name: &str) -> bool {
        self.meta.hostvars.contains_key(name)
            || self.groups.values().any(|g| g.hosts().iter().any(|h| h == name))
    }

    pub fn match_hosts(&self, pattern: &Pattern) -> Vec<String> {
        self.hosts()
            .into_iter()
            .filter(|h| pattern.is_match(h))
            .collect()
    }

    pub fn match_groups(&self, pattern: &Pattern) -> Vec<String> {
        self.groups
            .keys()
            .filter(|g| pattern.is_match(g))
            .cloned()
            .collect()
    }

    /// Names of every variable used by any host or group.
    pub fn match_vars(&self, pattern: &Pattern) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let group_vars = self.groups.values().filter_map(Group::vars);
        for vars in self.meta.hostvars.values().chain(group_vars) {
            for name in vars.keys() {
                if pattern.is_match(name) && !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    pub fn group_hosts(&self, group: &str) -> &[String] {
        self.groups.get(group).map(Group::hosts).unwrap_or(&[])
    }

    pub fn group_children(&self, group: &str) -> &[String] {
        self.groups.get(group).map(Group::children).unwrap_or(&[])
    }

    pub fn group_vars(&self, group: &str) -> Option<&VarMap> {
        self.groups.get(group).and_then(Group::vars)
    }

    /// Groups that list `group` among their children.
    pub fn group_parents(&self, group: &str) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, g)| g.children().iter().any(|c| c == group))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn host_vars(&self, host: &str) -> Option<&VarMap> {
        self.meta.hostvars.get(host)
    }

    /// Groups whose host list contains `host`.
    pub fn host_groups(&self, host: &str) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, g)| g.hosts().iter().any(|h| h == host))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The document as Ansible expects it from `--list`.
    pub fn to_ansible_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(VarMap::new()))
    }

    /// A single host's variables as Ansible expects them from `--host`.
    pub fn host_json(&self, host: &str) -> Value {
        Value::Object(self.host_vars(host).cloned().unwrap_or_default())
    }
}

/// Render a variable value for pattern assertions: strings verbatim,
/// everything else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Document {
        Document::from_json(
            r#"{
                "all": {"hosts": ["web1", "web2", "db1"], "vars": {}, "children": ["web"]},
                "web": ["web1", "web2"],
                "db": {"hosts": ["db1"], "vars": {"port": 5432}, "children": []},
                "_meta": {"hostvars": {"web1": {"ansible_host": "10.0.0.1"}, "lonely": {}}}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_skeleton_on_empty_document() {
        let mut doc = Document::from_json("{}").unwrap();
        doc.ensure_skeleton();
        assert!(doc.has_group(ALL_GROUP));
        assert!(doc.group(ALL_GROUP).unwrap().is_record());
        assert!(doc.meta.hostvars.is_empty());
        let value = doc.to_ansible_json();
        assert_eq!(value["_meta"], json!({"hostvars": {}}));
    }

    #[test]
    fn test_accepts_both_group_shapes() {
        let doc = sample();
        assert!(matches!(doc.group("web"), Some(Group::Bare(_))));
        assert!(matches!(doc.group("db"), Some(Group::Record(_))));
        assert_eq!(doc.group_hosts("web"), ["web1", "web2"]);
        assert_eq!(doc.group_vars("db").unwrap()["port"], json!(5432));
        assert!(doc.group_vars("web").is_none());
    }

    #[test]
    fn test_record_missing_keys_default_to_empty() {
        let doc = Document::from_json(r#"{"web": {"hosts": ["a"]}}"#).unwrap();
        let group = doc.group("web").unwrap();
        assert!(group.is_record());
        assert!(group.children().is_empty());
        assert!(group.vars().unwrap().is_empty());
    }

    #[test]
    fn test_hosts_are_unique() {
        let doc = sample();
        let hosts = doc.hosts();
        assert_eq!(hosts.iter().filter(|h| *h == "web1").count(), 1);
        assert!(hosts.contains(&"lonely".to_string()));
        assert!(doc.has_host("lonely"));
        assert!(!doc.has_host("ghost"));
    }

    #[test]
    fn test_hosts_keep_first_seen_order_across_many_groups() {
        let mut doc = Document::new();
        for g in 0..200 {
            let hosts = (0..50).map(|h| format!("h{}", (g + h) % 300)).collect();
            doc.groups.insert(format!("g{:03}", g), Group::Bare(hosts));
        }
        doc.meta.hostvars.insert("h0".to_string(), VarMap::new());
        doc.meta.hostvars.insert("only-vars".to_string(), VarMap::new());

        let hosts = doc.hosts();
        let unique: HashSet<&String> = hosts.iter().collect();
        assert_eq!(unique.len(), hosts.len());
        assert_eq!(hosts.len(), 249 + 1);
        assert_eq!(hosts[0], "h0");
        assert_eq!(hosts.last().map(String::as_str), Some("only-vars"));
    }

    #[test]
    fn test_parents_and_host_groups() {
        let doc = sample();
        assert_eq!(doc.group_parents("web"), ["all"]);
        assert_eq!(doc.host_groups("web1"), ["all", "web"]);
        assert!(doc.group_parents("db").is_empty());
    }

    #[test]
    fn test_match_vars_across_hosts_and_groups() {
        let doc = sample();
        let vars = doc.match_vars(&Pattern::any());
        assert!(vars.contains(&"ansible_host".to_string()));
        assert!(vars.contains(&"port".to_string()));
        assert_eq!(doc.match_vars(&Pattern::new("port").unwrap()), ["port"]);
    }

    #[test]
    fn test_to_record_preserves_hosts() {
        let mut group = Group::Bare(vec!["b".into(), "a".into()]);
        group.to_record().vars.insert("x".into(), json!(1));
        assert_eq!(group.hosts(), ["b", "a"]);
        assert!(group.is_record());
    }

    #[test]
    fn test_serialization_round_trip_is_byte_identical() {
        let first = sample().to_json().unwrap();
        let second = Document::from_json(&first).unwrap().to_json().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_host_json() {
        let doc = sample();
        assert_eq!(doc.host_json("web1"), json!({"ansible_host": "10.0.0.1"}));
        assert_eq!(doc.host_json("ghost"), json!({}));
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("prod")), "prod");
        assert_eq!(value_text(&json!(22)), "22");
        assert_eq!(value_text(&json!([1, 2])), "[1,2]");
    }
}
