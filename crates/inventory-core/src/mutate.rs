//! In-memory mutations of a [`Document`].
//!
//! These run inside the engine's locked transaction; none of them touch a
//! backend. Operations that can succeed on some targets and conflict on
//! others return the conflicting names instead of an error, so the caller
//! can persist the successful part before reporting.

use serde_json::Value;

use crate::document::{
    Document, Group, GroupRecord, VarMap, ALL_GROUP, HOST_ADDRESS_VAR, HOST_PORT_VAR, META_KEY,
};
use crate::error::InventoryError;
use crate::pattern::Pattern;

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

fn replace_in_place(list: &mut [String], old: &str, new: &str) {
    for entry in list.iter_mut().filter(|n| n.as_str() == old) {
        *entry = new.to_string();
    }
}

impl Document {
    fn set_host_var(&mut self, host: &str, name: &str, value: Value) {
        self.meta
            .hostvars
            .entry(host.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    fn set_connection(&mut self, host: &str, address: Option<&str>, port: Option<u16>) {
        if let Some(address) = address {
            self.set_host_var(host, HOST_ADDRESS_VAR, Value::from(address));
        }
        if let Some(port) = port {
            self.set_host_var(host, HOST_PORT_VAR, Value::from(port));
        }
    }

    fn require_host(&self, host: &str) -> Result<(), InventoryError> {
        if self.has_host(host) {
            Ok(())
        } else {
            Err(InventoryError::not_found("Host {} does not exist", host))
        }
    }

    fn require_group(&self, group: &str) -> Result<(), InventoryError> {
        if self.has_group(group) {
            Ok(())
        } else {
            Err(InventoryError::not_found("Group {} does not exist", group))
        }
    }

    /// `_meta` is taken by the document itself.
    fn group_name_taken(&self, name: &str) -> bool {
        name == META_KEY || self.has_group(name)
    }

    pub fn add_host(
        &mut self,
        name: &str,
        address: Option<&str>,
        port: Option<u16>,
    ) -> Result<(), InventoryError> {
        if self.has_host(name) {
            return Err(InventoryError::already_exists("Host {} already exists", name));
        }
        self.ensure_skeleton();
        if let Some(all) = self.groups.get_mut(ALL_GROUP) {
            all.hosts_mut().push(name.to_string());
        }
        self.meta.hostvars.insert(name.to_string(), VarMap::new());
        self.set_connection(name, address, port);
        Ok(())
    }

    pub fn add_group(&mut self, name: &str) -> Result<(), InventoryError> {
        if self.group_name_taken(name) {
            return Err(InventoryError::already_exists("Group {} already exists", name));
        }
        self.groups
            .insert(name.to_string(), Group::Record(GroupRecord::default()));
        Ok(())
    }

    pub fn add_hosts_to_groups(
        &mut self,
        host_pattern: &Pattern,
        group_patterns: &[Pattern],
    ) -> Result<(), InventoryError> {
        let hosts = self.match_hosts(host_pattern);
        if hosts.is_empty() {
            return Err(InventoryError::no_match("No host matches your selection"));
        }

        let mut groups: Vec<String> = Vec::new();
        for pattern in group_patterns {
            let matched = self.match_groups(pattern);
            if matched.is_empty() {
                return Err(InventoryError::NoMatch {
                    template: "No group matches {}".to_string(),
                    targets: vec![pattern.as_str().to_string()],
                });
            }
            for group in matched {
                push_unique(&mut groups, &group);
            }
        }
        if groups.is_empty() {
            return Err(InventoryError::no_match("No group matches your selection"));
        }

        for group in &groups {
            if let Some(g) = self.groups.get_mut(group) {
                let members = g.hosts_mut();
                for host in &hosts {
                    push_unique(members, host);
                }
            }
        }
        Ok(())
    }

    pub fn add_group_to_groups(
        &mut self,
        child: &str,
        parent_pattern: &Pattern,
    ) -> Result<(), InventoryError> {
        self.require_group(child)?;
        let parents = self.match_groups(parent_pattern);
        if parents.is_empty() {
            return Err(InventoryError::no_match("No group matches your selection"));
        }
        for parent in &parents {
            if let Some(g) = self.groups.get_mut(parent) {
                push_unique(&mut g.to_record().children, child);
            }
        }
        Ok(())
    }

    /// Set `name` on every matching group that does not have it yet.
    /// Returns the groups that already had it.
    pub fn add_var_to_groups(
        &mut self,
        name: &str,
        value: &Value,
        pattern: &Pattern,
    ) -> Result<Vec<String>, InventoryError> {
        let groups = self.match_groups(pattern);
        if groups.is_empty() {
            return Err(InventoryError::no_match("No group matches your selection"));
        }
        let mut existing = Vec::new();
        for group in groups {
            let Some(g) = self.groups.get_mut(&group) else {
                continue;
            };
            let vars = &mut g.to_record().vars;
            if vars.contains_key(name) {
                existing.push(group);
            } else {
                vars.insert(name.to_string(), value.clone());
            }
        }
        Ok(existing)
    }

    /// Set `name` on every matching host that does not have it yet.
    /// Returns the hosts that already had it.
    pub fn add_var_to_hosts(
        &mut self,
        name: &str,
        value: &Value,
        pattern: &Pattern,
    ) -> Result<Vec<String>, InventoryError> {
        let hosts = self.match_hosts(pattern);
        if hosts.is_empty() {
            return Err(InventoryError::no_match("No host matches your selection"));
        }
        let mut existing = Vec::new();
        for host in hosts {
            let vars = self.meta.hostvars.entry(host.clone()).or_default();
            if vars.contains_key(name) {
                existing.push(host);
            } else {
                vars.insert(name.to_string(), value.clone());
            }
        }
        Ok(existing)
    }

    pub fn rename_host(&mut self, old: &str, new: &str) -> Result<(), InventoryError> {
        if self.has_host(new) {
            return Err(InventoryError::already_exists("Host {} already exists", new));
        }
        self.require_host(old)?;

        if let Some(vars) = self.meta.hostvars.remove(old) {
            self.meta.hostvars.insert(new.to_string(), vars);
        }
        for group in self.groups.values_mut() {
            replace_in_place(group.hosts_mut(), old, new);
        }
        Ok(())
    }

    pub fn change_host(
        &mut self,
        name: &str,
        address: Option<&str>,
        port: Option<u16>,
    ) -> Result<(), InventoryError> {
        self.require_host(name)?;
        self.set_connection(name, address, port);
        Ok(())
    }

    pub fn rename_host_var(&mut self, name: &str, new_name: &str, pattern: &Pattern) {
        for (host, vars) in self.meta.hostvars.iter_mut() {
            if !pattern.is_match(host) {
                continue;
            }
            if let Some(value) = vars.remove(name) {
                vars.insert(new_name.to_string(), value);
            }
        }
    }

    pub fn change_host_var(&mut self, name: &str, value: &Value, pattern: &Pattern) {
        for (host, vars) in self.meta.hostvars.iter_mut() {
            if !pattern.is_match(host) {
                continue;
            }
            if let Some(slot) = vars.get_mut(name) {
                *slot = value.clone();
            }
        }
    }

    pub fn rename_group(&mut self, old: &str, new: &str) -> Result<(), InventoryError> {
        if self.group_name_taken(new) {
            return Err(InventoryError::already_exists("Group {} already exists", new));
        }
        let group = self
            .groups
            .remove(old)
            .ok_or_else(|| InventoryError::not_found("Group {} does not exist", old))?;
        self.groups.insert(new.to_string(), group);

        for parent in self.groups.values_mut() {
            if let Some(children) = parent.children_mut() {
                replace_in_place(children, old, new);
            }
        }
        Ok(())
    }

    pub fn rename_group_var(&mut self, name: &str, new_name: &str, pattern: &Pattern) {
        for (group, g) in self.groups.iter_mut() {
            if !pattern.is_match(group) {
                continue;
            }
            if let Some(vars) = g.vars_mut() {
                if let Some(value) = vars.remove(name) {
                    vars.insert(new_name.to_string(), value);
                }
            }
        }
    }

    pub fn change_group_var(&mut self, name: &str, value: &Value, pattern: &Pattern) {
        for (group, g) in self.groups.iter_mut() {
            if !pattern.is_match(group) {
                continue;
            }
            if let Some(slot) = g.vars_mut().and_then(|vars| vars.get_mut(name)) {
                *slot = value.clone();
            }
        }
    }

    /// Remove `name` from `from_groups` only, or from every group along with
    /// its variables when `from_groups` is `None`.
    pub fn remove_host(&mut self, name: &str, from_groups: Option<&[String]>) {
        let groups = match from_groups {
            Some(groups) => groups.to_vec(),
            None => {
                self.meta.hostvars.remove(name);
                self.host_groups(name)
            }
        };
        for group in groups {
            if let Some(g) = self.groups.get_mut(&group) {
                g.hosts_mut().retain(|h| h != name);
            }
        }
    }

    /// Detach `name` as a child of `from_groups` only, or delete the group
    /// entirely when `from_groups` is `None`.
    pub fn remove_group(
        &mut self,
        name: &str,
        from_groups: Option<&[String]>,
    ) -> Result<(), InventoryError> {
        if let Some(parents) = from_groups {
            for parent in parents {
                if let Some(children) = self.groups.get_mut(parent).and_then(Group::children_mut) {
                    children.retain(|c| c != name);
                }
            }
            return Ok(());
        }

        if name == ALL_GROUP {
            return Err(InventoryError::Validation(format!(
                "Group {} cannot be removed",
                ALL_GROUP
            )));
        }
        for parent in self.groups.values_mut() {
            if let Some(children) = parent.children_mut() {
                children.retain(|c| c != name);
            }
        }
        self.groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| InventoryError::not_found("Group {} does not exist", name))
    }

    pub fn remove_host_var(&mut self, name: &str, host: &str) {
        if let Some(vars) = self.meta.hostvars.get_mut(host) {
            vars.remove(name);
        }
    }

    pub fn remove_group_var(&mut self, name: &str, group: &str) {
        if let Some(vars) = self.groups.get_mut(group).and_then(Group::vars_mut) {
            vars.remove(name);
        }
    }

    /// Replace a host's variables with `transform(current)`. An empty result
    /// leaves the variables untouched.
    pub fn edit_host_vars<F>(&mut self, host: &str, transform: F) -> Result<(), InventoryError>
    where
        F: FnOnce(VarMap) -> VarMap,
    {
        self.require_host(host)?;
        let current = self.host_vars(host).cloned().unwrap_or_default();
        let edited = transform(current);
        if !edited.is_empty() {
            self.meta.hostvars.insert(host.to_string(), edited);
        }
        Ok(())
    }

    /// Replace a group's variables with `transform(current)`, upgrading a
    /// bare group first. An empty result leaves the variables untouched.
    pub fn edit_group_vars<F>(&mut self, group: &str, transform: F) -> Result<(), InventoryError>
    where
        F: FnOnce(VarMap) -> VarMap,
    {
        let record = self
            .groups
            .get_mut(group)
            .ok_or_else(|| InventoryError::not_found("Group {} does not exist", group))?
            .to_record();
        let edited = transform(record.vars.clone());
        if !edited.is_empty() {
            record.vars = edited;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn p(source: &str) -> Pattern {
        Pattern::new(source).unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> Document {
        let mut doc = Document::new();
        doc.add_host("web1", Some("10.0.0.1"), Some(22)).unwrap();
        doc.add_host("web2", None, None).unwrap();
        doc.add_host("db1", None, None).unwrap();
        doc.groups.insert(
            "web".to_string(),
            Group::Bare(names(&["web2", "web1"])),
        );
        doc.add_group("db").unwrap();
        doc
    }

    #[test]
    fn test_add_host_registers_in_all_with_connection_vars() {
        let doc = sample();
        assert_eq!(doc.group_hosts(ALL_GROUP), ["web1", "web2", "db1"]);
        let vars = doc.host_vars("web1").unwrap();
        assert_eq!(vars[HOST_ADDRESS_VAR], json!("10.0.0.1"));
        assert_eq!(vars[HOST_PORT_VAR], json!(22));
        assert!(doc.host_vars("web2").unwrap().is_empty());
    }

    #[test]
    fn test_add_host_twice_fails_without_changes() {
        let mut doc = sample();
        let before = doc.clone();
        let err = doc.add_host("web1", Some("10.9.9.9"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(err.targets(), ["web1"]);
        assert_eq!(doc, before);
    }

    #[test]
    fn test_add_group_rejects_existing_and_reserved_names() {
        let mut doc = sample();
        assert_eq!(doc.add_group("db").unwrap_err().kind(), ErrorKind::AlreadyExists);
        assert_eq!(doc.add_group("_meta").unwrap_err().kind(), ErrorKind::AlreadyExists);
        doc.add_group("cache").unwrap();
        assert_eq!(doc.group("cache"), Some(&Group::Record(GroupRecord::default())));
    }

    #[test]
    fn test_add_hosts_to_groups_is_idempotent() {
        let mut doc = sample();
        doc.add_hosts_to_groups(&p("web[0-9]+"), &[p("db"), p("web")]).unwrap();
        doc.add_hosts_to_groups(&p("web[0-9]+"), &[p("db"), p("web")]).unwrap();
        assert_eq!(doc.group_hosts("db"), ["web1", "web2"]);
        assert_eq!(doc.group_hosts("web"), ["web2", "web1"]);
        assert!(matches!(doc.group("web"), Some(Group::Bare(_))));
    }

    #[test]
    fn test_add_hosts_to_groups_requires_every_pattern_to_match() {
        let mut doc = sample();
        let err = doc
            .add_hosts_to_groups(&p("web1"), &[p("db"), p("nope")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatch);
        assert!(doc.group_hosts("db").is_empty());

        let err = doc.add_hosts_to_groups(&p("ghost"), &[p("db")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatch);
    }

    #[test]
    fn test_add_group_to_groups_upgrades_and_is_idempotent() {
        let mut doc = sample();
        doc.add_group_to_groups("db", &p("web")).unwrap();
        doc.add_group_to_groups("db", &p("web")).unwrap();
        assert_eq!(doc.group_children("web"), ["db"]);
        assert_eq!(doc.group_hosts("web"), ["web2", "web1"]);

        let err = doc.add_group_to_groups("ghost", &p("web")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = doc.add_group_to_groups("db", &p("we")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatch);
    }

    #[test]
    fn test_add_var_to_bare_group_preserves_hosts() {
        let mut doc = sample();
        let existing = doc.add_var_to_groups("tier", &json!("front"), &p("web")).unwrap();
        assert!(existing.is_empty());
        let group = doc.group("web").unwrap();
        assert!(group.is_record());
        assert_eq!(group.hosts(), ["web2", "web1"]);
        assert_eq!(group.vars().unwrap()["tier"], json!("front"));
    }

    #[test]
    fn test_add_var_to_groups_reports_existing_after_applying_others() {
        let mut doc = sample();
        doc.add_var_to_groups("env", &json!("old"), &p("db")).unwrap();
        let existing = doc.add_var_to_groups("env", &json!("new"), &p(".*")).unwrap();
        assert_eq!(existing, ["db"]);
        assert_eq!(doc.group_vars("db").unwrap()["env"], json!("old"));
        assert_eq!(doc.group_vars("web").unwrap()["env"], json!("new"));
        assert_eq!(doc.group_vars(ALL_GROUP).unwrap()["env"], json!("new"));
    }

    #[test]
    fn test_add_var_to_hosts_only_touches_matches() {
        let mut doc = sample();
        let existing = doc.add_var_to_hosts("env", &json!("prod"), &p("web[0-9]+")).unwrap();
        assert!(existing.is_empty());
        assert_eq!(doc.host_vars("web1").unwrap()["env"], json!("prod"));
        assert_eq!(doc.host_vars("web2").unwrap()["env"], json!("prod"));
        assert!(doc.host_vars("db1").unwrap().get("env").is_none());

        let err = doc.add_var_to_hosts("env", &json!("x"), &p("web")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatch);
    }

    #[test]
    fn test_rename_host_keeps_order() {
        let mut doc = sample();
        doc.rename_host("web2", "web9").unwrap();
        assert_eq!(doc.group_hosts("web"), ["web9", "web1"]);
        assert_eq!(doc.group_hosts(ALL_GROUP), ["web1", "web9", "db1"]);
        assert!(doc.host_vars("web9").is_some());
        assert!(doc.host_vars("web2").is_none());

        assert_eq!(doc.rename_host("web1", "db1").unwrap_err().kind(), ErrorKind::AlreadyExists);
        assert_eq!(doc.rename_host("ghost", "x").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_change_host() {
        let mut doc = sample();
        doc.change_host("web1", None, Some(2222)).unwrap();
        let vars = doc.host_vars("web1").unwrap();
        assert_eq!(vars[HOST_ADDRESS_VAR], json!("10.0.0.1"));
        assert_eq!(vars[HOST_PORT_VAR], json!(2222));
        assert_eq!(doc.change_host("ghost", None, None).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_rename_and_change_host_var_skip_hosts_without_it() {
        let mut doc = sample();
        doc.rename_host_var(HOST_ADDRESS_VAR, "addr", &p(".*"));
        assert_eq!(doc.host_vars("web1").unwrap()["addr"], json!("10.0.0.1"));
        assert!(doc.host_vars("web2").unwrap().is_empty());

        doc.change_host_var("addr", &json!("10.0.0.2"), &p("web.*"));
        assert_eq!(doc.host_vars("web1").unwrap()["addr"], json!("10.0.0.2"));
        assert!(doc.host_vars("web2").unwrap().is_empty());
    }

    #[test]
    fn test_rename_group_reparents() {
        let mut doc = sample();
        doc.add_group_to_groups("web", &p("all|db")).unwrap();
        doc.rename_group("web", "frontend").unwrap();
        assert!(!doc.has_group("web"));
        assert_eq!(doc.group_hosts("frontend"), ["web2", "web1"]);
        assert_eq!(doc.group_parents("frontend"), ["all", "db"]);
        assert!(doc.group_parents("web").is_empty());

        assert_eq!(doc.rename_group("db", "all").unwrap_err().kind(), ErrorKind::AlreadyExists);
        assert_eq!(doc.rename_group("web", "x").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_group_var_rename_and_change_only_on_records_holding_it() {
        let mut doc = sample();
        doc.add_var_to_groups("env", &json!("a"), &p("db")).unwrap();
        doc.rename_group_var("env", "stage", &p(".*"));
        doc.change_group_var("stage", &json!("b"), &p(".*"));
        assert_eq!(doc.group_vars("db").unwrap()["stage"], json!("b"));
        assert!(doc.group_vars(ALL_GROUP).unwrap().is_empty());
        assert!(matches!(doc.group("web"), Some(Group::Bare(_))));
    }

    #[test]
    fn test_remove_host_from_some_groups_or_everywhere() {
        let mut doc = sample();
        doc.remove_host("web1", Some(&names(&["web"])));
        assert_eq!(doc.group_hosts("web"), ["web2"]);
        assert!(doc.group_hosts(ALL_GROUP).contains(&"web1".to_string()));
        assert!(doc.host_vars("web1").is_some());

        doc.remove_host("web2", None);
        assert!(!doc.has_host("web2"));
        assert!(doc.group_hosts("web").is_empty());
    }

    #[test]
    fn test_remove_group() {
        let mut doc = sample();
        doc.add_group_to_groups("web", &p("all|db")).unwrap();

        doc.remove_group("web", Some(&names(&["db"]))).unwrap();
        assert!(doc.has_group("web"));
        assert_eq!(doc.group_parents("web"), ["all"]);

        doc.remove_group("web", None).unwrap();
        assert!(!doc.has_group("web"));
        assert!(doc.group_children(ALL_GROUP).is_empty());

        assert_eq!(doc.remove_group("web", None).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_remove_all_group_always_fails() {
        let mut doc = Document::new();
        assert!(doc.remove_group(ALL_GROUP, None).is_err());
        let mut doc = sample();
        assert!(doc.remove_group(ALL_GROUP, None).is_err());
        assert!(doc.has_group(ALL_GROUP));
    }

    #[test]
    fn test_remove_vars_are_noops_when_absent() {
        let mut doc = sample();
        doc.remove_host_var("nope", "web1");
        doc.remove_host_var(HOST_PORT_VAR, "web1");
        assert!(doc.host_vars("web1").unwrap().get(HOST_PORT_VAR).is_none());
        doc.remove_group_var("nope", "web");
        doc.remove_group_var("nope", "ghost");
    }

    #[test]
    fn test_edit_vars() {
        let mut doc = sample();
        doc.edit_group_vars("web", |mut vars| {
            vars.insert("edited".into(), json!(true));
            vars
        })
        .unwrap();
        assert_eq!(doc.group_vars("web").unwrap()["edited"], json!(true));
        assert_eq!(doc.group_hosts("web"), ["web2", "web1"]);

        doc.edit_host_vars("web1", |_| VarMap::new()).unwrap();
        assert_eq!(doc.host_vars("web1").unwrap()[HOST_PORT_VAR], json!(22));

        let err = doc.edit_host_vars("ghost", |v| v).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
