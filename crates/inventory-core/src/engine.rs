use serde_json::Value;

use crate::backend::InventoryBackend;
use crate::document::{value_text, Document, VarMap};
use crate::error::InventoryError;
use crate::literal::parse_value;
use crate::pattern::Pattern;

/// An inventory session bound to one backend.
///
/// Every mutation runs as one transaction: lock the backend, reload the
/// document, apply the change, save, unlock. Every read reloads first,
/// unless [`Inventory::next_from_cache`] was called just before it.
///
/// Methods take `&mut self`; a session is meant to be driven by one caller
/// at a time. Run several sessions (or processes) against the same store for
/// concurrency, the backend lock keeps their writes serialized.
pub struct Inventory<B> {
    backend: B,
    doc: Document,
    from_cache: bool,
}

impl<B: InventoryBackend> Inventory<B> {
    /// Bind to `backend` and load the current document.
    pub async fn open(backend: B) -> Result<Self, InventoryError> {
        let mut inventory = Self {
            backend,
            doc: Document::new(),
            from_cache: false,
        };
        inventory.reload().await?;
        Ok(inventory)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The document as of the last reload, without touching the backend.
    pub fn snapshot(&self) -> &Document {
        &self.doc
    }

    /// Make the next read answer from the last loaded document instead of
    /// reloading. The flag is cleared by that read whether or not it
    /// needed it.
    pub fn next_from_cache(&mut self) {
        self.from_cache = true;
    }

    async fn reload(&mut self) -> Result<(), InventoryError> {
        let mut doc = self.backend.load().await?;
        doc.ensure_skeleton();
        self.doc = doc;
        Ok(())
    }

    async fn refresh(&mut self) -> Result<&Document, InventoryError> {
        if !std::mem::take(&mut self.from_cache) {
            self.reload().await?;
        }
        Ok(&self.doc)
    }

    /// Run `body` against a freshly loaded document while holding the
    /// backend lock, and persist the result.
    ///
    /// The lock is released on every path. An error from `body` skips the
    /// save and takes precedence over a failed release; otherwise a failed
    /// release is reported.
    async fn transact<T, F>(&mut self, body: F) -> Result<T, InventoryError>
    where
        F: FnOnce(&mut Document) -> Result<T, InventoryError>,
    {
        self.backend.lock().await?;
        let result = self.apply_locked(body).await;
        let released = self.backend.unlock().await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), _) => Err(e),
        }
    }

    async fn apply_locked<T, F>(&mut self, body: F) -> Result<T, InventoryError>
    where
        F: FnOnce(&mut Document) -> Result<T, InventoryError>,
    {
        self.reload().await?;
        let value = body(&mut self.doc)?;
        self.backend.save(&self.doc).await?;
        Ok(value)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn list_hosts(&mut self, pattern: Option<&str>) -> Result<Vec<String>, InventoryError> {
        let doc = self.refresh().await?;
        Ok(doc.match_hosts(&Pattern::or_any(pattern)?))
    }

    pub async fn list_groups(&mut self, pattern: Option<&str>) -> Result<Vec<String>, InventoryError> {
        let doc = self.refresh().await?;
        Ok(doc.match_groups(&Pattern::or_any(pattern)?))
    }

    pub async fn list_vars(&mut self, pattern: Option<&str>) -> Result<Vec<String>, InventoryError> {
        let doc = self.refresh().await?;
        Ok(doc.match_vars(&Pattern::or_any(pattern)?))
    }

    /// A group's variables; empty for bare or unknown groups.
    pub async fn group_vars(&mut self, group: &str) -> Result<VarMap, InventoryError> {
        let doc = self.refresh().await?;
        Ok(doc.group_vars(group).cloned().unwrap_or_default())
    }

    pub async fn group_hosts(&mut self, group: &str) -> Result<Vec<String>, InventoryError> {
        Ok(self.refresh().await?.group_hosts(group).to_vec())
    }

    pub async fn group_children(&mut self, group: &str) -> Result<Vec<String>, InventoryError> {
        Ok(self.refresh().await?.group_children(group).to_vec())
    }

    pub async fn group_parents(&mut self, group: &str) -> Result<Vec<String>, InventoryError> {
        Ok(self.refresh().await?.group_parents(group))
    }

    /// A host's variables; empty for hosts without any.
    pub async fn host_vars(&mut self, host: &str) -> Result<VarMap, InventoryError> {
        let doc = self.refresh().await?;
        Ok(doc.host_vars(host).cloned().unwrap_or_default())
    }

    pub async fn host_groups(&mut self, host: &str) -> Result<Vec<String>, InventoryError> {
        Ok(self.refresh().await?.host_groups(host))
    }

    /// Whether `host` has variable `name` whose text matches `value_pattern`
    /// as a whole. A missing variable is simply `false`.
    pub async fn assert_host_var(
        &mut self,
        host: &str,
        name: &str,
        value_pattern: &str,
    ) -> Result<bool, InventoryError> {
        let doc = self.refresh().await?;
        let pattern = Pattern::new(value_pattern)?;
        Ok(var_matches(doc.host_vars(host), name, &pattern))
    }

    /// Group counterpart of [`Inventory::assert_host_var`].
    pub async fn assert_group_var(
        &mut self,
        group: &str,
        name: &str,
        value_pattern: &str,
    ) -> Result<bool, InventoryError> {
        let doc = self.refresh().await?;
        let pattern = Pattern::new(value_pattern)?;
        Ok(var_matches(doc.group_vars(group), name, &pattern))
    }

    /// The whole inventory in Ansible's `--list` shape.
    pub async fn ansible_json(&mut self) -> Result<Value, InventoryError> {
        Ok(self.refresh().await?.to_ansible_json())
    }

    /// One host's variables in Ansible's `--host` shape.
    pub async fn ansible_host_json(&mut self, host: &str) -> Result<Value, InventoryError> {
        Ok(self.refresh().await?.host_json(host))
    }

    /// A copy of the current document.
    pub async fn document(&mut self) -> Result<Document, InventoryError> {
        Ok(self.refresh().await?.clone())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn add_host(
        &mut self,
        name: &str,
        address: Option<&str>,
        port: Option<u16>,
    ) -> Result<(), InventoryError> {
        self.transact(|doc| doc.add_host(name, address, port)).await
    }

    pub async fn add_group(&mut self, name: &str) -> Result<(), InventoryError> {
        self.transact(|doc| doc.add_group(name)).await
    }

    /// Add every host matching `host_pattern` to every group matched by any
    /// of `group_patterns`. Each pattern must match something.
    pub async fn add_hosts_to_groups(
        &mut self,
        host_pattern: &str,
        group_patterns: &[&str],
    ) -> Result<(), InventoryError> {
        let hosts = Pattern::new(host_pattern)?;
        let groups = group_patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        self.transact(|doc| doc.add_hosts_to_groups(&hosts, &groups))
            .await
    }

    pub async fn add_group_to_groups(
        &mut self,
        child: &str,
        parent_pattern: &str,
    ) -> Result<(), InventoryError> {
        let parents = Pattern::new(parent_pattern)?;
        self.transact(|doc| doc.add_group_to_groups(child, &parents))
            .await
    }

    /// Set `name` on matching groups. Groups that already define it keep
    /// their value and are reported in one `AlreadyExists` error, after the
    /// other groups have been saved.
    pub async fn add_var_to_groups(
        &mut self,
        name: &str,
        raw_value: &str,
        group_pattern: &str,
    ) -> Result<(), InventoryError> {
        let pattern = Pattern::new(group_pattern)?;
        let value = parse_value(raw_value);
        let existing = self
            .transact(|doc| doc.add_var_to_groups(name, &value, &pattern))
            .await?;
        already_defined(name, "groups", existing)
    }

    /// Host counterpart of [`Inventory::add_var_to_groups`].
    pub async fn add_var_to_hosts(
        &mut self,
        name: &str,
        raw_value: &str,
        host_pattern: &str,
    ) -> Result<(), InventoryError> {
        let pattern = Pattern::new(host_pattern)?;
        let value = parse_value(raw_value);
        let existing = self
            .transact(|doc| doc.add_var_to_hosts(name, &value, &pattern))
            .await?;
        already_defined(name, "hosts", existing)
    }

    pub async fn rename_host(&mut self, old: &str, new: &str) -> Result<(), InventoryError> {
        self.transact(|doc| doc.rename_host(old, new)).await
    }

    pub async fn change_host(
        &mut self,
        name: &str,
        address: Option<&str>,
        port: Option<u16>,
    ) -> Result<(), InventoryError> {
        self.transact(|doc| doc.change_host(name, address, port)).await
    }

    pub async fn rename_host_var(
        &mut self,
        name: &str,
        new_name: &str,
        host_pattern: &str,
    ) -> Result<(), InventoryError> {
        let pattern = Pattern::new(host_pattern)?;
        self.transact(|doc| {
            doc.rename_host_var(name, new_name, &pattern);
            Ok(())
        })
        .await
    }

    pub async fn change_host_var(
        &mut self,
        name: &str,
        raw_value: &str,
        host_pattern: &str,
    ) -> Result<(), InventoryError> {
        let pattern = Pattern::new(host_pattern)?;
        let value = parse_value(raw_value);
        self.transact(|doc| {
            doc.change_host_var(name, &value, &pattern);
            Ok(())
        })
        .await
    }

    pub async fn rename_group(&mut self, old: &str, new: &str) -> Result<(), InventoryError> {
        self.transact(|doc| doc.rename_group(old, new)).await
    }

    pub async fn rename_group_var(
        &mut self,
        name: &str,
        new_name: &str,
        group_pattern: &str,
    ) -> Result<(), InventoryError> {
        let pattern = Pattern::new(group_pattern)?;
        self.transact(|doc| {
            doc.rename_group_var(name, new_name, &pattern);
            Ok(())
        })
        .await
    }

    pub async fn change_group_var(
        &mut self,
        name: &str,
        raw_value: &str,
        group_pattern: &str,
    ) -> Result<(), InventoryError> {
        let pattern = Pattern::new(group_pattern)?;
        let value = parse_value(raw_value);
        self.transact(|doc| {
            doc.change_group_var(name, &value, &pattern);
            Ok(())
        })
        .await
    }

    pub async fn remove_host(
        &mut self,
        name: &str,
        from_groups: Option<&[String]>,
    ) -> Result<(), InventoryError> {
        self.transact(|doc| {
            doc.remove_host(name, from_groups);
            Ok(())
        })
        .await
    }

    pub async fn remove_group(
        &mut self,
        name: &str,
        from_groups: Option<&[String]>,
    ) -> Result<(), InventoryError> {
        self.transact(|doc| doc.remove_group(name, from_groups))
            .await
    }

    pub async fn remove_host_var(&mut self, name: &str, host: &str) -> Result<(), InventoryError> {
        self.transact(|doc| {
            doc.remove_host_var(name, host);
            Ok(())
        })
        .await
    }

    pub async fn remove_group_var(&mut self, name: &str, group: &str) -> Result<(), InventoryError> {
        self.transact(|doc| {
            doc.remove_group_var(name, group);
            Ok(())
        })
        .await
    }

    /// Replace a host's variables with whatever `transform` returns, under
    /// the lock. An empty map from `transform` changes nothing.
    pub async fn edit_host_vars<F>(&mut self, host: &str, transform: F) -> Result<(), InventoryError>
    where
        F: FnOnce(VarMap) -> VarMap,
    {
        self.transact(|doc| doc.edit_host_vars(host, transform))
            .await
    }

    /// Group counterpart of [`Inventory::edit_host_vars`].
    pub async fn edit_group_vars<F>(
        &mut self,
        group: &str,
        transform: F,
    ) -> Result<(), InventoryError>
    where
        F: FnOnce(VarMap) -> VarMap,
    {
        self.transact(|doc| doc.edit_group_vars(group, transform))
            .await
    }
}

fn var_matches(vars: Option<&VarMap>, name: &str, pattern: &Pattern) -> bool {
    vars.and_then(|vars| vars.get(name))
        .is_some_and(|value| pattern.is_match(&value_text(value)))
}

fn already_defined(name: &str, kind: &str, existing: Vec<String>) -> Result<(), InventoryError> {
    if existing.is_empty() {
        return Ok(());
    }
    let mut targets = Vec::with_capacity(existing.len() + 1);
    targets.push(name.to_string());
    targets.extend(existing);
    Err(InventoryError::AlreadyExists {
        template: format!("Var {{}} already exists in these {}:", kind),
        targets,
    })
}
