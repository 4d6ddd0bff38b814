//! Command and procedure storage.
//!
//! Namespaces never own entities. Every command, procedure and alias lives
//! in a flat [`EntityStore`] keyed by its absolute name (`::a::b::foo`), and
//! namespaces only decide which key a name maps to.

use std::collections::HashMap;

use crate::error::{NamespaceError, Result, wrap};

/// What a stored name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    /// A native command.
    Command,
    /// A script-defined procedure.
    Procedure,
    /// A forwarder to another absolute name. Imports create these.
    Alias { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub kind: EntityKind,
    /// Hidden entities are only found by an explicit hidden lookup.
    pub hidden: bool,
}

impl Entity {
    pub fn command() -> Self {
        Self {
            kind: EntityKind::Command,
            hidden: false,
        }
    }

    pub fn procedure() -> Self {
        Self {
            kind: EntityKind::Procedure,
            hidden: false,
        }
    }

    pub fn alias(target: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Alias {
                target: target.into(),
            },
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// The aliased name, if this is an alias.
    pub fn alias_target(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Alias { target } => Some(target),
            _ => None,
        }
    }
}

/// Storage for commands, procedures and aliases.
///
/// Keys are absolute names.
pub trait EntityStore: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    fn get(&self, name: &str) -> Option<Entity>;

    /// Add an entity; fails with `Conflict` if the name is taken.
    fn add(&mut self, name: &str, entity: Entity) -> Result<()>;

    /// Remove an entity; fails with `NotFound` if absent.
    fn remove(&mut self, name: &str) -> Result<Entity>;

    /// All keys, sorted.
    fn names(&self) -> Vec<String>;
}

/// In-memory [`EntityStore`].
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    entities: HashMap<String, Entity>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityStore for MemoryEntityStore {
    fn exists(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Entity> {
        self.entities.get(name).cloned()
    }

    fn add(&mut self, name: &str, entity: Entity) -> Result<()> {
        if self.entities.contains_key(name) {
            return Err(NamespaceError::conflict(format!(
                "command {} already exists",
                wrap(name)
            )));
        }
        self.entities.insert(name.to_string(), entity);
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<Entity> {
        self.entities.remove(name).ok_or_else(|| {
            NamespaceError::not_found(format!("invalid command name {}", wrap(name)))
        })
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entities.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn add_get_remove() {
        let mut store = MemoryEntityStore::new();
        store.add("::a::foo", Entity::procedure()).unwrap();
        assert!(store.exists("::a::foo"));
        assert_eq!(store.get("::a::foo"), Some(Entity::procedure()));
        assert_eq!(store.remove("::a::foo").unwrap(), Entity::procedure());
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_add_conflicts() {
        let mut store = MemoryEntityStore::new();
        store.add("::set", Entity::command()).unwrap();
        let err = store.add("::set", Entity::command()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut store = MemoryEntityStore::new();
        assert_eq!(store.remove("::nope").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn names_are_sorted() {
        let mut store = MemoryEntityStore::new();
        store.add("::b", Entity::command()).unwrap();
        store.add("::a", Entity::alias("::b")).unwrap();
        assert_eq!(store.names(), vec!["::a", "::b"]);
        assert_eq!(store.get("::a").unwrap().alias_target(), Some("::b"));
    }
}
