//! The namespace tree.
//!
//! Namespaces live in an arena and are addressed by [`NamespaceId`] handles
//! carrying a generation. Children are owned downward through the arena;
//! parents are plain handles. Disposing a namespace vacates its slot and
//! bumps the generation, so a stale handle fails the [`NamespaceTree::get`]
//! check instead of observing a half-released node.
//!
//! The tree has no locking of its own. The runtime serializes mutation
//! behind one coarse lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use nsres_glob::GlobMatcher;

use crate::error::{NamespaceError, Result, wrap};
use crate::name::{self, SEPARATOR};

/// Handle to a namespace in a [`NamespaceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId {
    index: u32,
    generation: u32,
}

/// Opaque identity of a variable store.
///
/// The engine only decides which store a name belongs to; it never looks
/// inside one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

impl ScopeId {
    /// Allocate a process-unique scope identity.
    pub fn fresh() -> Self {
        Self(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Where a variable name ended up: a store plus the simple name inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableTarget {
    pub scope: ScopeId,
    pub name: String,
}

/// Custom resolution strategy attached to a namespace.
///
/// A hook is consulted before default resolution for relative names looked
/// up while its namespace is current. Returning `None` falls through.
pub trait ResolveHook: Send + Sync + fmt::Debug {
    /// Map a relative command name to an absolute entity name.
    fn resolve_command(&self, _namespace: &str, _name: &str) -> Option<String> {
        None
    }

    /// Map a relative variable name to a store.
    fn resolve_variable(&self, _namespace: &str, _name: &str) -> Option<VariableTarget> {
        None
    }
}

/// A single node of the tree.
#[derive(Debug)]
pub struct Namespace {
    name: String,
    parent: Option<NamespaceId>,
    children: HashMap<String, NamespaceId>,
    variable_scope: Option<ScopeId>,
    pub(crate) export_patterns: BTreeSet<String>,
    /// Local absolute alias name -> absolute target name.
    pub(crate) imports: BTreeMap<String, String>,
    hook: Option<Arc<dyn ResolveHook>>,
    deleted: bool,
}

impl Namespace {
    fn new(
        name: &str,
        parent: Option<NamespaceId>,
        hook: Option<Arc<dyn ResolveHook>>,
        variable_scope: ScopeId,
    ) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: HashMap::new(),
            variable_scope: Some(variable_scope),
            export_patterns: BTreeSet::new(),
            imports: BTreeMap::new(),
            hook,
            deleted: false,
        }
    }

    /// Simple name; empty for the global namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NamespaceId> {
        self.parent
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Backing store for variables declared directly in this namespace.
    pub fn variable_scope(&self) -> Option<ScopeId> {
        self.variable_scope
    }

    pub fn hook(&self) -> Option<&Arc<dyn ResolveHook>> {
        self.hook.as_ref()
    }

    /// Export patterns, sorted.
    pub fn export_patterns(&self) -> impl Iterator<Item = &str> {
        self.export_patterns.iter().map(String::as_str)
    }

    /// Import aliases as `(local, target)` absolute name pairs, sorted by
    /// local name.
    pub fn imports(&self) -> impl Iterator<Item = (&str, &str)> {
        self.imports.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Child names, sorted.
    pub fn child_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.children.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    data: Option<Namespace>,
}

/// Arena of namespaces rooted at the global namespace.
#[derive(Debug)]
pub struct NamespaceTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    global: NamespaceId,
}

impl Default for NamespaceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceTree {
    /// A tree holding only a fresh global namespace.
    pub fn new() -> Self {
        Self::with_global_scope(None)
    }

    /// A tree whose global namespace adopts `scope` as its variable store.
    pub fn with_global_scope(scope: Option<ScopeId>) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            global: NamespaceId {
                index: 0,
                generation: 0,
            },
        };
        tree.global = tree.create_global(scope);
        tree
    }

    fn create_global(&mut self, scope: Option<ScopeId>) -> NamespaceId {
        let scope = scope.unwrap_or_else(ScopeId::fresh);
        let id = self.insert(Namespace::new("", None, None, scope));
        tracing::debug!(?id, "created global namespace");
        id
    }

    /// Dispose everything and start over with a new root.
    ///
    /// When `reuse_scope` is given the new root adopts it, which lets a
    /// caller swap the tree out without losing global variables.
    pub fn reset(&mut self, reuse_scope: Option<ScopeId>) -> NamespaceId {
        let old = self.global;
        let disposed = self.dispose(old);
        tracing::debug!(disposed, "reset namespace tree");
        self.global = self.create_global(reuse_scope);
        self.global
    }

    /// The root.
    pub fn global(&self) -> NamespaceId {
        self.global
    }

    pub fn is_global(&self, id: NamespaceId) -> bool {
        id == self.global
    }

    fn insert(&mut self, namespace: Namespace) -> NamespaceId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(namespace);
            return NamespaceId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            data: Some(namespace),
        });
        NamespaceId {
            index,
            generation: 0,
        }
    }

    fn slot(&self, id: NamespaceId) -> Option<&Namespace> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.data.as_ref())
    }

    fn slot_mut(&mut self, id: NamespaceId) -> Option<&mut Namespace> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.data.as_mut())
    }

    /// Has this handle's namespace been released?
    pub fn is_disposed(&self, id: NamespaceId) -> bool {
        self.slot(id).is_none()
    }

    /// Deref a handle, failing if its namespace is gone.
    ///
    /// Every consumer of a handle goes through here (or [`Self::get_mut`]),
    /// so validity is re-checked at each use rather than cached.
    pub fn get(&self, id: NamespaceId) -> Result<&Namespace> {
        self.slot(id)
            .ok_or_else(|| NamespaceError::invalid_state("namespace is disposed"))
    }

    pub fn get_mut(&mut self, id: NamespaceId) -> Result<&mut Namespace> {
        self.slot_mut(id)
            .ok_or_else(|| NamespaceError::invalid_state("namespace is disposed"))
    }

    /// Allocate a detached namespace.
    ///
    /// The node records `parent` but is not yet reachable from it; follow
    /// with [`Self::add_child`]. A caller replacing a namespace in place can
    /// pass the old node's scope (see [`Self::take_variable_scope`]) as
    /// `reuse_scope`.
    pub fn create(
        &mut self,
        name: &str,
        parent: NamespaceId,
        hook: Option<Arc<dyn ResolveHook>>,
        reuse_scope: Option<ScopeId>,
    ) -> Result<NamespaceId> {
        if name.is_empty() {
            return Err(NamespaceError::invalid_argument(format!(
                "can't create namespace {}: only global namespace can have empty name",
                wrap(name)
            )));
        }
        if name::is_qualified(name) {
            return Err(NamespaceError::invalid_argument(format!(
                "can't create namespace {}: name must be simple",
                wrap(name)
            )));
        }

        self.get(parent)?;

        let scope = reuse_scope.unwrap_or_else(ScopeId::fresh);
        Ok(self.insert(Namespace::new(name, Some(parent), hook, scope)))
    }

    /// Link `child` under `parent`, failing if the name is taken.
    pub fn add_child(&mut self, parent: NamespaceId, child: NamespaceId) -> Result<()> {
        let child_name = self.get(child)?.name.clone();
        let parent_name = self.qualified_name(parent)?;
        let node = self.get_mut(parent)?;

        if node.children.contains_key(&child_name) {
            return Err(NamespaceError::conflict(format!(
                "can't add {}: namespace already exists in {}",
                wrap(&child_name),
                wrap(&parent_name)
            )));
        }

        node.children.insert(child_name.clone(), child);
        self.get_mut(child)?.parent = Some(parent);
        tracing::debug!(parent = %parent_name, child = %child_name, "added namespace");
        Ok(())
    }

    /// Find a child by simple name.
    pub fn get_child(&self, parent: NamespaceId, name: &str) -> Result<NamespaceId> {
        self.find_child(parent, name)?.ok_or_else(|| {
            let parent_name = self.qualified_name(parent).unwrap_or_default();
            NamespaceError::not_found(format!(
                "namespace {} not found in {}",
                wrap(name),
                wrap(&parent_name)
            ))
        })
    }

    /// Like [`Self::get_child`], with absence as `None` rather than an error.
    pub fn find_child(&self, parent: NamespaceId, name: &str) -> Result<Option<NamespaceId>> {
        let node = self.get(parent)?;
        Ok(node
            .children
            .get(name)
            .copied()
            .filter(|&child| !self.is_disposed(child)))
    }

    /// Release a namespace and its whole subtree.
    ///
    /// Disposing a handle that is already gone is a no-op. Returns how many
    /// namespaces were released.
    pub fn dispose(&mut self, id: NamespaceId) -> usize {
        let Some(node) = self.slot(id) else {
            return 0;
        };
        let parent = node.parent;
        let name = node.name.clone();
        let children: Vec<_> = node.children.values().copied().collect();

        let mut count = 0;
        for child in children {
            count += self.dispose(child);
        }

        if let Some(parent) = parent.and_then(|p| self.slot_mut(p)) {
            if parent.children.get(&name) == Some(&id) {
                parent.children.remove(&name);
            }
        }

        let slot = &mut self.slots[id.index as usize];
        slot.data = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        tracing::debug!(?id, name = %name, "disposed namespace");
        count + 1
    }

    /// Is `b` on `a`'s parent chain (or `a` itself)?
    pub fn is_descendant(&self, a: NamespaceId, b: NamespaceId) -> bool {
        let mut cursor = Some(a);
        while let Some(id) = cursor {
            if id == b {
                return true;
            }
            cursor = self.slot(id).and_then(|ns| ns.parent);
        }
        false
    }

    /// Absolute name, e.g. `::a::b`. The root is `::`.
    pub fn qualified_name(&self, id: NamespaceId) -> Result<String> {
        let mut parts = Vec::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            let node = self.get(current)?;
            if node.parent.is_some() {
                parts.push(node.name.as_str());
            }
            cursor = node.parent;
        }

        parts.reverse();
        Ok(name::make_absolute(&parts.join(SEPARATOR)))
    }

    pub fn parent(&self, id: NamespaceId) -> Result<Option<NamespaceId>> {
        Ok(self.get(id)?.parent)
    }

    pub fn name(&self, id: NamespaceId) -> Result<&str> {
        Ok(self.get(id)?.name.as_str())
    }

    /// Flag a subtree as deleted. Returns how many namespaces changed.
    pub fn mark_deleted(&mut self, id: NamespaceId) -> Result<usize> {
        let node = self.get_mut(id)?;
        let mut count = usize::from(!node.deleted);
        node.deleted = true;

        let children: Vec<_> = node.children.values().copied().collect();
        for child in children {
            count += self.mark_deleted(child)?;
        }
        Ok(count)
    }

    /// Detach and return a namespace's variable store.
    pub fn take_variable_scope(&mut self, id: NamespaceId) -> Result<Option<ScopeId>> {
        Ok(self.get_mut(id)?.variable_scope.take())
    }

    pub fn set_hook(&mut self, id: NamespaceId, hook: Option<Arc<dyn ResolveHook>>) -> Result<()> {
        self.get_mut(id)?.hook = hook;
        Ok(())
    }

    /// Direct children, sorted by qualified name.
    ///
    /// A pattern containing the separator is matched against qualified
    /// names, otherwise against simple names.
    pub fn children(
        &self,
        id: NamespaceId,
        pattern: Option<&str>,
        include_deleted: bool,
        matcher: &dyn GlobMatcher,
        no_case: bool,
    ) -> Result<Vec<NamespaceId>> {
        let mut found = Vec::new();
        for &child in self.get(id)?.children.values() {
            if self.accept(child, pattern, include_deleted, matcher, no_case)? {
                found.push((self.qualified_name(child)?, child));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }

    /// Every namespace below `id`, sorted by qualified name.
    pub fn descendants(
        &self,
        id: NamespaceId,
        pattern: Option<&str>,
        include_deleted: bool,
        matcher: &dyn GlobMatcher,
        no_case: bool,
    ) -> Result<Vec<NamespaceId>> {
        let mut found = Vec::new();
        let mut pending: Vec<_> = self.get(id)?.children.values().copied().collect();

        while let Some(current) = pending.pop() {
            let node = self.get(current)?;
            if !include_deleted && node.deleted {
                continue;
            }
            pending.extend(node.children.values().copied());
            if self.accept(current, pattern, include_deleted, matcher, no_case)? {
                found.push((self.qualified_name(current)?, current));
            }
        }

        found.sort();
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }

    fn accept(
        &self,
        id: NamespaceId,
        pattern: Option<&str>,
        include_deleted: bool,
        matcher: &dyn GlobMatcher,
        no_case: bool,
    ) -> Result<bool> {
        let node = self.get(id)?;
        if !include_deleted && node.deleted {
            return Ok(false);
        }
        let Some(pattern) = pattern else {
            return Ok(true);
        };
        if name::is_qualified(pattern) {
            let qualified = self.qualified_name(id)?;
            Ok(matcher.matches(&qualified, &name::make_absolute(pattern), no_case))
        } else {
            Ok(matcher.matches(&node.name, pattern, no_case))
        }
    }

    /// Handles of every live namespace, in arena order.
    pub fn live(&self) -> Vec<NamespaceId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.data.is_some())
            .map(|(index, slot)| NamespaceId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }
}
