//! The runtime: one namespace tree, one entity store, one lock.
//!
//! All tree and store state sits behind a single [`RwLock`]. Public methods
//! take the lock exactly once and hand the guarded state to private helpers,
//! so nothing here ever re-enters the lock. Read-only resolution takes the
//! read half; anything that creates, deletes or edits tables takes the
//! write half.
//!
//! Call stacks are owned by their executions and passed in by `&mut`; they
//! are never stored in the runtime. That keeps frame bindings per-execution
//! and makes the limits of bulk invalidation explicit: a method can only
//! clear bindings in the stack it was handed.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use nsres_glob::{GlobMatcher, ShellGlob};

use crate::config::RuntimeConfig;
use crate::entity::{Entity, EntityStore, MemoryEntityStore};
use crate::error::{NamespaceError, Result, wrap};
use crate::frame::{self, CallFrame, CallStack};
use crate::name::{self, SEPARATOR};
use crate::tree::{NamespaceId, NamespaceTree, ResolveHook, VariableTarget};

/// How names are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Full namespace semantics.
    Namespaced,
    /// Everything lives in the global scope; leading separators are
    /// ignored.
    Flat,
}

/// Flags for [`Runtime::lookup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupOptions {
    /// Resolve from the global namespace even if the name is relative.
    pub absolute: bool,
    /// Create missing path segments.
    pub create: bool,
    /// Walk through namespaces already flagged deleted.
    pub allow_deleted: bool,
}

impl LookupOptions {
    /// Find an existing, live namespace.
    pub fn existing() -> Self {
        Self::default()
    }

    /// Find or create.
    pub fn create() -> Self {
        Self {
            create: true,
            ..Self::default()
        }
    }

    pub fn absolute(mut self) -> Self {
        self.absolute = true;
        self
    }

    pub fn allow_deleted(mut self) -> Self {
        self.allow_deleted = true;
        self
    }
}

/// Flags for [`Runtime::resolve_command`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandLookup {
    /// Search hidden entities before visible ones.
    pub hidden: bool,
    /// With `hidden`, search hidden entities only.
    pub hidden_only: bool,
}

/// Flags for [`Runtime::match_items`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub no_case: bool,
    /// A pattern qualified only by `::` stays in the supplied namespace
    /// instead of switching to the global one.
    pub use_namespace: bool,
    /// Report matches by tail only.
    pub tail_only: bool,
    /// Report matches in absolute form.
    pub absolute: bool,
    /// Fail, rather than match nothing, when the pattern's namespace is
    /// missing.
    pub strict: bool,
}

pub(crate) struct RuntimeState {
    pub(crate) tree: NamespaceTree,
    pub(crate) entities: Box<dyn EntityStore>,
    pub(crate) mode: ResolutionMode,
}

enum Walk {
    Found(NamespaceId),
    Missing {
        parent: NamespaceId,
        rest: Vec<String>,
    },
}

/// A namespace engine instance.
pub struct Runtime {
    config: RuntimeConfig,
    state: RwLock<RuntimeState>,
    matcher: Arc<dyn GlobMatcher>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    /// A runtime with an in-memory entity store.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_store(config, Box::new(MemoryEntityStore::new()))
    }

    /// A runtime over a caller-supplied entity store.
    pub fn with_store(config: RuntimeConfig, entities: Box<dyn EntityStore>) -> Self {
        let mode = if config.namespaces_enabled {
            ResolutionMode::Namespaced
        } else {
            ResolutionMode::Flat
        };
        Self {
            config,
            state: RwLock::new(RuntimeState {
                tree: NamespaceTree::new(),
                entities,
                mode,
            }),
            matcher: Arc::new(ShellGlob::new()),
        }
    }

    /// Swap in a different glob dialect.
    pub fn with_matcher(mut self, matcher: Arc<dyn GlobMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn matcher(&self) -> &dyn GlobMatcher {
        self.matcher.as_ref()
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, RuntimeState>> {
        self.state
            .read()
            .map_err(|_| NamespaceError::invalid_state("runtime lock poisoned"))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, RuntimeState>> {
        self.state
            .write()
            .map_err(|_| NamespaceError::invalid_state("runtime lock poisoned"))
    }

    /// Run `f` against the tree under the read lock.
    pub fn with_tree<R>(&self, f: impl FnOnce(&NamespaceTree) -> R) -> Result<R> {
        let state = self.read()?;
        Ok(f(&state.tree))
    }

    /// A fresh call stack whose global frame uses the global namespace's
    /// variable store.
    pub fn new_stack(&self) -> Result<CallStack> {
        let state = self.read()?;
        let global = state.tree.global();
        let scope = state.tree.get(global)?.variable_scope().ok_or_else(|| {
            NamespaceError::invalid_state("global namespace has no variable scope")
        })?;
        Ok(CallStack::new(scope))
    }

    pub fn mode(&self) -> Result<ResolutionMode> {
        Ok(self.read()?.mode)
    }

    pub fn global_namespace(&self) -> Result<NamespaceId> {
        Ok(self.read()?.tree.global())
    }

    /// The namespace `stack` is currently evaluating in.
    pub fn current_namespace(&self, stack: &mut CallStack) -> Result<NamespaceId> {
        let state = self.read()?;
        Ok(frame::current_namespace(&state.tree, stack))
    }

    pub fn qualified_name(&self, namespace: NamespaceId) -> Result<String> {
        self.read()?.tree.qualified_name(namespace)
    }

    /// Namespace redirections, as `(from, to)` pairs.
    pub fn mappings(&self) -> Vec<(String, String)> {
        self.config
            .mappings
            .iter()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Namespace lookup
    // ------------------------------------------------------------------

    /// Resolve a namespace name.
    ///
    /// Absolute names (or any name with `options.absolute`) start from the
    /// global namespace; relative ones from `base`, defaulting to the
    /// stack's current namespace.
    pub fn lookup(
        &self,
        stack: &mut CallStack,
        base: Option<NamespaceId>,
        name: &str,
        options: LookupOptions,
    ) -> Result<NamespaceId> {
        if options.create {
            let mut state = self.write()?;
            self.lookup_in(&mut state, stack, base, name, options)
        } else {
            let state = self.read()?;
            self.find_in(&state.tree, stack, base, name, options)
        }
    }

    /// Does `name` denote a live namespace?
    ///
    /// Deleted and missing namespaces answer `false`; a poisoned lock is
    /// still an error.
    pub fn exists(&self, stack: &mut CallStack, name: &str) -> Result<bool> {
        let state = self.read()?;
        match self.find_in(&state.tree, stack, None, name, LookupOptions::existing()) {
            Ok(_) => Ok(true),
            Err(err)
                if matches!(
                    err.kind(),
                    crate::ErrorKind::NotFound | crate::ErrorKind::InvalidState
                ) =>
            {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn lookup_in(
        &self,
        state: &mut RuntimeState,
        stack: &mut CallStack,
        base: Option<NamespaceId>,
        name: &str,
        options: LookupOptions,
    ) -> Result<NamespaceId> {
        match self.walk(&state.tree, stack, base, name, options)? {
            Walk::Found(id) => Ok(id),
            Walk::Missing { mut parent, rest } => {
                for segment in rest {
                    let child = state.tree.create(&segment, parent, None, None)?;
                    if let Err(err) = state.tree.add_child(parent, child) {
                        state.tree.dispose(child);
                        return Err(err);
                    }
                    parent = child;
                }
                Ok(parent)
            }
        }
    }

    /// Lookup that never creates.
    pub(crate) fn find_in(
        &self,
        tree: &NamespaceTree,
        stack: &mut CallStack,
        base: Option<NamespaceId>,
        name: &str,
        options: LookupOptions,
    ) -> Result<NamespaceId> {
        let options = LookupOptions {
            create: false,
            ..options
        };
        match self.walk(tree, stack, base, name, options)? {
            Walk::Found(id) => Ok(id),
            Walk::Missing { .. } => Err(NamespaceError::not_found(format!(
                "namespace {} not found",
                wrap(name)
            ))),
        }
    }

    fn walk(
        &self,
        tree: &NamespaceTree,
        stack: &mut CallStack,
        base: Option<NamespaceId>,
        name: &str,
        options: LookupOptions,
    ) -> Result<Walk> {
        let name = self.apply_mappings(name, options.absolute);
        let base = if options.absolute || name::is_absolute(&name) {
            tree.global()
        } else {
            base.unwrap_or_else(|| frame::current_namespace(tree, stack))
        };

        if name::is_global(&name) && tree.is_global(base) {
            return Ok(Walk::Found(base));
        }

        let base_node = tree.get(base)?;
        if !options.allow_deleted && base_node.is_deleted() {
            return Err(NamespaceError::invalid_state(
                "cannot get descendant: deleted namespace",
            ));
        }

        if name::is_global(&name) {
            return Err(NamespaceError::invalid_argument(if options.create {
                format!(
                    "can't create namespace {}: only global namespace can have empty name",
                    wrap(&name)
                )
            } else {
                "cannot get descendant: invalid name".to_string()
            }));
        }

        let segments = name::segments(&name);
        let mut current = base;

        for (index, segment) in segments.iter().enumerate() {
            match tree.find_child(current, segment)? {
                Some(child) => {
                    if !options.allow_deleted && tree.get(child)?.is_deleted() {
                        return Err(NamespaceError::invalid_state(format!(
                            "namespace {} in {} is deleted",
                            wrap(segment),
                            wrap(&tree.qualified_name(current)?)
                        )));
                    }
                    tracing::trace!(segment = %segment, "lookup hop");
                    current = child;
                }
                None if options.create => {
                    return Ok(Walk::Missing {
                        parent: current,
                        rest: segments[index..].iter().map(|s| s.to_string()).collect(),
                    });
                }
                None if name::is_absolute(&name) => {
                    return Err(NamespaceError::not_found(format!(
                        "namespace {} not found",
                        wrap(&name)
                    )));
                }
                None => {
                    return Err(NamespaceError::not_found(format!(
                        "namespace {} not found in {}",
                        wrap(&name),
                        wrap(&tree.qualified_name(base)?)
                    )));
                }
            }
        }

        Ok(Walk::Found(current))
    }

    /// Rewrite an absolute name through the configured mappings.
    fn apply_mappings<'a>(&self, name: &'a str, absolute: bool) -> Cow<'a, str> {
        if self.config.mappings.is_empty() || !(absolute || name::is_absolute(name)) {
            return Cow::Borrowed(name);
        }

        let canonical = name::normalize_absolute(name);
        for (from, to) in &self.config.mappings {
            if name::is_global(from) {
                continue;
            }
            let rest = if canonical == *from {
                Some("")
            } else {
                canonical
                    .strip_prefix(from.as_str())
                    .and_then(|rest| rest.strip_prefix(SEPARATOR))
            };
            if let Some(rest) = rest {
                let mapped = if rest.is_empty() {
                    to.clone()
                } else if name::is_global(to) {
                    name::make_absolute(rest)
                } else {
                    name::make_qualified(to, rest)
                };
                tracing::trace!(from = %canonical, to = %mapped, "mapped namespace");
                return Cow::Owned(mapped);
            }
        }

        Cow::Borrowed(name)
    }

    // ------------------------------------------------------------------
    // Variable and command resolution
    // ------------------------------------------------------------------

    /// Decide which variable store `name` belongs to.
    ///
    /// Unqualified names prefer, in order: the namespace bound to a
    /// `namespace eval` frame, the nearest procedure frame, the current
    /// namespace if it is not global, and finally the global frame.
    pub fn resolve_variable(
        &self,
        stack: &mut CallStack,
        name: &str,
        global_only: bool,
    ) -> Result<VariableTarget> {
        let state = self.read()?;
        let tree = &state.tree;
        let global_scope = stack
            .global_frame()
            .variables()
            .ok_or_else(|| NamespaceError::invalid_state("global frame has no variables"))?;

        if global_only {
            return Ok(VariableTarget {
                scope: global_scope,
                name: name::trim_leading(name).0.to_string(),
            });
        }

        if state.mode == ResolutionMode::Flat {
            let (trimmed, absolute) = name::trim_leading(name);
            let scope = if absolute {
                global_scope
            } else {
                stack
                    .nearest_variable_frame()
                    .variables()
                    .unwrap_or(global_scope)
            };
            return Ok(VariableTarget {
                scope,
                name: trimmed.to_string(),
            });
        }

        let parts = name::split(name);

        if parts.flags.absolute {
            if !parts.flags.qualified {
                return Ok(VariableTarget {
                    scope: global_scope,
                    name: parts.tail.to_string(),
                });
            }
            let namespace = self.find_in(
                tree,
                stack,
                None,
                parts.qualifiers,
                LookupOptions::existing().allow_deleted(),
            )?;
            return namespace_target(tree, namespace, parts.tail);
        }

        let current = frame::current_namespace(tree, stack);

        if let Some(hook) = tree.get(current)?.hook() {
            let current_name = tree.qualified_name(current)?;
            if let Some(target) = hook.resolve_variable(&current_name, name) {
                return Ok(target);
            }
        }

        if parts.flags.qualified {
            let namespace = self.find_in(
                tree,
                stack,
                Some(current),
                parts.qualifiers,
                LookupOptions::existing().allow_deleted(),
            )?;
            return namespace_target(tree, namespace, parts.tail);
        }

        let nearest = stack.nearest_variable_frame();
        let flags = nearest.flags();

        if flags.use_namespace {
            let bound = nearest
                .binding()
                .filter(|&id| !tree.is_disposed(id) && !tree.is_global(id));
            if let Some(namespace) = bound {
                if let Some(scope) = tree.get(namespace)?.variable_scope() {
                    return Ok(VariableTarget {
                        scope,
                        name: name.to_string(),
                    });
                }
            }
            return Ok(VariableTarget {
                scope: global_scope,
                name: name.to_string(),
            });
        }

        if flags.variables && !flags.global {
            if let Some(scope) = nearest.variables() {
                return Ok(VariableTarget {
                    scope,
                    name: name.to_string(),
                });
            }
        }

        if !tree.is_global(current) {
            return namespace_target(tree, current, name);
        }

        Ok(VariableTarget {
            scope: global_scope,
            name: name.to_string(),
        })
    }

    /// Resolve a command name to the absolute name of an existing entity.
    ///
    /// A relative name is tried in the current namespace, then globally.
    pub fn resolve_command(
        &self,
        stack: &mut CallStack,
        name: &str,
        lookup: CommandLookup,
    ) -> Result<String> {
        let state = self.read()?;
        self.resolve_command_in(&state, stack, name, lookup)
    }

    pub(crate) fn resolve_command_in(
        &self,
        state: &RuntimeState,
        stack: &mut CallStack,
        name: &str,
        lookup: CommandLookup,
    ) -> Result<String> {
        let mut candidates = vec![name.to_string()];
        if !name::is_absolute(name) {
            candidates.push(name::make_absolute(name));
        }

        for candidate in &candidates {
            if lookup.hidden {
                if let Some(found) = self.find_command(state, stack, candidate, true)? {
                    return Ok(found);
                }
                if lookup.hidden_only {
                    continue;
                }
            }
            if let Some(found) = self.find_command(state, stack, candidate, false)? {
                return Ok(found);
            }
        }

        Err(NamespaceError::not_found(format!(
            "invalid command name {}",
            wrap(name)
        )))
    }

    fn find_command(
        &self,
        state: &RuntimeState,
        stack: &mut CallStack,
        name: &str,
        hidden: bool,
    ) -> Result<Option<String>> {
        let visible = |key: &str| {
            state
                .entities
                .get(key)
                .is_some_and(|entity| entity.hidden == hidden)
        };

        let key = if state.mode == ResolutionMode::Flat || name::is_absolute(name) {
            name::normalize_absolute(name)
        } else {
            let tree = &state.tree;
            let current = frame::current_namespace(tree, stack);
            let current_name = tree.qualified_name(current)?;

            if let Some(hook) = tree.get(current)?.hook() {
                if let Some(found) = hook.resolve_command(&current_name, name) {
                    let found = name::normalize_absolute(&name::make_absolute(&found));
                    if visible(&found) {
                        return Ok(Some(found));
                    }
                }
            }

            name::normalize_absolute(&name::make_qualified(&current_name, name))
        };

        Ok(visible(&key).then_some(key))
    }

    /// Canonical absolute form of `name`, qualifying relative names by the
    /// current namespace.
    pub fn normalize_name(&self, stack: &mut CallStack, name: &str) -> Result<String> {
        if name::is_absolute(name) {
            return Ok(name::normalize_absolute(name));
        }
        let state = self.read()?;
        let current = frame::current_namespace(&state.tree, stack);
        let current_name = state.tree.qualified_name(current)?;
        Ok(name::normalize_absolute(&name::make_qualified(
            &current_name,
            name,
        )))
    }

    // ------------------------------------------------------------------
    // Matching and introspection
    // ------------------------------------------------------------------

    /// A glob pattern matching the direct members of `namespace`.
    ///
    /// A missing pattern means `*`. The result is relative to the global
    /// namespace unless `absolute` is set.
    pub fn make_qualified_pattern(
        &self,
        namespace: Option<NamespaceId>,
        pattern: Option<&str>,
        absolute: bool,
    ) -> Result<String> {
        let state = self.read()?;
        qualified_pattern(&state.tree, namespace, pattern, absolute)
    }

    /// Filter fully-qualified `items` by a possibly-qualified pattern.
    ///
    /// An unqualified (or `::`-only) pattern against the global namespace
    /// matches bare names only. Anything else is scoped to the pattern's
    /// namespace, and matches must sit at exactly that nesting depth.
    /// Results keep input order.
    pub fn match_items(
        &self,
        stack: &mut CallStack,
        namespace: Option<NamespaceId>,
        items: &[String],
        pattern: Option<&str>,
        options: MatchOptions,
    ) -> Result<Vec<String>> {
        let state = self.read()?;
        self.match_items_in(&state.tree, stack, namespace, items, pattern, options)
    }

    pub(crate) fn match_items_in(
        &self,
        tree: &NamespaceTree,
        stack: &mut CallStack,
        namespace: Option<NamespaceId>,
        items: &[String],
        pattern: Option<&str>,
        options: MatchOptions,
    ) -> Result<Vec<String>> {
        let parts = pattern.map(name::split);
        let has_qualifiers = pattern.is_some_and(name::is_qualified);
        let global_qualifiers =
            has_qualifiers && parts.is_some_and(|p| name::is_global(p.qualifiers));
        let global_target = namespace.is_none_or(|id| tree.is_global(id));

        let mut matched = Vec::new();

        if (!has_qualifiers || global_qualifiers) && global_target {
            let simple = pattern.map(|p| name::trim_leading(p).0);
            for item in items {
                let relative = name::trim_leading(item).0;
                if name::is_qualified(relative) {
                    continue;
                }
                if simple.is_none_or(|p| self.matcher.matches(relative, p, options.no_case)) {
                    matched.push(if options.absolute {
                        name::make_absolute(relative)
                    } else {
                        relative.to_string()
                    });
                }
            }
            return Ok(matched);
        }

        let mut target = namespace;
        if let Some(parts) = parts.filter(|_| has_qualifiers) {
            if global_qualifiers {
                if !options.use_namespace {
                    target = Some(tree.global());
                }
            } else {
                match self.find_in(
                    tree,
                    stack,
                    namespace,
                    parts.qualifiers,
                    LookupOptions::existing().allow_deleted(),
                ) {
                    Ok(id) => target = Some(id),
                    Err(err) if options.strict => return Err(err),
                    Err(_) => return Ok(matched),
                }
            }
        }

        let scoped = qualified_pattern(tree, target, parts.map(|p| p.tail), false)?;
        let depth = name::count_qualifiers(&scoped);

        for item in items {
            let relative = name::trim_leading(item).0;
            if name::count_qualifiers(relative) != depth {
                continue;
            }
            if self.matcher.matches(relative, &scoped, options.no_case) {
                matched.push(if options.tail_only {
                    name::tail_only(relative).to_string()
                } else if options.absolute {
                    name::make_absolute(relative)
                } else {
                    relative.to_string()
                });
            }
        }

        Ok(matched)
    }

    /// Qualified names of the direct children of `namespace`.
    pub fn children(
        &self,
        namespace: NamespaceId,
        pattern: Option<&str>,
        include_deleted: bool,
    ) -> Result<Vec<String>> {
        let state = self.read()?;
        let tree = &state.tree;
        tree.children(
            namespace,
            pattern,
            include_deleted,
            self.matcher(),
            self.config.no_case,
        )?
        .into_iter()
        .map(|id| tree.qualified_name(id))
        .collect()
    }

    /// Qualified names of everything below `namespace`.
    pub fn descendants(
        &self,
        namespace: NamespaceId,
        pattern: Option<&str>,
        include_deleted: bool,
    ) -> Result<Vec<String>> {
        let state = self.read()?;
        let tree = &state.tree;
        tree.descendants(
            namespace,
            pattern,
            include_deleted,
            self.matcher(),
            self.config.no_case,
        )?
        .into_iter()
        .map(|id| tree.qualified_name(id))
        .collect()
    }

    /// The parent's qualified name; empty for the global namespace.
    pub fn parent(&self, namespace: NamespaceId) -> Result<String> {
        let state = self.read()?;
        let tree = &state.tree;
        if tree.is_global(namespace) {
            return Ok(String::new());
        }
        match tree.parent(namespace)? {
            Some(parent) => tree.qualified_name(parent),
            None => Err(NamespaceError::not_found(format!(
                "namespace {} has no parent",
                wrap(&tree.qualified_name(namespace)?)
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Register an entity under the absolute form of `name`.
    ///
    /// A qualified name must point into an existing namespace.
    pub fn define(&self, stack: &mut CallStack, name: &str, entity: Entity) -> Result<String> {
        let mut state = self.write()?;
        let parts = name::split(name);
        if parts.tail.is_empty() {
            return Err(NamespaceError::invalid_argument(format!(
                "invalid command name {}",
                wrap(name)
            )));
        }

        let namespace = if parts.flags.qualified {
            self.find_in(&state.tree, stack, None, parts.qualifiers, LookupOptions::existing())?
        } else if parts.flags.absolute {
            state.tree.global()
        } else {
            frame::current_namespace(&state.tree, stack)
        };

        let node = state.tree.get(namespace)?;
        if node.is_deleted() {
            return Err(NamespaceError::invalid_state(format!(
                "can't define {}: namespace is deleted",
                wrap(name)
            )));
        }

        let key = name::normalize_absolute(&name::make_qualified(
            &state.tree.qualified_name(namespace)?,
            parts.tail,
        ));
        state.entities.add(&key, entity)?;
        tracing::debug!(name = %key, "defined entity");
        Ok(key)
    }

    /// Remove an entity by absolute name, along with any import record that
    /// created it.
    ///
    /// Imports and aliases that point at the removed name go too, and so on
    /// down any chain of re-exports.
    pub fn undefine(&self, name: &str) -> Result<Entity> {
        let mut state = self.write()?;
        let state = &mut *state;
        let key = name::normalize_absolute(&name::make_absolute(name));
        let entity = state.entities.remove(&key)?;

        let mut pending = vec![key.clone()];
        let mut dropped = 0usize;
        while let Some(target) = pending.pop() {
            let mut dependents = Vec::new();
            for id in state.tree.live() {
                let node = state.tree.get_mut(id)?;
                node.imports.remove(&target);
                node.imports.retain(|local, to| {
                    if *to == target {
                        dependents.push(local.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            dependents.extend(state.entities.names().into_iter().filter(|alias| {
                state
                    .entities
                    .get(alias)
                    .is_some_and(|e| e.alias_target() == Some(target.as_str()))
            }));

            for local in dependents {
                if state.entities.exists(&local) {
                    state.entities.remove(&local)?;
                    dropped += 1;
                    pending.push(local);
                }
            }
        }

        tracing::debug!(name = %key, dropped, "undefined entity");
        Ok(entity)
    }

    pub fn entity(&self, name: &str) -> Result<Option<Entity>> {
        let key = name::normalize_absolute(&name::make_absolute(name));
        Ok(self.read()?.entities.get(&key))
    }

    /// Every stored entity name, sorted.
    pub fn entity_names(&self) -> Result<Vec<String>> {
        Ok(self.read()?.entities.names())
    }

    pub fn set_hook(
        &self,
        namespace: NamespaceId,
        hook: Option<Arc<dyn ResolveHook>>,
    ) -> Result<()> {
        self.write()?.tree.set_hook(namespace, hook)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Push a `namespace eval` frame for `name`, creating it if needed.
    pub fn enter_namespace(&self, stack: &mut CallStack, name: &str) -> Result<NamespaceId> {
        let mut state = self.write()?;
        let namespace = self.lookup_in(&mut state, stack, None, name, LookupOptions::create())?;
        let qualified = state.tree.qualified_name(namespace)?;
        stack.push(CallFrame::namespace_eval(
            format!("namespace eval {qualified}"),
            namespace,
        ));
        Ok(namespace)
    }

    /// Delete a namespace and everything under it.
    ///
    /// The subtree is flagged deleted first, then its imports, the imports
    /// elsewhere that point into it, and the entities stored under it are
    /// removed. Bindings in `stack` are cleared before the nodes are
    /// disposed.
    pub fn delete_namespace(&self, stack: &mut CallStack, namespace: NamespaceId) -> Result<()> {
        let mut state = self.write()?;
        let state = &mut *state;

        if state.tree.is_global(namespace) {
            return Err(NamespaceError::invalid_argument(
                "can't delete the global namespace",
            ));
        }

        let root_name = state.tree.qualified_name(namespace)?;
        let prefix = name::make_qualified(&root_name, "");
        let under = |name: &str| name.starts_with(&prefix);

        let mut doomed = state.tree.descendants(
            namespace,
            None,
            true,
            self.matcher.as_ref(),
            false,
        )?;
        doomed.push(namespace);

        state.tree.mark_deleted(namespace)?;

        let mut stale = Vec::new();
        for id in state.tree.live() {
            let node = state.tree.get_mut(id)?;
            if doomed.contains(&id) {
                stale.extend(std::mem::take(&mut node.imports).into_keys());
            } else {
                let pointing_in: Vec<_> = node
                    .imports
                    .iter()
                    .filter(|(_, target)| under(target.as_str()))
                    .map(|(local, _)| local.clone())
                    .collect();
                for local in pointing_in {
                    node.imports.remove(&local);
                    stale.push(local);
                }
            }
        }
        stale.extend(state.entities.names().into_iter().filter(|n| under(n.as_str())));

        for name in &stale {
            if state.entities.exists(name) {
                state.entities.remove(name)?;
            }
        }

        for &id in &doomed {
            frame::invalidate_all(stack, id)?;
        }

        let disposed = state.tree.dispose(namespace);
        tracing::debug!(namespace = %root_name, disposed, removed = stale.len(), "deleted namespace");
        Ok(())
    }

    /// Switch between namespaced and flat resolution.
    ///
    /// When the mode changes (or `force` is set) every frame of `stack` is
    /// rebound: to the global namespace when enabling, to nothing when
    /// disabling. Returns whether the mode changed.
    pub fn set_namespaces_enabled(
        &self,
        stack: &mut CallStack,
        enable: bool,
        force: bool,
    ) -> Result<bool> {
        let mut state = self.write()?;
        let mode = if enable {
            ResolutionMode::Namespaced
        } else {
            ResolutionMode::Flat
        };
        let changed = state.mode != mode;
        state.mode = mode;

        if changed || force {
            let target = enable.then(|| state.tree.global());
            let count = frame::propagate_down(stack, target);
            tracing::debug!(?mode, frames = count, "switched resolution mode");
        }
        Ok(changed)
    }

    /// Throw away every namespace and start over.
    ///
    /// Entities stored below the global namespace go with their namespaces,
    /// as do global aliases that point into them. With `preserve_variables`
    /// the new root keeps the old root's variable store.
    pub fn reset(&self, stack: &mut CallStack, preserve_variables: bool) -> Result<()> {
        let mut state = self.write()?;
        let old = state.tree.global();
        let scope = if preserve_variables {
            state.tree.take_variable_scope(old)?
        } else {
            None
        };

        let nested = |name: &str| name::is_qualified(name::trim_leading(name).0);
        for entity in state.entities.names() {
            let into_subtree = state
                .entities
                .get(&entity)
                .and_then(|e| e.alias_target().map(nested))
                .unwrap_or(false);
            if nested(&entity) || into_subtree {
                state.entities.remove(&entity)?;
            }
        }

        let global = state.tree.reset(scope);
        let new_scope = state.tree.get(global)?.variable_scope().ok_or_else(|| {
            NamespaceError::invalid_state("global namespace has no variable scope")
        })?;
        stack.set_global_scope(new_scope);
        frame::propagate_down(stack, None);
        Ok(())
    }
}

fn namespace_target(
    tree: &NamespaceTree,
    namespace: NamespaceId,
    tail: &str,
) -> Result<VariableTarget> {
    let scope = tree.get(namespace)?.variable_scope().ok_or_else(|| {
        NamespaceError::invalid_state(format!(
            "namespace {} has no variable scope",
            wrap(&tree.qualified_name(namespace).unwrap_or_default())
        ))
    })?;
    Ok(VariableTarget {
        scope,
        name: tail.to_string(),
    })
}

pub(crate) fn qualified_pattern(
    tree: &NamespaceTree,
    namespace: Option<NamespaceId>,
    pattern: Option<&str>,
    absolute: bool,
) -> Result<String> {
    let pattern = pattern.unwrap_or("*");
    let qualified = match namespace {
        Some(id) if !tree.is_global(id) => name::make_qualified(&tree.qualified_name(id)?, pattern),
        _ => name::make_qualified("", pattern),
    };
    Ok(if absolute {
        name::make_absolute(&qualified)
    } else {
        name::trim_leading(&qualified).0.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn runtime() -> (Runtime, CallStack) {
        let runtime = Runtime::default();
        let stack = runtime.new_stack().unwrap();
        (runtime, stack)
    }

    #[test]
    fn lookup_creates_intermediate_namespaces() {
        let (rt, mut stack) = runtime();
        let id = rt.lookup(&mut stack, None, "::a::b", LookupOptions::create()).unwrap();
        assert_eq!(rt.qualified_name(id).unwrap(), "::a::b");
        assert!(rt.exists(&mut stack, "::a").unwrap());
    }

    #[test]
    fn lookup_missing_reports_context() {
        let (rt, mut stack) = runtime();
        let err = rt
            .lookup(&mut stack, None, "::nope", LookupOptions::existing())
            .unwrap_err();
        assert_eq!(err.to_string(), "namespace \"::nope\" not found");

        rt.enter_namespace(&mut stack, "::a").unwrap();
        let err = rt
            .lookup(&mut stack, None, "b", LookupOptions::existing())
            .unwrap_err();
        assert_eq!(err.to_string(), "namespace \"b\" not found in \"::a\"");
    }

    #[test]
    fn global_name_resolves_to_root() {
        let (rt, mut stack) = runtime();
        let global = rt.global_namespace().unwrap();
        for name in ["", "::", "::::"] {
            let id = rt.lookup(&mut stack, None, name, LookupOptions::existing()).unwrap();
            assert_eq!(id, global, "name {name:?}");
        }
    }

    #[test]
    fn deleted_namespace_blocks_new_lookups() {
        let (rt, mut stack) = runtime();
        rt.lookup(&mut stack, None, "::a::b", LookupOptions::create()).unwrap();
        {
            let mut state = rt.write().unwrap();
            let global = state.tree.global();
            let a = state.tree.get_child(global, "a").unwrap();
            state.tree.mark_deleted(a).unwrap();
        }
        let err = rt
            .lookup(&mut stack, None, "::a::b", LookupOptions::existing())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(err.to_string().contains("is deleted"));

        let found = rt.lookup(
            &mut stack,
            None,
            "::a::b",
            LookupOptions::existing().allow_deleted(),
        );
        assert!(found.is_ok());
    }

    #[test]
    fn mappings_redirect_lookups() {
        let rt = Runtime::new(RuntimeConfig::default().with_mapping("::Legacy", "::"));
        let mut stack = rt.new_stack().unwrap();
        let global = rt.global_namespace().unwrap();
        assert_eq!(
            rt.lookup(&mut stack, None, "::Legacy", LookupOptions::existing()).unwrap(),
            global
        );

        let b = rt.lookup(&mut stack, None, "::b", LookupOptions::create()).unwrap();
        assert_eq!(
            rt.lookup(&mut stack, None, "::Legacy::b", LookupOptions::existing()).unwrap(),
            b
        );
        assert!(rt.lookup(&mut stack, None, "::LegacyX", LookupOptions::existing()).is_err());
    }

    #[test]
    fn make_qualified_pattern_forms() {
        let (rt, mut stack) = runtime();
        let a = rt.lookup(&mut stack, None, "::a", LookupOptions::create()).unwrap();
        assert_eq!(rt.make_qualified_pattern(None, None, false).unwrap(), "*");
        assert_eq!(rt.make_qualified_pattern(None, Some("f*"), true).unwrap(), "::f*");
        assert_eq!(rt.make_qualified_pattern(Some(a), None, false).unwrap(), "a::*");
        assert_eq!(rt.make_qualified_pattern(Some(a), Some("x"), true).unwrap(), "::a::x");
    }

    #[test]
    fn parent_of_global_is_empty() {
        let (rt, mut stack) = runtime();
        let global = rt.global_namespace().unwrap();
        assert_eq!(rt.parent(global).unwrap(), "");
        let b = rt.lookup(&mut stack, None, "::a::b", LookupOptions::create()).unwrap();
        assert_eq!(rt.parent(b).unwrap(), "::a");
    }

    #[test]
    fn normalize_name_qualifies_relative() {
        let (rt, mut stack) = runtime();
        rt.enter_namespace(&mut stack, "::a").unwrap();
        assert_eq!(rt.normalize_name(&mut stack, "b::::c").unwrap(), "::a::b::c");
        assert_eq!(rt.normalize_name(&mut stack, "::x::::y").unwrap(), "::x::y");
    }

    #[test]
    fn define_needs_existing_namespace() {
        let (rt, mut stack) = runtime();
        let err = rt
            .define(&mut stack, "::missing::foo", Entity::procedure())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        rt.enter_namespace(&mut stack, "::a").unwrap();
        assert_eq!(
            rt.define(&mut stack, "foo", Entity::procedure()).unwrap(),
            "::a::foo"
        );
        assert_eq!(
            rt.define(&mut stack, "::bar", Entity::command()).unwrap(),
            "::bar"
        );
    }

    #[test]
    fn global_namespace_cannot_be_deleted() {
        let (rt, mut stack) = runtime();
        let global = rt.global_namespace().unwrap();
        let err = rt.delete_namespace(&mut stack, global).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
