//! Export tables, import aliases, `forget`, and `origin`.
//!
//! An import is two records kept in step: an [`Entity::alias`] stored under
//! the importing namespace's absolute name, and an entry in that
//! namespace's import table mapping the alias to its target. The table is
//! what `forget` and `origin` consult; the alias entity is what command
//! resolution finds.

use std::collections::HashSet;

use crate::entity::Entity;
use crate::error::{NamespaceError, Result, wrap};
use crate::frame::{self, CallStack};
use crate::name;
use crate::runtime::{
    CommandLookup, LookupOptions, MatchOptions, Runtime, RuntimeState, qualified_pattern,
};
use crate::tree::NamespaceId;

impl Runtime {
    /// Edit or read a namespace's export patterns.
    ///
    /// `namespace` defaults to the current one. With `clear` the table is
    /// emptied first. With no patterns the (possibly just cleared) table is
    /// returned; otherwise the patterns are added and nothing is returned.
    /// Patterns must be unqualified.
    pub fn export(
        &self,
        stack: &mut CallStack,
        namespace: Option<NamespaceId>,
        patterns: &[&str],
        clear: bool,
    ) -> Result<Vec<String>> {
        let mut state = self.write()?;
        let namespace =
            namespace.unwrap_or_else(|| frame::current_namespace(&state.tree, stack));

        if let Some(pattern) = patterns.iter().find(|p| name::is_qualified(p)) {
            return Err(NamespaceError::invalid_argument(format!(
                "invalid export pattern {}: pattern can't specify a namespace",
                wrap(pattern)
            )));
        }

        let qualified = state.tree.qualified_name(namespace)?;
        let node = state.tree.get_mut(namespace)?;
        if node.is_deleted() {
            return Err(NamespaceError::invalid_state(format!(
                "namespace {} is deleted",
                wrap(&qualified)
            )));
        }

        if clear {
            node.export_patterns.clear();
        }

        if patterns.is_empty() {
            return Ok(node.export_patterns().map(str::to_string).collect());
        }

        for pattern in patterns {
            node.export_patterns.insert(pattern.to_string());
        }
        tracing::debug!(namespace = %qualified, ?patterns, "exported");
        Ok(Vec::new())
    }

    /// Import exported commands into the current namespace.
    ///
    /// Each pattern must be qualified by its source namespace. A command is
    /// imported when its tail matches both the pattern's tail and one of the
    /// source's export patterns. An existing entity under the local name is
    /// a conflict unless `force` is set, in which case it is replaced.
    ///
    /// With no patterns, returns the tails of the current namespace's
    /// imports. Otherwise returns the absolute names of the new aliases.
    pub fn import(
        &self,
        stack: &mut CallStack,
        patterns: &[&str],
        force: bool,
    ) -> Result<Vec<String>> {
        let mut state = self.write()?;
        let state = &mut *state;
        let current = frame::current_namespace(&state.tree, stack);
        let current_name = state.tree.qualified_name(current)?;

        if patterns.is_empty() {
            return Ok(state
                .tree
                .get(current)?
                .imports()
                .map(|(local, _)| name::tail_only(local).to_string())
                .collect());
        }

        if state.tree.get(current)?.is_deleted() {
            return Err(NamespaceError::invalid_state(format!(
                "namespace {} is deleted",
                wrap(&current_name)
            )));
        }

        let mut imported = Vec::new();

        for &pattern in patterns {
            if pattern.is_empty() {
                return Err(NamespaceError::invalid_argument("empty import pattern"));
            }

            let parts = name::split(pattern);
            if !parts.flags.qualified {
                return Err(NamespaceError::invalid_argument(
                    "import patterns must be qualified",
                ));
            }

            let source = self
                .find_in(&state.tree, stack, None, parts.qualifiers, LookupOptions::existing())
                .map_err(|_| {
                    NamespaceError::not_found(format!(
                        "unknown namespace in import pattern {}",
                        wrap(pattern)
                    ))
                })?;
            let source_name = state.tree.qualified_name(source)?;

            if source == current {
                return Err(NamespaceError::SelfReference(format!(
                    "import pattern {} tries to import from namespace {} into itself",
                    wrap(pattern),
                    wrap(&source_name)
                )));
            }

            let tails = self.exported_tails(state, stack, source, parts.tail)?;

            for tail in tails {
                let export_name = name::normalize_absolute(&name::make_qualified(&source_name, &tail));
                let import_name = name::normalize_absolute(&name::make_qualified(&current_name, &tail));

                if state.entities.exists(&import_name) {
                    if !force {
                        return Err(NamespaceError::conflict(format!(
                            "can't import command {}: already exists",
                            wrap(&tail)
                        )));
                    }
                    state.tree.get_mut(current)?.imports.remove(&import_name);
                    state.entities.remove(&import_name)?;
                }

                state
                    .entities
                    .add(&import_name, Entity::alias(export_name.as_str()))?;
                state
                    .tree
                    .get_mut(current)?
                    .imports
                    .insert(import_name.clone(), export_name.clone());

                tracing::debug!(alias = %import_name, target = %export_name, "imported");
                imported.push(import_name);
            }
        }

        Ok(imported)
    }

    /// Tails of visible entities in `source` matching `tail_pattern` and at
    /// least one export pattern.
    fn exported_tails(
        &self,
        state: &RuntimeState,
        stack: &mut CallStack,
        source: NamespaceId,
        tail_pattern: &str,
    ) -> Result<Vec<String>> {
        let node = state.tree.get(source)?;
        let exports: Vec<&str> = node.export_patterns().collect();
        if exports.is_empty() {
            return Ok(Vec::new());
        }

        let no_case = self.config().no_case;
        let options = MatchOptions {
            no_case,
            tail_only: true,
            ..MatchOptions::default()
        };
        let scoped = qualified_pattern(&state.tree, Some(source), Some(tail_pattern), true)?;
        let candidates = self.match_items_in(
            &state.tree,
            stack,
            Some(source),
            &state.entities.names(),
            Some(&scoped),
            options,
        )?;

        let source_name = state.tree.qualified_name(source)?;
        Ok(candidates
            .into_iter()
            .filter(|tail| {
                let full = name::normalize_absolute(&name::make_qualified(&source_name, tail));
                state.entities.get(&full).is_some_and(|e| !e.hidden)
            })
            .filter(|tail| {
                exports
                    .iter()
                    .any(|export| self.matcher().matches(tail, export, no_case))
            })
            .collect())
    }

    /// Remove import aliases from the current namespace.
    ///
    /// A qualified pattern is scoped to its namespace; an unqualified one
    /// matches aliases from any source. An alias goes if the pattern
    /// matches its local name, its target, or its origin. Returns how many
    /// were removed.
    pub fn forget(&self, stack: &mut CallStack, patterns: &[&str]) -> Result<usize> {
        let mut state = self.write()?;
        let state = &mut *state;
        let current = frame::current_namespace(&state.tree, stack);
        let no_case = self.config().no_case;
        let mut removed = 0;

        for &pattern in patterns {
            let parts = name::split(pattern);
            let scoped = if parts.flags.qualified {
                let namespace = self
                    .find_in(&state.tree, stack, None, parts.qualifiers, LookupOptions::existing())
                    .map_err(|_| {
                        NamespaceError::not_found(format!(
                            "unknown namespace in namespace forget pattern {}",
                            wrap(pattern)
                        ))
                    })?;
                qualified_pattern(&state.tree, Some(namespace), Some(parts.tail), true)?
            } else {
                name::make_absolute(&name::make_qualified("*", parts.tail))
            };

            let imports: Vec<(String, String)> = state
                .tree
                .get(current)?
                .imports()
                .map(|(local, target)| (local.to_string(), target.to_string()))
                .collect();

            let mut doomed = Vec::new();
            for (local, target) in imports {
                let hit = self.matcher().matches(&local, &scoped, no_case)
                    || self.matcher().matches(&target, &scoped, no_case)
                    || self
                        .origin_in(state, stack, Some(current), &local)
                        .is_ok_and(|origin| self.matcher().matches(&origin, &scoped, no_case));
                if hit {
                    doomed.push(local);
                }
            }

            for local in doomed {
                state.tree.get_mut(current)?.imports.remove(&local);
                if state.entities.exists(&local) {
                    state.entities.remove(&local)?;
                }
                tracing::debug!(alias = %local, "forgot import");
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Follow import and alias links from `name` to the command they end at.
    ///
    /// Unqualified names are looked up in `namespace`, defaulting to the
    /// current one. Fails if nothing resolves, if a name repeats, or after
    /// `max_alias_hops` hops.
    pub fn origin(
        &self,
        stack: &mut CallStack,
        namespace: Option<NamespaceId>,
        name: &str,
    ) -> Result<String> {
        let state = self.read()?;
        self.origin_in(&state, stack, namespace, name)
    }

    pub(crate) fn origin_in(
        &self,
        state: &RuntimeState,
        stack: &mut CallStack,
        namespace: Option<NamespaceId>,
        name: &str,
    ) -> Result<String> {
        let tree = &state.tree;
        let current = frame::current_namespace(tree, stack);
        let max_hops = self.config().max_alias_hops;

        let mut name = name.to_string();
        let mut hops = 0usize;
        let mut visited = HashSet::new();

        loop {
            let parts = name::split(&name);
            let import_namespace = if parts.flags.qualified {
                self.find_in(tree, stack, None, parts.qualifiers, LookupOptions::existing())?
            } else if parts.flags.absolute {
                tree.global()
            } else {
                namespace.unwrap_or(current)
            };
            let key = name::normalize_absolute(&name::make_qualified(
                &tree.qualified_name(import_namespace)?,
                parts.tail,
            ));

            if !visited.insert(key.clone()) {
                return Err(NamespaceError::AliasLoop(format!(
                    "alias loop detected at {}",
                    wrap(&key)
                )));
            }
            if hops > max_hops {
                return Err(NamespaceError::AliasLoop(format!(
                    "too many alias hops resolving {}",
                    wrap(&key)
                )));
            }

            let imported = tree
                .get(import_namespace)
                .ok()
                .and_then(|node| node.imports.get(&key).cloned());
            if let Some(target) = imported {
                tracing::trace!(from = %key, to = %target, "origin hop");
                name = target;
                hops += 1;
                continue;
            }

            let resolved = match state.entities.get(&key) {
                Some(_) => Ok(key),
                None if parts.flags.qualified
                    || parts.flags.absolute
                    || import_namespace == current =>
                {
                    self.resolve_command_in(state, stack, &name, CommandLookup::default())
                }
                None => global_command(state, parts.tail, &name),
            };

            match resolved {
                Ok(found) => match state.entities.get(&found).and_then(|e| e.alias_target().map(str::to_string)) {
                    Some(target) => {
                        name = name::make_absolute(&target);
                        hops += 1;
                    }
                    None => return Ok(found),
                },
                Err(err) if hops == 0 => return Err(err),
                Err(_) => return Ok(name::make_absolute(&name)),
            }
        }
    }
}

/// Fallback for an unqualified name looked up outside the current namespace.
fn global_command(state: &RuntimeState, tail: &str, name: &str) -> Result<String> {
    let key = name::make_absolute(tail);
    match state.entities.get(&key) {
        Some(entity) if !entity.hidden => Ok(key),
        _ => Err(NamespaceError::not_found(format!(
            "invalid command name {}",
            wrap(name)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, RuntimeConfig};

    fn setup() -> (Runtime, CallStack) {
        let rt = Runtime::default();
        let mut stack = rt.new_stack().unwrap();
        rt.enter_namespace(&mut stack, "::A").unwrap();
        rt.define(&mut stack, "foo", Entity::procedure()).unwrap();
        rt.define(&mut stack, "bar", Entity::procedure()).unwrap();
        rt.export(&mut stack, None, &["foo", "bar"], false).unwrap();
        stack.pop();
        (rt, stack)
    }

    #[test]
    fn export_rejects_qualified_patterns() {
        let (rt, mut stack) = setup();
        let err = rt.export(&mut stack, None, &["a::b"], false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid export pattern \"a::b\": pattern can't specify a namespace"
        );
    }

    #[test]
    fn export_lists_and_clears() {
        let (rt, mut stack) = setup();
        let a = rt.lookup(&mut stack, None, "::A", LookupOptions::existing()).unwrap();
        assert_eq!(rt.export(&mut stack, Some(a), &[], false).unwrap(), vec!["bar", "foo"]);
        assert!(rt.export(&mut stack, Some(a), &[], true).unwrap().is_empty());
    }

    #[test]
    fn import_requires_qualified_pattern() {
        let (rt, mut stack) = setup();
        let err = rt.import(&mut stack, &["foo"], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn import_unknown_namespace() {
        let (rt, mut stack) = setup();
        let err = rt.import(&mut stack, &["::Nope::*"], false).unwrap_err();
        assert_eq!(err.to_string(), "unknown namespace in import pattern \"::Nope::*\"");
    }

    #[test]
    fn import_into_self_is_rejected() {
        let (rt, mut stack) = setup();
        rt.enter_namespace(&mut stack, "::A").unwrap();
        let err = rt.import(&mut stack, &["::A::foo"], false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SelfReference);
    }

    #[test]
    fn unexported_commands_are_not_imported() {
        let (rt, mut stack) = setup();
        rt.enter_namespace(&mut stack, "::A").unwrap();
        rt.define(&mut stack, "private", Entity::procedure()).unwrap();
        stack.pop();

        rt.enter_namespace(&mut stack, "::B").unwrap();
        let imported = rt.import(&mut stack, &["::A::*"], false).unwrap();
        assert_eq!(imported, vec!["::B::bar", "::B::foo"]);
    }

    #[test]
    fn origin_follows_chain() {
        let (rt, mut stack) = setup();
        rt.enter_namespace(&mut stack, "::B").unwrap();
        rt.import(&mut stack, &["::A::foo"], false).unwrap();
        rt.export(&mut stack, None, &["foo"], false).unwrap();
        stack.pop();

        rt.enter_namespace(&mut stack, "::C").unwrap();
        rt.import(&mut stack, &["::B::foo"], false).unwrap();
        assert_eq!(rt.origin(&mut stack, None, "foo").unwrap(), "::A::foo");
    }

    #[test]
    fn origin_of_unknown_name_fails() {
        let (rt, mut stack) = setup();
        let err = rt.origin(&mut stack, None, "nothing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn origin_detects_alias_cycles() {
        let (rt, mut stack) = setup();
        rt.define(&mut stack, "::x", Entity::alias("::y")).unwrap();
        rt.define(&mut stack, "::y", Entity::alias("::x")).unwrap();
        let err = rt.origin(&mut stack, None, "::x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AliasLoop);
    }

    #[test]
    fn origin_respects_hop_bound() {
        let rt = Runtime::new(RuntimeConfig::default().with_max_alias_hops(2));
        let mut stack = rt.new_stack().unwrap();
        rt.define(&mut stack, "::a1", Entity::alias("::a2")).unwrap();
        rt.define(&mut stack, "::a2", Entity::alias("::a3")).unwrap();
        rt.define(&mut stack, "::a3", Entity::alias("::a4")).unwrap();
        rt.define(&mut stack, "::a4", Entity::command()).unwrap();
        let err = rt.origin(&mut stack, None, "::a1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AliasLoop);

        assert_eq!(rt.origin(&mut stack, None, "::a3").unwrap(), "::a4");
    }
}
